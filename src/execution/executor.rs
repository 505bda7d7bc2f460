//! Task executor - runs one task over the run's capsules

use crate::core::{
    artifact::collect_artifacts,
    component::ComponentId,
    context::BuildContext,
    result::{BuildError, BuiltTaskResult, ComponentResult, ErrorKind, TaskResults},
    task::BuildTask,
};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinError;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};

/// Normalized result of one task plus the capsules it left in doubt
#[derive(Debug, Clone)]
pub struct TaskRun {
    pub results: TaskResults,

    /// Components whose capsules must not be pooled (timed out mid-write)
    pub tainted: Vec<ComponentId>,
}

/// Executes single tasks under a timeout
#[derive(Debug, Clone, Default)]
pub struct TaskExecutor {
    timeout: Option<Duration>,
}

impl TaskExecutor {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    /// Run a task and normalize its result set.
    ///
    /// Every component of the context gets exactly one result; unknown
    /// components are dropped. Successful components of a task with an
    /// artifact rule get their artifacts selected from the capsule.
    /// The task runs on its own tokio task, so a panic inside it fails the
    /// task's components instead of unwinding through the run.
    pub async fn execute(&self, task: Arc<dyn BuildTask>, ctx: &BuildContext) -> TaskRun {
        let descriptor = task.descriptor();
        let started_at = Utc::now();
        info!(task = %descriptor.name, phase = %descriptor.phase, "executing task");

        let mut handle = {
            let task = task.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move { task.execute(&ctx).await })
        };
        let outcome = match self.timeout {
            Some(limit) => match timeout(limit, &mut handle).await {
                Ok(joined) => Some(joined),
                Err(_) => {
                    handle.abort();
                    // wait until the task's workers are dropped
                    let _ = handle.await;
                    None
                }
            },
            None => Some(handle.await),
        };

        let (mut components, timed_out) = match outcome {
            Some(Ok(Ok(built))) => (built.into_map(), false),
            Some(Ok(Err(e))) => {
                warn!(task = %descriptor.name, error = %e, "task failed");
                let error = BuildError::fatal(ErrorKind::ComponentBuildFailure, e.to_string());
                (BuiltTaskResult::failed_for_all(ctx.component_ids(), &error).into_map(), false)
            }
            Some(Err(join_error)) => {
                let message = panic_message(join_error);
                error!(task = %descriptor.name, error = %message, "task panicked");
                let error = BuildError::fatal(
                    ErrorKind::ComponentBuildFailure,
                    format!("task '{}' panicked: {}", descriptor.name, message),
                );
                (BuiltTaskResult::failed_for_all(ctx.component_ids(), &error).into_map(), false)
            }
            None => {
                warn!(task = %descriptor.name, "task timed out, keeping finished component results");
                (ctx.collector.snapshot().await, true)
            }
        };

        components.retain(|id, _| {
            let known = ctx.entry(id).is_some();
            if !known {
                warn!(task = %descriptor.name, component = %id, "dropping result for unknown component");
            }
            known
        });

        let mut tainted = Vec::new();
        for id in ctx.component_ids() {
            if components.contains_key(id) {
                continue;
            }
            let result = if timed_out {
                tainted.push(id.clone());
                let secs = self.timeout.map(|d| d.as_secs()).unwrap_or_default();
                ComponentResult::failure(
                    id.clone(),
                    BuildError::fatal(ErrorKind::Timeout, format!("task '{}' timed out after {}s", descriptor.name, secs)),
                )
            } else if ctx.is_cancelled() {
                ComponentResult::aborted(id.clone(), BuildError::fatal(ErrorKind::Cancelled, "build cancelled"))
            } else {
                ComponentResult::aborted(
                    id.clone(),
                    BuildError::fatal(
                        ErrorKind::ComponentBuildFailure,
                        format!("task '{}' returned no result for this component", descriptor.name),
                    ),
                )
            };
            components.insert(id.clone(), result);
        }

        for result in components.values_mut() {
            result.normalize();
        }

        if let Some(rule) = &descriptor.artifacts {
            select_artifacts(ctx, &descriptor.name, rule, &mut components).await;
        }

        TaskRun {
            results: TaskResults {
                task: descriptor.name.clone(),
                phase: descriptor.phase,
                order: descriptor.order,
                components,
                started_at,
                completed_at: Utc::now(),
                timed_out,
            },
            tainted,
        }
    }
}

fn panic_message(error: JoinError) -> String {
    match error.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string()),
        Err(error) => error.to_string(),
    }
}

async fn select_artifacts(
    ctx: &BuildContext,
    task: &str,
    rule: &crate::core::artifact::ArtifactRule,
    components: &mut BTreeMap<ComponentId, ComponentResult>,
) {
    for (id, result) in components.iter_mut() {
        if !result.is_success() {
            continue;
        }
        let Some(entry) = ctx.entry(id) else {
            continue;
        };

        let dir = entry.dir().to_path_buf();
        let rule = rule.clone();
        let task_name = task.to_string();
        let selected = tokio::task::spawn_blocking(move || collect_artifacts(&dir, &rule, &task_name))
            .await
            .map_err(|e| e.to_string())
            .and_then(|r| r.map_err(|e| e.to_string()));

        match selected {
            Ok(artifacts) => {
                debug!(task, component = %id, count = artifacts.len(), "artifacts selected");
                result.artifacts = artifacts;
            }
            Err(message) => {
                warn!(task, component = %id, error = %message, "artifact selection failed");
                result.push_diagnostic(BuildError::fatal(
                    ErrorKind::ComponentBuildFailure,
                    format!("artifact selection failed: {}", message),
                ));
                result.normalize();
            }
        }
    }
}
