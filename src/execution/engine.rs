//! Main execution engine - orchestrates a build run

use crate::{
    capsule::CapsuleManager,
    core::{
        artifact::{collect_artifacts, Artifact},
        component::{BuildTarget, ComponentId},
        context::{BuildContext, CapsuleEntry},
        result::{BuildError, ComponentStatus, ErrorKind, TaskResultsList},
        state::{CancellationFlag, ExecutionStatus, RunState},
        task::{BuildTask, TaskDescriptor, TaskPhase},
    },
    execution::{
        order_tasks, BuildOutcome, CapsuleFailure, PipelineAbort, PipelineError, SchedulingStrategy,
        TaskExecutor,
    },
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Events that can occur during a build run
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    PipelineStarted {
        run_id: Uuid,
        workspace: String,
        tasks: usize,
        components: usize,
    },
    CapsuleAcquired {
        component: ComponentId,
        path: PathBuf,
        reused: bool,
    },
    CapsuleFailed {
        component: ComponentId,
        error: String,
    },
    TaskStarted {
        task: String,
        phase: TaskPhase,
    },
    ComponentFinished {
        task: String,
        component: ComponentId,
        status: ComponentStatus,
    },
    TaskTimedOut {
        task: String,
    },
    TaskCompleted {
        task: String,
        succeeded: usize,
        failed: usize,
        duration_ms: i64,
    },
    HookFailed {
        task: String,
        hook: String,
        error: String,
    },
    PipelineCompleted {
        run_id: Uuid,
        status: ExecutionStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Run-wide engine settings
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Workspace (build file) name
    pub workspace: String,

    /// Per-component parallelism inside a task
    pub strategy: SchedulingStrategy,

    /// Wall-clock limit of a single task
    pub task_timeout: Option<Duration>,

    /// Variables exposed to command templates
    pub variables: HashMap<String, String>,
}

struct RegisteredTask {
    task: Arc<dyn BuildTask>,
    /// Read once at registration
    has_hooks: bool,
}

/// Orchestrates capsules, hooks and tasks for a set of build targets
pub struct ExecutionEngine {
    config: EngineConfig,
    capsules: Arc<CapsuleManager>,
    executor: TaskExecutor,
    tasks: Vec<RegisteredTask>,
    event_handlers: Mutex<Vec<EventHandler>>,
    cancel: CancellationFlag,
}

impl ExecutionEngine {
    pub fn new(config: EngineConfig, capsules: Arc<CapsuleManager>) -> Self {
        let executor = TaskExecutor::new(config.task_timeout);
        Self {
            config,
            capsules,
            executor,
            tasks: Vec::new(),
            event_handlers: Mutex::new(Vec::new()),
            cancel: CancellationFlag::new(),
        }
    }

    /// Register a task; registration order breaks ordering ties
    pub fn register_task(&mut self, task: Arc<dyn BuildTask>) {
        let has_hooks = task.has_hooks();
        self.tasks.push(RegisteredTask { task, has_hooks });
    }

    pub fn with_task(mut self, task: Arc<dyn BuildTask>) -> Self {
        self.register_task(task);
        self
    }

    /// Share an externally owned cancellation flag
    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_flag(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    pub fn capsules(&self) -> &Arc<CapsuleManager> {
        &self.capsules
    }

    pub fn task_descriptors(&self) -> Vec<&TaskDescriptor> {
        self.tasks.iter().map(|t| t.task.descriptor()).collect()
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Arc::new(handler));
    }

    /// Emit an event to all handlers
    fn emit_event(&self, event: ExecutionEvent) {
        let handlers = self
            .event_handlers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        for handler in handlers.iter() {
            handler(event.clone());
        }
    }

    /// Build the targets through every registered task.
    ///
    /// Returns `Err` only when the run is stopped by misconfiguration or a
    /// failing hook; component failures are reported in the outcome.
    pub async fn run(&self, targets: Vec<BuildTarget>) -> Result<BuildOutcome, PipelineAbort> {
        let mut state = RunState::new();
        let run_id = state.run_id;

        let descriptors = self.task_descriptors();
        let order = match order_tasks(&descriptors) {
            Ok(order) => order,
            Err(error) => {
                error!(%run_id, error = %error, "invalid task configuration");
                state.finish(ExecutionStatus::Aborted);
                return Err(PipelineAbort {
                    run_id,
                    error,
                    state,
                    results: TaskResultsList::new(),
                    capsule_failures: Vec::new(),
                });
            }
        };

        info!(
            %run_id,
            workspace = %self.config.workspace,
            tasks = order.len(),
            components = targets.len(),
            "starting build run"
        );
        state.start(order.len(), targets.len());
        self.emit_event(ExecutionEvent::PipelineStarted {
            run_id,
            workspace: self.config.workspace.clone(),
            tasks: order.len(),
            components: targets.len(),
        });

        let (entries, capsule_failures) = self.acquire_capsules(targets).await;
        let entries: Arc<[CapsuleEntry]> = entries.into();

        let mut base = BuildContext::new(run_id, &self.config.workspace, entries.clone());
        base.cancel = self.cancel.clone();
        base.strategy = self.config.strategy;
        base.variables = Arc::new(self.config.variables.clone());

        let mut results = TaskResultsList::new();

        if let Err(error) = self.run_hooks(&order, &base, &results, Hook::PreBuild).await {
            return Err(self
                .abort(run_id, state, error, results, capsule_failures, &entries)
                .await);
        }

        let mut tainted: HashSet<ComponentId> = HashSet::new();
        for &index in &order {
            if self.cancel.is_cancelled() {
                warn!(%run_id, "build cancelled, skipping remaining tasks");
                break;
            }

            let task = &self.tasks[index].task;
            let descriptor = task.descriptor();
            self.emit_event(ExecutionEvent::TaskStarted {
                task: descriptor.name.clone(),
                phase: descriptor.phase,
            });

            let ctx = base.for_task(&descriptor.name, results.clone());
            let run = self.executor.execute(task.clone(), &ctx).await;
            tainted.extend(run.tainted);

            if run.results.timed_out {
                self.emit_event(ExecutionEvent::TaskTimedOut {
                    task: descriptor.name.clone(),
                });
            }
            for result in run.results.components.values() {
                self.emit_event(ExecutionEvent::ComponentFinished {
                    task: descriptor.name.clone(),
                    component: result.component.clone(),
                    status: result.status,
                });
            }
            self.emit_event(ExecutionEvent::TaskCompleted {
                task: descriptor.name.clone(),
                succeeded: run.results.succeeded(),
                failed: run.results.failed(),
                duration_ms: run.results.duration_ms(),
            });

            results.push(run.results);
            state.task_completed();
        }

        let cancelled = self.cancel.is_cancelled();
        if !cancelled {
            if let Err(error) = self.run_hooks(&order, &base, &results, Hook::PostBuild).await {
                self.discard_tainted(&entries, &tainted);
                return Err(self
                    .abort(run_id, state, error, results, capsule_failures, &entries)
                    .await);
            }
        }

        let artifacts_by_component = self.final_artifacts(&results, &entries).await;

        if cancelled {
            for entry in entries.iter() {
                self.capsules.discard(&entry.capsule);
            }
        } else {
            self.discard_tainted(&entries, &tainted);
        }
        self.release_capsules(&entries).await;

        let success = !cancelled && capsule_failures.is_empty() && !results.has_failures();
        let status = if cancelled {
            ExecutionStatus::Cancelled
        } else if success {
            ExecutionStatus::Completed
        } else {
            ExecutionStatus::Failed
        };

        let mut outcome = BuildOutcome {
            run_id,
            state,
            success,
            cancelled,
            results,
            artifacts_by_component,
            capsule_failures,
        };
        outcome.state.failed_components = outcome.failed_components().len();
        outcome.state.finish(status);

        info!(%run_id, status = %status, artifacts = outcome.artifact_count(), "build run finished");
        self.emit_event(ExecutionEvent::PipelineCompleted { run_id, status });
        Ok(outcome)
    }

    async fn acquire_capsules(&self, targets: Vec<BuildTarget>) -> (Vec<CapsuleEntry>, Vec<CapsuleFailure>) {
        let mut entries = Vec::with_capacity(targets.len());
        let mut failures = Vec::new();

        for target in targets {
            match self.capsules.acquire(&target).await {
                Ok(capsule) => {
                    self.emit_event(ExecutionEvent::CapsuleAcquired {
                        component: target.id().clone(),
                        path: capsule.path().to_path_buf(),
                        reused: capsule.is_reused(),
                    });
                    entries.push(CapsuleEntry { target, capsule });
                }
                Err(e) => {
                    warn!(component = %target.id(), error = %e, "excluding component without capsule");
                    self.emit_event(ExecutionEvent::CapsuleFailed {
                        component: target.id().clone(),
                        error: e.to_string(),
                    });
                    failures.push(CapsuleFailure {
                        component: target.id().clone(),
                        error: BuildError::fatal(ErrorKind::CapsuleCreation, e.to_string()),
                    });
                }
            }
        }

        (entries, failures)
    }

    async fn run_hooks(
        &self,
        order: &[usize],
        base: &BuildContext,
        results: &TaskResultsList,
        hook: Hook,
    ) -> Result<(), PipelineError> {
        for &index in order {
            let registered = &self.tasks[index];
            if !registered.has_hooks {
                continue;
            }
            let name = &registered.task.descriptor().name;
            let ctx = base.for_task(name, results.clone());
            let outcome = match hook {
                Hook::PreBuild => registered.task.pre_build(&ctx).await,
                Hook::PostBuild => registered.task.post_build(&ctx).await,
            };
            if let Err(e) = outcome {
                error!(task = %name, hook = hook.as_str(), error = %e, "hook failed");
                self.emit_event(ExecutionEvent::HookFailed {
                    task: name.clone(),
                    hook: hook.as_str().to_string(),
                    error: e.to_string(),
                });
                return Err(PipelineError::HookFailure {
                    task: name.clone(),
                    hook: hook.as_str().to_string(),
                    message: e.to_string(),
                });
            }
        }
        Ok(())
    }

    async fn abort(
        &self,
        run_id: Uuid,
        mut state: RunState,
        error: PipelineError,
        results: TaskResultsList,
        capsule_failures: Vec<CapsuleFailure>,
        entries: &[CapsuleEntry],
    ) -> PipelineAbort {
        self.release_capsules(entries).await;
        state.finish(ExecutionStatus::Aborted);
        self.emit_event(ExecutionEvent::PipelineCompleted {
            run_id,
            status: ExecutionStatus::Aborted,
        });
        PipelineAbort {
            run_id,
            error,
            state,
            results,
            capsule_failures,
        }
    }

    /// Capsules left mid-write by a timed-out task are never pooled
    fn discard_tainted(&self, entries: &[CapsuleEntry], tainted: &HashSet<ComponentId>) {
        for entry in entries.iter().filter(|e| tainted.contains(e.id())) {
            self.capsules.discard(&entry.capsule);
        }
    }

    async fn release_capsules(&self, entries: &[CapsuleEntry]) {
        for entry in entries {
            if let Err(e) = self.capsules.release(&entry.capsule).await {
                warn!(component = %entry.id(), error = %e, "failed to release capsule");
            }
        }
    }

    /// Union of artifacts over successful results, re-selected from the
    /// capsules so hashes reflect the final files. Later tasks win on path.
    async fn final_artifacts(
        &self,
        results: &TaskResultsList,
        entries: &[CapsuleEntry],
    ) -> BTreeMap<ComponentId, Vec<Artifact>> {
        let rules: HashMap<&str, &crate::core::artifact::ArtifactRule> = self
            .tasks
            .iter()
            .filter_map(|t| {
                let d = t.task.descriptor();
                d.artifacts.as_ref().map(|rule| (d.name.as_str(), rule))
            })
            .collect();

        let mut by_component = BTreeMap::new();
        for entry in entries {
            let mut merged: BTreeMap<PathBuf, Artifact> = BTreeMap::new();
            for (task, result) in results.for_component(entry.id()) {
                if !result.is_success() {
                    continue;
                }
                let Some(rule) = rules.get(task) else {
                    continue;
                };
                let dir = entry.dir().to_path_buf();
                let rule = (*rule).clone();
                let task_name = task.to_string();
                let selected =
                    tokio::task::spawn_blocking(move || collect_artifacts(&dir, &rule, &task_name)).await;
                match selected {
                    Ok(Ok(artifacts)) => {
                        for artifact in artifacts {
                            merged.insert(artifact.relative_path.clone(), artifact);
                        }
                    }
                    Ok(Err(e)) => warn!(component = %entry.id(), task, error = %e, "final artifact selection failed"),
                    Err(e) => warn!(component = %entry.id(), task, error = %e, "final artifact selection panicked"),
                }
            }
            by_component.insert(entry.id().clone(), merged.into_values().collect());
        }
        by_component
    }
}

#[derive(Debug, Clone, Copy)]
enum Hook {
    PreBuild,
    PostBuild,
}

impl Hook {
    fn as_str(&self) -> &'static str {
        match self {
            Hook::PreBuild => "pre_build",
            Hook::PostBuild => "post_build",
        }
    }
}
