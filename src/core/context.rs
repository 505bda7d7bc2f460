//! Build context handed to every task

use crate::capsule::Capsule;
use crate::core::{
    component::{BuildTarget, ComponentId},
    result::{
        BuildError, BuiltTaskResult, ComponentResult, ErrorKind, ResultCollector, TaskResultsList,
    },
    state::CancellationFlag,
};
use crate::execution::SchedulingStrategy;
use chrono::Utc;
use regex::{Captures, Regex};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error};
use uuid::Uuid;

/// A component paired with the capsule it is built in
#[derive(Debug, Clone)]
pub struct CapsuleEntry {
    pub target: BuildTarget,
    pub capsule: Arc<Capsule>,
}

impl CapsuleEntry {
    pub fn id(&self) -> &ComponentId {
        self.target.id()
    }

    /// Component directory inside the capsule
    pub fn dir(&self) -> &Path {
        self.capsule.path()
    }
}

/// Read-only view of a run given to a task.
///
/// Cloning is cheap; the targets and the results snapshot are shared.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub run_id: Uuid,

    /// Workspace (build file) name
    pub workspace: String,

    /// Components of the run with their capsules, in build order
    pub targets: Arc<[CapsuleEntry]>,

    /// Results of the tasks executed before this one
    pub previous: TaskResultsList,

    /// Name of the task the context was built for
    pub current_task: String,

    pub collector: ResultCollector,

    pub cancel: CancellationFlag,

    /// Per-component parallelism inside a task
    pub strategy: SchedulingStrategy,

    /// User variables available to command templates
    pub variables: Arc<HashMap<String, String>>,
}

impl BuildContext {
    pub fn new(run_id: Uuid, workspace: &str, targets: Arc<[CapsuleEntry]>) -> Self {
        Self {
            run_id,
            workspace: workspace.to_string(),
            targets,
            previous: TaskResultsList::new(),
            current_task: String::new(),
            collector: ResultCollector::new(),
            cancel: CancellationFlag::new(),
            strategy: SchedulingStrategy::default(),
            variables: Arc::new(HashMap::new()),
        }
    }

    /// Context for the next task: fresh collector, current results snapshot
    pub fn for_task(&self, task: &str, previous: TaskResultsList) -> Self {
        Self {
            previous,
            current_task: task.to_string(),
            collector: ResultCollector::new(),
            ..self.clone()
        }
    }

    pub fn component_ids(&self) -> impl Iterator<Item = &ComponentId> {
        self.targets.iter().map(CapsuleEntry::id)
    }

    pub fn entry(&self, id: &ComponentId) -> Option<&CapsuleEntry> {
        self.targets.iter().find(|e| e.id() == id)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Variables for one component: user variables plus built-ins
    pub fn variables_for(&self, entry: &CapsuleEntry) -> HashMap<String, String> {
        let mut vars = (*self.variables).clone();
        let id = entry.id();
        vars.insert("component".to_string(), id.to_string());
        vars.insert("name".to_string(), id.full_name());
        vars.insert("version".to_string(), id.version.clone());
        vars.insert("capsule_dir".to_string(), entry.dir().display().to_string());
        vars.insert("task".to_string(), self.current_task.clone());
        vars.insert("run_id".to_string(), self.run_id.to_string());
        vars
    }

    /// Run `f` for every component under the context's scheduling strategy.
    ///
    /// Each finished result is recorded into the collector as soon as it is
    /// available. Components not launched because the run was cancelled come
    /// back `Aborted`; a worker that panics yields a `Failure`. The returned
    /// results follow target order.
    pub async fn for_each_component<F, Fut>(&self, f: F) -> BuiltTaskResult
    where
        F: Fn(BuildContext, CapsuleEntry) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ComponentResult> + Send + 'static,
    {
        let limit = match self.strategy {
            SchedulingStrategy::Sequential => 1,
            SchedulingStrategy::Parallel => self.targets.len().max(1),
            SchedulingStrategy::LimitedParallel(n) => n.max(1),
        };
        let semaphore = Arc::new(Semaphore::new(limit));
        let f = Arc::new(f);
        let mut join_set = JoinSet::new();
        let mut launched: HashSet<ComponentId> = HashSet::new();

        for entry in self.targets.iter() {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            if self.is_cancelled() {
                debug!(component = %entry.id(), "cancelled before launch");
                break;
            }

            launched.insert(entry.id().clone());
            let ctx = self.clone();
            let entry = entry.clone();
            let f = f.clone();
            join_set.spawn(async move {
                let _permit = permit;
                let started = Utc::now();
                let result = f(ctx.clone(), entry).await.started(started).finish();
                ctx.collector.record(result.clone()).await;
                result
            });
        }

        let mut finished: HashMap<ComponentId, ComponentResult> = HashMap::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(result) => {
                    finished.insert(result.component.clone(), result);
                }
                Err(e) => error!(task = %self.current_task, error = %e, "component worker failed"),
            }
        }

        let mut components = Vec::with_capacity(self.targets.len());
        for entry in self.targets.iter() {
            let id = entry.id();
            if let Some(result) = finished.remove(id) {
                components.push(result);
                continue;
            }
            let result = if launched.contains(id) {
                ComponentResult::failure(
                    id.clone(),
                    BuildError::fatal(ErrorKind::ComponentBuildFailure, "component worker panicked"),
                )
            } else {
                ComponentResult::aborted(
                    id.clone(),
                    BuildError::fatal(ErrorKind::Cancelled, "build cancelled before component started"),
                )
            };
            self.collector.record(result.clone()).await;
            components.push(result);
        }

        BuiltTaskResult::new(components)
    }
}

static PLACEHOLDER: OnceLock<Option<Regex>> = OnceLock::new();

/// Substitute `{{ key }}` placeholders in a template.
///
/// Single pass: substituted values are never expanded again. Unknown keys
/// are left as written.
pub fn render_template(template: &str, variables: &HashMap<String, String>) -> String {
    let placeholder = PLACEHOLDER.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.-]+)\s*\}\}").ok());
    let Some(placeholder) = placeholder else {
        return template.to_string();
    };
    placeholder
        .replace_all(template, |caps: &Captures| match variables.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}
