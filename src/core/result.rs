//! Per-component task results and the run-wide results list

use crate::core::{
    artifact::Artifact,
    component::ComponentId,
    task::TaskPhase,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::warn;

/// Outcome of one task for one component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Success,
    Failure,
    /// Never ran (cancelled, skipped because a prerequisite failed)
    Aborted,
}

/// Whether an error fails the component or is informational
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Fatal,
}

/// Classification of build errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    CapsuleCreation,
    CompilerContractViolation,
    ComponentBuildFailure,
    HookFailure,
    Timeout,
    Cancelled,
    DependencyFailed,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::CapsuleCreation => "CapsuleCreationError",
            ErrorKind::CompilerContractViolation => "CompilerContractViolation",
            ErrorKind::ComponentBuildFailure => "ComponentBuildFailure",
            ErrorKind::HookFailure => "HookFailure",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::DependencyFailed => "DependencyFailed",
        };
        f.write_str(name)
    }
}

/// An error or warning reported for a component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind}: {message}")]
pub struct BuildError {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub message: String,

    /// Source file the error refers to, relative to the component dir
    pub file: Option<PathBuf>,
}

impl BuildError {
    pub fn fatal(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: Severity::Fatal,
            message: message.into(),
            file: None,
        }
    }

    pub fn warning(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: Severity::Warning,
            message: message.into(),
            file: None,
        }
    }

    pub fn in_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Fatal
    }
}

/// Result of one task for one component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentResult {
    pub component: ComponentId,
    pub status: ComponentStatus,

    /// Files promoted to artifacts by this task
    pub artifacts: Vec<Artifact>,

    /// Fatal errors
    pub errors: Vec<BuildError>,

    /// Non-fatal diagnostics
    pub warnings: Vec<BuildError>,

    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl ComponentResult {
    fn new(component: ComponentId, status: ComponentStatus) -> Self {
        let now = Utc::now();
        Self {
            component,
            status,
            artifacts: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            started_at: now,
            completed_at: now,
        }
    }

    pub fn success(component: ComponentId) -> Self {
        Self::new(component, ComponentStatus::Success)
    }

    pub fn failure(component: ComponentId, error: BuildError) -> Self {
        Self::new(component, ComponentStatus::Failure).with_diagnostic(error)
    }

    pub fn aborted(component: ComponentId, error: BuildError) -> Self {
        Self::new(component, ComponentStatus::Aborted).with_diagnostic(error)
    }

    /// Record a diagnostic in the matching list, by severity
    pub fn with_diagnostic(mut self, error: BuildError) -> Self {
        self.push_diagnostic(error);
        self
    }

    pub fn push_diagnostic(&mut self, error: BuildError) {
        match error.severity {
            Severity::Fatal => self.errors.push(error),
            Severity::Warning => self.warnings.push(error),
        }
    }

    pub fn started(mut self, at: DateTime<Utc>) -> Self {
        self.started_at = at;
        self
    }

    pub fn finish(mut self) -> Self {
        self.completed_at = Utc::now();
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ComponentStatus::Success
    }

    pub fn duration_ms(&self) -> i64 {
        (self.completed_at - self.started_at).num_milliseconds()
    }

    /// Enforce result invariants: a fatal error never leaves a result
    /// successful, and only successful results carry artifacts.
    pub fn normalize(&mut self) {
        if self.status == ComponentStatus::Success && !self.errors.is_empty() {
            self.status = ComponentStatus::Failure;
        }
        if self.status != ComponentStatus::Success {
            self.artifacts.clear();
        }
    }
}

/// What a task returns: one result per component it processed
#[derive(Debug, Clone, Default)]
pub struct BuiltTaskResult {
    pub components: Vec<ComponentResult>,
}

impl BuiltTaskResult {
    pub fn new(components: Vec<ComponentResult>) -> Self {
        Self { components }
    }

    /// Same error for every listed component
    pub fn failed_for_all<'a, I>(ids: I, error: &BuildError) -> Self
    where
        I: IntoIterator<Item = &'a ComponentId>,
    {
        Self {
            components: ids
                .into_iter()
                .map(|id| ComponentResult::failure(id.clone(), error.clone()))
                .collect(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.components.iter().all(ComponentResult::is_success)
    }

    pub fn into_map(self) -> BTreeMap<ComponentId, ComponentResult> {
        let mut map = BTreeMap::new();
        for result in self.components {
            if map.contains_key(&result.component) {
                warn!(component = %result.component, "duplicate component result ignored");
                continue;
            }
            map.insert(result.component.clone(), result);
        }
        map
    }
}

/// Results of one executed task across all components
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResults {
    pub task: String,
    pub phase: TaskPhase,
    pub order: i32,
    pub components: BTreeMap<ComponentId, ComponentResult>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,

    /// The task hit its timeout
    pub timed_out: bool,
}

impl TaskResults {
    pub fn get(&self, component: &ComponentId) -> Option<&ComponentResult> {
        self.components.get(component)
    }

    pub fn is_success(&self) -> bool {
        self.components.values().all(ComponentResult::is_success)
    }

    pub fn succeeded(&self) -> usize {
        self.components.values().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.components.len() - self.succeeded()
    }

    pub fn failed_components(&self) -> Vec<&ComponentId> {
        self.components
            .values()
            .filter(|r| !r.is_success())
            .map(|r| &r.component)
            .collect()
    }

    pub fn duration_ms(&self) -> i64 {
        (self.completed_at - self.started_at).num_milliseconds()
    }
}

/// Ordered, append-only record of every executed task.
///
/// Tasks receive a clone through the build context; only the orchestrator
/// holds a copy it pushes to.
#[derive(Debug, Clone, Default)]
pub struct TaskResultsList {
    entries: Vec<Arc<TaskResults>>,
}

impl TaskResultsList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, results: TaskResults) {
        self.entries.push(Arc::new(results));
    }

    /// Number of tasks recorded so far
    pub fn version(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskResults> {
        self.entries.iter().map(|e| e.as_ref())
    }

    pub fn by_task(&self, task: &str) -> Option<&TaskResults> {
        self.iter().find(|r| r.task == task)
    }

    pub fn get(&self, task: &str, component: &ComponentId) -> Option<&ComponentResult> {
        self.by_task(task).and_then(|r| r.get(component))
    }

    /// Results of every task for one component, in execution order
    pub fn for_component<'a>(
        &'a self,
        component: &'a ComponentId,
    ) -> impl Iterator<Item = (&'a str, &'a ComponentResult)> + 'a {
        self.iter()
            .filter_map(move |r| r.get(component).map(|c| (r.task.as_str(), c)))
    }

    /// Artifacts of successful results for one component, sorted by path
    pub fn artifacts_for<'a>(&'a self, component: &'a ComponentId) -> Vec<&'a Artifact> {
        let mut artifacts: Vec<&Artifact> = self
            .for_component(component)
            .filter(|(_, r)| r.is_success())
            .flat_map(|(_, r)| r.artifacts.iter())
            .collect();
        artifacts.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        artifacts
    }

    /// Errors and warnings across all tasks for one component
    pub fn diagnostics_for<'a>(&'a self, component: &'a ComponentId) -> Vec<(&'a str, &'a BuildError)> {
        self.for_component(component)
            .flat_map(|(task, r)| r.errors.iter().chain(r.warnings.iter()).map(move |e| (task, e)))
            .collect()
    }

    pub fn has_failures(&self) -> bool {
        self.iter().any(|r| !r.is_success())
    }
}

/// Task-local, append-only sink for per-component results.
///
/// Workers record as they finish so completed results survive a task timeout.
#[derive(Debug, Clone, Default)]
pub struct ResultCollector {
    inner: Arc<Mutex<BTreeMap<ComponentId, ComponentResult>>>,
}

impl ResultCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a result; the first result for a component wins
    pub async fn record(&self, result: ComponentResult) {
        let mut inner = self.inner.lock().await;
        if inner.contains_key(&result.component) {
            warn!(component = %result.component, "result already recorded, ignoring");
            return;
        }
        inner.insert(result.component.clone(), result);
    }

    pub async fn snapshot(&self) -> BTreeMap<ComponentId, ComponentResult> {
        self.inner.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}
