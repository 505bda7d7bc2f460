//! What a build run returns

use crate::core::{
    artifact::Artifact,
    component::ComponentId,
    result::{BuildError, TaskResultsList},
    state::{ExecutionStatus, RunState},
};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use uuid::Uuid;

/// Run-level errors that stop a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("duplicate task name '{0}'")]
    DuplicateTask(String),

    #[error("task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    #[error("task '{task}' depends on '{dependency}', which is not ordered before it")]
    UnresolvableOrdering { task: String, dependency: String },

    #[error("{hook} hook of task '{task}' failed: {message}")]
    HookFailure {
        task: String,
        hook: String,
        message: String,
    },
}

/// A component whose capsule could not be created
#[derive(Debug, Clone)]
pub struct CapsuleFailure {
    pub component: ComponentId,
    pub error: BuildError,
}

/// Result of a run that executed its tasks
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub run_id: Uuid,

    pub state: RunState,

    /// Every component succeeded in every task and got a capsule
    pub success: bool,

    pub cancelled: bool,

    pub results: TaskResultsList,

    /// Artifacts of successful task results per component, sorted by path
    pub artifacts_by_component: BTreeMap<ComponentId, Vec<Artifact>>,

    pub capsule_failures: Vec<CapsuleFailure>,
}

impl BuildOutcome {
    pub fn status(&self) -> ExecutionStatus {
        self.state.status
    }

    /// Components with a failed capsule or any non-successful result
    pub fn failed_components(&self) -> BTreeSet<ComponentId> {
        let mut failed: BTreeSet<ComponentId> = self
            .capsule_failures
            .iter()
            .map(|f| f.component.clone())
            .collect();
        for task in self.results.iter() {
            failed.extend(task.failed_components().into_iter().cloned());
        }
        failed
    }

    pub fn artifact_count(&self) -> usize {
        self.artifacts_by_component.values().map(Vec::len).sum()
    }
}

/// A run stopped before completion by misconfiguration or a failing hook.
///
/// Carries whatever results were recorded before the stop.
#[derive(Debug, Clone, Error)]
#[error("build run {run_id} aborted: {error}")]
pub struct PipelineAbort {
    pub run_id: Uuid,
    pub error: PipelineError,
    pub state: RunState,
    pub results: TaskResultsList,
    pub capsule_failures: Vec<CapsuleFailure>,
}
