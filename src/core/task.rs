//! Build task contract
//!
//! A build task is one unit of work applied to every component of a run.
//! Compilation is one kind of task; packing, linting and testing are others.

use crate::core::{
    artifact::{ArtifactRule, GlobError},
    context::BuildContext,
    result::BuiltTaskResult,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Coarse ordering bucket of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskPhase {
    PreBuild,
    Main,
    PostBuild,
}

impl Default for TaskPhase {
    fn default() -> Self {
        TaskPhase::Main
    }
}

impl fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskPhase::PreBuild => "pre-build",
            TaskPhase::Main => "main",
            TaskPhase::PostBuild => "post-build",
        };
        f.write_str(name)
    }
}

/// Static description of a task, read by the orchestrator before running it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDescriptor {
    /// Unique task name within a pipeline
    pub name: String,

    /// Identifier of the extension contributing the task
    pub aspect_id: String,

    pub phase: TaskPhase,

    /// Ordering within the phase, lower runs first
    pub order: i32,

    /// Tasks whose results this task reads; they must be ordered earlier
    pub depends_on: Vec<String>,

    /// Which generated files become artifacts
    pub artifacts: Option<ArtifactRule>,
}

impl TaskDescriptor {
    pub fn new(name: &str, aspect_id: &str) -> Self {
        Self {
            name: name.to_string(),
            aspect_id: aspect_id.to_string(),
            phase: TaskPhase::Main,
            order: 0,
            depends_on: Vec::new(),
            artifacts: None,
        }
    }

    pub fn with_phase(mut self, phase: TaskPhase) -> Self {
        self.phase = phase;
        self
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn depends_on(mut self, task: &str) -> Self {
        self.depends_on.push(task.to_string());
        self
    }

    pub fn with_artifacts(mut self, rule: ArtifactRule) -> Self {
        self.artifacts = Some(rule);
        self
    }
}

/// Errors a task can return from `execute` or its hooks
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("{0}")]
    Failed(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Compiler(#[from] crate::compiler::CompilerError),

    #[error(transparent)]
    Glob(#[from] GlobError),
}

impl TaskError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TaskError::Io {
            path: path.into(),
            source,
        }
    }
}

/// A unit of build work executed once per run over all components
#[async_trait]
pub trait BuildTask: Send + Sync {
    fn descriptor(&self) -> &TaskDescriptor;

    /// Run the task over every component in the context
    async fn execute(&self, ctx: &BuildContext) -> Result<BuiltTaskResult, TaskError>;

    /// Whether the task defines pre/post build hooks. Read once at registration.
    fn has_hooks(&self) -> bool {
        false
    }

    /// Runs once per run before the first task executes
    async fn pre_build(&self, _ctx: &BuildContext) -> Result<(), TaskError> {
        Ok(())
    }

    /// Runs once per run after every task, with the complete results list
    async fn post_build(&self, _ctx: &BuildContext) -> Result<(), TaskError> {
        Ok(())
    }
}
