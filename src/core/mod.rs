//! Core domain models
//!
//! Components, tasks, results and artifacts, plus the build context tasks
//! receive and the YAML build configuration.

pub mod artifact;
pub mod component;
pub mod condition;
pub mod config;
pub mod context;
pub mod result;
pub mod state;
pub mod task;

pub use artifact::{Artifact, ArtifactRule, GlobSelector};
pub use component::{BuildTarget, Component, ComponentId, DependencyEdge, ResolvedDependency};
pub use context::{BuildContext, CapsuleEntry};
pub use result::{
    BuildError, BuiltTaskResult, ComponentResult, ComponentStatus, ErrorKind, ResultCollector,
    Severity, TaskResults, TaskResultsList,
};
pub use state::{CancellationFlag, ExecutionStatus, RunState};
pub use task::{BuildTask, TaskDescriptor, TaskError, TaskPhase};
