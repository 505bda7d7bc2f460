//! capsule-builder - builds versioned components in isolated capsules
//! through a pipeline of pluggable compilers and build tasks

pub mod capsule;
pub mod cli;
pub mod compiler;
pub mod core;
pub mod execution;
pub mod persistence;
pub mod tasks;

// Re-export commonly used types
pub use capsule::{Capsule, CapsuleManager, CapsuleOptions};
pub use compiler::{Compiler, CompilerRegistry, CompilerTask, ExtensionCompiler};
pub use crate::core::{
    config::BuildConfig, Artifact, BuildContext, BuildTarget, BuildTask, Component, ComponentId,
    ComponentResult, ComponentStatus, TaskResultsList,
};
pub use execution::{BuildOutcome, EngineConfig, ExecutionEngine, ExecutionEvent, SchedulingStrategy};
