//! Build run orchestration

pub mod engine;
pub mod executor;
pub mod outcome;
pub mod scheduler;

pub use engine::{EngineConfig, EventHandler, ExecutionEngine, ExecutionEvent};
pub use executor::{TaskExecutor, TaskRun};
pub use outcome::{BuildOutcome, CapsuleFailure, PipelineAbort, PipelineError};
pub use scheduler::{order_tasks, SchedulingStrategy};
