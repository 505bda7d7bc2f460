//! Build task wrapping a registered compiler

use super::{Compiler, CompilerCapabilities, RegisteredCompiler};
use crate::core::{
    artifact::ArtifactRule,
    context::BuildContext,
    result::BuiltTaskResult,
    task::{BuildTask, TaskDescriptor, TaskError},
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Default task name of a compiler task
pub const DEFAULT_COMPILE_TASK: &str = "compile";

/// Runs a compiler's `build` as a pipeline task.
///
/// Artifacts of the task are selected with the compiler's dist glob patterns
/// under its artifact name.
pub struct CompilerTask {
    descriptor: TaskDescriptor,
    compiler: Arc<dyn Compiler>,
    capabilities: CompilerCapabilities,
}

impl CompilerTask {
    pub fn new(registered: &RegisteredCompiler, name: Option<&str>) -> Self {
        let compiler = registered.compiler.clone();
        let options = compiler.options();
        let rule = ArtifactRule::new(options.artifact_name(), options.glob_patterns())
            .with_compiler(compiler.id());
        let descriptor = TaskDescriptor::new(
            name.unwrap_or(DEFAULT_COMPILE_TASK),
            &format!("compiler.{}", compiler.id()),
        )
        .with_artifacts(rule);

        Self {
            descriptor,
            compiler,
            capabilities: registered.capabilities,
        }
    }

    /// Replace the descriptor's ordering fields, keeping the artifact rule
    pub fn with_descriptor(mut self, descriptor: TaskDescriptor) -> Self {
        let artifacts = self.descriptor.artifacts.take();
        self.descriptor = TaskDescriptor {
            artifacts: descriptor.artifacts.or(artifacts),
            ..descriptor
        };
        self
    }

    pub fn compiler(&self) -> &Arc<dyn Compiler> {
        &self.compiler
    }
}

#[async_trait]
impl BuildTask for CompilerTask {
    fn descriptor(&self) -> &TaskDescriptor {
        &self.descriptor
    }

    async fn execute(&self, ctx: &BuildContext) -> Result<BuiltTaskResult, TaskError> {
        info!(
            task = %self.descriptor.name,
            compiler = self.compiler.id(),
            version = self.compiler.version(),
            "compiling components"
        );
        match self.compiler.build(ctx).await {
            Ok(result) => Ok(result),
            Err(e) => {
                warn!(compiler = self.compiler.id(), error = %e, "compiler build failed");
                let error = e.to_build_error();
                Ok(BuiltTaskResult::failed_for_all(ctx.component_ids(), &error))
            }
        }
    }

    fn has_hooks(&self) -> bool {
        self.capabilities.hooks
    }

    async fn pre_build(&self, ctx: &BuildContext) -> Result<(), TaskError> {
        if !self.capabilities.hooks {
            return Ok(());
        }
        match self.compiler.hooks() {
            Some(hooks) => hooks.pre_build(ctx).await.map_err(TaskError::from),
            None => Ok(()),
        }
    }

    async fn post_build(&self, ctx: &BuildContext) -> Result<(), TaskError> {
        if !self.capabilities.hooks {
            return Ok(());
        }
        match self.compiler.hooks() {
            Some(hooks) => hooks.post_build(ctx, &ctx.previous).await.map_err(TaskError::from),
            None => Ok(()),
        }
    }
}
