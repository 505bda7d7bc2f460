//! Shell command task (lint, test, ...)

use crate::compiler::{command::run_shell, command::DEFAULT_COMMAND_TIMEOUT_SECS, CompilerError};
use crate::core::{
    condition::OutputClassifier,
    context::{render_template, BuildContext},
    result::{BuildError, BuiltTaskResult, ComponentResult, ErrorKind},
    task::{BuildTask, TaskDescriptor, TaskError},
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Runs a command template in every capsule.
///
/// Output lines matching the classifier become warnings or errors; a
/// non-zero exit code always fails the component.
pub struct CommandTask {
    descriptor: TaskDescriptor,
    command: String,
    classifier: OutputClassifier,
    timeout_secs: u64,
}

impl CommandTask {
    pub fn new(descriptor: TaskDescriptor, command: &str) -> Self {
        Self {
            descriptor,
            command: command.to_string(),
            classifier: OutputClassifier::default(),
            timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
        }
    }

    pub fn with_classifier(mut self, classifier: OutputClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

struct CommandSpec {
    template: String,
    classifier: OutputClassifier,
    timeout_secs: u64,
}

async fn run_component(spec: Arc<CommandSpec>, ctx: BuildContext, entry: crate::core::context::CapsuleEntry) -> ComponentResult {
    let id = entry.id().clone();
    let command = render_template(&spec.template, &ctx.variables_for(&entry));

    let output = match run_shell(&command, entry.dir(), spec.timeout_secs).await {
        Ok(output) => output,
        Err(e @ CompilerError::Timeout(_)) => {
            return ComponentResult::failure(id, BuildError::fatal(ErrorKind::Timeout, e.to_string()))
        }
        Err(e) => {
            return ComponentResult::failure(
                id,
                BuildError::fatal(ErrorKind::ComponentBuildFailure, e.to_string()),
            )
        }
    };

    let mut result = ComponentResult::success(id.clone());
    for diagnostic in spec
        .classifier
        .classify(&output.stdout)
        .into_iter()
        .chain(spec.classifier.classify(&output.stderr))
    {
        result.push_diagnostic(diagnostic);
    }

    if !output.success() {
        debug!(component = %id, exit_code = output.exit_code, "command failed");
        result.push_diagnostic(BuildError::fatal(
            ErrorKind::ComponentBuildFailure,
            format!("'{}' exited with code {}: {}", command, output.exit_code, output.stderr.trim()),
        ));
    }

    result.normalize();
    result
}

#[async_trait]
impl BuildTask for CommandTask {
    fn descriptor(&self) -> &TaskDescriptor {
        &self.descriptor
    }

    async fn execute(&self, ctx: &BuildContext) -> Result<BuiltTaskResult, TaskError> {
        let spec = Arc::new(CommandSpec {
            template: self.command.clone(),
            classifier: self.classifier.clone(),
            timeout_secs: self.timeout_secs,
        });
        Ok(ctx
            .for_each_component(move |ctx, entry| run_component(spec.clone(), ctx, entry))
            .await)
    }
}
