//! Compiler backed by an external command run inside each capsule

use super::{
    release::reset_dist_dir, Compiler, CompilerError, CompilerOptions, ComponentTranspiler,
    TranspileComponentParams,
};
use crate::core::{
    context::{render_template, BuildContext},
    result::{BuiltTaskResult, ComponentResult},
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Default command timeout in seconds
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 600;

/// Captured output of a finished command
#[derive(Debug, Clone)]
pub struct ShellOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ShellOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Run a shell command in `cwd`, killing it when the timeout expires
pub async fn run_shell(command: &str, cwd: &Path, timeout_secs: u64) -> Result<ShellOutput, CompilerError> {
    debug!(command, cwd = %cwd.display(), "spawning command");

    let mut cmd = if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C");
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.arg("-c");
        cmd
    };

    let output = timeout(
        Duration::from_secs(timeout_secs),
        cmd.arg(command).current_dir(cwd).kill_on_drop(true).output(),
    )
    .await
    .map_err(|_| CompilerError::Timeout(timeout_secs))?
    .map_err(|e| CompilerError::Spawn(format!("{}: {}", command, e)))?;

    let result = ShellOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    };
    debug!(command, exit_code = result.exit_code, "command finished");
    Ok(result)
}

/// Runs a command template per capsule.
///
/// Placeholders: `{{ dist_dir }}`, `{{ out_dir }}`, `{{ component_dir }}`,
/// `{{ component }}`, plus the run variables when built through a pipeline.
#[derive(Debug, Clone)]
pub struct CommandCompiler {
    id: String,
    display_name: String,
    version: String,
    options: CompilerOptions,
    command: String,
    timeout_secs: u64,
}

impl CommandCompiler {
    pub fn new(id: &str, command: &str, options: CompilerOptions) -> Self {
        Self {
            id: id.to_string(),
            display_name: id.to_string(),
            version: "0.0.0".to_string(),
            options,
            command: command.to_string(),
            timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
        }
    }

    pub fn with_display_name(mut self, name: &str) -> Self {
        self.display_name = name.to_string();
        self
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    fn render(&self, params: &TranspileComponentParams, extra: &HashMap<String, String>) -> String {
        let mut vars = extra.clone();
        vars.insert("dist_dir".to_string(), self.options.dist_dir.clone());
        vars.insert("out_dir".to_string(), params.output_dir.display().to_string());
        vars.insert("component_dir".to_string(), params.component_dir.display().to_string());
        vars.insert("component".to_string(), params.component.to_string());
        render_template(&self.command, &vars)
    }

    async fn run(&self, params: &TranspileComponentParams, extra: &HashMap<String, String>) -> Result<(), CompilerError> {
        let command = self.render(params, extra);
        let output = run_shell(&command, &params.component_dir, self.timeout_secs).await?;
        if !output.success() {
            warn!(
                compiler = %self.id,
                component = %params.component,
                exit_code = output.exit_code,
                "compiler command failed"
            );
            let stderr = output.stderr.trim();
            return Err(CompilerError::BuildFailure {
                message: format!(
                    "'{}' exited with code {}: {}",
                    command,
                    output.exit_code,
                    if stderr.is_empty() { output.stdout.trim() } else { stderr }
                ),
                file: None,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ComponentTranspiler for CommandCompiler {
    async fn transpile_component(&self, params: &TranspileComponentParams) -> Result<(), CompilerError> {
        self.run(params, &HashMap::new()).await
    }
}

#[async_trait]
impl Compiler for CommandCompiler {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn display_config(&self) -> String {
        format!("command: {}\ntimeout_secs: {}", self.command, self.timeout_secs)
    }

    fn options(&self) -> &CompilerOptions {
        &self.options
    }

    /// The command sees the whole component; no file is handled individually
    fn is_file_supported(&self, _path: &Path) -> bool {
        false
    }

    fn dist_path_by_src_path(&self, src: &Path) -> PathBuf {
        Path::new(&self.options.dist_dir).join(src)
    }

    async fn build(&self, ctx: &BuildContext) -> Result<BuiltTaskResult, CompilerError> {
        let compiler = Arc::new(self.clone());
        let result = ctx
            .for_each_component(move |ctx, entry| {
                let compiler = compiler.clone();
                async move {
                    let id = entry.id().clone();
                    let output_dir = match reset_dist_dir(&compiler.id, entry.dir(), &compiler.options.dist_dir) {
                        Ok(dir) => dir,
                        Err(e) => return ComponentResult::failure(id, e.to_build_error()),
                    };
                    let params = TranspileComponentParams {
                        component: id.clone(),
                        component_dir: entry.dir().to_path_buf(),
                        output_dir,
                        files: entry.target.component.files.clone(),
                    };
                    match compiler.run(&params, &ctx.variables_for(&entry)).await {
                        Ok(()) => ComponentResult::success(id),
                        Err(e) => ComponentResult::failure(id, e.to_build_error()),
                    }
                }
            })
            .await;
        Ok(result)
    }

    fn component_transpiler(&self) -> Option<&dyn ComponentTranspiler> {
        Some(self)
    }
}
