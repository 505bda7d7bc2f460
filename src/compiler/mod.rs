//! Compiler contract
//!
//! The pipeline never depends on a concrete compiler. A compiler exposes a
//! mandatory `build` over the capsules of a run plus optional capabilities
//! (per-file transpilation, whole-component transpilation, hooks) that are
//! detected once when the compiler is registered.

pub mod command;
pub mod extension;
pub mod registry;
pub mod release;
pub mod task;

pub use command::CommandCompiler;
pub use extension::ExtensionCompiler;
pub use registry::{CompilerCapabilities, CompilerRegistry, RegisteredCompiler};
pub use release::build_with_file_transpiler;
pub use task::CompilerTask;

use crate::core::{
    component::{is_confined, ComponentId},
    context::BuildContext,
    result::{BuildError, BuiltTaskResult, ErrorKind, TaskResultsList},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Options shared by every compiler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerOptions {
    /// Name of the compiler
    #[serde(default)]
    pub name: Option<String>,

    /// Dist directory relative to the component directory, e.g. "dist"
    #[serde(default = "default_dist_dir")]
    pub dist_dir: String,

    /// Which generated files are persisted; defaults to `<dist_dir>/**`
    #[serde(default)]
    pub dist_glob_patterns: Option<Vec<String>>,

    /// Copy files the compiler does not support into the dist directory
    #[serde(default)]
    pub should_copy_non_supported_files: bool,

    /// Artifact group name, "dist" unless two tasks share a compiler
    #[serde(default)]
    pub artifact_name: Option<String>,
}

fn default_dist_dir() -> String {
    "dist".to_string()
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            name: None,
            dist_dir: default_dist_dir(),
            dist_glob_patterns: None,
            should_copy_non_supported_files: false,
            artifact_name: None,
        }
    }
}

impl CompilerOptions {
    pub fn glob_patterns(&self) -> Vec<String> {
        self.dist_glob_patterns
            .clone()
            .unwrap_or_else(|| vec![format!("{}/**", self.dist_dir)])
    }

    pub fn artifact_name(&self) -> &str {
        self.artifact_name.as_deref().unwrap_or("dist")
    }

    /// The dist directory must be a plain relative path inside the component
    pub fn validate(&self, compiler: &str) -> Result<(), CompilerError> {
        if !is_confined(Path::new(&self.dist_dir)) {
            return Err(CompilerError::UnsafeDistDir {
                compiler: compiler.to_string(),
                dist_dir: self.dist_dir.clone(),
            });
        }
        Ok(())
    }
}

/// Errors raised by compilers
#[derive(Debug, Error)]
pub enum CompilerError {
    #[error("compiler '{compiler}' wrote '{}' outside its dist directory '{dist_dir}'", path.display())]
    ContractViolation {
        compiler: String,
        path: PathBuf,
        dist_dir: String,
    },

    #[error("compiler '{compiler}' has dist directory '{dist_dir}' outside the component directory")]
    UnsafeDistDir { compiler: String, dist_dir: String },

    #[error("compiler '{compiler}' has no transform for '{}'", file.display())]
    MissingTransform { compiler: String, file: PathBuf },

    #[error("{message}")]
    BuildFailure {
        message: String,
        file: Option<PathBuf>,
    },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("command timed out after {0} seconds")]
    Timeout(u64),

    #[error("failed to spawn command: {0}")]
    Spawn(String),

    #[error("hook failed: {0}")]
    Hook(String),

    #[error("compiler '{0}' is already registered")]
    DuplicateId(String),

    #[error("unknown compiler '{0}'")]
    UnknownCompiler(String),
}

impl CompilerError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CompilerError::Io {
            path: path.into(),
            source,
        }
    }

    /// Component-scoped error for a result
    pub fn to_build_error(&self) -> BuildError {
        let kind = match self {
            CompilerError::ContractViolation { .. }
            | CompilerError::UnsafeDistDir { .. }
            | CompilerError::MissingTransform { .. } => ErrorKind::CompilerContractViolation,
            CompilerError::Timeout(_) => ErrorKind::Timeout,
            CompilerError::Hook(_) => ErrorKind::HookFailure,
            _ => ErrorKind::ComponentBuildFailure,
        };
        let error = BuildError::fatal(kind, self.to_string());
        match self {
            CompilerError::BuildFailure { file: Some(file), .. } => error.in_file(file),
            CompilerError::ContractViolation { path, .. } => error.in_file(path),
            CompilerError::MissingTransform { file, .. } => error.in_file(file),
            _ => error,
        }
    }
}

/// Input of a per-file transpilation
#[derive(Debug, Clone)]
pub struct TranspileFileParams {
    /// Absolute component directory
    pub component_dir: PathBuf,

    /// File path relative to the component directory
    pub file_path: PathBuf,
}

/// One generated file; `output_path` is relative to the component directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranspiledFile {
    pub output_text: String,
    pub output_path: PathBuf,
}

/// Input of a whole-component transpilation
#[derive(Debug, Clone)]
pub struct TranspileComponentParams {
    pub component: ComponentId,

    /// Absolute component directory
    pub component_dir: PathBuf,

    /// Absolute output directory
    pub output_dir: PathBuf,

    /// Source files relative to the component directory
    pub files: Vec<PathBuf>,
}

/// Per-file transform capability
pub trait FileTranspiler: Send + Sync {
    /// Transform one file. `Ok(None)` means the file has no per-file output.
    fn transpile_file(
        &self,
        content: &str,
        params: &TranspileFileParams,
    ) -> Result<Option<Vec<TranspiledFile>>, CompilerError>;
}

/// Whole-component transform capability
#[async_trait]
pub trait ComponentTranspiler: Send + Sync {
    async fn transpile_component(&self, params: &TranspileComponentParams) -> Result<(), CompilerError>;
}

/// Run-level hooks of a compiler
#[async_trait]
pub trait CompilerHooks: Send + Sync {
    async fn pre_build(&self, ctx: &BuildContext) -> Result<(), CompilerError>;

    async fn post_build(&self, ctx: &BuildContext, results: &TaskResultsList) -> Result<(), CompilerError>;
}

/// A pluggable compiler
#[async_trait]
pub trait Compiler: Send + Sync {
    fn id(&self) -> &str;

    fn display_name(&self) -> &str;

    fn version(&self) -> &str;

    /// Serialized configuration, for display
    fn display_config(&self) -> String {
        String::new()
    }

    fn options(&self) -> &CompilerOptions;

    fn is_file_supported(&self, path: &Path) -> bool;

    /// Dist path of a source file, both relative: "index.ts" => "dist/index.js"
    fn dist_path_by_src_path(&self, src: &Path) -> PathBuf;

    /// Compile every capsule of the context
    async fn build(&self, ctx: &BuildContext) -> Result<BuiltTaskResult, CompilerError>;

    fn file_transpiler(&self) -> Option<&dyn FileTranspiler> {
        None
    }

    fn component_transpiler(&self) -> Option<&dyn ComponentTranspiler> {
        None
    }

    fn hooks(&self) -> Option<&dyn CompilerHooks> {
        None
    }
}

/// Replace the extension of a relative source path and place it in `dist_dir`
pub(crate) fn dist_path(dist_dir: &str, src: &Path, extension: Option<&str>) -> PathBuf {
    let mut path = Path::new(dist_dir).join(src);
    if let Some(ext) = extension {
        path.set_extension(ext.trim_start_matches('.'));
    }
    path
}
