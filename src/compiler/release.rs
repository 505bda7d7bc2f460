//! Release build shared by compilers with a per-file transform

use super::{Compiler, CompilerError, FileTranspiler, TranspileComponentParams, TranspileFileParams};
use crate::core::{
    component::is_confined,
    context::{BuildContext, CapsuleEntry},
    result::{BuildError, BuiltTaskResult, ComponentResult, ErrorKind},
};
use std::fs;
use std::path::{Component as PathComponent, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Compile every capsule of the context file by file.
///
/// For each capsule the dist directory is cleared, supported files go
/// through `transpile_file`, and unsupported files are copied to their dist
/// path when the compiler asks for it. Outputs outside the dist directory
/// fail the component with a contract violation.
pub async fn build_with_file_transpiler<C>(
    compiler: &C,
    ctx: &BuildContext,
) -> Result<BuiltTaskResult, CompilerError>
where
    C: Compiler + FileTranspiler + Clone + 'static,
{
    let compiler = Arc::new(compiler.clone());
    let result = ctx
        .for_each_component(move |_ctx, entry| {
            let compiler = compiler.clone();
            async move {
                let id = entry.id().clone();
                let worker = compiler.clone();
                let worker_entry = entry.clone();
                let transpiled =
                    tokio::task::spawn_blocking(move || transpile_capsule(worker.as_ref(), &worker_entry)).await;
                let (mut result, pending) = match transpiled {
                    Ok(done) => done,
                    Err(e) => {
                        return ComponentResult::failure(
                            id,
                            BuildError::fatal(ErrorKind::ComponentBuildFailure, e.to_string()),
                        )
                    }
                };

                if !pending.is_empty() {
                    if let Err(e) = transpile_remaining(compiler.as_ref(), &entry, pending).await {
                        result.push_diagnostic(e.to_build_error());
                        result.normalize();
                    }
                }
                result
            }
        })
        .await;
    Ok(result)
}

/// Transpile one capsule file by file. Also returns the supported files for
/// which `transpile_file` had no per-file transform.
fn transpile_capsule<C>(compiler: &C, entry: &CapsuleEntry) -> (ComponentResult, Vec<PathBuf>)
where
    C: Compiler + FileTranspiler,
{
    let id = entry.id().clone();
    let component_dir = entry.dir();
    let options = compiler.options();

    if let Err(e) = reset_dist_dir(compiler.id(), component_dir, &options.dist_dir) {
        return (ComponentResult::failure(id, e.to_build_error()), Vec::new());
    }

    let mut result = ComponentResult::success(id.clone());
    let mut pending = Vec::new();
    for file in &entry.target.component.files {
        let outcome = if compiler.is_file_supported(file) {
            match transpile_one(compiler, component_dir, file) {
                Ok(false) => {
                    pending.push(file.clone());
                    Ok(())
                }
                other => other.map(|_| ()),
            }
        } else if options.should_copy_non_supported_files {
            copy_unsupported(compiler, component_dir, file)
        } else {
            Ok(())
        };

        if let Err(e) = outcome {
            debug!(component = %id, file = %file.display(), error = %e, "file failed");
            result.push_diagnostic(e.to_build_error());
        }
    }

    result.normalize();
    (result, pending)
}

/// Hand files without a per-file transform to the component transform
async fn transpile_remaining<C: Compiler>(
    compiler: &C,
    entry: &CapsuleEntry,
    files: Vec<PathBuf>,
) -> Result<(), CompilerError> {
    let Some(transpiler) = compiler.component_transpiler() else {
        return Err(CompilerError::MissingTransform {
            compiler: compiler.id().to_string(),
            file: files.first().cloned().unwrap_or_default(),
        });
    };

    debug!(
        compiler = compiler.id(),
        component = %entry.id(),
        files = files.len(),
        "falling back to component transform"
    );
    let params = TranspileComponentParams {
        component: entry.id().clone(),
        component_dir: entry.dir().to_path_buf(),
        output_dir: entry.dir().join(&compiler.options().dist_dir),
        files,
    };
    transpiler.transpile_component(&params).await
}

/// Returns false when the compiler has no per-file transform for `file`
fn transpile_one<C>(compiler: &C, component_dir: &Path, file: &Path) -> Result<bool, CompilerError>
where
    C: Compiler + FileTranspiler,
{
    let source = component_dir.join(file);
    let content = fs::read_to_string(&source).map_err(|e| CompilerError::io(&source, e))?;
    let params = TranspileFileParams {
        component_dir: component_dir.to_path_buf(),
        file_path: file.to_path_buf(),
    };

    let Some(outputs) = compiler.transpile_file(&content, &params)? else {
        return Ok(false);
    };

    let dist_dir = &compiler.options().dist_dir;
    for output in outputs {
        if !is_inside(dist_dir, &output.output_path) {
            warn!(compiler = compiler.id(), path = %output.output_path.display(), "output outside dist dir");
            return Err(CompilerError::ContractViolation {
                compiler: compiler.id().to_string(),
                path: output.output_path,
                dist_dir: dist_dir.clone(),
            });
        }
        let dest = component_dir.join(&output.output_path);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| CompilerError::io(parent, e))?;
        }
        fs::write(&dest, output.output_text).map_err(|e| CompilerError::io(&dest, e))?;
    }
    Ok(true)
}

fn copy_unsupported<C: Compiler>(compiler: &C, component_dir: &Path, file: &Path) -> Result<(), CompilerError> {
    let source = component_dir.join(file);
    let dest = component_dir.join(compiler.dist_path_by_src_path(file));
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| CompilerError::io(parent, e))?;
    }
    fs::copy(&source, &dest).map_err(|e| CompilerError::io(&dest, e))?;
    Ok(())
}

/// Remove previous output so repeated builds in a pooled capsule are
/// idempotent. Returns the absolute dist directory.
pub(crate) fn reset_dist_dir(compiler: &str, component_dir: &Path, dist_dir: &str) -> Result<PathBuf, CompilerError> {
    if !is_confined(Path::new(dist_dir)) {
        return Err(CompilerError::UnsafeDistDir {
            compiler: compiler.to_string(),
            dist_dir: dist_dir.to_string(),
        });
    }
    let dist = component_dir.join(dist_dir);
    if dist.exists() {
        fs::remove_dir_all(&dist).map_err(|e| CompilerError::io(&dist, e))?;
    }
    fs::create_dir_all(&dist).map_err(|e| CompilerError::io(&dist, e))?;
    Ok(dist)
}

/// Lexical containment of a relative output path in the dist directory
pub(crate) fn is_inside(dist_dir: &str, output: &Path) -> bool {
    if output.is_absolute() {
        return false;
    }
    let normal = output
        .components()
        .all(|c| matches!(c, PathComponent::Normal(_) | PathComponent::CurDir));
    if !normal {
        return false;
    }
    let relative: std::path::PathBuf = output
        .components()
        .filter(|c| !matches!(c, PathComponent::CurDir))
        .collect();
    relative.starts_with(dist_dir) && relative != Path::new(dist_dir)
}
