//! Built-in compiler that maps source extensions to output extensions
//!
//! Output is the source text behind a fixed header, optionally with a
//! sibling source map. Deterministic, so it doubles as a stand-in for real
//! compilers in demos and tests.

use super::{
    build_with_file_transpiler, dist_path, Compiler, CompilerError, CompilerOptions,
    ComponentTranspiler, FileTranspiler, TranspileComponentParams, TranspileFileParams,
    TranspiledFile,
};
use crate::core::{context::BuildContext, result::BuiltTaskResult};
use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Source marker that makes the compiler fail on the containing file
pub const COMPILE_ERROR_MARKER: &str = "@compile-error";

#[derive(Debug, Clone)]
pub struct ExtensionCompiler {
    id: String,
    display_name: String,
    version: String,
    options: CompilerOptions,

    /// Source extension to output extension, both with leading dot
    extensions: BTreeMap<String, String>,

    source_maps: bool,
}

impl ExtensionCompiler {
    pub fn new(id: &str, options: CompilerOptions) -> Self {
        Self {
            id: id.to_string(),
            display_name: id.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            options,
            extensions: BTreeMap::new(),
            source_maps: false,
        }
    }

    /// `.ts`/`.tsx` to `.js` with source maps
    pub fn typescript(options: CompilerOptions) -> Self {
        Self::new("typescript", options)
            .with_display_name("TypeScript")
            .map_extension(".ts", ".js")
            .map_extension(".tsx", ".js")
            .with_source_maps(true)
    }

    pub fn with_display_name(mut self, name: &str) -> Self {
        self.display_name = name.to_string();
        self
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    pub fn map_extension(mut self, from: &str, to: &str) -> Self {
        self.extensions.insert(normalize_ext(from), normalize_ext(to));
        self
    }

    pub fn with_source_maps(mut self, enabled: bool) -> Self {
        self.source_maps = enabled;
        self
    }

    fn output_extension(&self, src: &Path) -> Option<&str> {
        let ext = src.extension()?.to_str()?;
        self.extensions.get(&format!(".{}", ext)).map(String::as_str)
    }

    fn write_outputs(&self, component_dir: &Path, outputs: Vec<TranspiledFile>) -> Result<(), CompilerError> {
        for output in outputs {
            let dest = component_dir.join(&output.output_path);
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent).map_err(|e| CompilerError::io(parent, e))?;
            }
            std::fs::write(&dest, output.output_text).map_err(|e| CompilerError::io(&dest, e))?;
        }
        Ok(())
    }
}

fn normalize_ext(ext: &str) -> String {
    format!(".{}", ext.trim_start_matches('.'))
}

impl FileTranspiler for ExtensionCompiler {
    fn transpile_file(
        &self,
        content: &str,
        params: &TranspileFileParams,
    ) -> Result<Option<Vec<TranspiledFile>>, CompilerError> {
        if let Some(line) = content
            .lines()
            .position(|l| l.contains(COMPILE_ERROR_MARKER))
        {
            return Err(CompilerError::BuildFailure {
                message: format!(
                    "{}:{}: compilation failed",
                    params.file_path.display(),
                    line + 1
                ),
                file: Some(params.file_path.clone()),
            });
        }

        let output_path = self.dist_path_by_src_path(&params.file_path);
        let file_name = output_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let mut text = format!(
            "// {}@{} from {}\n{}",
            self.id,
            self.version,
            params.file_path.display(),
            content
        );
        if !text.ends_with('\n') {
            text.push('\n');
        }

        let mut outputs = Vec::new();
        if self.source_maps {
            text.push_str(&format!("//# sourceMappingURL={}.map\n", file_name));
            let map = json!({
                "version": 3,
                "file": file_name,
                "sources": [params.file_path.to_string_lossy()],
                "mappings": "",
            });
            let mut map_path = output_path.clone().into_os_string();
            map_path.push(".map");
            outputs.push(TranspiledFile {
                output_text: map.to_string(),
                output_path: PathBuf::from(map_path),
            });
        }
        outputs.insert(
            0,
            TranspiledFile {
                output_text: text,
                output_path,
            },
        );
        Ok(Some(outputs))
    }
}

#[async_trait]
impl ComponentTranspiler for ExtensionCompiler {
    async fn transpile_component(&self, params: &TranspileComponentParams) -> Result<(), CompilerError> {
        for file in &params.files {
            if !self.is_file_supported(file) {
                continue;
            }
            let source = params.component_dir.join(file);
            let content = tokio::fs::read_to_string(&source)
                .await
                .map_err(|e| CompilerError::io(&source, e))?;
            let file_params = TranspileFileParams {
                component_dir: params.component_dir.clone(),
                file_path: file.clone(),
            };
            if let Some(outputs) = self.transpile_file(&content, &file_params)? {
                // outputs are relative to the component dir; rebase onto output_dir
                let rebased = outputs
                    .into_iter()
                    .map(|o| TranspiledFile {
                        output_path: o
                            .output_path
                            .strip_prefix(&self.options.dist_dir)
                            .map(Path::to_path_buf)
                            .unwrap_or(o.output_path),
                        output_text: o.output_text,
                    })
                    .collect();
                self.write_outputs(&params.output_dir, rebased)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Compiler for ExtensionCompiler {
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
        let config = json!({
            "extensions": self.extensions,
            "sourceMaps": self.source_maps,
            "distDir": self.options.dist_dir,
        });
        serde_json::to_string_pretty(&config).unwrap_or_default()
    }

    fn options(&self) -> &CompilerOptions {
        &self.options
    }

    fn is_file_supported(&self, path: &Path) -> bool {
        self.output_extension(path).is_some()
    }

    fn dist_path_by_src_path(&self, src: &Path) -> PathBuf {
        dist_path(&self.options.dist_dir, src, self.output_extension(src))
    }

    async fn build(&self, ctx: &BuildContext) -> Result<BuiltTaskResult, CompilerError> {
        build_with_file_transpiler(self, ctx).await
    }

    fn file_transpiler(&self) -> Option<&dyn FileTranspiler> {
        Some(self)
    }

    fn component_transpiler(&self) -> Option<&dyn ComponentTranspiler> {
        Some(self)
    }
}
