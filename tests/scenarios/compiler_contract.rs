//! Test: compilers that misbehave fail their components, not the run

use crate::helpers::*;
use async_trait::async_trait;
use capsule_builder::compiler::{
    build_with_file_transpiler, Compiler, CompilerError, CompilerOptions, CompilerRegistry, CompilerTask,
    ComponentTranspiler, FileTranspiler, TranspileComponentParams, TranspileFileParams, TranspiledFile,
};
use capsule_builder::core::{BuildContext, BuildTask, BuiltTaskResult, ComponentStatus, ErrorKind, TaskDescriptor};
use capsule_builder::execution::SchedulingStrategy;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy)]
enum Behavior {
    /// `escape.ts` is written to `../escape.js`
    Escaping,
    /// No per-file output; `fallback` adds a component transform
    WholeComponent { fallback: bool },
    Panicking,
}

/// `.ts` to `.js` compiler with a scripted failure mode
#[derive(Debug, Clone)]
struct ScriptedCompiler {
    options: CompilerOptions,
    behavior: Behavior,
}

impl ScriptedCompiler {
    fn task(behavior: Behavior) -> Arc<dyn BuildTask> {
        let compiler = ScriptedCompiler {
            options: CompilerOptions::default(),
            behavior,
        };
        let mut registry = CompilerRegistry::new();
        let registered = registry.register(Arc::new(compiler)).unwrap();
        Arc::new(CompilerTask::new(registered, None))
    }
}

impl FileTranspiler for ScriptedCompiler {
    fn transpile_file(
        &self,
        content: &str,
        params: &TranspileFileParams,
    ) -> Result<Option<Vec<TranspiledFile>>, CompilerError> {
        let output_path = match self.behavior {
            Behavior::WholeComponent { .. } => return Ok(None),
            Behavior::Escaping if params.file_path == Path::new("escape.ts") => PathBuf::from("../escape.js"),
            _ => self.dist_path_by_src_path(&params.file_path),
        };
        Ok(Some(vec![TranspiledFile {
            output_text: content.to_string(),
            output_path,
        }]))
    }
}

#[async_trait]
impl ComponentTranspiler for ScriptedCompiler {
    async fn transpile_component(&self, params: &TranspileComponentParams) -> Result<(), CompilerError> {
        for file in &params.files {
            let dest = params.output_dir.join(file).with_extension("js");
            tokio::fs::write(&dest, "// bundled\n")
                .await
                .map_err(|e| CompilerError::io(&dest, e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl Compiler for ScriptedCompiler {
    fn id(&self) -> &str {
        "scripted"
    }

    fn display_name(&self) -> &str {
        "Scripted"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn options(&self) -> &CompilerOptions {
        &self.options
    }

    fn is_file_supported(&self, path: &Path) -> bool {
        path.extension().is_some_and(|ext| ext == "ts")
    }

    fn dist_path_by_src_path(&self, src: &Path) -> PathBuf {
        Path::new(&self.options.dist_dir).join(src).with_extension("js")
    }

    async fn build(&self, ctx: &BuildContext) -> Result<BuiltTaskResult, CompilerError> {
        if let Behavior::Panicking = self.behavior {
            panic!("scripted compiler crashed");
        }
        build_with_file_transpiler(self, ctx).await
    }

    fn file_transpiler(&self) -> Option<&dyn FileTranspiler> {
        Some(self)
    }

    fn component_transpiler(&self) -> Option<&dyn ComponentTranspiler> {
        match self.behavior {
            Behavior::WholeComponent { fallback: true } => Some(self),
            _ => None,
        }
    }
}

#[tokio::test]
async fn test_output_outside_dist_fails_only_that_component() {
    let ws = Workspace::new();
    let bad = ws.component(None, "bad", "1.0.0", &[("index.ts", "a"), ("escape.ts", "b")]);
    let good = ws.component(None, "good", "1.0.0", &[("index.ts", "c")]);
    let (bad_id, good_id) = (bad.id().clone(), good.id().clone());

    let engine = ws
        .engine(SchedulingStrategy::Parallel, None)
        .with_task(ScriptedCompiler::task(Behavior::Escaping));
    let outcome = engine.run(vec![bad, good]).await.unwrap();

    assert!(!outcome.success);
    assert_component_status(&outcome, "compile", &bad_id, ComponentStatus::Failure);
    assert_error_kind(&outcome, "compile", &bad_id, ErrorKind::CompilerContractViolation);
    assert_artifact_paths(&outcome, &bad_id, &[]);

    assert_component_status(&outcome, "compile", &good_id, ComponentStatus::Success);
    assert_artifact_paths(&outcome, &good_id, &["dist/index.js"]);

    let escaped = WalkDir::new(ws.path())
        .into_iter()
        .filter_map(Result::ok)
        .any(|e| e.file_name() == "escape.js");
    assert!(!escaped, "escaping output reached the disk");
    assert!(ws.capsule_dirs().is_empty());
}

#[tokio::test]
async fn test_files_without_per_file_output_use_component_transform() {
    let ws = Workspace::new();
    let foo = ws.component(None, "foo", "1.0.0", &[("index.ts", "a"), ("util.ts", "b")]);
    let id = foo.id().clone();

    let engine = ws
        .engine(SchedulingStrategy::Sequential, None)
        .with_task(ScriptedCompiler::task(Behavior::WholeComponent { fallback: true }));
    let outcome = engine.run(vec![foo]).await.unwrap();

    assert!(outcome.success);
    assert_component_status(&outcome, "compile", &id, ComponentStatus::Success);
    assert_artifact_paths(&outcome, &id, &["dist/index.js", "dist/util.js"]);
}

#[tokio::test]
async fn test_files_without_any_transform_violate_contract() {
    let ws = Workspace::new();
    let foo = ws.component(None, "foo", "1.0.0", &[("index.ts", "a")]);
    let id = foo.id().clone();

    let engine = ws
        .engine(SchedulingStrategy::Sequential, None)
        .with_task(ScriptedCompiler::task(Behavior::WholeComponent { fallback: false }));
    let outcome = engine.run(vec![foo]).await.unwrap();

    assert!(!outcome.success);
    assert_component_status(&outcome, "compile", &id, ComponentStatus::Failure);
    assert_error_kind(&outcome, "compile", &id, ErrorKind::CompilerContractViolation);
    assert_artifact_paths(&outcome, &id, &[]);
}

#[tokio::test]
async fn test_compiler_panic_fails_components_and_run_continues() {
    let ws = Workspace::new();
    let foo = ws.component(None, "foo", "1.0.0", &[("index.ts", "a")]);
    let bar = ws.component(None, "bar", "1.0.0", &[("index.ts", "b")]);
    let (foo_id, bar_id) = (foo.id().clone(), bar.id().clone());
    let log = EventLog::default();

    let engine = ws
        .engine(SchedulingStrategy::Sequential, None)
        .with_task(ScriptedCompiler::task(Behavior::Panicking))
        .with_task(
            MockTask::new(TaskDescriptor::new("lint", "test.mock").with_order(1), &log).into_task(),
        );
    let outcome = engine.run(vec![foo, bar]).await.unwrap();

    assert!(!outcome.success);
    for id in [&foo_id, &bar_id] {
        assert_component_status(&outcome, "compile", id, ComponentStatus::Failure);
        assert_error_kind(&outcome, "compile", id, ErrorKind::ComponentBuildFailure);
        assert_component_status(&outcome, "lint", id, ComponentStatus::Success);
    }
    let compile = outcome.results.get("compile", &foo_id).unwrap();
    assert!(compile.errors[0].message.contains("scripted compiler crashed"));
}
