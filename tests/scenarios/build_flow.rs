//! Test: end-to-end build flow - compile, artifact selection and packing

use crate::helpers::*;
use capsule_builder::core::artifact::hash_file;
use capsule_builder::core::{ComponentStatus, ErrorKind, ExecutionStatus, TaskDescriptor};
use capsule_builder::execution::{ExecutionEvent, SchedulingStrategy};
use capsule_builder::tasks::{PackTask, PackageManifest};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

fn pack_after_compile() -> Arc<dyn capsule_builder::core::BuildTask> {
    Arc::new(PackTask::new("pack").with_descriptor(
        TaskDescriptor::new("pack", "builtin.pack")
            .with_order(1)
            .depends_on("compile"),
    ))
}

/// Source maps land in the dist dir but are filtered out of the artifacts
#[tokio::test]
async fn test_dist_artifacts_exclude_source_maps() {
    let ws = Workspace::new();
    let foo = ws.component(Some("bar"), "foo", "0.0.1", &[("index.ts", "export const answer = 42;\n")]);
    let id = foo.id().clone();

    let engine = ws.pooling_engine(SchedulingStrategy::Sequential).with_task(typescript_task());
    let outcome = engine.run(vec![foo]).await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.status(), ExecutionStatus::Completed);
    assert_component_status(&outcome, "compile", &id, ComponentStatus::Success);
    assert_artifact_paths(&outcome, &id, &["dist/index.js"]);

    let artifact = &outcome.artifacts_by_component[&id][0];
    assert!(artifact.absolute_path.exists());
    assert!(artifact.absolute_path.with_file_name("index.js.map").exists());
    assert_eq!(hash_file(&artifact.absolute_path).unwrap(), artifact.content_hash);
    assert_eq!(artifact.producer.task, "compile");
    assert_eq!(artifact.producer.compiler.as_deref(), Some("typescript"));
    assert_eq!(artifact.producer.artifact_name, "dist");

    let compiled = std::fs::read_to_string(&artifact.absolute_path).unwrap();
    assert!(compiled.contains("export const answer = 42;"));
    assert!(compiled.ends_with("//# sourceMappingURL=index.js.map\n"));
}

/// A compile failure for one component does not stop later tasks
#[tokio::test]
async fn test_failed_compile_keeps_pack_running() {
    let ws = Workspace::new();
    let foo = ws.component(Some("bar"), "foo", "0.0.1", &[("index.ts", "export {};\n")]);
    let broken = ws.component(
        Some("bar"),
        "x",
        "0.0.1",
        &[("index.ts", "export {};\n// @compile-error\n"), ("util.ts", "export {};\n")],
    );
    let (foo_id, x_id) = (foo.id().clone(), broken.id().clone());

    let engine = ws
        .pooling_engine(SchedulingStrategy::Parallel)
        .with_task(typescript_task())
        .with_task(pack_after_compile());
    let outcome = engine.run(vec![foo, broken]).await.unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.status(), ExecutionStatus::Failed);
    assert_eq!(outcome.results.iter().count(), 2);

    assert_component_status(&outcome, "compile", &foo_id, ComponentStatus::Success);
    assert_component_status(&outcome, "compile", &x_id, ComponentStatus::Failure);
    assert_error_kind(&outcome, "compile", &x_id, ErrorKind::ComponentBuildFailure);
    let compile_x = outcome.results.get("compile", &x_id).unwrap();
    assert!(compile_x.artifacts.is_empty());
    assert_eq!(compile_x.errors[0].file, Some(PathBuf::from("index.ts")));
    assert!(compile_x.errors[0].message.contains("index.ts:2"));

    assert_component_status(&outcome, "pack", &foo_id, ComponentStatus::Success);
    assert_component_status(&outcome, "pack", &x_id, ComponentStatus::Aborted);
    assert_error_kind(&outcome, "pack", &x_id, ErrorKind::DependencyFailed);

    assert_artifact_paths(&outcome, &foo_id, &["dist/index.js", "package/bar-foo-0.0.1.json"]);
    assert_artifact_paths(&outcome, &x_id, &[]);
    assert_eq!(outcome.failed_components().into_iter().collect::<Vec<_>>(), vec![x_id]);

    let manifest_artifact = &outcome.artifacts_by_component[&foo_id][1];
    let manifest: PackageManifest =
        serde_json::from_str(&std::fs::read_to_string(&manifest_artifact.absolute_path).unwrap()).unwrap();
    assert_eq!(manifest.component, "bar/foo");
    assert_eq!(manifest.artifacts.len(), 1);
    assert_eq!(manifest.artifacts[0].path, "dist/index.js");
    assert_eq!(
        manifest.artifacts[0].sha256,
        outcome.artifacts_by_component[&foo_id][0].content_hash.to_string()
    );
}

/// Events arrive in run order, framed by start and completion
#[tokio::test]
async fn test_events_frame_the_run() {
    let ws = Workspace::new();
    let foo = ws.component(None, "foo", "1.0.0", &[("index.ts", "export {};\n")]);

    let engine = ws.engine(SchedulingStrategy::Sequential, None).with_task(typescript_task());
    let events: Arc<Mutex<Vec<ExecutionEvent>>> = Arc::default();
    let sink = events.clone();
    engine.add_event_handler(move |event| sink.lock().unwrap().push(event));

    let outcome = engine.run(vec![foo]).await.unwrap();
    assert!(outcome.success);

    let events = events.lock().unwrap();
    assert!(matches!(events.first(), Some(ExecutionEvent::PipelineStarted { tasks: 1, components: 1, .. })));
    assert!(matches!(
        events.last(),
        Some(ExecutionEvent::PipelineCompleted { status: ExecutionStatus::Completed, .. })
    ));
    assert!(events.iter().any(|e| matches!(e, ExecutionEvent::CapsuleAcquired { reused: false, .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, ExecutionEvent::TaskCompleted { succeeded: 1, failed: 0, .. })));

    // capsules without reuse are deleted on release
    assert!(ws.capsule_dirs().is_empty());
}

/// Unsupported files are copied into dist only when asked
#[tokio::test]
async fn test_copy_non_supported_files() {
    use capsule_builder::compiler::{CompilerOptions, CompilerRegistry, CompilerTask, ExtensionCompiler};

    let ws = Workspace::new();
    let foo = ws.component(
        None,
        "foo",
        "1.0.0",
        &[("index.ts", "export {};\n"), ("styles/theme.css", "body {}\n")],
    );
    let id = foo.id().clone();

    let options = CompilerOptions {
        should_copy_non_supported_files: true,
        ..CompilerOptions::default()
    };
    let mut registry = CompilerRegistry::new();
    let registered = registry
        .register(Arc::new(ExtensionCompiler::new("ts", options).map_extension(".ts", ".js")))
        .unwrap();
    let task = Arc::new(CompilerTask::new(registered, None));

    let engine = ws.engine(SchedulingStrategy::Sequential, None).with_task(task);
    let outcome = engine.run(vec![foo]).await.unwrap();

    assert!(outcome.success);
    assert_artifact_paths(&outcome, &id, &["dist/index.js", "dist/styles/theme.css"]);
}
