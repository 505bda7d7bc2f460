//! Test: a YAML build file driven end to end

use crate::helpers::*;
use capsule_builder::capsule::CapsuleManager;
use capsule_builder::core::{config::BuildConfig, ComponentId, ComponentStatus};
use capsule_builder::execution::ExecutionEngine;
use std::fs;
use std::sync::Arc;

const BUILD_YAML: &str = r#"
name: "demo"
concurrency: 0
capsules:
  root_dir: "capsules"
variables:
  greeting: "hello"
compilers:
  - id: "ts"
    kind: extension
    display_name: "TypeScript"
    extensions:
      ".ts": ".js"
    source_maps: true
    dist_glob_patterns: ["dist/**", "!dist/*.map"]
tasks:
  - name: "compile"
    kind: compile
    compiler: "ts"
  - name: "pack"
    kind: pack
    phase: post-build
    depends_on: ["compile"]
components:
  - name: "foo"
    scope: "bar"
    version: "0.0.1"
    path: "src/foo"
    dependencies:
      - name: "bar/util"
        version: "1.0.0"
  - name: "util"
    scope: "bar"
    version: "1.0.0"
    path: "src/util"
"#;

fn write_sources(ws: &Workspace) {
    let foo = ws.path().join("src/foo");
    let util = ws.path().join("src/util");
    fs::create_dir_all(foo.join("lib")).unwrap();
    fs::create_dir_all(&util).unwrap();
    fs::write(foo.join("index.ts"), "import { u } from 'bar/util';\n").unwrap();
    fs::write(foo.join("lib/helper.ts"), "export const h = 1;\n").unwrap();
    fs::write(util.join("index.ts"), "export const u = 1;\n").unwrap();
}

fn engine_for(config: &BuildConfig) -> ExecutionEngine {
    let registry = config.compiler_registry().unwrap();
    let mut engine = ExecutionEngine::new(
        config.engine_config(),
        Arc::new(CapsuleManager::new(config.capsule_options())),
    );
    for task in config.build_tasks(&registry).unwrap() {
        engine.register_task(task);
    }
    engine
}

#[tokio::test]
async fn test_build_file_end_to_end() {
    let ws = Workspace::new();
    write_sources(&ws);
    let file = ws.path().join("build.yaml");
    fs::write(&file, BUILD_YAML).unwrap();

    let config = BuildConfig::from_file(&file).unwrap();
    let targets = config.build_targets().unwrap();
    assert_eq!(targets[0].component.files.len(), 2);
    assert_eq!(targets[0].dependencies[0].path, ws.path().join("src/util"));

    let engine = engine_for(&config);
    let outcome = engine.run(targets).await.unwrap();

    assert!(outcome.success, "failures: {:?}", outcome.failed_components());
    let foo = ComponentId::new(Some("bar"), "foo", "0.0.1");
    let util = ComponentId::new(Some("bar"), "util", "1.0.0");
    assert_component_status(&outcome, "pack", &foo, ComponentStatus::Success);
    assert_artifact_paths(
        &outcome,
        &foo,
        &["dist/index.js", "dist/lib/helper.js", "dist/lib/helper.js.map", "package/bar-foo-0.0.1.json"],
    );
    assert_artifact_paths(&outcome, &util, &["dist/index.js", "package/bar-util-1.0.0.json"]);

    // capsules live under the configured root and are removed without reuse
    assert!(ws.capsule_root().exists());
    assert!(ws.capsule_dirs().is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn test_command_task_classifies_output() {
    let yaml = r#"
name: "lint-demo"
capsules:
  root_dir: "capsules"
variables:
  level: "warning"
tasks:
  - name: "lint"
    kind: command
    command: "echo '{{ level }}: unused import in {{ name }}'"
    warning_pattern: "^warning:"
    use_regex: true
  - name: "strict"
    kind: command
    command: "echo 'error: bad' && exit 3"
    error_pattern: "error:"
    order: 1
components:
  - name: "foo"
    version: "1.0.0"
    path: "src/foo"
"#;
    let ws = Workspace::new();
    write_sources(&ws);
    let file = ws.path().join("build.yaml");
    fs::write(&file, yaml).unwrap();

    let config = BuildConfig::from_file(&file).unwrap();
    let engine = engine_for(&config);
    let outcome = engine.run(config.build_targets().unwrap()).await.unwrap();

    let foo = ComponentId::new(None, "foo", "1.0.0");
    assert_component_status(&outcome, "lint", &foo, ComponentStatus::Success);
    let lint = outcome.results.get("lint", &foo).unwrap();
    assert_eq!(lint.warnings.len(), 1);
    assert_eq!(lint.warnings[0].message, "warning: unused import in foo");

    assert_component_status(&outcome, "strict", &foo, ComponentStatus::Failure);
    let strict = outcome.results.get("strict", &foo).unwrap();
    assert_eq!(strict.errors.len(), 2);
    assert!(!outcome.success);
}
