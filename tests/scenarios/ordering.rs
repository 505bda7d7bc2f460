//! Test: task ordering and misconfiguration

use crate::helpers::*;
use capsule_builder::core::{TaskDescriptor, TaskPhase};
use capsule_builder::execution::{PipelineError, SchedulingStrategy};

fn task(name: &str) -> TaskDescriptor {
    TaskDescriptor::new(name, "test.mock")
}

#[tokio::test]
async fn test_tasks_run_by_phase_then_order() {
    let ws = Workspace::new();
    let foo = ws.component(None, "foo", "1.0.0", &[("index.ts", "")]);
    let log = EventLog::default();

    // registration order deliberately scrambled
    let engine = ws
        .engine(SchedulingStrategy::Sequential, None)
        .with_task(MockTask::new(task("publish").with_phase(TaskPhase::PostBuild), &log).into_task())
        .with_task(MockTask::new(task("lint").with_order(5), &log).into_task())
        .with_task(MockTask::new(task("compile"), &log).into_task())
        .with_task(MockTask::new(task("prepare").with_phase(TaskPhase::PreBuild), &log).into_task())
        .with_task(MockTask::new(task("test").with_order(5), &log).into_task());

    let outcome = engine.run(vec![foo]).await.unwrap();

    assert!(outcome.success);
    assert_eq!(
        log.entries(),
        vec!["prepare:foo", "compile:foo", "lint:foo", "test:foo", "publish:foo"]
    );
    let names: Vec<&str> = outcome.results.iter().map(|r| r.task.as_str()).collect();
    assert_eq!(names, vec!["prepare", "compile", "lint", "test", "publish"]);
}

#[tokio::test]
async fn test_dependency_on_later_task_aborts_before_capsules() {
    let ws = Workspace::new();
    let foo = ws.component(None, "foo", "1.0.0", &[("index.ts", "")]);
    let log = EventLog::default();

    let engine = ws
        .engine(SchedulingStrategy::Sequential, None)
        .with_task(MockTask::new(task("compile").depends_on("pack"), &log).into_task())
        .with_task(MockTask::new(task("pack").with_phase(TaskPhase::PostBuild), &log).into_task());

    let abort = engine.run(vec![foo]).await.unwrap_err();

    assert!(matches!(
        abort.error,
        PipelineError::UnresolvableOrdering { ref task, ref dependency } if task == "compile" && dependency == "pack"
    ));
    assert!(abort.results.is_empty());
    assert!(log.entries().is_empty());
    assert!(ws.capsule_dirs().is_empty());
}

#[tokio::test]
async fn test_unknown_dependency_and_duplicates_abort() {
    let ws = Workspace::new();
    let log = EventLog::default();

    let engine = ws
        .engine(SchedulingStrategy::Sequential, None)
        .with_task(MockTask::new(task("compile").depends_on("generate"), &log).into_task());
    let abort = engine.run(Vec::new()).await.unwrap_err();
    assert!(matches!(abort.error, PipelineError::UnknownDependency { .. }));

    let engine = ws
        .engine(SchedulingStrategy::Sequential, None)
        .with_task(MockTask::new(task("compile"), &log).into_task())
        .with_task(MockTask::new(task("compile").with_order(1), &log).into_task());
    let abort = engine.run(Vec::new()).await.unwrap_err();
    assert!(matches!(abort.error, PipelineError::DuplicateTask(ref name) if name == "compile"));
}

#[tokio::test]
async fn test_sequential_components_follow_target_order() {
    let ws = Workspace::new();
    let targets = vec![
        ws.component(None, "charlie", "1.0.0", &[("index.ts", "")]),
        ws.component(None, "alpha", "1.0.0", &[("index.ts", "")]),
        ws.component(None, "bravo", "1.0.0", &[("index.ts", "")]),
    ];
    let log = EventLog::default();

    let engine = ws
        .engine(SchedulingStrategy::Sequential, None)
        .with_task(MockTask::new(task("compile"), &log).into_task());
    let outcome = engine.run(targets).await.unwrap();

    assert!(outcome.success);
    assert_eq!(log.entries(), vec!["compile:charlie", "compile:alpha", "compile:bravo"]);
}
