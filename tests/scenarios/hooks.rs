//! Test: pre/post build hooks

use crate::helpers::*;
use capsule_builder::core::{ExecutionStatus, TaskDescriptor};
use capsule_builder::execution::{PipelineError, SchedulingStrategy};

fn task(name: &str, order: i32) -> TaskDescriptor {
    TaskDescriptor::new(name, "test.mock").with_order(order)
}

#[tokio::test]
async fn test_hooks_wrap_every_task() {
    let ws = Workspace::new();
    let foo = ws.component(None, "foo", "1.0.0", &[("index.ts", "")]);
    let log = EventLog::default();

    let engine = ws
        .engine(SchedulingStrategy::Sequential, None)
        .with_task(MockTask::new(task("compile", 0), &log).with_hooks().into_task())
        .with_task(MockTask::new(task("lint", 1), &log).into_task())
        .with_task(MockTask::new(task("pack", 2), &log).with_hooks().into_task());

    let outcome = engine.run(vec![foo]).await.unwrap();

    assert!(outcome.success);
    assert_eq!(
        log.entries(),
        vec![
            "pre:compile",
            "pre:pack",
            "compile:foo",
            "lint:foo",
            "pack:foo",
            "post:compile",
            "post:pack",
        ]
    );
}

#[tokio::test]
async fn test_pre_build_failure_aborts_before_tasks() {
    let ws = Workspace::new();
    let foo = ws.component(None, "foo", "1.0.0", &[("index.ts", "")]);
    let log = EventLog::default();

    let engine = ws
        .engine(SchedulingStrategy::Sequential, None)
        .with_task(MockTask::new(task("compile", 0), &log).with_failing_hook("pre").into_task());

    let abort = engine.run(vec![foo]).await.unwrap_err();

    match &abort.error {
        PipelineError::HookFailure { task, hook, message } => {
            assert_eq!(task, "compile");
            assert_eq!(hook, "pre_build");
            assert!(message.contains("pre hook exploded"));
        }
        other => panic!("expected hook failure, got {:?}", other),
    }
    assert_eq!(abort.state.status, ExecutionStatus::Aborted);
    assert!(abort.results.is_empty());
    assert_eq!(log.entries(), vec!["pre:compile"]);
    // capsules were released
    assert!(ws.capsule_dirs().is_empty());
}

#[tokio::test]
async fn test_post_build_failure_carries_complete_results() {
    let ws = Workspace::new();
    let foo = ws.component(None, "foo", "1.0.0", &[("index.ts", "")]);
    let log = EventLog::default();

    let engine = ws
        .engine(SchedulingStrategy::Sequential, None)
        .with_task(MockTask::new(task("compile", 0), &log).with_failing_hook("post").into_task())
        .with_task(MockTask::new(task("pack", 1), &log).into_task());

    let abort = engine.run(vec![foo]).await.unwrap_err();

    assert!(matches!(abort.error, PipelineError::HookFailure { ref hook, .. } if hook == "post_build"));
    let names: Vec<&str> = abort.results.iter().map(|r| r.task.as_str()).collect();
    assert_eq!(names, vec!["compile", "pack"]);
    assert_eq!(log.entries().last().map(String::as_str), Some("post:compile"));
}
