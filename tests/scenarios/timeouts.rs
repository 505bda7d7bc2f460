//! Test: per-task timeouts

use crate::helpers::*;
use capsule_builder::core::{ComponentStatus, ErrorKind, TaskDescriptor};
use capsule_builder::execution::{ExecutionEvent, PipelineError, SchedulingStrategy};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_timeout_keeps_finished_components() {
    let ws = Workspace::new();
    let fast = ws.component(None, "fast", "1.0.0", &[("index.ts", "")]);
    let slow = ws.component(None, "slow", "1.0.0", &[("index.ts", "")]);
    let (fast_id, slow_id) = (fast.id().clone(), slow.id().clone());
    let log = EventLog::default();

    let engine = ws
        .engine(SchedulingStrategy::Parallel, Some(Duration::from_millis(500)))
        .with_task(
            MockTask::new(TaskDescriptor::new("compile", "test.mock"), &log)
                .with_delay(Duration::from_secs(10))
                .slow_for("slow")
                .into_task(),
        )
        .with_task(MockTask::new(TaskDescriptor::new("lint", "test.mock").with_order(1), &log).into_task());

    let timed_out = Arc::new(AtomicBool::new(false));
    let flag = timed_out.clone();
    engine.add_event_handler(move |event| {
        if matches!(event, ExecutionEvent::TaskTimedOut { ref task } if task == "compile") {
            flag.store(true, Ordering::SeqCst);
        }
    });

    let outcome = engine.run(vec![fast, slow]).await.unwrap();

    assert!(timed_out.load(Ordering::SeqCst));
    assert!(!outcome.success);
    let compile = outcome.results.by_task("compile").unwrap();
    assert!(compile.timed_out);
    assert_component_status(&outcome, "compile", &fast_id, ComponentStatus::Success);
    assert_component_status(&outcome, "compile", &slow_id, ComponentStatus::Failure);
    assert_error_kind(&outcome, "compile", &slow_id, ErrorKind::Timeout);

    // the run goes on after a timed-out task
    assert_component_status(&outcome, "lint", &fast_id, ComponentStatus::Success);
    assert!(log.entries().contains(&"lint:slow".to_string()));
}

#[cfg(unix)]
#[tokio::test]
async fn test_command_task_timeout() {
    use capsule_builder::tasks::CommandTask;

    let ws = Workspace::new();
    let foo = ws.component(None, "foo", "1.0.0", &[("index.ts", "")]);
    let id = foo.id().clone();

    let task = CommandTask::new(TaskDescriptor::new("test", "builtin.command"), "sleep 5").with_timeout(1);
    let engine = ws.engine(SchedulingStrategy::Sequential, None).with_task(Arc::new(task));

    let outcome = engine.run(vec![foo]).await.unwrap();

    assert!(!outcome.success);
    assert_component_status(&outcome, "test", &id, ComponentStatus::Failure);
    assert_error_kind(&outcome, "test", &id, ErrorKind::Timeout);
}

#[tokio::test]
async fn test_timed_out_capsules_are_not_pooled() {
    let ws = Workspace::new();
    let slow = ws.component(None, "slow", "1.0.0", &[("index.ts", "")]);
    let log = EventLog::default();

    let engine = ws
        .engine_with(SchedulingStrategy::Sequential, Some(Duration::from_millis(300)), true)
        .with_task(
            MockTask::new(TaskDescriptor::new("compile", "test.mock"), &log)
                .with_delay(Duration::from_secs(10))
                .into_task(),
        );

    let outcome = engine.run(vec![slow]).await.unwrap();

    assert!(!outcome.success);
    assert_eq!(engine.capsules().pooled(), 0);

    let again = ws.component(None, "slow", "1.0.0", &[("index.ts", "")]);
    let capsule = engine.capsules().acquire(&again).await.unwrap();
    assert!(!capsule.is_reused());
}

#[tokio::test]
async fn test_timed_out_capsules_are_not_pooled_after_abort() {
    let ws = Workspace::new();
    let slow = ws.component(None, "slow", "1.0.0", &[("index.ts", "")]);
    let log = EventLog::default();

    let engine = ws
        .engine_with(SchedulingStrategy::Sequential, Some(Duration::from_millis(300)), true)
        .with_task(
            MockTask::new(TaskDescriptor::new("compile", "test.mock"), &log)
                .with_delay(Duration::from_secs(10))
                .with_failing_hook("post")
                .into_task(),
        );

    let abort = engine.run(vec![slow]).await.unwrap_err();

    assert!(matches!(abort.error, PipelineError::HookFailure { ref hook, .. } if hook == "post_build"));
    assert!(log.entries().contains(&"post:compile".to_string()));
    assert_eq!(engine.capsules().pooled(), 0);

    let again = ws.component(None, "slow", "1.0.0", &[("index.ts", "")]);
    let capsule = engine.capsules().acquire(&again).await.unwrap();
    assert!(!capsule.is_reused());
}
