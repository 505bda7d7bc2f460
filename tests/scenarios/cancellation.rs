//! Test: cooperative cancellation

use crate::helpers::*;
use capsule_builder::core::{CancellationFlag, ComponentStatus, ErrorKind, ExecutionStatus, TaskDescriptor};
use capsule_builder::execution::{ExecutionEvent, SchedulingStrategy};
use std::time::Duration;

#[tokio::test]
async fn test_cancel_between_tasks_skips_the_rest() {
    let ws = Workspace::new();
    let foo = ws.component(None, "foo", "1.0.0", &[("index.ts", "")]);
    let log = EventLog::default();
    let cancel = CancellationFlag::new();

    let engine = ws
        .engine(SchedulingStrategy::Sequential, None)
        .with_cancellation(cancel.clone())
        .with_task(MockTask::new(TaskDescriptor::new("compile", "test.mock"), &log).with_hooks().into_task())
        .with_task(MockTask::new(TaskDescriptor::new("pack", "test.mock").with_order(1), &log).into_task());

    let trigger = cancel.clone();
    engine.add_event_handler(move |event| {
        if matches!(event, ExecutionEvent::TaskCompleted { ref task, .. } if task == "compile") {
            trigger.cancel();
        }
    });

    let outcome = engine.run(vec![foo]).await.unwrap();

    assert!(outcome.cancelled);
    assert!(!outcome.success);
    assert_eq!(outcome.status(), ExecutionStatus::Cancelled);
    assert_eq!(outcome.results.iter().count(), 1);
    // post hooks are skipped on cancellation
    assert_eq!(log.entries(), vec!["pre:compile", "compile:foo"]);
    assert!(ws.capsule_dirs().is_empty());
}

#[tokio::test]
async fn test_cancel_during_task_aborts_pending_components() {
    let ws = Workspace::new();
    let targets = vec![
        ws.component(None, "a", "1.0.0", &[("index.ts", "")]),
        ws.component(None, "b", "1.0.0", &[("index.ts", "")]),
        ws.component(None, "c", "1.0.0", &[("index.ts", "")]),
    ];
    let ids: Vec<_> = targets.iter().map(|t| t.id().clone()).collect();
    let log = EventLog::default();
    let cancel = CancellationFlag::new();

    let engine = ws
        .engine(SchedulingStrategy::Sequential, None)
        .with_cancellation(cancel.clone())
        .with_task(
            MockTask::new(TaskDescriptor::new("compile", "test.mock"), &log)
                .with_delay(Duration::from_millis(400))
                .into_task(),
        );

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let outcome = engine.run(targets).await.unwrap();

    assert!(outcome.cancelled);
    assert_eq!(log.entries(), vec!["compile:a"]);
    assert_component_status(&outcome, "compile", &ids[0], ComponentStatus::Success);
    for id in &ids[1..] {
        assert_component_status(&outcome, "compile", id, ComponentStatus::Aborted);
        assert_error_kind(&outcome, "compile", id, ErrorKind::Cancelled);
    }
}
