//! Test: identical inputs give identical artifact sets

use crate::helpers::*;
use capsule_builder::core::{Artifact, ComponentId};
use capsule_builder::execution::SchedulingStrategy;
use std::collections::BTreeMap;

fn fingerprint_of(artifacts: &BTreeMap<ComponentId, Vec<Artifact>>) -> Vec<(String, String, String)> {
    artifacts
        .iter()
        .flat_map(|(id, list)| {
            list.iter().map(move |a| {
                (
                    id.to_string(),
                    a.relative_path.to_string_lossy().to_string(),
                    a.content_hash.to_string(),
                )
            })
        })
        .collect()
}

#[tokio::test]
async fn test_repeated_builds_are_identical() {
    let ws = Workspace::new();
    let targets = || {
        vec![
            ws.component(Some("ui"), "button", "1.2.0", &[("index.ts", "export {};\n"), ("b.tsx", "<b/>\n")]),
            ws.component(Some("ui"), "card", "0.3.1", &[("lib/a.ts", "export const a = 1;\n")]),
        ]
    };

    let sequential = ws
        .engine(SchedulingStrategy::Sequential, None)
        .with_task(typescript_task())
        .run(targets())
        .await
        .unwrap();
    let parallel = ws
        .engine(SchedulingStrategy::Parallel, None)
        .with_task(typescript_task())
        .run(targets())
        .await
        .unwrap();

    assert!(sequential.success && parallel.success);
    assert_ne!(sequential.run_id, parallel.run_id);
    assert_eq!(
        fingerprint_of(&sequential.artifacts_by_component),
        fingerprint_of(&parallel.artifacts_by_component)
    );

    let button = ComponentId::new(Some("ui"), "button", "1.2.0");
    assert_artifact_paths(&sequential, &button, &["dist/b.js", "dist/index.js"]);
}

#[tokio::test]
async fn test_reused_capsule_clears_stale_dist() {
    let ws = Workspace::new();
    let first = ws.component(None, "foo", "1.0.0", &[("old.ts", "export {};\n")]);
    let id = first.id().clone();

    let outcome = ws
        .pooling_engine(SchedulingStrategy::Sequential)
        .with_task(typescript_task())
        .run(vec![first.clone()])
        .await
        .unwrap();
    assert_artifact_paths(&outcome, &id, &["dist/old.js"]);
    let capsule_dir = outcome.artifacts_by_component[&id][0]
        .absolute_path
        .parent()
        .and_then(|p| p.parent())
        .unwrap()
        .to_path_buf();

    // plant a stale file in the pooled capsule; the same fingerprint reuses it
    std::fs::write(capsule_dir.join("dist/stale.js"), "stale").unwrap();
    let outcome = ws
        .pooling_engine(SchedulingStrategy::Sequential)
        .with_task(typescript_task())
        .run(vec![first])
        .await
        .unwrap();

    assert!(outcome.success);
    assert_artifact_paths(&outcome, &id, &["dist/old.js"]);
}
