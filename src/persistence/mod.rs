//! Build history and artifact ledger

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteBuildStore;

use crate::core::ExecutionStatus;
use crate::execution::{BuildOutcome, PipelineAbort};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Summary of one build run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildSummary {
    pub run_id: Uuid,

    /// Workspace (build file) name
    pub workspace: String,

    pub status: ExecutionStatus,

    pub started_at: DateTime<Utc>,

    pub completed_at: Option<DateTime<Utc>>,

    pub total_tasks: usize,

    pub completed_tasks: usize,

    pub total_components: usize,

    pub failed_components: usize,

    pub artifact_count: usize,
}

impl BuildSummary {
    pub fn duration_ms(&self) -> Option<i64> {
        self.completed_at.map(|end| (end - self.started_at).num_milliseconds())
    }
}

/// One persisted artifact of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub run_id: Uuid,

    /// Component id as `scope/name@version`
    pub component: String,

    /// Path relative to the component directory
    pub path: String,

    /// SHA-256 of the content
    pub content_hash: String,

    pub task: String,

    pub compiler: Option<String>,

    pub artifact_name: String,
}

/// Storage for build history
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save (or replace) a build summary
    async fn save_build(&self, summary: &BuildSummary) -> Result<()>;

    /// Save the artifacts of a run, replacing earlier records of that run
    async fn save_artifacts(&self, run_id: Uuid, artifacts: &[ArtifactRecord]) -> Result<()>;

    async fn load_build(&self, run_id: Uuid) -> Result<Option<BuildSummary>>;

    /// Most recent builds first, optionally for one workspace
    async fn list_builds(&self, workspace: Option<&str>, limit: usize) -> Result<Vec<BuildSummary>>;

    /// Artifacts of a run, sorted by component and path
    async fn load_artifacts(&self, run_id: Uuid) -> Result<Vec<ArtifactRecord>>;

    /// All workspace names with recorded builds
    async fn list_workspaces(&self) -> Result<Vec<String>>;
}

/// In-memory persistence (for testing or `--no-history` runs)
#[derive(Default)]
pub struct InMemoryPersistence {
    builds: RwLock<HashMap<Uuid, BuildSummary>>,
    artifacts: RwLock<HashMap<Uuid, Vec<ArtifactRecord>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_build(&self, summary: &BuildSummary) -> Result<()> {
        let mut builds = self.builds.write().await;
        builds.insert(summary.run_id, summary.clone());
        Ok(())
    }

    async fn save_artifacts(&self, run_id: Uuid, artifacts: &[ArtifactRecord]) -> Result<()> {
        let mut records = artifacts.to_vec();
        records.sort_by(|a, b| (&a.component, &a.path).cmp(&(&b.component, &b.path)));
        self.artifacts.write().await.insert(run_id, records);
        Ok(())
    }

    async fn load_build(&self, run_id: Uuid) -> Result<Option<BuildSummary>> {
        Ok(self.builds.read().await.get(&run_id).cloned())
    }

    async fn list_builds(&self, workspace: Option<&str>, limit: usize) -> Result<Vec<BuildSummary>> {
        let builds = self.builds.read().await;
        let mut matching: Vec<BuildSummary> = builds
            .values()
            .filter(|b| workspace.map_or(true, |w| b.workspace == w))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn load_artifacts(&self, run_id: Uuid) -> Result<Vec<ArtifactRecord>> {
        Ok(self
            .artifacts
            .read()
            .await
            .get(&run_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_workspaces(&self) -> Result<Vec<String>> {
        let builds = self.builds.read().await;
        let mut names: Vec<String> = builds.values().map(|b| b.workspace.clone()).collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}

/// Create a summary from a finished run
pub fn create_summary(workspace: &str, outcome: &BuildOutcome) -> BuildSummary {
    let state = &outcome.state;
    BuildSummary {
        run_id: outcome.run_id,
        workspace: workspace.to_string(),
        status: state.status,
        started_at: state.started_at.unwrap_or_else(Utc::now),
        completed_at: state.completed_at,
        total_tasks: state.total_tasks,
        completed_tasks: state.completed_tasks,
        total_components: state.total_components,
        failed_components: outcome.failed_components().len(),
        artifact_count: outcome.artifact_count(),
    }
}

/// Create a summary from an aborted run
pub fn abort_summary(workspace: &str, abort: &PipelineAbort) -> BuildSummary {
    let state = &abort.state;
    BuildSummary {
        run_id: abort.run_id,
        workspace: workspace.to_string(),
        status: state.status,
        started_at: state.started_at.unwrap_or_else(Utc::now),
        completed_at: state.completed_at,
        total_tasks: state.total_tasks,
        completed_tasks: state.completed_tasks,
        total_components: state.total_components,
        failed_components: state.failed_components,
        artifact_count: 0,
    }
}

/// Flatten the final artifact map of a run
pub fn artifact_records(outcome: &BuildOutcome) -> Vec<ArtifactRecord> {
    outcome
        .artifacts_by_component
        .iter()
        .flat_map(|(id, artifacts)| {
            artifacts.iter().map(move |a| ArtifactRecord {
                run_id: outcome.run_id,
                component: id.to_string(),
                path: a.relative_path.to_string_lossy().replace('\\', "/"),
                content_hash: a.content_hash.to_string(),
                task: a.producer.task.clone(),
                compiler: a.producer.compiler.clone(),
                artifact_name: a.producer.artifact_name.clone(),
            })
        })
        .collect()
}
