//! Package manifest task
//!
//! Writes `package/<scope>-<name>-<version>.json` into each capsule, listing
//! the artifacts earlier tasks produced for the component.

use crate::core::{
    artifact::ArtifactRule,
    component::ComponentId,
    context::{BuildContext, CapsuleEntry},
    result::{BuildError, BuiltTaskResult, ComponentResult, ErrorKind, TaskResultsList},
    task::{BuildTask, TaskDescriptor, TaskError, TaskPhase},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

/// Directory inside the component dir receiving manifests
pub const PACKAGE_DIR: &str = "package";

/// Manifest written per component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifest {
    pub component: String,
    pub version: String,
    pub artifacts: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: String,
    pub sha256: String,
    pub task: String,
    pub artifact_name: String,
}

pub struct PackTask {
    descriptor: TaskDescriptor,
}

impl PackTask {
    pub fn new(name: &str) -> Self {
        Self {
            descriptor: TaskDescriptor::new(name, "builtin.pack")
                .with_phase(TaskPhase::PostBuild)
                .with_artifacts(ArtifactRule::new("package", [format!("{}/*.json", PACKAGE_DIR)])),
        }
    }

    pub fn with_descriptor(mut self, descriptor: TaskDescriptor) -> Self {
        let artifacts = self.descriptor.artifacts.take();
        self.descriptor = TaskDescriptor {
            artifacts: descriptor.artifacts.or(artifacts),
            ..descriptor
        };
        self
    }

    /// Manifest file name, relative to the component dir
    pub fn manifest_path(id: &ComponentId) -> PathBuf {
        let name = match &id.scope {
            Some(scope) => format!("{}-{}-{}.json", scope, id.name, id.version),
            None => format!("{}-{}.json", id.name, id.version),
        };
        let name = name.replace(['/', '\\'], "-");
        PathBuf::from(PACKAGE_DIR).join(name)
    }
}

/// First prerequisite task that did not succeed for `id`
fn failed_prerequisite<'a>(
    previous: &TaskResultsList,
    depends_on: &'a [String],
    id: &ComponentId,
) -> Option<&'a str> {
    depends_on
        .iter()
        .find(|task| !previous.get(task, id).is_some_and(ComponentResult::is_success))
        .map(String::as_str)
}

async fn pack_component(ctx: BuildContext, entry: CapsuleEntry, depends_on: Vec<String>) -> ComponentResult {
    let id = entry.id().clone();

    if let Some(task) = failed_prerequisite(&ctx.previous, &depends_on, &id) {
        debug!(component = %id, task, "skipping pack, prerequisite failed");
        return ComponentResult::aborted(
            id,
            BuildError::fatal(
                ErrorKind::DependencyFailed,
                format!("task '{}' did not succeed for this component", task),
            ),
        );
    }

    let manifest = PackageManifest {
        component: id.full_name(),
        version: id.version.clone(),
        artifacts: ctx
            .previous
            .artifacts_for(&id)
            .into_iter()
            .map(|a| ManifestEntry {
                path: a.relative_path.to_string_lossy().replace('\\', "/"),
                sha256: a.content_hash.to_string(),
                task: a.producer.task.clone(),
                artifact_name: a.producer.artifact_name.clone(),
            })
            .collect(),
    };

    let dest = entry.dir().join(PackTask::manifest_path(&id));
    let written = async {
        let json = serde_json::to_string_pretty(&manifest)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&dest, json).await
    }
    .await;

    match written {
        Ok(()) => ComponentResult::success(id),
        Err(e) => ComponentResult::failure(
            id,
            BuildError::fatal(
                ErrorKind::ComponentBuildFailure,
                format!("failed to write {}: {}", dest.display(), e),
            ),
        ),
    }
}

#[async_trait]
impl BuildTask for PackTask {
    fn descriptor(&self) -> &TaskDescriptor {
        &self.descriptor
    }

    async fn execute(&self, ctx: &BuildContext) -> Result<BuiltTaskResult, TaskError> {
        let depends_on = self.descriptor.depends_on.clone();
        Ok(ctx
            .for_each_component(move |ctx, entry| pack_component(ctx, entry, depends_on.clone()))
            .await)
    }
}
