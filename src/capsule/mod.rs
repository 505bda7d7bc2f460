//! Isolated per-component build directories
//!
//! Every component is built inside its own capsule: a directory holding a
//! copy of the component's sources and its resolved dependencies. Nothing a
//! task writes for one component is visible to another.

pub mod fingerprint;
pub mod manager;

pub use fingerprint::{fingerprint, Fingerprint};
pub use manager::CapsuleManager;

use crate::core::component::ComponentId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Capsule placement and reuse settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapsuleOptions {
    /// Parent directory of all capsules; defaults under the user cache dir
    #[serde(default)]
    pub root_dir: Option<PathBuf>,

    /// Keep idle capsules for later runs with the same fingerprint
    #[serde(default)]
    pub reuse: bool,

    /// Symlink dependencies instead of copying them
    #[serde(default)]
    pub link_dependencies: bool,

    /// Directory inside a capsule receiving dependencies
    #[serde(default = "default_dependencies_dir")]
    pub dependencies_dir: String,
}

fn default_dependencies_dir() -> String {
    "node_modules".to_string()
}

impl Default for CapsuleOptions {
    fn default() -> Self {
        Self {
            root_dir: None,
            reuse: false,
            link_dependencies: false,
            dependencies_dir: default_dependencies_dir(),
        }
    }
}

impl CapsuleOptions {
    /// Resolved capsule root
    pub fn root(&self) -> PathBuf {
        self.root_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("capsule-builder")
                .join("capsules")
        })
    }
}

/// Errors raised while creating or tearing down capsules
#[derive(Debug, Error)]
pub enum CapsuleError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("symlink cycle detected at {path}")]
    SymlinkCycle { path: PathBuf },

    #[error("path {path} would leave the capsule")]
    OutsideCapsule { path: PathBuf },

    #[error("source file not found: {path}")]
    MissingSource { path: PathBuf },

    #[error("failed to fingerprint component: {message}")]
    Fingerprint { message: String },
}

impl CapsuleError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CapsuleError::Io {
            path: path.into(),
            source,
        }
    }
}

/// An acquired capsule. Owned by the run that acquired it until released.
#[derive(Debug)]
pub struct Capsule {
    key: String,
    component: ComponentId,
    fingerprint: Fingerprint,
    path: PathBuf,
    reused: bool,
}

impl Capsule {
    /// Unique slot name under the capsule root
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn component(&self) -> &ComponentId {
        &self.component
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Component directory inside the capsule
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the directory was taken from the pool instead of populated
    pub fn is_reused(&self) -> bool {
        self.reused
    }
}
