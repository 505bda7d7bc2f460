//! Content fingerprint of a component and its dependency closure

use crate::core::artifact::hash_file;
use crate::core::component::{is_confined, Component, ResolvedDependency};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use super::CapsuleError;

/// Number of hex characters of the fingerprint used in directory names
pub const FINGERPRINT_PREFIX_LEN: usize = 12;

/// SHA-256 over a component's identity, sources and resolved dependencies
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub String);

impl Fingerprint {
    /// Truncated form used in capsule directory names
    pub fn short(&self) -> &str {
        let end = FINGERPRINT_PREFIX_LEN.min(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Compute the fingerprint of a component.
///
/// Inputs are hashed in a fixed order: the component id, then every source
/// file as `path\0content-hash` sorted by path, then every dependency as
/// `name@version` sorted. File metadata is ignored.
pub fn fingerprint(
    component: &Component,
    dependencies: &[ResolvedDependency],
) -> Result<Fingerprint, CapsuleError> {
    let mut hasher = Sha256::new();
    hasher.update(b"component\0");
    hasher.update(component.id.to_string().as_bytes());
    hasher.update(b"\n");

    let mut files = component.files.clone();
    files.sort();
    for relative in &files {
        if !is_confined(relative) {
            return Err(CapsuleError::OutsideCapsule {
                path: relative.clone(),
            });
        }
        let source = component.root_dir.join(relative);
        if !source.is_file() {
            return Err(CapsuleError::MissingSource { path: source });
        }
        let content = hash_file(&source).map_err(|e| CapsuleError::Fingerprint {
            message: format!("{}: {}", source.display(), e),
        })?;
        let rendered = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        hasher.update(b"file\0");
        hasher.update(rendered.as_bytes());
        hasher.update(b"\0");
        hasher.update(content.0.as_bytes());
        hasher.update(b"\n");
    }

    let mut deps: Vec<String> = dependencies
        .iter()
        .map(|d| format!("{}@{}", d.name, d.version))
        .collect();
    deps.sort();
    deps.dedup();
    for dep in deps {
        hasher.update(b"dep\0");
        hasher.update(dep.as_bytes());
        hasher.update(b"\n");
    }

    Ok(Fingerprint(format!("{:x}", hasher.finalize())))
}
