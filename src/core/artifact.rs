//! Artifacts and glob-based artifact selection
//!
//! A compiler or task declares which of the files it generates are eligible
//! for persistence through an [`ArtifactRule`]. Rules are evaluated against a
//! capsule directory with plain lexical path matching: positive patterns
//! select, negated patterns (leading `!`) remove, in declaration order.

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Full SHA-256 of a file's content, lowercase hex
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hash arbitrary bytes
pub fn hash_bytes(data: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    ContentHash(format!("{:x}", hasher.finalize()))
}

/// Hash a file's contents
pub fn hash_file(path: &Path) -> std::io::Result<ContentHash> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(ContentHash(format!("{:x}", hasher.finalize())))
}

/// What produced an artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactProducer {
    /// Task that generated the file
    pub task: String,

    /// Compiler id, when the task is a compiler task
    pub compiler: Option<String>,

    /// Artifact group name (e.g. "dist", "esm")
    pub artifact_name: String,
}

/// A generated file selected for persistence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Path relative to the component directory inside the capsule
    pub relative_path: PathBuf,

    /// Absolute path inside the capsule
    pub absolute_path: PathBuf,

    pub content_hash: ContentHash,

    pub producer: ArtifactProducer,
}

/// Declares which generated files of a task become artifacts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRule {
    /// Artifact group name
    pub name: String,

    /// Glob patterns relative to the component directory
    pub patterns: Vec<String>,

    /// Compiler responsible for the files, if any
    pub compiler: Option<String>,
}

impl ArtifactRule {
    pub fn new<I, S>(name: &str, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.to_string(),
            patterns: patterns.into_iter().map(Into::into).collect(),
            compiler: None,
        }
    }

    pub fn with_compiler(mut self, compiler: &str) -> Self {
        self.compiler = Some(compiler.to_string());
        self
    }

    pub fn selector(&self) -> Result<GlobSelector, GlobError> {
        GlobSelector::new(&self.patterns)
    }
}

/// Errors raised while selecting artifacts
#[derive(Debug, Error)]
pub enum GlobError {
    #[error("invalid glob pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("failed to walk {path}: {message}")]
    Walk { path: PathBuf, message: String },

    #[error("failed to hash {path}: {source}")]
    Hash {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
enum Rule {
    Include(Pattern),
    Exclude(Pattern),
}

/// Compiled set of positive and negated glob patterns
#[derive(Debug, Clone)]
pub struct GlobSelector {
    rules: Vec<Rule>,
}

impl GlobSelector {
    /// Compile patterns; negations are moved after all positive patterns,
    /// keeping their relative order.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, GlobError> {
        let mut includes = Vec::new();
        let mut excludes = Vec::new();

        for raw in patterns {
            let raw = raw.as_ref();
            let (negated, body) = match raw.strip_prefix('!') {
                Some(rest) => (true, rest),
                None => (false, raw),
            };
            let body = body.trim_start_matches("./");
            let pattern = Pattern::new(body).map_err(|source| GlobError::InvalidPattern {
                pattern: raw.to_string(),
                source,
            })?;
            if negated {
                excludes.push(Rule::Exclude(pattern));
            } else {
                includes.push(Rule::Include(pattern));
            }
        }

        includes.extend(excludes);
        Ok(Self { rules: includes })
    }

    /// Whether a relative path is selected
    pub fn is_match(&self, relative: &Path) -> bool {
        let candidate = normalize(relative);
        let mut selected = false;
        for rule in &self.rules {
            match rule {
                Rule::Include(p) if !selected => {
                    selected = p.matches_with(&candidate, MATCH_OPTIONS);
                }
                Rule::Exclude(p) if selected => {
                    selected = !p.matches_with(&candidate, MATCH_OPTIONS);
                }
                _ => {}
            }
        }
        selected
    }

    /// Select matching files under `base`, sorted lexically
    pub fn select(&self, base: &Path) -> Result<Vec<PathBuf>, GlobError> {
        if !base.exists() {
            return Ok(Vec::new());
        }

        let mut selected = Vec::new();
        for entry in WalkDir::new(base).sort_by_file_name() {
            let entry = entry.map_err(|e| GlobError::Walk {
                path: base.to_path_buf(),
                message: e.to_string(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(base) else {
                continue;
            };
            if self.is_match(relative) {
                selected.push(relative.to_path_buf());
            }
        }

        selected.sort_by_key(|p| normalize(p));
        Ok(selected)
    }
}

/// Render a relative path with `/` separators for matching
fn normalize(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Evaluate a rule against a component directory and hash every match
pub fn collect_artifacts(
    component_dir: &Path,
    rule: &ArtifactRule,
    task: &str,
) -> Result<Vec<Artifact>, GlobError> {
    let selector = rule.selector()?;
    let producer = ArtifactProducer {
        task: task.to_string(),
        compiler: rule.compiler.clone(),
        artifact_name: rule.name.clone(),
    };

    selector
        .select(component_dir)?
        .into_iter()
        .map(|relative| {
            let absolute_path = component_dir.join(&relative);
            let content_hash = hash_file(&absolute_path).map_err(|source| GlobError::Hash {
                path: absolute_path.clone(),
                source,
            })?;
            Ok(Artifact {
                relative_path: relative,
                absolute_path,
                content_hash,
                producer: producer.clone(),
            })
        })
        .collect()
}
