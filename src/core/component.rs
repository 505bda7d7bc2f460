//! Component identity and build targets

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component as PathComponent, Path, PathBuf};
use walkdir::WalkDir;

/// Directory names never treated as component sources
const IGNORED_DIRS: &[&str] = &["node_modules", "dist"];

/// Versioned identity of a component
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ComponentId {
    /// Owning scope (e.g. "bar" in "bar/foo")
    pub scope: Option<String>,

    /// Component name
    pub name: String,

    /// Resolved version
    pub version: String,
}

impl ComponentId {
    pub fn new(scope: Option<&str>, name: &str, version: &str) -> Self {
        Self {
            scope: scope.map(str::to_string),
            name: name.to_string(),
            version: version.to_string(),
        }
    }

    /// Parse `scope/name@version` or `name@version`
    pub fn parse(s: &str) -> Option<Self> {
        let (full_name, version) = s.rsplit_once('@')?;
        if full_name.is_empty() || version.is_empty() {
            return None;
        }
        match full_name.rsplit_once('/') {
            Some((scope, name)) if !scope.is_empty() && !name.is_empty() => {
                Some(Self::new(Some(scope), name, version))
            }
            Some(_) => None,
            None => Some(Self::new(None, full_name, version)),
        }
    }

    /// Name including the scope, without version
    pub fn full_name(&self) -> String {
        match &self.scope {
            Some(scope) => format!("{}/{}", scope, self.name),
            None => self.name.clone(),
        }
    }

    /// Filesystem-safe directory name for this component
    pub fn dir_name(&self) -> String {
        let raw = format!("{}@{}", self.full_name(), self.version);
        raw.chars()
            .map(|c| match c {
                '/' | '\\' | ':' | ' ' => '_',
                c => c,
            })
            .collect()
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.full_name(), self.version)
    }
}

/// A declared dependency of a component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub name: String,
    pub version: String,
}

/// A dependency resolved to a directory on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedDependency {
    pub name: String,
    pub version: String,
    pub path: PathBuf,
}

impl ResolvedDependency {
    pub fn new(name: &str, version: &str, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            path: path.into(),
        }
    }

    /// Check whether this resolution satisfies a declared edge
    pub fn satisfies(&self, edge: &DependencyEdge) -> bool {
        self.name == edge.name && self.version == edge.version
    }
}

/// A component as handed to the build: identity, sources and dependency edges.
///
/// Immutable once resolved for a given build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    pub id: ComponentId,

    /// Directory the source files are read from
    pub root_dir: PathBuf,

    /// Source files, relative to `root_dir`, sorted
    pub files: Vec<PathBuf>,

    /// Declared dependency edges
    pub dependencies: Vec<DependencyEdge>,
}

impl Component {
    pub fn new(id: ComponentId, root_dir: impl Into<PathBuf>) -> Self {
        Self {
            id,
            root_dir: root_dir.into(),
            files: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn with_files<I, P>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.files = files.into_iter().map(Into::into).collect();
        self.files.sort();
        self.files.dedup();
        self
    }

    pub fn with_dependency(mut self, name: &str, version: &str) -> Self {
        self.dependencies.push(DependencyEdge {
            name: name.to_string(),
            version: version.to_string(),
        });
        self
    }

    /// Discover the source files under `root`.
    ///
    /// Skips dot-directories, `node_modules` and `dist`. Returned paths are
    /// relative and sorted.
    pub fn discover_files(root: &Path) -> std::io::Result<Vec<PathBuf>> {
        let walker = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                if e.depth() == 0 || !e.file_type().is_dir() {
                    return true;
                }
                let name = e.file_name().to_string_lossy();
                !name.starts_with('.') && !IGNORED_DIRS.contains(&name.as_ref())
            });

        let mut files = Vec::new();
        for entry in walker {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Ok(rel) = entry.path().strip_prefix(root) {
                files.push(rel.to_path_buf());
            }
        }
        files.sort();
        Ok(files)
    }
}

/// Whether `path` is a non-empty relative path that cannot leave the
/// directory it is joined onto: no root, prefix, `.` or `..` parts.
pub fn is_confined(path: &Path) -> bool {
    let mut parts = path.components().peekable();
    parts.peek().is_some() && parts.all(|c| matches!(c, PathComponent::Normal(_)))
}

/// A component together with its resolved dependency closure
#[derive(Debug, Clone)]
pub struct BuildTarget {
    pub component: Component,
    pub dependencies: Vec<ResolvedDependency>,
}

impl BuildTarget {
    pub fn new(component: Component) -> Self {
        Self {
            component,
            dependencies: Vec::new(),
        }
    }

    pub fn with_dependency(mut self, dependency: ResolvedDependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn id(&self) -> &ComponentId {
        &self.component.id
    }

    /// Declared edges with no matching resolved dependency
    pub fn unresolved_edges(&self) -> Vec<&DependencyEdge> {
        self.component
            .dependencies
            .iter()
            .filter(|edge| !self.dependencies.iter().any(|d| d.satisfies(edge)))
            .collect()
    }
}
