//! Build configuration from YAML

use crate::{
    capsule::CapsuleOptions,
    compiler::{
        CommandCompiler, CompilerOptions, CompilerRegistry, CompilerTask, ExtensionCompiler,
    },
    core::{
        artifact::{ArtifactRule, GlobSelector},
        component::{is_confined, BuildTarget, Component, ComponentId, ResolvedDependency},
        condition::{OutputClassifier, OutputPattern},
        task::{BuildTask, TaskDescriptor, TaskPhase},
    },
    execution::{order_tasks, EngineConfig, SchedulingStrategy},
    tasks::{CommandTask, PackTask},
};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Top-level build configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Workspace name
    pub name: String,

    /// Capsule placement and reuse
    #[serde(default)]
    pub capsules: CapsuleOptions,

    /// Components processed at once within a task (0 = all, default 1)
    #[serde(default)]
    pub concurrency: Option<usize>,

    /// Wall-clock limit of a single task
    #[serde(default)]
    pub task_timeout_secs: Option<u64>,

    /// Variables available to command templates as `{{ name }}`
    #[serde(default)]
    pub variables: HashMap<String, String>,

    #[serde(default)]
    pub compilers: Vec<CompilerConfig>,

    pub tasks: Vec<TaskConfig>,

    pub components: Vec<ComponentConfig>,

    /// Directory relative paths resolve against
    #[serde(skip)]
    base_dir: PathBuf,
}

/// Compiler definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilerConfig {
    /// Unique compiler id
    pub id: String,

    #[serde(flatten)]
    pub kind: CompilerKind,

    #[serde(default)]
    pub display_name: Option<String>,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default = "default_dist_dir")]
    pub dist_dir: String,

    #[serde(default)]
    pub dist_glob_patterns: Option<Vec<String>>,

    #[serde(default)]
    pub copy_non_supported_files: bool,

    #[serde(default)]
    pub artifact_name: Option<String>,
}

fn default_dist_dir() -> String {
    "dist".to_string()
}

/// Compiler implementation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CompilerKind {
    /// Built-in extension mapping compiler
    Extension {
        #[serde(default)]
        extensions: BTreeMap<String, String>,

        #[serde(default)]
        source_maps: bool,
    },
    /// External command run in each capsule
    Command {
        command: String,

        #[serde(default)]
        timeout_secs: Option<u64>,
    },
}

/// Task definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Unique task name
    pub name: String,

    #[serde(default)]
    pub phase: TaskPhase,

    #[serde(default)]
    pub order: i32,

    /// Tasks that must run before this one
    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(flatten)]
    pub kind: TaskKind,
}

/// Task implementation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TaskKind {
    /// Run a registered compiler
    Compile { compiler: String },

    /// Write package manifests
    Pack,

    /// Run a shell command per capsule
    Command {
        command: String,

        #[serde(default)]
        warning_pattern: Option<String>,

        #[serde(default)]
        error_pattern: Option<String>,

        /// Whether the patterns are regular expressions
        #[serde(default)]
        use_regex: bool,

        #[serde(default)]
        timeout_secs: Option<u64>,

        /// Glob patterns of generated files to keep as artifacts
        #[serde(default)]
        artifacts: Option<Vec<String>>,
    },
}

/// Component definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentConfig {
    pub name: String,

    #[serde(default)]
    pub scope: Option<String>,

    pub version: String,

    /// Source directory
    pub path: PathBuf,

    /// Source files relative to `path`; discovered when omitted
    #[serde(default)]
    pub files: Option<Vec<PathBuf>>,

    #[serde(default)]
    pub dependencies: Vec<DependencyConfig>,
}

impl ComponentConfig {
    pub fn id(&self) -> ComponentId {
        ComponentId::new(self.scope.as_deref(), &self.name, &self.version)
    }
}

/// Dependency of a component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyConfig {
    /// Package name, or `scope/name` of another component in this file
    pub name: String,

    pub version: String,

    /// Directory of the dependency; omitted for components of this file
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl BuildConfig {
    /// Load build configuration from a YAML file.
    ///
    /// Relative paths in the file resolve against its directory.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read build file {}", path.display()))?;
        let mut config: BuildConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse build file {}", path.display()))?;
        config.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        config.validate()?;
        Ok(config)
    }

    /// Parse build configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: BuildConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Validate the build configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            bail!("Build name must not be empty");
        }

        let mut compiler_ids = HashSet::new();
        for compiler in &self.compilers {
            if !compiler_ids.insert(compiler.id.as_str()) {
                bail!("Duplicate compiler id: {}", compiler.id);
            }
            if let Some(patterns) = &compiler.dist_glob_patterns {
                GlobSelector::new(patterns)
                    .with_context(|| format!("Compiler '{}' has an invalid glob pattern", compiler.id))?;
            }
            if !is_confined(Path::new(&compiler.dist_dir)) {
                bail!(
                    "Compiler '{}' has dist_dir '{}', which must be a relative path inside the component",
                    compiler.id,
                    compiler.dist_dir
                );
            }
            match &compiler.kind {
                CompilerKind::Extension { extensions, .. } if extensions.is_empty() => {
                    bail!("Compiler '{}' maps no extensions", compiler.id);
                }
                CompilerKind::Command { .. } if compiler.copy_non_supported_files => {
                    bail!(
                        "Compiler '{}' runs a command and cannot copy non-supported files",
                        compiler.id
                    );
                }
                _ => {}
            }
        }

        for task in &self.tasks {
            match &task.kind {
                TaskKind::Compile { compiler } if !compiler_ids.contains(compiler.as_str()) => {
                    bail!("Task '{}' references unknown compiler '{}'", task.name, compiler);
                }
                TaskKind::Command {
                    artifacts: Some(patterns),
                    ..
                } => {
                    GlobSelector::new(patterns)
                        .with_context(|| format!("Task '{}' has an invalid artifact pattern", task.name))?;
                }
                _ => {}
            }
        }

        // duplicate names, unknown dependencies, ordering
        let descriptors: Vec<TaskDescriptor> = self.tasks.iter().map(Self::descriptor).collect();
        let refs: Vec<&TaskDescriptor> = descriptors.iter().collect();
        order_tasks(&refs).map_err(|e| anyhow::anyhow!("Invalid task configuration: {}", e))?;

        let mut seen = HashSet::new();
        for component in &self.components {
            let id = component.id();
            if !seen.insert(id.clone()) {
                bail!("Duplicate component: {}", id);
            }
            if let Some(file) = component
                .files
                .iter()
                .flatten()
                .find(|file| !is_confined(file))
            {
                bail!(
                    "Component '{}' lists file '{}' outside its directory",
                    id,
                    file.display()
                );
            }
        }

        for component in &self.components {
            for dep in &component.dependencies {
                if dep.path.is_none() && self.find_component(&dep.name, &dep.version).is_none() {
                    bail!(
                        "Component '{}' depends on '{}@{}', which has no path and is not a component of this build",
                        component.id(),
                        dep.name,
                        dep.version
                    );
                }
            }
        }

        if let Some(0) = self.task_timeout_secs {
            bail!("task_timeout_secs must be greater than zero");
        }

        Ok(())
    }

    fn find_component(&self, name: &str, version: &str) -> Option<&ComponentConfig> {
        self.components
            .iter()
            .find(|c| c.id().full_name() == name && c.version == version)
    }

    /// Descriptor of a configured task, without instantiating it
    fn descriptor(task: &TaskConfig) -> TaskDescriptor {
        let aspect = match &task.kind {
            TaskKind::Compile { compiler } => format!("compiler.{}", compiler),
            TaskKind::Pack => "builtin.pack".to_string(),
            TaskKind::Command { .. } => "builtin.command".to_string(),
        };
        let mut descriptor = TaskDescriptor::new(&task.name, &aspect)
            .with_phase(task.phase)
            .with_order(task.order);
        descriptor.depends_on = task.depends_on.clone();
        if let TaskKind::Command {
            artifacts: Some(patterns),
            ..
        } = &task.kind
        {
            descriptor.artifacts = Some(ArtifactRule::new(&task.name, patterns.iter().cloned()));
        }
        descriptor
    }

    /// Capsule options with the root resolved against the build file
    pub fn capsule_options(&self) -> CapsuleOptions {
        let mut options = self.capsules.clone();
        options.root_dir = options.root_dir.as_deref().map(|p| self.resolve(p));
        options
    }

    /// Resolve components into build targets, in declaration order
    pub fn build_targets(&self) -> Result<Vec<BuildTarget>> {
        let mut targets = Vec::with_capacity(self.components.len());
        for config in &self.components {
            let root = self.resolve(&config.path);
            let files = match &config.files {
                Some(files) => files.clone(),
                None => Component::discover_files(&root)
                    .with_context(|| format!("failed to list sources of {}", config.id()))?,
            };

            let mut component = Component::new(config.id(), &root).with_files(files);
            let mut target_deps = Vec::new();
            for dep in &config.dependencies {
                component = component.with_dependency(&dep.name, &dep.version);
                let path = match &dep.path {
                    Some(path) => self.resolve(path),
                    None => match self.find_component(&dep.name, &dep.version) {
                        Some(other) => self.resolve(&other.path),
                        None => bail!("unresolved dependency {}@{}", dep.name, dep.version),
                    },
                };
                target_deps.push(ResolvedDependency::new(&dep.name, &dep.version, path));
            }

            let mut target = BuildTarget::new(component);
            target.dependencies = target_deps;
            let missing = target.unresolved_edges();
            if let Some(edge) = missing.first() {
                bail!("unresolved dependency {}@{} of {}", edge.name, edge.version, target.id());
            }
            targets.push(target);
        }
        Ok(targets)
    }

    /// Register every configured compiler
    pub fn compiler_registry(&self) -> Result<CompilerRegistry> {
        let mut registry = CompilerRegistry::new();
        for config in &self.compilers {
            let options = CompilerOptions {
                name: config.display_name.clone(),
                dist_dir: config.dist_dir.clone(),
                dist_glob_patterns: config.dist_glob_patterns.clone(),
                should_copy_non_supported_files: config.copy_non_supported_files,
                artifact_name: config.artifact_name.clone(),
            };
            let display_name = config.display_name.as_deref().unwrap_or(&config.id);

            match &config.kind {
                CompilerKind::Extension {
                    extensions,
                    source_maps,
                } => {
                    let mut compiler = ExtensionCompiler::new(&config.id, options)
                        .with_display_name(display_name)
                        .with_source_maps(*source_maps);
                    if let Some(version) = &config.version {
                        compiler = compiler.with_version(version);
                    }
                    for (from, to) in extensions {
                        compiler = compiler.map_extension(from, to);
                    }
                    registry.register(Arc::new(compiler))?;
                }
                CompilerKind::Command {
                    command,
                    timeout_secs,
                } => {
                    let mut compiler =
                        CommandCompiler::new(&config.id, command, options).with_display_name(display_name);
                    if let Some(version) = &config.version {
                        compiler = compiler.with_version(version);
                    }
                    if let Some(secs) = timeout_secs {
                        compiler = compiler.with_timeout(*secs);
                    }
                    registry.register(Arc::new(compiler))?;
                }
            }
        }
        Ok(registry)
    }

    /// Instantiate every configured task, in declaration order
    pub fn build_tasks(&self, registry: &CompilerRegistry) -> Result<Vec<Arc<dyn BuildTask>>> {
        let mut tasks: Vec<Arc<dyn BuildTask>> = Vec::with_capacity(self.tasks.len());
        for config in &self.tasks {
            let descriptor = Self::descriptor(config);
            let task: Arc<dyn BuildTask> = match &config.kind {
                TaskKind::Compile { compiler } => {
                    let registered = registry.get(compiler)?;
                    Arc::new(CompilerTask::new(registered, Some(config.name.as_str())).with_descriptor(descriptor))
                }
                TaskKind::Pack => Arc::new(PackTask::new(&config.name).with_descriptor(descriptor)),
                TaskKind::Command {
                    command,
                    warning_pattern,
                    error_pattern,
                    use_regex,
                    timeout_secs,
                    ..
                } => {
                    let classifier = OutputClassifier {
                        warning: warning_pattern.as_deref().map(|p| OutputPattern::new(p, *use_regex)),
                        error: error_pattern.as_deref().map(|p| OutputPattern::new(p, *use_regex)),
                    };
                    let mut task = CommandTask::new(descriptor, command).with_classifier(classifier);
                    if let Some(secs) = timeout_secs {
                        task = task.with_timeout(*secs);
                    }
                    Arc::new(task)
                }
            };
            tasks.push(task);
        }
        Ok(tasks)
    }

    /// Engine settings from this file
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            workspace: self.name.clone(),
            strategy: SchedulingStrategy::from_concurrency(self.concurrency.unwrap_or(1)),
            task_timeout: self.task_timeout_secs.map(Duration::from_secs),
            variables: self.variables.clone(),
        }
    }
}
