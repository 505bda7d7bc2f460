//! Test utility functions for capsule-builder scenarios

use async_trait::async_trait;
use capsule_builder::capsule::{CapsuleManager, CapsuleOptions};
use capsule_builder::compiler::{CompilerOptions, CompilerRegistry, CompilerTask, ExtensionCompiler};
use capsule_builder::core::{
    BuildContext, BuildError, BuildTarget, BuildTask, BuiltTaskResult, Component, ComponentId,
    ComponentResult, ComponentStatus, ErrorKind, TaskDescriptor, TaskError,
};
use capsule_builder::execution::{BuildOutcome, EngineConfig, ExecutionEngine, SchedulingStrategy};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Temporary workspace holding component sources and the capsule root
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn capsule_root(&self) -> PathBuf {
        self.path().join("capsules")
    }

    /// Write a component's sources and return it as a build target
    pub fn component(&self, scope: Option<&str>, name: &str, version: &str, files: &[(&str, &str)]) -> BuildTarget {
        let id = ComponentId::new(scope, name, version);
        let root = self.path().join("src").join(id.dir_name());
        for (path, content) in files {
            let dest = root.join(path);
            fs::create_dir_all(dest.parent().unwrap()).unwrap();
            fs::write(dest, content).unwrap();
        }
        let component = Component::new(id, &root).with_files(files.iter().map(|(p, _)| PathBuf::from(p)));
        BuildTarget::new(component)
    }

    pub fn capsules(&self, reuse: bool) -> Arc<CapsuleManager> {
        Arc::new(CapsuleManager::new(CapsuleOptions {
            root_dir: Some(self.capsule_root()),
            reuse,
            ..CapsuleOptions::default()
        }))
    }

    pub fn engine(&self, strategy: SchedulingStrategy, task_timeout: Option<Duration>) -> ExecutionEngine {
        self.engine_with(strategy, task_timeout, false)
    }

    /// Engine whose capsules stay on disk after the run
    pub fn pooling_engine(&self, strategy: SchedulingStrategy) -> ExecutionEngine {
        self.engine_with(strategy, None, true)
    }

    pub fn engine_with(&self, strategy: SchedulingStrategy, task_timeout: Option<Duration>, reuse: bool) -> ExecutionEngine {
        let config = EngineConfig {
            workspace: "scenario".to_string(),
            strategy,
            task_timeout,
            ..EngineConfig::default()
        };
        ExecutionEngine::new(config, self.capsules(reuse))
    }

    /// Component directories currently under the capsule root
    pub fn capsule_dirs(&self) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(self.capsule_root()) else {
            return Vec::new();
        };
        let mut dirs: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        dirs.sort();
        dirs
    }
}

/// TypeScript compile task whose artifacts exclude source maps
pub fn typescript_task() -> Arc<dyn BuildTask> {
    let options = CompilerOptions {
        dist_glob_patterns: Some(vec!["dist/**".to_string(), "!dist/*.map".to_string()]),
        ..CompilerOptions::default()
    };
    let mut registry = CompilerRegistry::new();
    let registered = registry
        .register(Arc::new(ExtensionCompiler::typescript(options)))
        .unwrap();
    Arc::new(CompilerTask::new(registered, None))
}

/// Shared log of what mock tasks did, in order
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// Configurable task that logs every call
pub struct MockTask {
    descriptor: TaskDescriptor,
    log: EventLog,
    fail_for: HashSet<String>,
    delay: Option<Duration>,
    slow_for: HashSet<String>,
    hooks: bool,
    failing_hook: Option<&'static str>,
    write_file: Option<(String, String)>,
}

impl MockTask {
    pub fn new(descriptor: TaskDescriptor, log: &EventLog) -> Self {
        Self {
            descriptor,
            log: log.clone(),
            fail_for: HashSet::new(),
            delay: None,
            slow_for: HashSet::new(),
            hooks: false,
            failing_hook: None,
            write_file: None,
        }
    }

    /// Fail for the component with this name
    pub fn failing_for(mut self, name: &str) -> Self {
        self.fail_for.insert(name.to_string());
        self
    }

    /// Sleep before finishing each component
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Apply the delay only to these components
    pub fn slow_for(mut self, name: &str) -> Self {
        self.slow_for.insert(name.to_string());
        self
    }

    pub fn with_hooks(mut self) -> Self {
        self.hooks = true;
        self
    }

    /// Make one hook ("pre" or "post") fail
    pub fn with_failing_hook(mut self, hook: &'static str) -> Self {
        self.hooks = true;
        self.failing_hook = Some(hook);
        self
    }

    /// Write a file into every capsule
    pub fn writing(mut self, path: &str, content: &str) -> Self {
        self.write_file = Some((path.to_string(), content.to_string()));
        self
    }

    pub fn into_task(self) -> Arc<dyn BuildTask> {
        Arc::new(self)
    }

    fn hook(&self, which: &'static str) -> Result<(), TaskError> {
        self.log.push(format!("{}:{}", which, self.descriptor.name));
        if self.failing_hook == Some(which) {
            return Err(TaskError::Failed(format!("{} hook exploded", which)));
        }
        Ok(())
    }
}

#[async_trait]
impl BuildTask for MockTask {
    fn descriptor(&self) -> &TaskDescriptor {
        &self.descriptor
    }

    async fn execute(&self, ctx: &BuildContext) -> Result<BuiltTaskResult, TaskError> {
        let task = self.descriptor.name.clone();
        let log = self.log.clone();
        let fail_for = self.fail_for.clone();
        let slow_for = self.slow_for.clone();
        let delay = self.delay;
        let write_file = self.write_file.clone();

        Ok(ctx
            .for_each_component(move |_ctx, entry| {
                let task = task.clone();
                let log = log.clone();
                let id = entry.id().clone();
                let fail = fail_for.contains(&id.name);
                let delay = delay.filter(|_| slow_for.is_empty() || slow_for.contains(&id.name));
                let write_file = write_file.clone();
                async move {
                    log.push(format!("{}:{}", task, id.name));
                    if let Some((path, content)) = write_file {
                        let dest = entry.dir().join(path);
                        fs::create_dir_all(dest.parent().unwrap()).unwrap();
                        fs::write(dest, content).unwrap();
                    }
                    if let Some(delay) = delay {
                        tokio::time::sleep(delay).await;
                    }
                    if fail {
                        ComponentResult::failure(
                            id,
                            BuildError::fatal(ErrorKind::ComponentBuildFailure, "mock failure"),
                        )
                    } else {
                        ComponentResult::success(id)
                    }
                }
            })
            .await)
    }

    fn has_hooks(&self) -> bool {
        self.hooks
    }

    async fn pre_build(&self, _ctx: &BuildContext) -> Result<(), TaskError> {
        self.hook("pre")
    }

    async fn post_build(&self, _ctx: &BuildContext) -> Result<(), TaskError> {
        self.hook("post")
    }
}

/// Assert the status of one component in one task
pub fn assert_component_status(outcome: &BuildOutcome, task: &str, id: &ComponentId, expected: ComponentStatus) {
    let result = outcome
        .results
        .get(task, id)
        .unwrap_or_else(|| panic!("no result for {} in task '{}'", id, task));
    assert_eq!(
        result.status, expected,
        "component {} in task '{}' has status {:?}, errors: {:?}",
        id, task, result.status, result.errors
    );
}

/// Assert that a component's result in a task carries an error of `kind`
pub fn assert_error_kind(outcome: &BuildOutcome, task: &str, id: &ComponentId, kind: ErrorKind) {
    let result = outcome.results.get(task, id).unwrap();
    assert!(
        result.errors.iter().any(|e| e.kind == kind),
        "expected {} for {} in task '{}', got {:?}",
        kind,
        id,
        task,
        result.errors
    );
}

/// Assert the final artifact paths of a component
pub fn assert_artifact_paths(outcome: &BuildOutcome, id: &ComponentId, expected: &[&str]) {
    let paths: Vec<String> = outcome
        .artifacts_by_component
        .get(id)
        .map(|artifacts| {
            artifacts
                .iter()
                .map(|a| a.relative_path.to_string_lossy().replace('\\', "/"))
                .collect()
        })
        .unwrap_or_default();
    assert_eq!(paths, expected, "artifacts of {}", id);
}
