//! CLI command definitions

use crate::execution::SchedulingStrategy;
use clap::Args;

/// Build the components of a build file
#[derive(Debug, Args, Clone)]
pub struct BuildCommand {
    /// Path to build YAML file
    #[arg(short, long)]
    pub file: String,

    /// Scheduling strategy for components within a task
    #[arg(long, value_enum)]
    pub strategy: Option<StrategyArg>,

    /// Components built at once (0 = all); overrides the build file
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Per-task timeout in seconds; overrides the build file
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Variable overrides (key=value)
    #[arg(long, value_parser = parse_key_value)]
    pub var: Vec<(String, String)>,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,

    /// Pool capsules for reuse by later runs instead of deleting them
    #[arg(long)]
    pub keep_capsules: bool,
}

impl BuildCommand {
    /// Strategy from the flags, if they override the build file
    pub fn strategy_override(&self) -> Option<SchedulingStrategy> {
        match (self.strategy, self.concurrency) {
            (Some(StrategyArg::Sequential), _) => Some(SchedulingStrategy::Sequential),
            (Some(StrategyArg::Parallel), _) => Some(SchedulingStrategy::Parallel),
            (Some(StrategyArg::ParallelLimited), n) => {
                Some(SchedulingStrategy::LimitedParallel(n.filter(|n| *n > 0).unwrap_or(4)))
            }
            (None, Some(n)) => Some(SchedulingStrategy::from_concurrency(n)),
            (None, None) => None,
        }
    }
}

/// Delete capsules pooled by earlier `--keep-capsules` runs
#[derive(Debug, Args, Clone)]
pub struct CleanCommand {
    /// Build file whose capsule root to clean; the default root otherwise
    #[arg(short, long)]
    pub file: Option<String>,
}

/// Validate a build file
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to build YAML file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show build history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Workspace name to filter by
    #[arg(short, long)]
    pub workspace: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Show a single run
    #[arg(long)]
    pub run_id: Option<String>,
}

/// List the artifacts recorded for a run
#[derive(Debug, Args, Clone)]
pub struct ArtifactsCommand {
    /// Run ID
    pub run_id: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Scheduling strategy argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum StrategyArg {
    Sequential,
    Parallel,
    #[clap(name = "parallel-limited")]
    ParallelLimited,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}
