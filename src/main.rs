use anyhow::{Context, Result};
use capsule_builder::capsule::CapsuleOptions;
use capsule_builder::cli::commands::{
    ArtifactsCommand, BuildCommand, CleanCommand, HistoryCommand, ValidateCommand,
};
use capsule_builder::cli::output::*;
use capsule_builder::cli::{Cli, Command};
use capsule_builder::core::{config::BuildConfig, CancellationFlag, ExecutionStatus};
use capsule_builder::execution::{BuildOutcome, ExecutionEngine, ExecutionEvent, PipelineAbort};
use capsule_builder::persistence::{
    abort_summary, artifact_records, create_summary, BuildSummary, InMemoryPersistence, PersistenceBackend,
    SqliteBuildStore,
};
use capsule_builder::CapsuleManager;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // RUST_LOG wins over --verbose
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set logging subscriber")?;

    let ok = match &cli.command {
        Command::Build(cmd) => build(cmd, cli.verbose).await?,
        Command::Validate(cmd) => validate(cmd)?,
        Command::History(cmd) => show_history(cmd).await?,
        Command::Artifacts(cmd) => show_artifacts(cmd).await?,
        Command::Clean(cmd) => clean(cmd).await?,
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

async fn build(cmd: &BuildCommand, verbose: bool) -> Result<bool> {
    let config = BuildConfig::from_file(&cmd.file).context("Failed to load build file")?;
    println!("{}Loaded build: {}", INFO, style(&config.name).bold());

    let registry = config.compiler_registry()?;
    let tasks = config.build_tasks(&registry)?;
    let targets = config.build_targets()?;

    let mut engine_config = config.engine_config();
    if let Some(strategy) = cmd.strategy_override() {
        engine_config.strategy = strategy;
    }
    if let Some(secs) = cmd.timeout {
        engine_config.task_timeout = Some(Duration::from_secs(secs));
    }
    for (key, value) in &cmd.var {
        engine_config.variables.insert(key.clone(), value.clone());
        println!(
            "{}Variable override: {} = {}",
            INFO,
            style(key).cyan(),
            style(value).dim()
        );
    }

    let mut capsule_options = config.capsule_options();
    if cmd.keep_capsules {
        capsule_options.reuse = true;
    }
    let capsules = Arc::new(CapsuleManager::new(capsule_options));

    let store: Arc<dyn PersistenceBackend> = if cmd.no_history {
        Arc::new(InMemoryPersistence::new())
    } else {
        Arc::new(SqliteBuildStore::with_default_path().await?)
    };

    let cancel = CancellationFlag::new();
    let mut engine = ExecutionEngine::new(engine_config, capsules).with_cancellation(cancel.clone());
    for task in tasks {
        engine.register_task(task);
    }

    let progress = create_progress_bar(engine.task_descriptors().len());
    let bar = progress.clone();
    engine.add_event_handler(move |event| {
        match &event {
            ExecutionEvent::TaskStarted { task, .. } => bar.set_message(task.clone()),
            ExecutionEvent::TaskCompleted { .. } => bar.inc(1),
            _ => {}
        }
        if let Some(line) = format_execution_event(&event, verbose) {
            bar.println(line);
        }
    });

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling build");
            cancel.cancel();
        }
    });

    let result = engine.run(targets).await;
    progress.finish_and_clear();

    let (summary, ok) = match &result {
        Ok(outcome) => {
            print_outcome(outcome);
            let summary = create_summary(&config.name, outcome);
            store.save_artifacts(outcome.run_id, &artifact_records(outcome)).await?;
            (summary, outcome.success)
        }
        Err(abort) => {
            print_abort(abort);
            (abort_summary(&config.name, abort), false)
        }
    };
    store.save_build(&summary).await?;

    if !cmd.no_history {
        println!(
            "\n{}Run saved to history (ID: {})",
            INFO,
            style(&summary.run_id.to_string()[..8]).dim()
        );
    }

    if ok {
        println!(
            "\n{}{} built {}",
            CHECK,
            style(&config.name).bold(),
            style("successfully").green()
        );
    } else {
        println!(
            "\n{}{} {}",
            CROSS,
            style(&config.name).bold(),
            format_status(summary.status)
        );
    }

    Ok(ok)
}

fn print_outcome(outcome: &BuildOutcome) {
    for failure in &outcome.capsule_failures {
        println!("  {} {}", style(&failure.component).bold(), format_diagnostic(&failure.error));
    }

    for task in outcome.results.iter() {
        for (id, result) in &task.components {
            if result.is_success() && result.warnings.is_empty() {
                continue;
            }
            println!(
                "  {} {} {}",
                style(&task.task).dim(),
                style(id).bold(),
                format_component_status(result.status)
            );
            for diagnostic in result.errors.iter().chain(result.warnings.iter()) {
                println!("      {}", format_diagnostic(diagnostic));
            }
        }
    }

    for (id, artifacts) in &outcome.artifacts_by_component {
        if artifacts.is_empty() {
            continue;
        }
        println!("{}{} ({} artifacts)", PACKAGE, style(id).bold(), artifacts.len());
        for artifact in artifacts {
            println!("    {}", artifact.relative_path.display());
        }
    }
}

fn print_abort(abort: &PipelineAbort) {
    error!("{}", abort);
    println!("{}Build aborted: {}", CROSS, style(&abort.error).red());
    if !abort.results.is_empty() {
        println!(
            "  {} task(s) finished before the abort",
            style(abort.results.iter().count()).cyan()
        );
    }
}

fn validate(cmd: &ValidateCommand) -> Result<bool> {
    println!("{}Validating build file...", INFO);

    match BuildConfig::from_file(&cmd.file) {
        Ok(config) => {
            println!("{}Build file is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            println!("  Compilers: {}", style(config.compilers.len()).cyan());
            println!("  Tasks: {}", style(config.tasks.len()).cyan());
            println!("  Components: {}", style(config.components.len()).cyan());

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(true)
        }
        Err(e) => {
            println!("{}Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            Ok(false)
        }
    }
}

async fn show_history(cmd: &HistoryCommand) -> Result<bool> {
    let store = SqliteBuildStore::with_default_path().await?;

    if let Some(run_id) = &cmd.run_id {
        let run_id = uuid::Uuid::parse_str(run_id).context("Invalid run ID format")?;
        match store.load_build(run_id).await? {
            Some(summary) => print_build_details(&summary, cmd.json)?,
            None => println!("{}Run not found", WARN),
        }
        return Ok(true);
    }

    let builds = store.list_builds(cmd.workspace.as_deref(), cmd.limit).await?;
    if builds.is_empty() {
        println!("{}No builds found", INFO);
        return Ok(true);
    }

    if cmd.json {
        let data = serde_json::json!({ "builds": builds });
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        println!("{}Build history (showing latest {}):", INFO, cmd.limit);
        for summary in &builds {
            println!("  {}", format_build_summary(summary));
        }
    }

    Ok(true)
}

fn print_build_details(summary: &BuildSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    println!("{}Build Details", INFO);
    println!("  ID: {}", style(summary.run_id).cyan());
    println!("  Workspace: {}", style(&summary.workspace).bold());
    println!("  Status: {}", format_status(summary.status));
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    if let Some(completed) = summary.completed_at {
        println!("  Completed: {}", style(completed.to_rfc3339()).dim());
        if let Ok(duration) = completed.signed_duration_since(summary.started_at).to_std() {
            println!("  Duration: {}", style(format_duration(duration)).dim());
        }
    }
    println!("  Tasks: {}/{}", summary.completed_tasks, summary.total_tasks);
    println!(
        "  Components: {} ({} failed)",
        summary.total_components,
        style(summary.failed_components).red()
    );
    println!("  Artifacts: {}", style(summary.artifact_count).cyan());
    Ok(())
}

async fn show_artifacts(cmd: &ArtifactsCommand) -> Result<bool> {
    let store = SqliteBuildStore::with_default_path().await?;
    let run_id = uuid::Uuid::parse_str(&cmd.run_id).context("Invalid run ID format")?;

    let Some(summary) = store.load_build(run_id).await? else {
        println!("{}Run not found", WARN);
        return Ok(false);
    };
    let records = store.load_artifacts(run_id).await?;

    if cmd.json {
        let data = serde_json::json!({ "run": summary, "artifacts": records });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(true);
    }

    println!(
        "{}Artifacts of {} ({})",
        PACKAGE,
        style(&summary.workspace).bold(),
        format_status(summary.status)
    );
    if summary.status != ExecutionStatus::Completed {
        println!("{}Run did not complete successfully; artifacts may be partial", WARN);
    }
    let mut current: Option<&str> = None;
    for record in &records {
        if current != Some(record.component.as_str()) {
            println!("{}", style(&record.component).bold());
            current = Some(&record.component);
        }
        println!("{}", format_artifact(record));
    }
    Ok(true)
}

async fn clean(cmd: &CleanCommand) -> Result<bool> {
    let mut options = match &cmd.file {
        Some(file) => BuildConfig::from_file(file)
            .context("Failed to load build file")?
            .capsule_options(),
        None => CapsuleOptions::default(),
    };
    // pooled capsules live directly under the root
    options.reuse = true;

    let capsules = CapsuleManager::new(options);
    println!("{}Cleaning capsules under {}", INFO, style(capsules.root().display()).dim());
    let deleted = capsules.purge().await.context("Failed to delete capsules")?;
    println!("{}Deleted {} idle capsule(s)", CHECK, style(deleted).cyan());
    Ok(true)
}
