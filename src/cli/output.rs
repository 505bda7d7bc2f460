//! CLI output formatting

use crate::{
    core::{BuildError, ComponentStatus, ExecutionStatus, Severity},
    execution::ExecutionEvent,
    persistence::{ArtifactRecord, BuildSummary},
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

pub use console::style;

pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static PACKAGE: Emoji<'_, '_> = Emoji("📦 ", "> ");

/// Create a progress bar over the tasks of a run
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    progress.set_style(style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format a run status for display
pub fn format_status(status: ExecutionStatus) -> String {
    let label = status.as_str().to_uppercase();
    match status {
        ExecutionStatus::Pending => style(label).dim().to_string(),
        ExecutionStatus::Running => style(label).yellow().to_string(),
        ExecutionStatus::Completed => style(label).green().to_string(),
        ExecutionStatus::Failed | ExecutionStatus::Aborted => style(label).red().to_string(),
        ExecutionStatus::Cancelled => style(label).yellow().to_string(),
    }
}

/// Format a component status for display
pub fn format_component_status(status: ComponentStatus) -> String {
    match status {
        ComponentStatus::Success => style("SUCCESS").green().to_string(),
        ComponentStatus::Failure => style("FAILURE").red().to_string(),
        ComponentStatus::Aborted => style("ABORTED").yellow().to_string(),
    }
}

/// Format a component diagnostic
pub fn format_diagnostic(error: &BuildError) -> String {
    let location = error
        .file
        .as_ref()
        .map(|f| format!(" ({})", f.display()))
        .unwrap_or_default();
    match error.severity {
        Severity::Fatal => format!(
            "{}{}: {}{}",
            CROSS,
            style(error.kind).red(),
            error.message,
            style(location).dim()
        ),
        Severity::Warning => format!(
            "{}{}: {}{}",
            WARN,
            style(error.kind).yellow(),
            error.message,
            style(location).dim()
        ),
    }
}

/// Format build summary for display
pub fn format_build_summary(summary: &BuildSummary) -> String {
    let status_icon = match summary.status {
        ExecutionStatus::Completed => CHECK,
        ExecutionStatus::Failed | ExecutionStatus::Aborted => CROSS,
        ExecutionStatus::Running => SPINNER,
        _ => INFO,
    };

    format!(
        "{} {} - {} - {} ({}/{} tasks, {} of {} components failed, {} artifacts) - {}",
        status_icon,
        style(&summary.run_id.to_string()[..8]).dim(),
        style(&summary.workspace).bold(),
        format_status(summary.status),
        summary.completed_tasks,
        summary.total_tasks,
        summary.failed_components,
        summary.total_components,
        style(summary.artifact_count).cyan(),
        style(summary.started_at.format("%Y-%m-%d %H:%M:%S")).dim()
    )
}

/// Format an artifact record for display
pub fn format_artifact(record: &ArtifactRecord) -> String {
    let producer = match &record.compiler {
        Some(compiler) => format!("{}/{}", record.task, compiler),
        None => record.task.clone(),
    };
    format!(
        "  {} {} {}",
        style(&record.content_hash[..record.content_hash.len().min(12)]).dim(),
        record.path,
        style(format!("[{}: {}]", record.artifact_name, producer)).dim()
    )
}

/// Format an execution event for display.
///
/// Returns `None` for events too fine-grained to print outside verbose mode.
pub fn format_execution_event(event: &ExecutionEvent, verbose: bool) -> Option<String> {
    let line = match event {
        ExecutionEvent::PipelineStarted {
            run_id,
            workspace,
            tasks,
            components,
        } => format!(
            "{}Building {} ({} tasks, {} components) ({})",
            PACKAGE,
            style(workspace).bold(),
            tasks,
            components,
            style(&run_id.to_string()[..8]).dim()
        ),
        ExecutionEvent::CapsuleAcquired {
            component,
            path,
            reused,
        } => {
            if !verbose {
                return None;
            }
            let how = if *reused { "reused" } else { "created" };
            format!(
                "{}capsule for {} {} at {}",
                INFO,
                style(component).cyan(),
                how,
                style(path.display()).dim()
            )
        }
        ExecutionEvent::CapsuleFailed { component, error } => format!(
            "{}capsule for {} failed: {}",
            CROSS,
            style(component).red(),
            style(error).dim()
        ),
        ExecutionEvent::TaskStarted { task, phase } => {
            if !verbose {
                return None;
            }
            format!("{}{} ({})", SPINNER, style(task).cyan(), phase)
        }
        ExecutionEvent::ComponentFinished {
            task,
            component,
            status,
        } => {
            if !verbose && *status == ComponentStatus::Success {
                return None;
            }
            format!(
                "    {} {} {}",
                style(task).dim(),
                component,
                format_component_status(*status)
            )
        }
        ExecutionEvent::TaskTimedOut { task } => {
            format!("{}{} timed out", WARN, style(task).yellow())
        }
        ExecutionEvent::TaskCompleted {
            task,
            succeeded,
            failed,
            duration_ms,
        } => {
            let icon = if *failed == 0 { CHECK } else { CROSS };
            format!(
                "{}{} {} succeeded, {} failed {}",
                icon,
                style(task).bold(),
                style(succeeded).green(),
                style(failed).red(),
                style(format_duration(Duration::from_millis((*duration_ms).max(0) as u64))).dim()
            )
        }
        ExecutionEvent::HookFailed { task, hook, error } => format!(
            "{}{} hook of {} failed: {}",
            CROSS,
            hook,
            style(task).red(),
            style(error).dim()
        ),
        ExecutionEvent::PipelineCompleted { run_id, status } => format!(
            "{}Build ({}) {}",
            INFO,
            style(&run_id.to_string()[..8]).dim(),
            format_status(*status)
        ),
    };
    Some(line)
}

pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    let secs = duration.as_secs();
    if secs == 0 {
        format!("{}ms", millis)
    } else if secs < 60 {
        format!("{:.1}s", duration.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
