//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{ArtifactsCommand, BuildCommand, CleanCommand, HistoryCommand, ValidateCommand};
use std::ffi::OsString;

/// Builds components in isolated capsules
#[derive(Debug, Parser, Clone)]
#[command(name = "capsule-builder")]
#[command(version)]
#[command(about = "Builds versioned components in isolated capsules through a compiler pipeline", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Build the components of a build file
    Build(BuildCommand),

    /// Validate a build file
    Validate(ValidateCommand),

    /// Show build history
    History(HistoryCommand),

    /// List the artifacts recorded for a run
    Artifacts(ArtifactsCommand),

    /// Delete idle pooled capsules
    Clean(CleanCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
