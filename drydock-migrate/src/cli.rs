//! Command-line arguments

use clap::{Parser, Subcommand};
use drydock::migration::Direction;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "drydock-migrate")]
#[command(about = "Changelog migration tool for drydock databases")]
#[command(version)]
pub struct Cli {
    /// Database connection URL (overrides configuration)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Changelog file (overrides configuration)
    #[arg(long)]
    pub changelog: Option<PathBuf>,

    /// Configuration file (default: config/drydock.{toml,yaml,json})
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Quiet output (errors only)
    #[arg(short, long)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Commands {
    /// Show applied and pending changesets and held locks
    Status,

    /// Apply pending changesets
    Up,

    /// Apply pending changesets statement by statement, skipping failures
    Force,

    /// Roll back the most recently applied changeset
    DownOne,

    /// Print the SQL `up` would run, without running it
    Print,

    /// Clear a stuck migration lock
    ReleaseLocks,
}

impl Commands {
    /// The migration direction a command runs; `None` for read-only reporting
    pub fn direction(self) -> Option<Direction> {
        match self {
            Commands::Status => None,
            Commands::Up => Some(Direction::Up),
            Commands::Force => Some(Direction::Force),
            Commands::DownOne => Some(Direction::DownOne),
            Commands::Print => Some(Direction::Print),
            Commands::ReleaseLocks => Some(Direction::ReleaseLocks),
        }
    }
}

impl Cli {
    /// Default `env_logger` filter for the verbosity flags
    pub fn log_filter(&self) -> &'static str {
        if self.quiet {
            "error"
        } else if self.verbose {
            "debug"
        } else {
            "info"
        }
    }
}
