// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Command-line arguments for `runwright`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "runwright",
    version,
    about = "Run a collection of API requests across iterations.",
    long_about = None
)]
pub struct CliArgs {
    /// Collection file (JSON).
    #[arg(long, short = 'c', value_name = "PATH")]
    pub collection: PathBuf,

    /// Path to the config file (TOML).
    ///
    /// Default: `Runwright.toml` in the current working directory. A missing
    /// default file is not an error.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Environment file (JSON).
    #[arg(long, short = 'e', value_name = "PATH")]
    pub environment: Option<PathBuf>,

    /// Globals file (JSON).
    #[arg(long, short = 'g', value_name = "PATH")]
    pub globals: Option<PathBuf>,

    /// Iteration data file (JSON array of objects).
    #[arg(long, short = 'd', value_name = "PATH")]
    pub data: Option<PathBuf>,

    /// Number of iterations. Overrides `[run].iteration_count`.
    #[arg(long, short = 'n', value_name = "N")]
    pub iteration_count: Option<usize>,

    /// Stop after the item that failed, finishing the current iteration.
    #[arg(long)]
    pub stop_on_error: bool,

    /// Abort the run on the first failure.
    #[arg(long)]
    pub abort_on_error: bool,

    /// Run iterations in parallel with at most N in flight.
    #[arg(long, value_name = "N")]
    pub parallel: Option<usize>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `RUNWRIGHT_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Load and validate everything, print the execution plan, but send
    /// nothing.
    #[arg(long)]
    pub dry_run: bool,
}

impl CliArgs {
    /// Config path to use: the explicit flag, or the default location.
    pub fn config_path(&self) -> (PathBuf, bool) {
        match &self.config {
            Some(path) => (path.clone(), true),
            None => (crate::config::default_config_path(), false),
        }
    }
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
