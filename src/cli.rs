// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Command-line arguments for `runplane`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "runplane",
    version,
    about = "Drive runs through their lifecycle and onto a cluster.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `RUNPLANE_CONFIG`, else `runplane.toml` if it exists, else
    /// built-in defaults.
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `RUNPLANE_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Load and validate the config, then list runtimes and frameworks.
    Check,

    /// Build and run a Run offline and print the cluster objects it maps to.
    Render(RunInputs),

    /// Drive a Run end to end against an in-memory cluster, printing every
    /// change event.
    Simulate {
        #[command(flatten)]
        inputs: RunInputs,

        /// Report every job as failed instead of succeeded.
        #[arg(long)]
        fail: bool,

        /// Monitor cycles to run before giving up on a terminal state.
        #[arg(long, default_value_t = 5)]
        cycles: usize,
    },
}

/// JSON documents describing one Run and what it executes.
#[derive(Debug, Clone, Args)]
pub struct RunInputs {
    /// The Run (`id`, `project`, `kind`, `spec`).
    #[arg(long, value_name = "PATH")]
    pub run: PathBuf,

    /// The task the Run points at.
    #[arg(long, value_name = "PATH")]
    pub task: PathBuf,

    /// Function executed by the task.
    #[arg(long, value_name = "PATH", conflicts_with = "workflow")]
    pub function: Option<PathBuf>,

    /// Workflow executed by the task.
    #[arg(long, value_name = "PATH")]
    pub workflow: Option<PathBuf>,
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

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
