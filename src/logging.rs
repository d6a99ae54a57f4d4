// src/logging.rs

//! `tracing` subscriber for the `runplane` binary.
//!
//! The filter comes from, in order:
//! 1. `--log-level`, applied to the `runplane` target only
//! 2. `RUNPLANE_LOG`, any `EnvFilter` directive list such as
//!    `"runplane::monitor=debug,kube=warn"`
//! 3. `info` for `runplane`, `warn` for everything else
//!
//! Output goes to stderr; stdout carries rendered objects and change events.

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

use crate::cli::LogLevel;

const ENV_VAR: &str = "RUNPLANE_LOG";
/// Backend client crates are chatty at `info`.
const QUIET_DEPENDENCIES: &str = "warn";

pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let filter = build_filter(cli_level, std::env::var(ENV_VAR).ok().as_deref())?;

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("installing tracing subscriber: {e}"))
}

fn build_filter(cli_level: Option<LogLevel>, env: Option<&str>) -> Result<EnvFilter> {
    if let Some(level) = cli_level {
        return directives(level.as_str());
    }
    match env.map(str::trim).filter(|s| !s.is_empty()) {
        Some(spec) => EnvFilter::try_new(spec).with_context(|| format!("invalid {ENV_VAR} value '{spec}'")),
        None => directives("info"),
    }
}

fn directives(runplane_level: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(format!("{QUIET_DEPENDENCIES},runplane={runplane_level}"))
        .context("building default log filter")
}
