// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{EngineConfig, RawEngineConfig};
use crate::errors::{EngineError, Result};

/// Read and deserialize a configuration file without validating it.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawEngineConfig> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .map_err(|e| EngineError::Config(format!("reading config file at {path:?}: {e}")))?;

    let config: RawEngineConfig = toml::from_str(&contents)?;
    debug!(path = ?path, "config file parsed");

    Ok(config)
}

/// Load a configuration file and validate it.
///
/// Missing sections and keys take their defaults; any invalid value fails
/// with [`EngineError::Config`] naming the offending field.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<EngineConfig> {
    let raw = load_from_path(&path)?;
    EngineConfig::try_from(raw)
}

/// `RUNPLANE_CONFIG` if set, otherwise `runplane.toml` in the working
/// directory.
pub fn default_config_path() -> PathBuf {
    std::env::var_os("RUNPLANE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("runplane.toml"))
}
