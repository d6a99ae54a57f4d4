// src/config/mod.rs

//! Configuration loading and validation for runplane.
//!
//! - `model.rs` defines the TOML-backed raw sections and the validated
//!   [`EngineConfig`].
//! - `loader.rs` reads a file from disk.
//! - `validate.rs` turns raw sections into typed settings via `TryFrom`.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{EngineConfig, EngineSettings, RawEngineConfig, StoreSettings};
pub use validate::parse_duration;
