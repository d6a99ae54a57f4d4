// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

use crate::cluster::ClusterError;
use crate::runnable::ErrorDetail;
use crate::types::{Event, State};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Illegal transition: no transition for event {event} from state {state}")]
    IllegalTransition { state: State, event: Event },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Runtime kind '{0}' is already registered")]
    DuplicateRuntime(String),

    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Dispatch queue closed")]
    QueueClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// Errors a caller should never retry: the same input fails the same way.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            EngineError::IllegalTransition { .. }
                | EngineError::InvalidArgument(_)
                | EngineError::Config(_)
                | EngineError::DuplicateRuntime(_)
        )
    }

    /// Compact form recorded on a runnable that failed because of this error.
    pub fn detail(&self) -> ErrorDetail {
        match self {
            EngineError::Cluster(e) => e.detail(),
            EngineError::InvalidArgument(msg) => ErrorDetail::new("InvalidArgument", msg.clone()),
            EngineError::NotFound(msg) => ErrorDetail::new("NotFound", msg.clone()),
            other => ErrorDetail::new("Internal", other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
