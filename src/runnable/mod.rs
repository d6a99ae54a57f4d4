// src/runnable/mod.rs

//! The engine's backend-agnostic execution descriptor and its persistence.
//!
//! A [`Runnable`] is produced once by a runtime and is then the unit of work
//! exchanged between the dispatch listener, the resource frameworks and the
//! monitor. Its `id` mirrors the Run id and stays stable for the life of the
//! backend object.
//!
//! - [`store`] defines [`RunnableStore`] and the in-memory implementation.
//! - [`file_store`] persists one JSON document per runnable.
//! - [`locks`] serialises read-then-write updates per runnable id.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::core::v1::{Affinity, Toleration};
use serde::{Deserialize, Serialize};

use crate::entities::{Configuration, Credentials};
use crate::run::{EnvEntry, PortSpec, ResourceSpec, VolumeSpec};
use crate::types::RunnableState;

pub mod file_store;
pub mod locks;
pub mod store;

pub use file_store::FileRunnableStore;
pub use locks::KeyedLocks;
pub use store::{InMemoryRunnableStore, RunnableStore};

/// Compact, structured error recorded on a failed runnable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub description: String,
}

impl ErrorDetail {
    pub fn new(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            description: description.into(),
        }
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.description)
    }
}

/// Extra container run before the main one (source checkout, context copy).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitStage {
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Container-level fields shared by every container-based backend shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerSpec {
    pub image: String,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub envs: Vec<EnvEntry>,
    pub secrets: Vec<String>,
    pub volumes: Vec<VolumeSpec>,
    pub resources: ResourceSpec,
    pub node_selector: BTreeMap<String, String>,
    pub affinity: Option<Affinity>,
    pub tolerations: Vec<Toleration>,
    pub labels: BTreeMap<String, String>,
    pub runtime_class: Option<String>,
    pub priority_class: Option<String>,
    pub init: Option<InitStage>,
}

/// Backend shape a runnable is realised as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameworkKind {
    Job,
    CronJob,
    Serve,
    CustomResource,
    Build,
}

impl FrameworkKind {
    pub const ALL: [FrameworkKind; 5] = [
        FrameworkKind::Job,
        FrameworkKind::CronJob,
        FrameworkKind::Serve,
        FrameworkKind::CustomResource,
        FrameworkKind::Build,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FrameworkKind::Job => "job",
            FrameworkKind::CronJob => "cronjob",
            FrameworkKind::Serve => "serve",
            FrameworkKind::CustomResource => "cr",
            FrameworkKind::Build => "build",
        }
    }
}

impl fmt::Display for FrameworkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape-specific part of a runnable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum RunnableBody {
    Job {
        #[serde(default)]
        backoff_limit: Option<i32>,
    },
    CronJob {
        schedule: String,
        #[serde(default)]
        backoff_limit: Option<i32>,
    },
    Serve {
        replicas: i32,
        #[serde(default)]
        ports: Vec<PortSpec>,
        #[serde(default)]
        service_type: Option<String>,
    },
    CustomResource {
        api_version: String,
        kind: String,
        #[serde(default)]
        spec: serde_json::Value,
    },
    Build {
        /// File name -> content, shipped to the builder as a config map.
        context: BTreeMap<String, String>,
        /// Dockerfile instructions.
        instructions: Vec<String>,
        target_image: String,
        #[serde(default)]
        backoff_limit: Option<i32>,
    },
}

impl RunnableBody {
    pub fn framework(&self) -> FrameworkKind {
        match self {
            RunnableBody::Job { .. } => FrameworkKind::Job,
            RunnableBody::CronJob { .. } => FrameworkKind::CronJob,
            RunnableBody::Serve { .. } => FrameworkKind::Serve,
            RunnableBody::CustomResource { .. } => FrameworkKind::CustomResource,
            RunnableBody::Build { .. } => FrameworkKind::Build,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Runnable {
    /// Mirrors the Run id.
    pub id: String,
    pub project: String,
    /// Runtime kind that produced this runnable.
    pub runtime: String,
    /// Run/task kind (`container+job`, ...).
    pub task: String,
    #[serde(default)]
    pub user: Option<String>,
    /// Absent for custom resources, whose body is opaque.
    #[serde(default)]
    pub container: Option<ContainerSpec>,
    pub body: RunnableBody,

    pub state: RunnableState,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<ErrorDetail>,
    #[serde(default)]
    pub results: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub logs: Option<String>,

    #[serde(default)]
    pub credentials: Vec<Credentials>,
    #[serde(default)]
    pub configurations: Vec<Configuration>,
}

impl Runnable {
    pub fn framework(&self) -> FrameworkKind {
        self.body.framework()
    }

    /// Container-shaped runnables accept injected credentials.
    pub fn accepts_credentials(&self) -> bool {
        self.container.is_some()
    }

    pub fn accepts_configurations(&self) -> bool {
        self.container.is_some()
    }

    /// Attach credentials if this runnable accepts them. Returns whether
    /// anything was attached.
    pub fn inject_credentials(&mut self, credentials: Vec<Credentials>) -> bool {
        if !self.accepts_credentials() {
            return false;
        }
        self.credentials = credentials;
        true
    }

    pub fn inject_configurations(&mut self, configurations: Vec<Configuration>) -> bool {
        if !self.accepts_configurations() {
            return false;
        }
        self.configurations = configurations;
        true
    }

    /// Move to `state`, clearing any previous error.
    pub fn transition_to(&mut self, state: RunnableState, message: Option<String>) {
        self.state = state;
        self.message = message;
        if state != RunnableState::Error {
            self.error = None;
        }
    }

    pub fn fail(&mut self, error: ErrorDetail) {
        self.state = RunnableState::Error;
        self.message = Some(error.description.clone());
        self.error = Some(error);
    }
}
