// src/entities/mod.rs

//! Contracts for the collaborators the engine consumes but does not own.
//!
//! Tasks, functions and workflows are read-only inputs fetched by id at BUILD
//! time. Credentials and configurations are injected into runnables that
//! accept them. Persistence of the Run entity itself sits behind
//! [`RunRepository`].
//!
//! [`memory`] provides thread-safe in-memory implementations used by the CLI
//! simulator and the tests.

use std::collections::BTreeMap;
use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::run::{K8sSpec, Run};

pub mod memory;

pub use memory::{InMemoryEntities, InMemoryRunRepository, StaticConfigurations, StaticCredentials};

/// Execution configuration binding an executable to a backend shape.
///
/// `kind` is `<runtime>+<action>` (e.g. `container+job`); `spec` holds the
/// defaults a Run may override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub project: String,
    pub kind: String,
    /// Id of the function or workflow this task executes.
    pub function: String,
    #[serde(default)]
    pub spec: K8sSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub id: String,
    pub project: String,
    pub kind: String,
    pub name: String,
    /// Runtime-specific body; each runtime decodes its own typed view.
    #[serde(default)]
    pub spec: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub project: String,
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub spec: serde_json::Value,
}

/// Which kind of executable a runtime resolves for its tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutableType {
    Function,
    Workflow,
}

/// The "what to run" record resolved at BUILD time.
#[derive(Debug, Clone, PartialEq)]
pub enum Executable {
    Function(Function),
    Workflow(Workflow),
}

impl Executable {
    pub fn id(&self) -> &str {
        match self {
            Executable::Function(f) => &f.id,
            Executable::Workflow(w) => &w.id,
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            Executable::Function(f) => &f.kind,
            Executable::Workflow(w) => &w.kind,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Executable::Function(f) => &f.name,
            Executable::Workflow(w) => &w.name,
        }
    }

    pub fn spec(&self) -> &serde_json::Value {
        match self {
            Executable::Function(f) => &f.spec,
            Executable::Workflow(w) => &w.spec,
        }
    }
}

/// Opaque credential payload, rendered into the workload as env values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub provider: String,
    #[serde(default)]
    pub values: BTreeMap<String, String>,
}

/// Opaque process-wide configuration payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub provider: String,
    #[serde(default)]
    pub values: BTreeMap<String, String>,
}

/// Read-only lookup of executable records. Absent ids fail with `NotFound`.
pub trait EntityProvider: Send + Sync + Debug {
    fn get_task(&self, id: &str) -> Result<Task>;
    fn get_function(&self, id: &str) -> Result<Function>;
    fn get_workflow(&self, id: &str) -> Result<Workflow>;
}

pub trait CredentialsProvider: Send + Sync + Debug {
    fn get_credentials(&self, principal: Option<&str>) -> Result<Vec<Credentials>>;
}

pub trait ConfigurationProvider: Send + Sync + Debug {
    fn get_configurations(&self) -> Result<Vec<Configuration>>;
}

/// Persistence for the Run entity.
pub trait RunRepository: Send + Sync + Debug {
    fn find(&self, id: &str) -> Result<Option<Run>>;
    fn save(&self, run: &Run) -> Result<()>;
}
