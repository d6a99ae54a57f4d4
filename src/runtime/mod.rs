// src/runtime/mod.rs

//! Runtimes: per-kind strategies that turn a built Run into a Runnable and
//! translate backend outcomes back into Run status.
//!
//! A runtime is looked up by the runtime segment of the Run kind
//! (`container` for `container+job`) in the [`RuntimeRegistry`]. Every
//! operation here is synchronous and cluster-free; the cluster is only
//! touched later by the dispatch listener.
//!
//! - [`base`] holds the store-backed helpers every runtime shares.
//! - [`container`], [`python`] and [`workflow`] are the built-in runtimes.

use std::fmt::Debug;

use crate::entities::{Executable, ExecutableType, Task};
use crate::errors::Result;
use crate::run::{Run, RunSpec, StatusFragment};
use crate::runnable::Runnable;

pub mod base;
pub mod container;
pub mod python;
pub mod registry;
pub mod workflow;

pub use base::RuntimeBase;
pub use container::ContainerRuntime;
pub use python::PythonRuntime;
pub use registry::RuntimeRegistry;
pub use workflow::WorkflowRuntime;

/// Images and endpoints the built-in runtimes need.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeSettings {
    /// Registry that built images are pushed to.
    pub registry: String,
    /// Image running image builds.
    pub builder_image: String,
    pub python: PythonSettings,
    pub workflow: WorkflowSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PythonSettings {
    pub base_image: String,
    /// Image that fetches remote sources before the workload starts.
    pub source_image: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowSettings {
    pub api_version: String,
    pub kind: String,
    /// Default image for steps that do not name one.
    pub runner_image: String,
    pub service_account: Option<String>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            registry: "registry.local:5000".to_string(),
            builder_image: "gcr.io/kaniko-project/executor:latest".to_string(),
            python: PythonSettings {
                base_image: "python:3.10-slim".to_string(),
                source_image: "alpine/git:2.45.2".to_string(),
            },
            workflow: WorkflowSettings {
                api_version: "argoproj.io/v1alpha1".to_string(),
                kind: "Workflow".to_string(),
                runner_image: "python:3.10-slim".to_string(),
                service_account: None,
            },
        }
    }
}

/// Per-kind execution strategy.
///
/// `stop`, `resume` and `delete` only produce *requests* (a Runnable in a
/// request state); acting on them is the dispatch listener's job. The
/// `on_*` callbacks return status fragments merged into the Run.
pub trait Runtime: Send + Sync + Debug {
    /// Runtime segment of the Run kinds this runtime serves.
    fn kind(&self) -> &str;

    /// Full `<runtime>+<action>` kinds accepted.
    fn run_kinds(&self) -> &[&'static str];

    fn executable_type(&self) -> ExecutableType {
        ExecutableType::Function
    }

    fn base(&self) -> &RuntimeBase;

    /// Effective spec for `run`: task defaults merged with run overrides and
    /// a snapshot of the executable.
    fn build(&self, executable: &Executable, task: &Task, run: &Run) -> Result<RunSpec>;

    /// Backend-agnostic descriptor for a built run, in state `READY`.
    fn run(&self, run: &Run) -> Result<Runnable>;

    fn stop(&self, run: &Run) -> Result<Runnable> {
        self.base().stop_request(run)
    }

    fn resume(&self, run: &Run) -> Result<Runnable> {
        self.base().resume_request(run)
    }

    /// `None` when nothing was ever deployed for the run.
    fn delete(&self, run: &Run) -> Result<Option<Runnable>> {
        self.base().delete_request(run)
    }

    fn on_running(&self, _run: &Run, runnable: Option<&Runnable>) -> Result<Option<StatusFragment>> {
        Ok(runnable.map(base::progress_status))
    }

    fn on_complete(&self, _run: &Run, runnable: Option<&Runnable>) -> Result<Option<StatusFragment>> {
        Ok(runnable.map(base::final_status))
    }

    fn on_error(&self, _run: &Run, runnable: Option<&Runnable>) -> Result<Option<StatusFragment>> {
        Ok(runnable.map(base::error_status))
    }

    fn on_stopped(&self, _run: &Run, runnable: Option<&Runnable>) -> Result<Option<StatusFragment>> {
        Ok(runnable.map(base::progress_status))
    }

    /// Forget the runnable; the Run is about to reach `DELETED`.
    fn on_deleted(&self, run: &Run, _runnable: Option<&Runnable>) -> Result<Option<StatusFragment>> {
        self.base().forget(run)?;
        Ok(None)
    }
}
