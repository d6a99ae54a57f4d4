// src/runtime/container.rs

//! Runs a user-supplied container image as a job, a deployment, a service or
//! builds a new image from a base image plus instructions.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use super::base::{self, RuntimeBase};
use super::{Runtime, RuntimeSettings};
use crate::entities::{Executable, Task};
use crate::errors::{EngineError, Result};
use crate::run::{PortSpec, Run, RunSpec};
use crate::runnable::{Runnable, RunnableBody};

pub const KIND: &str = "container";
const RUN_KINDS: &[&str] = &[
    "container+job",
    "container+deploy",
    "container+serve",
    "container+build",
];
const DEFAULT_SERVE_PORT: i32 = 8080;

/// Function body understood by this runtime.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ContainerFunctionSpec {
    pub image: Option<String>,
    /// Starting point for `container+build`.
    pub base_image: Option<String>,
    pub command: Vec<String>,
    pub args: Vec<String>,
    /// Extra Dockerfile instructions after `FROM`.
    pub instructions: Vec<String>,
    /// Extra files shipped with the build context.
    pub context: BTreeMap<String, String>,
}

#[derive(Debug)]
pub struct ContainerRuntime {
    base: RuntimeBase,
    settings: Arc<RuntimeSettings>,
}

impl ContainerRuntime {
    pub fn new(base: RuntimeBase, settings: Arc<RuntimeSettings>) -> Self {
        Self { base, settings }
    }
}

fn validate(action: &str, spec: &ContainerFunctionSpec) -> Result<()> {
    match action {
        "build" if spec.base_image.is_none() => Err(EngineError::InvalidArgument(
            "container build requires `base_image`".to_string(),
        )),
        "build" => Ok(()),
        _ if spec.image.is_none() => Err(EngineError::InvalidArgument(
            "container function requires `image`".to_string(),
        )),
        _ => Ok(()),
    }
}

impl Runtime for ContainerRuntime {
    fn kind(&self) -> &str {
        KIND
    }

    fn run_kinds(&self) -> &[&'static str] {
        RUN_KINDS
    }

    fn base(&self) -> &RuntimeBase {
        &self.base
    }

    fn build(&self, executable: &Executable, task: &Task, run: &Run) -> Result<RunSpec> {
        base::ensure_kind(RUN_KINDS, run)?;
        let function: ContainerFunctionSpec = base::decode("container function", executable.spec())?;
        validate(base::action(run), &function)?;
        base::built_spec(KIND, executable, task, run)
    }

    fn run(&self, run: &Run) -> Result<Runnable> {
        base::ensure_kind(RUN_KINDS, run)?;
        let snapshot = base::snapshot(run)?;
        let function: ContainerFunctionSpec = base::decode("container function", &snapshot.spec)?;
        let action = base::action(run);
        validate(action, &function)?;
        let k8s = &run.spec.k8s;

        let image = function.image.clone().unwrap_or_default();
        let mut container = base::container(k8s, image);
        container.command = function.command.clone();
        container.args = function.args.clone();
        if let Some(env) = base::parameters_env(run) {
            base::add_env(&mut container, &env.name, env.value);
        }

        let body = match action {
            "job" => base::job_body(k8s),
            "deploy" => RunnableBody::Serve {
                replicas: k8s.replicas.unwrap_or(1),
                ports: Vec::new(),
                service_type: None,
            },
            "serve" => RunnableBody::Serve {
                replicas: k8s.replicas.unwrap_or(1),
                ports: if k8s.service_ports.is_empty() {
                    vec![PortSpec {
                        port: 80,
                        target_port: Some(DEFAULT_SERVE_PORT),
                        name: Some("http".to_string()),
                    }]
                } else {
                    k8s.service_ports.clone()
                },
                service_type: k8s.service_type.clone(),
            },
            "build" => {
                let base_image = function.base_image.clone().unwrap_or_default();
                let mut instructions = vec![format!("FROM {base_image}")];
                instructions.extend(function.instructions.iter().cloned());
                container.image = self.settings.builder_image.clone();
                container.command.clear();
                container.args.clear();
                RunnableBody::Build {
                    context: function.context.clone(),
                    instructions,
                    target_image: base::target_image(&self.settings.registry, run, &snapshot.name),
                    backoff_limit: k8s.backoff_limit,
                }
            }
            other => {
                return Err(EngineError::InvalidArgument(format!(
                    "unsupported container action '{other}'"
                )));
            }
        };

        debug!(run_id = %run.id, framework = %body.framework(), "container runnable prepared");
        Ok(base::new_runnable(run, KIND, Some(container), body))
    }
}
