// src/runtime/python.rs

//! Python functions: inline or remote source, optional requirements, run as
//! a job or a service, or baked into an image.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use super::base::{self, RuntimeBase};
use super::{Runtime, RuntimeSettings};
use crate::entities::{Executable, Task};
use crate::errors::{EngineError, Result};
use crate::run::{PortSpec, Run, RunSpec, VolumeKind, VolumeSpec};
use crate::runnable::{ContainerSpec, InitStage, Runnable, RunnableBody};

pub const KIND: &str = "python";
const RUN_KINDS: &[&str] = &["python+job", "python+serve", "python+build"];
const SOURCE_DIR: &str = "/src";
const DEFAULT_ENTRYPOINT: &str = "main.py";
const DEFAULT_SERVE_PORT: i32 = 8080;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PythonSource {
    /// Inline program text.
    pub code: Option<String>,
    /// Git repository to clone.
    pub url: Option<String>,
    /// File to execute, relative to the source root.
    pub entrypoint: Option<String>,
    /// Function the program should call, passed as `RUNPLANE_HANDLER`.
    pub handler: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PythonFunctionSpec {
    pub python_version: Option<String>,
    /// Overrides the configured base image.
    pub image: Option<String>,
    pub source: PythonSource,
    pub requirements: Vec<String>,
}

impl PythonFunctionSpec {
    fn validate(&self, action: &str) -> Result<()> {
        match (&self.source.code, &self.source.url) {
            (Some(_), Some(_)) => Err(EngineError::InvalidArgument(
                "python source must set either `code` or `url`, not both".to_string(),
            )),
            (None, None) => Err(EngineError::InvalidArgument(
                "python source requires `code` or `url`".to_string(),
            )),
            (None, Some(_)) if action == "build" => Err(EngineError::InvalidArgument(
                "python image builds require inline `code`".to_string(),
            )),
            _ => Ok(()),
        }
    }

    fn entrypoint(&self) -> &str {
        self.source.entrypoint.as_deref().unwrap_or(DEFAULT_ENTRYPOINT)
    }
}

#[derive(Debug)]
pub struct PythonRuntime {
    base: RuntimeBase,
    settings: Arc<RuntimeSettings>,
}

impl PythonRuntime {
    pub fn new(base: RuntimeBase, settings: Arc<RuntimeSettings>) -> Self {
        Self { base, settings }
    }

    fn image(&self, function: &PythonFunctionSpec) -> String {
        match (&function.image, &function.python_version) {
            (Some(image), _) => image.clone(),
            (None, Some(version)) => format!("python:{version}-slim"),
            (None, None) => self.settings.python.base_image.clone(),
        }
    }

    /// Shell script that installs requirements and starts the program.
    fn launch(&self, function: &PythonFunctionSpec, container: &mut ContainerSpec) {
        let program = match &function.source.url {
            Some(url) => {
                container.volumes.push(VolumeSpec {
                    name: "source".to_string(),
                    kind: VolumeKind::EmptyDir,
                    mount_path: SOURCE_DIR.to_string(),
                    source: None,
                });
                container.init = Some(InitStage {
                    image: self.settings.python.source_image.clone(),
                    command: vec!["git".to_string()],
                    args: vec![
                        "clone".to_string(),
                        "--depth".to_string(),
                        "1".to_string(),
                        url.clone(),
                        SOURCE_DIR.to_string(),
                    ],
                });
                format!("python {SOURCE_DIR}/{}", function.entrypoint())
            }
            None => {
                let code = function.source.code.clone().unwrap_or_default();
                base::add_env(container, "RUNPLANE_SOURCE", code);
                "python -c \"$RUNPLANE_SOURCE\"".to_string()
            }
        };

        let script = if function.requirements.is_empty() {
            program
        } else {
            format!(
                "pip install --no-cache-dir {} && {program}",
                function.requirements.join(" ")
            )
        };
        container.command = vec!["sh".to_string(), "-c".to_string()];
        container.args = vec![script];
    }

    fn build_body(&self, run: &Run, name: &str, function: &PythonFunctionSpec) -> RunnableBody {
        let mut context = BTreeMap::new();
        context.insert(
            function.entrypoint().to_string(),
            function.source.code.clone().unwrap_or_default(),
        );

        let mut instructions = vec![
            format!("FROM {}", self.image(function)),
            "WORKDIR /app".to_string(),
            "COPY . /app".to_string(),
        ];
        if !function.requirements.is_empty() {
            context.insert("requirements.txt".to_string(), function.requirements.join("\n"));
            instructions.push("RUN pip install --no-cache-dir -r requirements.txt".to_string());
        }
        instructions.push(format!(
            "ENTRYPOINT [\"python\", \"/app/{}\"]",
            function.entrypoint()
        ));

        RunnableBody::Build {
            context,
            instructions,
            target_image: base::target_image(&self.settings.registry, run, name),
            backoff_limit: run.spec.k8s.backoff_limit,
        }
    }
}

impl Runtime for PythonRuntime {
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
        let function: PythonFunctionSpec = base::decode("python function", executable.spec())?;
        function.validate(base::action(run))?;
        base::built_spec(KIND, executable, task, run)
    }

    fn run(&self, run: &Run) -> Result<Runnable> {
        base::ensure_kind(RUN_KINDS, run)?;
        let snapshot = base::snapshot(run)?;
        let function: PythonFunctionSpec = base::decode("python function", &snapshot.spec)?;
        let action = base::action(run);
        function.validate(action)?;
        let k8s = &run.spec.k8s;

        let mut container = base::container(k8s, self.image(&function));
        if let Some(handler) = &function.source.handler {
            base::add_env(&mut container, "RUNPLANE_HANDLER", handler.clone());
        }
        if let Some(env) = base::parameters_env(run) {
            base::add_env(&mut container, &env.name, env.value);
        }

        let body = match action {
            "job" => {
                self.launch(&function, &mut container);
                base::job_body(k8s)
            }
            "serve" => {
                self.launch(&function, &mut container);
                base::add_env(&mut container, "RUNPLANE_MODE", "serve");
                base::add_env(&mut container, "PORT", DEFAULT_SERVE_PORT.to_string());
                RunnableBody::Serve {
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
                }
            }
            "build" => {
                container.image = self.settings.builder_image.clone();
                self.build_body(run, &snapshot.name, &function)
            }
            other => {
                return Err(EngineError::InvalidArgument(format!(
                    "unsupported python action '{other}'"
                )));
            }
        };

        debug!(run_id = %run.id, framework = %body.framework(), "python runnable prepared");
        Ok(base::new_runnable(run, KIND, Some(container), body))
    }
}
