// src/runtime/workflow.rs

//! Multi-step workflows, submitted to a workflow engine as one custom
//! resource. Step dependencies must form a DAG.

use std::collections::HashSet;
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::base::{self, RuntimeBase};
use super::{Runtime, RuntimeSettings};
use crate::entities::{Executable, ExecutableType, Task};
use crate::errors::{EngineError, Result};
use crate::run::{Run, RunSpec};
use crate::runnable::{Runnable, RunnableBody};

pub const KIND: &str = "workflow";
const RUN_KINDS: &[&str] = &["workflow+pipeline"];
const ENTRYPOINT: &str = "main";

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowStep {
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Steps that must finish first.
    #[serde(default)]
    pub depends: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WorkflowSpec {
    pub steps: Vec<WorkflowStep>,
    pub parallelism: Option<u32>,
}

impl WorkflowSpec {
    fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(EngineError::InvalidArgument(
                "workflow has no steps".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for step in &self.steps {
            if !names.insert(step.name.as_str()) {
                return Err(EngineError::InvalidArgument(format!(
                    "workflow step '{}' is defined more than once",
                    step.name
                )));
            }
        }

        // Edge direction: dependency -> dependent.
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for step in &self.steps {
            graph.add_node(step.name.as_str());
        }
        for step in &self.steps {
            for dep in &step.depends {
                if !names.contains(dep.as_str()) {
                    return Err(EngineError::InvalidArgument(format!(
                        "workflow step '{}' depends on unknown step '{dep}'",
                        step.name
                    )));
                }
                graph.add_edge(dep.as_str(), step.name.as_str(), ());
            }
        }

        toposort(&graph, None).map(|_| ()).map_err(|cycle| {
            EngineError::InvalidArgument(format!(
                "workflow steps contain a cycle involving '{}'",
                cycle.node_id()
            ))
        })
    }
}

#[derive(Debug)]
pub struct WorkflowRuntime {
    base: RuntimeBase,
    settings: Arc<RuntimeSettings>,
}

impl WorkflowRuntime {
    pub fn new(base: RuntimeBase, settings: Arc<RuntimeSettings>) -> Self {
        Self { base, settings }
    }

    fn manifest(&self, run: &Run, workflow: &WorkflowSpec) -> Value {
        let settings = &self.settings.workflow;
        let env: Vec<Value> = run
            .spec
            .k8s
            .envs
            .iter()
            .map(|e| json!({ "name": e.name, "value": e.value }))
            .chain(base::parameters_env(run).map(|e| json!({ "name": e.name, "value": e.value })))
            .collect();

        let tasks: Vec<Value> = workflow
            .steps
            .iter()
            .map(|step| {
                let mut task = json!({ "name": step.name, "template": step.name });
                if !step.depends.is_empty() {
                    task["dependencies"] = json!(step.depends);
                }
                task
            })
            .collect();

        let mut templates = vec![json!({ "name": ENTRYPOINT, "dag": { "tasks": tasks } })];
        templates.extend(workflow.steps.iter().map(|step| {
            let image = step.image.clone().unwrap_or_else(|| settings.runner_image.clone());
            let mut container = json!({ "image": image, "env": env });
            if !step.command.is_empty() {
                container["command"] = json!(step.command);
            }
            if !step.args.is_empty() {
                container["args"] = json!(step.args);
            }
            json!({ "name": step.name, "container": container })
        }));

        let mut spec = json!({ "entrypoint": ENTRYPOINT, "templates": templates });
        if let Some(parallelism) = workflow.parallelism {
            spec["parallelism"] = json!(parallelism);
        }
        if let Some(account) = &settings.service_account {
            spec["serviceAccountName"] = json!(account);
        }
        if !run.spec.parameters.is_empty() {
            let parameters: Vec<Value> = run
                .spec
                .parameters
                .iter()
                .map(|(name, value)| {
                    let value = match value {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    json!({ "name": name, "value": value })
                })
                .collect();
            spec["arguments"] = json!({ "parameters": parameters });
        }
        spec
    }
}

impl Runtime for WorkflowRuntime {
    fn kind(&self) -> &str {
        KIND
    }

    fn run_kinds(&self) -> &[&'static str] {
        RUN_KINDS
    }

    fn executable_type(&self) -> ExecutableType {
        ExecutableType::Workflow
    }

    fn base(&self) -> &RuntimeBase {
        &self.base
    }

    fn build(&self, executable: &Executable, task: &Task, run: &Run) -> Result<RunSpec> {
        base::ensure_kind(RUN_KINDS, run)?;
        let workflow: WorkflowSpec = base::decode("workflow", executable.spec())?;
        workflow.validate()?;
        base::built_spec(KIND, executable, task, run)
    }

    fn run(&self, run: &Run) -> Result<Runnable> {
        base::ensure_kind(RUN_KINDS, run)?;
        let snapshot = base::snapshot(run)?;
        let workflow: WorkflowSpec = base::decode("workflow", &snapshot.spec)?;
        workflow.validate()?;

        let body = RunnableBody::CustomResource {
            api_version: self.settings.workflow.api_version.clone(),
            kind: self.settings.workflow.kind.clone(),
            spec: self.manifest(run, &workflow),
        };
        debug!(run_id = %run.id, steps = workflow.steps.len(), "workflow runnable prepared");
        Ok(base::new_runnable(run, KIND, None, body))
    }
}
