#![allow(dead_code)]

use std::collections::BTreeMap;

use runplane::entities::{Function, Task, Workflow};
use runplane::run::{EnvEntry, PortSpec, Run};
use serde_json::{Value, json};

pub const PROJECT: &str = "demo";

/// Builder for `Run` to simplify test setup.
pub struct RunBuilder {
    run: Run,
}

impl RunBuilder {
    /// A CREATED run of `kind` pointing at task `task-<id>`.
    pub fn new(id: &str, kind: &str) -> Self {
        let mut run = Run::new(id, PROJECT, kind);
        run.spec.task = format!("task-{id}");
        Self { run }
    }

    pub fn task(mut self, task_id: &str) -> Self {
        self.run.spec.task = task_id.to_string();
        self
    }

    pub fn user(mut self, user: &str) -> Self {
        self.run.user = Some(user.to_string());
        self
    }

    pub fn local(mut self) -> Self {
        self.run.spec.local_execution = true;
        self
    }

    pub fn env(mut self, name: &str, value: &str) -> Self {
        self.run.spec.k8s.envs.push(EnvEntry {
            name: name.to_string(),
            value: value.to_string(),
        });
        self
    }

    pub fn parameter(mut self, name: &str, value: Value) -> Self {
        self.run.spec.parameters.insert(name.to_string(), value);
        self
    }

    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.run
            .spec
            .labels
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn replicas(mut self, replicas: i32) -> Self {
        self.run.spec.k8s.replicas = Some(replicas);
        self
    }

    pub fn build(self) -> Run {
        self.run
    }
}

/// Builder for `Task`.
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new(id: &str, kind: &str, function: &str) -> Self {
        Self {
            task: Task {
                id: id.to_string(),
                project: PROJECT.to_string(),
                kind: kind.to_string(),
                function: function.to_string(),
                spec: Default::default(),
            },
        }
    }

    pub fn env(mut self, name: &str, value: &str) -> Self {
        self.task.spec.envs.push(EnvEntry {
            name: name.to_string(),
            value: value.to_string(),
        });
        self
    }

    pub fn secret(mut self, name: &str) -> Self {
        self.task.spec.secrets.push(name.to_string());
        self
    }

    pub fn schedule(mut self, cron: &str) -> Self {
        self.task.spec.schedule = Some(cron.to_string());
        self
    }

    pub fn replicas(mut self, replicas: i32) -> Self {
        self.task.spec.replicas = Some(replicas);
        self
    }

    pub fn port(mut self, port: i32, target_port: i32) -> Self {
        self.task.spec.service_ports.push(PortSpec {
            port,
            target_port: Some(target_port),
            name: None,
        });
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

/// Builder for `Function`.
pub struct FunctionBuilder {
    function: Function,
}

impl FunctionBuilder {
    pub fn new(id: &str, kind: &str) -> Self {
        Self {
            function: Function {
                id: id.to_string(),
                project: PROJECT.to_string(),
                kind: kind.to_string(),
                name: id.to_string(),
                spec: json!({}),
            },
        }
    }

    /// A `container` function running `image`.
    pub fn container(id: &str, image: &str) -> Self {
        Self::new(id, "container").field("image", json!(image))
    }

    /// A `python` function with inline source.
    pub fn python(id: &str, code: &str) -> Self {
        Self::new(id, "python").field("source", json!({ "code": code }))
    }

    pub fn name(mut self, name: &str) -> Self {
        self.function.name = name.to_string();
        self
    }

    pub fn field(mut self, key: &str, value: Value) -> Self {
        if let Value::Object(map) = &mut self.function.spec {
            map.insert(key.to_string(), value);
        }
        self
    }

    pub fn build(self) -> Function {
        self.function
    }
}

/// A `workflow` workflow from `(step, depends)` pairs.
pub fn workflow(id: &str, steps: &[(&str, &[&str])]) -> Workflow {
    let steps: Vec<Value> = steps
        .iter()
        .map(|(name, depends)| json!({ "name": name, "image": "busybox", "depends": depends }))
        .collect();
    Workflow {
        id: id.to_string(),
        project: PROJECT.to_string(),
        kind: "workflow".to_string(),
        name: id.to_string(),
        spec: json!({ "steps": steps }),
    }
}

/// Labels map from pairs.
pub fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
