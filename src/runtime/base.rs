// src/runtime/base.rs

//! Helpers shared by the built-in runtimes.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use crate::entities::{Executable, Task};
use crate::errors::{EngineError, Result};
use crate::run::{EnvEntry, ExecutableSnapshot, K8sSpec, Run, RunSpec, StatusFragment, merge_k8s};
use crate::runnable::{ContainerSpec, FrameworkKind, Runnable, RunnableBody, RunnableStore};
use crate::types::RunnableState;

/// Store access every runtime needs for request-style operations.
#[derive(Debug, Clone)]
pub struct RuntimeBase {
    store: Arc<dyn RunnableStore>,
}

impl RuntimeBase {
    pub fn new(store: Arc<dyn RunnableStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn RunnableStore> {
        &self.store
    }

    fn stored(&self, run: &Run) -> Result<Runnable> {
        self.store
            .find(&run.id)?
            .ok_or_else(|| EngineError::NotFound(format!("runnable for run '{}'", run.id)))
    }

    pub fn stop_request(&self, run: &Run) -> Result<Runnable> {
        let mut runnable = self.stored(run)?;
        runnable.transition_to(RunnableState::Stop, Some("stop requested".to_string()));
        Ok(runnable)
    }

    /// Only shapes with a suspended form can be resumed.
    pub fn resume_request(&self, run: &Run) -> Result<Runnable> {
        let mut runnable = self.stored(run)?;
        if !matches!(runnable.framework(), FrameworkKind::CronJob | FrameworkKind::Serve) {
            return Err(EngineError::InvalidArgument(format!(
                "run '{}': {} runnables cannot be resumed",
                run.id,
                runnable.framework()
            )));
        }
        runnable.transition_to(RunnableState::Resume, Some("resume requested".to_string()));
        Ok(runnable)
    }

    pub fn delete_request(&self, run: &Run) -> Result<Option<Runnable>> {
        Ok(self.store.find(&run.id)?.map(|mut runnable| {
            runnable.transition_to(RunnableState::Deleting, Some("delete requested".to_string()));
            runnable
        }))
    }

    pub fn forget(&self, run: &Run) -> Result<()> {
        let removed = self.store.remove(&run.id)?;
        debug!(run_id = %run.id, removed = removed.is_some(), "runnable forgotten");
        Ok(())
    }
}

pub fn ensure_kind(supported: &[&str], run: &Run) -> Result<()> {
    if supported.contains(&run.kind.as_str()) {
        Ok(())
    } else {
        Err(EngineError::InvalidArgument(format!(
            "run '{}' has unsupported kind '{}' (supported: {})",
            run.id,
            run.kind,
            supported.join(", ")
        )))
    }
}

/// Common BUILD validation and merge.
///
/// The task must carry the run's kind and the executable must belong to
/// `runtime`. Run overrides win over task defaults.
pub fn built_spec(runtime: &str, executable: &Executable, task: &Task, run: &Run) -> Result<RunSpec> {
    if task.kind != run.kind {
        return Err(EngineError::InvalidArgument(format!(
            "task '{}' has kind '{}' but run '{}' has kind '{}'",
            task.id, task.kind, run.id, run.kind
        )));
    }
    if executable.kind() != runtime {
        return Err(EngineError::InvalidArgument(format!(
            "executable '{}' has kind '{}', expected '{runtime}'",
            executable.id(),
            executable.kind()
        )));
    }

    let mut spec = run.spec.clone();
    spec.k8s = merge_k8s(&run.spec.k8s, &task.spec);
    spec.executable = Some(ExecutableSnapshot {
        id: executable.id().to_string(),
        kind: executable.kind().to_string(),
        name: executable.name().to_string(),
        spec: executable.spec().clone(),
    });
    Ok(spec)
}

/// The executable captured at BUILD.
pub fn snapshot(run: &Run) -> Result<&ExecutableSnapshot> {
    run.spec.executable.as_ref().ok_or_else(|| {
        EngineError::InvalidArgument(format!("run '{}' has not been built", run.id))
    })
}

/// Typed view of an executable body.
pub fn decode<T: DeserializeOwned>(what: &str, value: &serde_json::Value) -> Result<T> {
    let value = if value.is_null() {
        json!({})
    } else {
        value.clone()
    };
    serde_json::from_value(value)
        .map_err(|e| EngineError::InvalidArgument(format!("invalid {what} spec: {e}")))
}

/// The action segment of a `<runtime>+<action>` kind.
pub fn action(run: &Run) -> &str {
    run.kind.split_once('+').map(|(_, a)| a).unwrap_or_default()
}

/// Container fields from the effective spec.
pub fn container(k8s: &K8sSpec, image: impl Into<String>) -> ContainerSpec {
    ContainerSpec {
        image: image.into(),
        envs: k8s.envs.clone(),
        secrets: k8s.secrets.clone(),
        volumes: k8s.volumes.clone(),
        resources: k8s.resources.clone(),
        node_selector: k8s.node_selector.clone(),
        affinity: k8s.affinity.clone(),
        tolerations: k8s.tolerations.clone(),
        labels: k8s.labels.clone(),
        runtime_class: k8s.runtime_class.clone(),
        priority_class: k8s.priority_class.clone(),
        ..Default::default()
    }
}

/// Run parameters as a single JSON env value.
pub fn parameters_env(run: &Run) -> Option<EnvEntry> {
    if run.spec.parameters.is_empty() {
        return None;
    }
    Some(EnvEntry {
        name: "RUNPLANE_PARAMETERS".to_string(),
        value: serde_json::to_string(&run.spec.parameters).unwrap_or_default(),
    })
}

/// Push `entry` unless an env with that name is already set.
pub fn add_env(container: &mut ContainerSpec, name: &str, value: impl Into<String>) {
    if container.envs.iter().any(|e| e.name == name) {
        return;
    }
    container.envs.push(EnvEntry {
        name: name.to_string(),
        value: value.into(),
    });
}

pub fn new_runnable(
    run: &Run,
    runtime: &str,
    container: Option<ContainerSpec>,
    body: RunnableBody,
) -> Runnable {
    Runnable {
        id: run.id.clone(),
        project: run.project.clone(),
        runtime: runtime.to_string(),
        task: run.kind.clone(),
        user: run.user.clone(),
        container,
        body,
        state: RunnableState::Ready,
        message: None,
        error: None,
        results: BTreeMap::new(),
        logs: None,
        credentials: Vec::new(),
        configurations: Vec::new(),
    }
}

/// Body for job-like actions: a schedule turns a job into a cron job.
pub fn job_body(k8s: &K8sSpec) -> RunnableBody {
    match &k8s.schedule {
        Some(schedule) => RunnableBody::CronJob {
            schedule: schedule.clone(),
            backoff_limit: k8s.backoff_limit,
        },
        None => RunnableBody::Job {
            backoff_limit: k8s.backoff_limit,
        },
    }
}

/// `<registry>/<project>/<name>:<run id>`, lower-cased.
pub fn target_image(registry: &str, run: &Run, name: &str) -> String {
    format!(
        "{}/{}/{}:{}",
        registry.trim_end_matches('/'),
        run.project,
        name,
        run.id
    )
    .to_lowercase()
}

pub fn progress_status(runnable: &Runnable) -> StatusFragment {
    let mut fragment = StatusFragment::new();
    if let Some(message) = &runnable.message {
        fragment.insert("message".to_string(), json!(message));
    }
    if !runnable.results.is_empty() {
        fragment.insert("results".to_string(), json!(runnable.results));
    }
    fragment
}

pub fn final_status(runnable: &Runnable) -> StatusFragment {
    let mut fragment = progress_status(runnable);
    if let Some(logs) = &runnable.logs {
        fragment.insert("logs".to_string(), json!(logs));
    }
    fragment
}

pub fn error_status(runnable: &Runnable) -> StatusFragment {
    let mut fragment = final_status(runnable);
    if let Some(error) = &runnable.error {
        fragment.insert("message".to_string(), json!(error.description));
        fragment.insert("error".to_string(), json!(error));
    }
    fragment
}
