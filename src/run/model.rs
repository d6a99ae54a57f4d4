// src/run/model.rs

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::{EngineError, Result};
use crate::run::spec::K8sSpec;
use crate::types::State;

/// Status fragment returned by runtime callbacks and merged into a Run.
pub type StatusFragment = BTreeMap<String, serde_json::Value>;

/// Snapshot of the function/workflow a Run was built against.
///
/// Captured at BUILD so later edits to the executable never leak into a Run
/// that is already past `CREATED`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutableSnapshot {
    pub id: String,
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub spec: serde_json::Value,
}

/// Run specification. Immutable once the Run leaves `CREATED`, except for
/// `labels`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSpec {
    /// Id of the task this run executes.
    pub task: String,
    /// Client-driven execution; the engine skips every backend side effect.
    pub local_execution: bool,
    /// Run overrides before BUILD, the effective merge after it.
    pub k8s: K8sSpec,
    /// Free-form inputs handed to the workload.
    pub parameters: BTreeMap<String, serde_json::Value>,
    pub labels: BTreeMap<String, String>,
    /// Filled in by BUILD.
    pub executable: Option<ExecutableSnapshot>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStatus {
    pub state: State,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Backend-specific results, logs and metrics fragments.
    #[serde(default, flatten)]
    pub extra: StatusFragment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub project: String,
    /// `<runtime>+<action>`, e.g. `container+job`.
    pub kind: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub spec: RunSpec,
    #[serde(default)]
    pub status: RunStatus,
}

impl Run {
    pub fn new(id: impl Into<String>, project: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            project: project.into(),
            kind: kind.into(),
            user: None,
            spec: RunSpec::default(),
            status: RunStatus::default(),
        }
    }

    pub fn state(&self) -> State {
        self.status.state
    }

    pub fn is_local(&self) -> bool {
        self.spec.local_execution
    }

    /// The runtime segment of `kind` (`container` for `container+job`).
    pub fn runtime_kind(&self) -> &str {
        self.kind.split('+').next().unwrap_or(&self.kind)
    }

    /// Replace the spec. Past `CREATED` only `labels` may change.
    pub fn update_spec(&mut self, spec: RunSpec) -> Result<()> {
        if self.status.state != State::Created {
            let mut candidate = spec.clone();
            candidate.labels = self.spec.labels.clone();
            if candidate != self.spec {
                return Err(EngineError::InvalidArgument(format!(
                    "run '{}' is {}; only labels may change after BUILD",
                    self.id, self.status.state
                )));
            }
        }
        self.spec = spec;
        Ok(())
    }

    /// Merge a callback fragment into the status. A `message` key also
    /// updates `status.message`.
    pub fn merge_status(&mut self, fragment: StatusFragment) {
        for (key, value) in fragment {
            if key == "message" {
                self.status.message = value.as_str().map(str::to_string);
                continue;
            }
            self.status.extra.insert(key, value);
        }
    }
}
