// src/run/spec.rs

//! Execution-backend fields shared by tasks and runs, and the explicit merge
//! that turns "task defaults + run overrides" into an effective spec.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Affinity, Toleration};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvEntry {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeKind {
    EmptyDir,
    PersistentVolumeClaim,
    ConfigMap,
    Secret,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSpec {
    pub name: String,
    pub kind: VolumeKind,
    pub mount_path: String,
    /// Claim, config map or secret name; ignored for `empty_dir`.
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceSpec {
    pub cpu_request: Option<String>,
    pub cpu_limit: Option<String>,
    pub memory_request: Option<String>,
    pub memory_limit: Option<String>,
    pub gpu: Option<String>,
}

impl ResourceSpec {
    /// Field-wise: `self` wins, `defaults` fills gaps.
    pub fn or(&self, defaults: &ResourceSpec) -> ResourceSpec {
        ResourceSpec {
            cpu_request: self.cpu_request.clone().or_else(|| defaults.cpu_request.clone()),
            cpu_limit: self.cpu_limit.clone().or_else(|| defaults.cpu_limit.clone()),
            memory_request: self
                .memory_request
                .clone()
                .or_else(|| defaults.memory_request.clone()),
            memory_limit: self
                .memory_limit
                .clone()
                .or_else(|| defaults.memory_limit.clone()),
            gpu: self.gpu.clone().or_else(|| defaults.gpu.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == ResourceSpec::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    pub port: i32,
    #[serde(default)]
    pub target_port: Option<i32>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Backend-shaped knobs. Every field is optional so the same struct can
/// carry task defaults, run overrides and their merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct K8sSpec {
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
    pub replicas: Option<i32>,
    /// Cron expression; turns a job into a scheduled job.
    pub schedule: Option<String>,
    pub backoff_limit: Option<i32>,
    pub service_type: Option<String>,
    pub service_ports: Vec<PortSpec>,
}

/// Task provides defaults, run provides overrides.
///
/// - scalar options: the run value wins when set
/// - keyed collections (envs, volumes, node selector, labels): union, run
///   entries replace task entries with the same key
/// - secrets: union, order preserved, no duplicates
/// - tolerations / service ports: the run list replaces the task list when
///   non-empty
pub fn merge_k8s(run: &K8sSpec, task: &K8sSpec) -> K8sSpec {
    K8sSpec {
        envs: merge_keyed(&run.envs, &task.envs, |e| e.name.as_str()),
        secrets: merge_unique(&run.secrets, &task.secrets),
        volumes: merge_keyed(&run.volumes, &task.volumes, |v| v.name.as_str()),
        resources: run.resources.or(&task.resources),
        node_selector: merge_maps(&run.node_selector, &task.node_selector),
        affinity: run.affinity.clone().or_else(|| task.affinity.clone()),
        tolerations: prefer_non_empty(&run.tolerations, &task.tolerations),
        labels: merge_maps(&run.labels, &task.labels),
        runtime_class: run.runtime_class.clone().or_else(|| task.runtime_class.clone()),
        priority_class: run
            .priority_class
            .clone()
            .or_else(|| task.priority_class.clone()),
        replicas: run.replicas.or(task.replicas),
        schedule: run.schedule.clone().or_else(|| task.schedule.clone()),
        backoff_limit: run.backoff_limit.or(task.backoff_limit),
        service_type: run.service_type.clone().or_else(|| task.service_type.clone()),
        service_ports: prefer_non_empty(&run.service_ports, &task.service_ports),
    }
}

fn merge_keyed<T: Clone>(run: &[T], task: &[T], key: impl Fn(&T) -> &str) -> Vec<T> {
    let mut merged: Vec<T> = task
        .iter()
        .filter(|t| !run.iter().any(|r| key(r) == key(t)))
        .cloned()
        .collect();
    merged.extend(run.iter().cloned());
    merged
}

fn merge_unique(run: &[String], task: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = task.to_vec();
    for s in run {
        if !merged.contains(s) {
            merged.push(s.clone());
        }
    }
    merged
}

fn merge_maps(
    run: &BTreeMap<String, String>,
    task: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = task.clone();
    merged.extend(run.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

fn prefer_non_empty<T: Clone>(run: &[T], task: &[T]) -> Vec<T> {
    if run.is_empty() {
        task.to_vec()
    } else {
        run.to_vec()
    }
}
