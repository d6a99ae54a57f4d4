// src/cluster/memory.rs

//! In-memory cluster used by the simulator and the tests.
//!
//! Behaves like an API server for the operations the frameworks use:
//! duplicate creates are rejected, deletes of absent objects report `false`,
//! replaces of absent objects fail with `NotFound`. Jobs are created in an
//! "active" state and only finish when a test (or the simulator) says so.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use k8s_openapi::api::apps::v1::DeploymentStatus;
use k8s_openapi::api::batch::v1::{JobCondition, JobStatus};
use tracing::debug;

use super::{BoxFuture, ClusterClient, ClusterError, ClusterObject, ObjectKey, ObjectKind};

#[derive(Debug, Default)]
struct ClusterState {
    objects: BTreeMap<ObjectKey, ClusterObject>,
    logs: HashMap<ObjectKey, String>,
    calls: HashMap<&'static str, usize>,
    revision: u64,
}

impl ClusterState {
    fn count(&mut self, operation: &'static str) {
        *self.calls.entry(operation).or_default() += 1;
    }

    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut ClusterState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// How many times `operation` (`create`, `get`, `replace`, `delete`,
    /// `logs`) has been called.
    pub fn calls(&self, operation: &str) -> usize {
        self.with_state(|s| s.calls.get(operation).copied().unwrap_or(0))
    }

    pub fn object(&self, key: &ObjectKey) -> Option<ClusterObject> {
        self.with_state(|s| s.objects.get(key).cloned())
    }

    pub fn objects(&self) -> Vec<ClusterObject> {
        self.with_state(|s| s.objects.values().cloned().collect())
    }

    pub fn objects_of(&self, kind: &ObjectKind) -> Vec<ClusterObject> {
        self.with_state(|s| {
            s.objects
                .iter()
                .filter(|(key, _)| &key.kind == kind)
                .map(|(_, object)| object.clone())
                .collect()
        })
    }

    /// Drop an object behind the engine's back.
    pub fn remove(&self, key: &ObjectKey) -> Option<ClusterObject> {
        self.with_state(|s| s.objects.remove(key))
    }

    pub fn set_logs(&self, key: &ObjectKey, logs: impl Into<String>) {
        let logs = logs.into();
        self.with_state(|s| {
            s.logs.insert(key.clone(), logs);
        });
    }

    /// Mark a job as succeeded. Returns false when no such job exists.
    pub fn complete_job(&self, namespace: &str, name: &str) -> bool {
        self.update_job(namespace, name, |status| {
            status.active = Some(0);
            status.succeeded = Some(1);
            status.conditions = Some(vec![JobCondition {
                type_: "Complete".to_string(),
                status: "True".to_string(),
                ..Default::default()
            }]);
        })
    }

    /// Mark a job as failed with `message`.
    pub fn fail_job(&self, namespace: &str, name: &str, message: &str) -> bool {
        let message = message.to_string();
        self.update_job(namespace, name, move |status| {
            status.active = Some(0);
            status.failed = Some(1);
            status.conditions = Some(vec![JobCondition {
                type_: "Failed".to_string(),
                status: "True".to_string(),
                reason: Some("BackoffLimitExceeded".to_string()),
                message: Some(message),
                ..Default::default()
            }]);
        })
    }

    /// Complete every job still active. Returns how many were completed.
    pub fn complete_all_jobs(&self) -> usize {
        self.active_jobs()
            .iter()
            .filter(|key| self.complete_job(&key.namespace, &key.name))
            .count()
    }

    /// Fail every job still active with `message`.
    pub fn fail_all_jobs(&self, message: &str) -> usize {
        self.active_jobs()
            .iter()
            .filter(|key| self.fail_job(&key.namespace, &key.name, message))
            .count()
    }

    fn active_jobs(&self) -> Vec<ObjectKey> {
        self.with_state(|s| {
            s.objects
                .iter()
                .filter_map(|(key, object)| match object {
                    ClusterObject::Job(job)
                        if job.status.as_ref().and_then(|st| st.active).unwrap_or(0) > 0 =>
                    {
                        Some(key.clone())
                    }
                    _ => None,
                })
                .collect()
        })
    }

    fn update_job(&self, namespace: &str, name: &str, f: impl FnOnce(&mut JobStatus)) -> bool {
        let key = ObjectKey::new(ObjectKind::Job, namespace, name);
        self.with_state(|s| match s.objects.get_mut(&key) {
            Some(ClusterObject::Job(job)) => {
                f(job.status.get_or_insert_with(JobStatus::default));
                true
            }
            _ => false,
        })
    }
}

/// What the API server would fill in on admission.
fn admit(object: &mut ClusterObject, revision: String) {
    let meta = object.metadata_mut();
    if meta.uid.is_none() {
        meta.uid = Some(format!("uid-{revision}"));
    }
    meta.resource_version = Some(revision);

    match object {
        ClusterObject::Job(job) if job.status.is_none() => {
            job.status = Some(JobStatus {
                active: Some(1),
                ..Default::default()
            });
        }
        ClusterObject::Deployment(deployment) => {
            let replicas = deployment
                .spec
                .as_ref()
                .and_then(|spec| spec.replicas)
                .unwrap_or(1);
            deployment.status = Some(DeploymentStatus {
                replicas: Some(replicas),
                ready_replicas: Some(replicas),
                available_replicas: Some(replicas),
                ..Default::default()
            });
        }
        _ => {}
    }
}

impl ClusterClient for InMemoryCluster {
    fn create<'a>(&'a self, object: ClusterObject) -> BoxFuture<'a, Result<ClusterObject, ClusterError>> {
        Box::pin(async move {
            self.with_state(|s| {
                s.count("create");
                let key = object.key();
                if s.objects.contains_key(&key) {
                    return Err(ClusterError::already_exists(&key));
                }
                let mut object = object;
                let revision = s.next_revision();
                admit(&mut object, revision);
                debug!(%key, "created object");
                s.objects.insert(key, object.clone());
                Ok(object)
            })
        })
    }

    fn get<'a>(&'a self, key: &'a ObjectKey) -> BoxFuture<'a, Result<Option<ClusterObject>, ClusterError>> {
        Box::pin(async move {
            self.with_state(|s| {
                s.count("get");
                Ok(s.objects.get(key).cloned())
            })
        })
    }

    fn replace<'a>(&'a self, object: ClusterObject) -> BoxFuture<'a, Result<ClusterObject, ClusterError>> {
        Box::pin(async move {
            self.with_state(|s| {
                s.count("replace");
                let key = object.key();
                if !s.objects.contains_key(&key) {
                    return Err(ClusterError::not_found(&key));
                }
                let mut object = object;
                let revision = s.next_revision();
                admit(&mut object, revision);
                debug!(%key, "replaced object");
                s.objects.insert(key, object.clone());
                Ok(object)
            })
        })
    }

    fn delete<'a>(&'a self, key: &'a ObjectKey) -> BoxFuture<'a, Result<bool, ClusterError>> {
        Box::pin(async move {
            self.with_state(|s| {
                s.count("delete");
                let removed = s.objects.remove(key).is_some();
                s.logs.remove(key);
                debug!(%key, removed, "deleted object");
                Ok(removed)
            })
        })
    }

    fn logs<'a>(&'a self, key: &'a ObjectKey) -> BoxFuture<'a, Result<Option<String>, ClusterError>> {
        Box::pin(async move {
            self.with_state(|s| {
                s.count("logs");
                Ok(s.logs.get(key).cloned())
            })
        })
    }
}
