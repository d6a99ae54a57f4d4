// src/framework/mod.rs

//! Resource frameworks: one per backend shape.
//!
//! A framework turns a [`Runnable`] into typed cluster objects and drives
//! them through their life. All of them share the same contract:
//!
//! - `build` is pure and never touches the cluster;
//! - `run` creates the objects if absent and otherwise returns what is
//!   already there, so a retried dispatch never duplicates work;
//! - `delete` of something already gone succeeds;
//! - `refresh` reports what the backend says and never invents a state.
//!
//! Shapes: [`job`], [`cronjob`], [`serve`] (deployment + service),
//! [`custom`] (custom resources) and [`build`] (image builds).

use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::cluster::{
    BoxFuture, ClusterClient, ClusterError, ClusterErrorKind, ClusterObject, ObjectKey, with_deadline,
};
use crate::errors::{EngineError, Result};
use crate::run::ResourceSpec;
use crate::runnable::{FrameworkKind, Runnable};

pub mod build;
pub mod cronjob;
pub mod custom;
pub mod job;
pub mod objects;
pub mod serve;

pub use build::BuildFramework;
pub use cronjob::CronJobFramework;
pub use custom::CustomResourceFramework;
pub use job::JobFramework;
pub use serve::ServeFramework;

/// Job-level defaults applied when a runnable does not set them.
#[derive(Debug, Clone, PartialEq)]
pub struct JobDefaults {
    pub backoff_limit: i32,
    pub active_deadline_seconds: Option<i64>,
    pub ttl_seconds_after_finished: Option<i32>,
}

impl Default for JobDefaults {
    fn default() -> Self {
        Self {
            backoff_limit: 0,
            active_deadline_seconds: None,
            ttl_seconds_after_finished: Some(3600),
        }
    }
}

/// Cluster-wide knobs shared by every framework.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameworkSettings {
    pub namespace: String,
    pub name_prefix: String,
    pub image_pull_policy: String,
    pub service_account: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub job: JobDefaults,
    pub resources: ResourceSpec,
    /// Image used by the build shape to unpack its context.
    pub context_image: String,
    /// Upper bound for every single backend call.
    pub call_timeout: Duration,
}

impl Default for FrameworkSettings {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            name_prefix: "runplane".to_string(),
            image_pull_policy: "IfNotPresent".to_string(),
            service_account: None,
            labels: BTreeMap::new(),
            job: JobDefaults::default(),
            resources: ResourceSpec::default(),
            context_image: "busybox:1.36".to_string(),
            call_timeout: Duration::from_secs(10),
        }
    }
}

/// Realises runnables of one backend shape.
pub trait Framework: Send + Sync + Debug {
    fn kind(&self) -> FrameworkKind;

    /// Cluster objects this runnable maps to. Pure.
    fn build(&self, runnable: &Runnable) -> Result<Vec<ClusterObject>>;

    fn run<'a>(&'a self, runnable: Runnable) -> BoxFuture<'a, Result<Runnable>>;

    fn stop<'a>(&'a self, runnable: Runnable) -> BoxFuture<'a, Result<Runnable>>;

    fn resume<'a>(&'a self, runnable: Runnable) -> BoxFuture<'a, Result<Runnable>> {
        Box::pin(async move {
            Err(EngineError::InvalidArgument(format!(
                "runnable '{}': {} runnables cannot be resumed",
                runnable.id,
                self.kind()
            )))
        })
    }

    fn delete<'a>(&'a self, runnable: Runnable) -> BoxFuture<'a, Result<Runnable>>;

    fn refresh<'a>(&'a self, runnable: Runnable) -> BoxFuture<'a, Result<Runnable>>;
}

/// Deadline-bounded cluster calls with the idempotent semantics the
/// frameworks rely on.
#[derive(Debug, Clone)]
pub struct ClusterOps {
    client: Arc<dyn ClusterClient>,
    timeout: Duration,
}

impl ClusterOps {
    pub fn new(client: Arc<dyn ClusterClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Create-if-absent, get-if-present.
    ///
    /// An existing object is only adopted when it carries the same runnable
    /// label as `object`; anything else is a `Conflict`.
    pub async fn ensure(&self, object: ClusterObject) -> std::result::Result<ClusterObject, ClusterError> {
        let key = object.key();
        if let Some(existing) = self.get(&key).await? {
            debug!(%key, "object already present");
            return adopt(&object, existing);
        }

        let wanted = object.clone();
        match with_deadline("create", self.timeout, self.client.create(object)).await {
            Ok(created) => Ok(created),
            Err(e) if e.is_already_exists() => {
                debug!(%key, "lost create race; using existing object");
                let existing = self.get(&key).await?.ok_or_else(|| {
                    ClusterError::new(
                        ClusterErrorKind::Conflict,
                        format!("{key} reported as existing but could not be read"),
                    )
                })?;
                adopt(&wanted, existing)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn get(&self, key: &ObjectKey) -> std::result::Result<Option<ClusterObject>, ClusterError> {
        with_deadline("get", self.timeout, self.client.get(key)).await
    }

    pub async fn replace(&self, object: ClusterObject) -> std::result::Result<ClusterObject, ClusterError> {
        with_deadline("replace", self.timeout, self.client.replace(object)).await
    }

    /// Delete; an absent object counts as deleted.
    pub async fn remove(&self, key: &ObjectKey) -> std::result::Result<bool, ClusterError> {
        match with_deadline("delete", self.timeout, self.client.delete(key)).await {
            Ok(deleted) => Ok(deleted),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn logs(&self, key: &ObjectKey) -> std::result::Result<Option<String>, ClusterError> {
        with_deadline("logs", self.timeout, self.client.logs(key)).await
    }
}

fn adopt(wanted: &ClusterObject, existing: ClusterObject) -> std::result::Result<ClusterObject, ClusterError> {
    if objects::same_owner(wanted, &existing) {
        return Ok(existing);
    }
    let key = existing.key();
    warn!(%key, "object name taken by another runnable");
    Err(ClusterError::new(
        ClusterErrorKind::Conflict,
        format!("{key} belongs to another runnable"),
    ))
}

/// A `get` answered with a different object kind than the key asked for.
pub(crate) fn unexpected_object(key: &ObjectKey, found: &ClusterObject) -> ClusterError {
    warn!(%key, found = %found.kind(), "cluster returned an unexpected object kind");
    ClusterError::new(
        ClusterErrorKind::Invalid,
        format!("{key} resolved to a {} object", found.kind()),
    )
}

/// Frameworks by shape.
#[derive(Debug, Default, Clone)]
pub struct FrameworkRegistry {
    frameworks: HashMap<FrameworkKind, Arc<dyn Framework>>,
}

impl FrameworkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in shape against one cluster.
    pub fn standard(client: Arc<dyn ClusterClient>, settings: FrameworkSettings) -> Self {
        let settings = Arc::new(settings);
        let ops = ClusterOps::new(client, settings.call_timeout);
        let job = JobFramework::new(Arc::clone(&settings), ops.clone());

        let mut registry = Self::new();
        registry.register(Arc::new(job.clone()));
        registry.register(Arc::new(CronJobFramework::new(job.clone())));
        registry.register(Arc::new(ServeFramework::new(Arc::clone(&settings), ops.clone())));
        registry.register(Arc::new(CustomResourceFramework::new(Arc::clone(&settings), ops)));
        registry.register(Arc::new(BuildFramework::new(job)));
        registry
    }

    /// Add or replace the framework for its shape.
    pub fn register(&mut self, framework: Arc<dyn Framework>) {
        self.frameworks.insert(framework.kind(), framework);
    }

    pub fn get(&self, kind: FrameworkKind) -> Result<Arc<dyn Framework>> {
        self.frameworks
            .get(&kind)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("no framework for shape '{kind}'")))
    }

    pub fn for_runnable(&self, runnable: &Runnable) -> Result<Arc<dyn Framework>> {
        self.get(runnable.framework())
    }

    pub fn kinds(&self) -> Vec<FrameworkKind> {
        FrameworkKind::ALL
            .into_iter()
            .filter(|kind| self.frameworks.contains_key(kind))
            .collect()
    }
}
