// src/cluster/mod.rs

//! Cluster API boundary.
//!
//! Resource frameworks never talk to a cluster directly; they go through a
//! [`ClusterClient`] so the same code runs against a real API server
//! ([`kube_client`], behind the `kube` feature) or the [`memory`] cluster used by
//! the simulator and the tests.
//!
//! No client-side locking is assumed across this boundary: correctness relies
//! on the backend rejecting duplicate creates and tolerating repeated deletes.

use std::fmt::{self, Debug};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::runnable::ErrorDetail;

#[cfg(feature = "kube")]
pub mod kube_client;
pub mod memory;

#[cfg(feature = "kube")]
pub use kube_client::KubeClusterClient;
pub use memory::InMemoryCluster;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Kind of a cluster object, including the group/version for custom kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectKind {
    Job,
    CronJob,
    Deployment,
    Service,
    ConfigMap,
    Custom { api_version: String, kind: String },
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::Job => f.write_str("Job"),
            ObjectKind::CronJob => f.write_str("CronJob"),
            ObjectKind::Deployment => f.write_str("Deployment"),
            ObjectKind::Service => f.write_str("Service"),
            ObjectKind::ConfigMap => f.write_str("ConfigMap"),
            ObjectKind::Custom { api_version, kind } => write!(f, "{kind}.{api_version}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub kind: ObjectKind,
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(kind: ObjectKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// Instance of a custom resource definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomObject {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<serde_json::Value>,
}

/// Typed cluster objects the frameworks create.
///
/// Serialises as the bare object (for rendering). Never decoded: the variant
/// is always known from the [`ObjectKind`] that was asked for.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ClusterObject {
    Job(Job),
    CronJob(CronJob),
    Deployment(Deployment),
    Service(Service),
    ConfigMap(ConfigMap),
    Custom(CustomObject),
}

impl ClusterObject {
    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            ClusterObject::Job(o) => &o.metadata,
            ClusterObject::CronJob(o) => &o.metadata,
            ClusterObject::Deployment(o) => &o.metadata,
            ClusterObject::Service(o) => &o.metadata,
            ClusterObject::ConfigMap(o) => &o.metadata,
            ClusterObject::Custom(o) => &o.metadata,
        }
    }

    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            ClusterObject::Job(o) => &mut o.metadata,
            ClusterObject::CronJob(o) => &mut o.metadata,
            ClusterObject::Deployment(o) => &mut o.metadata,
            ClusterObject::Service(o) => &mut o.metadata,
            ClusterObject::ConfigMap(o) => &mut o.metadata,
            ClusterObject::Custom(o) => &mut o.metadata,
        }
    }

    pub fn kind(&self) -> ObjectKind {
        match self {
            ClusterObject::Job(_) => ObjectKind::Job,
            ClusterObject::CronJob(_) => ObjectKind::CronJob,
            ClusterObject::Deployment(_) => ObjectKind::Deployment,
            ClusterObject::Service(_) => ObjectKind::Service,
            ClusterObject::ConfigMap(_) => ObjectKind::ConfigMap,
            ClusterObject::Custom(o) => ObjectKind::Custom {
                api_version: o.api_version.clone(),
                kind: o.kind.clone(),
            },
        }
    }

    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    pub fn key(&self) -> ObjectKey {
        let meta = self.metadata();
        ObjectKey {
            kind: self.kind(),
            namespace: meta.namespace.clone().unwrap_or_default(),
            name: meta.name.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterErrorKind {
    NotFound,
    AlreadyExists,
    Conflict,
    Timeout,
    Unavailable,
    Invalid,
    Other,
}

impl ClusterErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ClusterErrorKind::NotFound => "NotFound",
            ClusterErrorKind::AlreadyExists => "AlreadyExists",
            ClusterErrorKind::Conflict => "Conflict",
            ClusterErrorKind::Timeout => "Timeout",
            ClusterErrorKind::Unavailable => "Unavailable",
            ClusterErrorKind::Invalid => "Invalid",
            ClusterErrorKind::Other => "Other",
        }
    }

    /// HTTP-style status code the API server would have answered with.
    pub fn code(self) -> u16 {
        match self {
            ClusterErrorKind::NotFound => 404,
            ClusterErrorKind::AlreadyExists | ClusterErrorKind::Conflict => 409,
            ClusterErrorKind::Timeout => 504,
            ClusterErrorKind::Unavailable => 503,
            ClusterErrorKind::Invalid => 422,
            ClusterErrorKind::Other => 500,
        }
    }
}

/// Failure reported by (or on the way to) the cluster API.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{} ({code}): {message}", .kind.as_str())]
pub struct ClusterError {
    pub kind: ClusterErrorKind,
    pub code: u16,
    pub message: String,
}

impl ClusterError {
    pub fn new(kind: ClusterErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: kind.code(),
            message: message.into(),
        }
    }

    pub fn not_found(key: &ObjectKey) -> Self {
        Self::new(ClusterErrorKind::NotFound, format!("{key} not found"))
    }

    pub fn already_exists(key: &ObjectKey) -> Self {
        Self::new(ClusterErrorKind::AlreadyExists, format!("{key} already exists"))
    }

    pub fn timeout(operation: &str, after: Duration) -> Self {
        Self::new(
            ClusterErrorKind::Timeout,
            format!("{operation} did not complete within {after:?}"),
        )
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ClusterErrorKind::NotFound
    }

    pub fn is_already_exists(&self) -> bool {
        self.kind == ClusterErrorKind::AlreadyExists
    }

    /// Compact code/description pair recorded on a failed runnable.
    pub fn detail(&self) -> ErrorDetail {
        ErrorDetail::new(self.kind.as_str(), self.message.clone())
    }
}

/// Asynchronous access to cluster objects.
pub trait ClusterClient: Send + Sync + Debug {
    /// Submit a new object. Fails with `AlreadyExists` when the key is taken.
    fn create<'a>(&'a self, object: ClusterObject) -> BoxFuture<'a, Result<ClusterObject, ClusterError>>;

    fn get<'a>(&'a self, key: &'a ObjectKey) -> BoxFuture<'a, Result<Option<ClusterObject>, ClusterError>>;

    /// Overwrite an existing object. Fails with `NotFound` when absent.
    fn replace<'a>(&'a self, object: ClusterObject) -> BoxFuture<'a, Result<ClusterObject, ClusterError>>;

    /// Delete an object; `Ok(false)` when it was already gone.
    fn delete<'a>(&'a self, key: &'a ObjectKey) -> BoxFuture<'a, Result<bool, ClusterError>>;

    /// Logs of the pods owned by the object, if any.
    fn logs<'a>(&'a self, key: &'a ObjectKey) -> BoxFuture<'a, Result<Option<String>, ClusterError>>;
}

/// Bound a backend call; an elapsed deadline becomes a `Timeout` error.
pub async fn with_deadline<T, F>(operation: &str, deadline: Duration, fut: F) -> Result<T, ClusterError>
where
    F: Future<Output = Result<T, ClusterError>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(ClusterError::timeout(operation, deadline)),
    }
}
