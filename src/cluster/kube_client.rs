// src/cluster/kube_client.rs

//! [`ClusterClient`] backed by a real API server through `kube`.

use std::fmt::Debug;

use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Service};
use kube::api::{
    ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, LogParams, PostParams,
    PropagationPolicy,
};
use kube::{Api, Client, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::{
    BoxFuture, ClusterClient, ClusterError, ClusterErrorKind, ClusterObject, CustomObject,
    ObjectKey, ObjectKind,
};

#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl std::fmt::Debug for KubeClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterClient").finish_non_exhaustive()
    }
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the ambient kubeconfig or in-cluster service account.
    pub async fn try_default() -> Result<Self, ClusterError> {
        let client = Client::try_default().await.map_err(to_cluster_error)?;
        Ok(Self::new(client))
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn dynamic_api(&self, namespace: &str, api_version: &str, kind: &str) -> Api<DynamicObject> {
        let (group, version) = match api_version.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", api_version),
        };
        let resource = ApiResource::from_gvk(&GroupVersionKind::gvk(group, version, kind));
        Api::namespaced_with(self.client.clone(), namespace, &resource)
    }
}

fn to_cluster_error(err: kube::Error) -> ClusterError {
    match err {
        kube::Error::Api(response) => {
            let kind = match response.code {
                404 => ClusterErrorKind::NotFound,
                409 if response.reason == "AlreadyExists" => ClusterErrorKind::AlreadyExists,
                409 => ClusterErrorKind::Conflict,
                422 | 400 => ClusterErrorKind::Invalid,
                429 | 503 => ClusterErrorKind::Unavailable,
                504 => ClusterErrorKind::Timeout,
                _ => ClusterErrorKind::Other,
            };
            ClusterError {
                kind,
                code: response.code,
                message: response.message,
            }
        }
        other => ClusterError::new(ClusterErrorKind::Unavailable, other.to_string()),
    }
}

fn namespace_of(object: &ClusterObject) -> String {
    object.metadata().namespace.clone().unwrap_or_default()
}

async fn create_typed<K>(api: Api<K>, object: &K) -> Result<K, ClusterError>
where
    K: Clone + DeserializeOwned + Serialize + Debug,
{
    api.create(&PostParams::default(), object)
        .await
        .map_err(to_cluster_error)
}

async fn replace_typed<K>(api: Api<K>, name: &str, object: &K) -> Result<K, ClusterError>
where
    K: Clone + DeserializeOwned + Serialize + Debug,
{
    api.replace(name, &PostParams::default(), object)
        .await
        .map_err(to_cluster_error)
}

async fn get_typed<K>(api: Api<K>, name: &str) -> Result<Option<K>, ClusterError>
where
    K: Clone + DeserializeOwned + Debug,
{
    api.get_opt(name).await.map_err(to_cluster_error)
}

async fn delete_typed<K>(api: Api<K>, name: &str) -> Result<bool, ClusterError>
where
    K: Clone + DeserializeOwned + Debug,
{
    let params = DeleteParams {
        propagation_policy: Some(PropagationPolicy::Background),
        ..DeleteParams::default()
    };
    match api.delete(name, &params).await {
        Ok(_) => Ok(true),
        Err(kube::Error::Api(response)) if response.code == 404 => Ok(false),
        Err(e) => Err(to_cluster_error(e)),
    }
}

fn to_dynamic(object: &CustomObject) -> DynamicObject {
    let mut data = serde_json::json!({ "spec": object.spec });
    if let Some(status) = &object.status {
        data["status"] = status.clone();
    }
    DynamicObject {
        types: Some(kube::api::TypeMeta {
            api_version: object.api_version.clone(),
            kind: object.kind.clone(),
        }),
        metadata: object.metadata.clone(),
        data,
    }
}

fn from_dynamic(object: DynamicObject, api_version: &str, kind: &str) -> CustomObject {
    let spec = object.data.get("spec").cloned().unwrap_or_default();
    let status = object.data.get("status").cloned();
    CustomObject {
        api_version: api_version.to_string(),
        kind: kind.to_string(),
        metadata: object.metadata,
        spec,
        status,
    }
}

impl ClusterClient for KubeClusterClient {
    fn create<'a>(&'a self, object: ClusterObject) -> BoxFuture<'a, Result<ClusterObject, ClusterError>> {
        Box::pin(async move {
            let ns = namespace_of(&object);
            debug!(key = %object.key(), "creating object");
            let created = match object {
                ClusterObject::Job(o) => ClusterObject::Job(create_typed(self.api(&ns), &o).await?),
                ClusterObject::CronJob(o) => {
                    ClusterObject::CronJob(create_typed(self.api(&ns), &o).await?)
                }
                ClusterObject::Deployment(o) => {
                    ClusterObject::Deployment(create_typed(self.api(&ns), &o).await?)
                }
                ClusterObject::Service(o) => {
                    ClusterObject::Service(create_typed(self.api(&ns), &o).await?)
                }
                ClusterObject::ConfigMap(o) => {
                    ClusterObject::ConfigMap(create_typed(self.api(&ns), &o).await?)
                }
                ClusterObject::Custom(o) => {
                    let api = self.dynamic_api(&ns, &o.api_version, &o.kind);
                    let created = create_typed(api, &to_dynamic(&o)).await?;
                    ClusterObject::Custom(from_dynamic(created, &o.api_version, &o.kind))
                }
            };
            Ok(created)
        })
    }

    fn get<'a>(&'a self, key: &'a ObjectKey) -> BoxFuture<'a, Result<Option<ClusterObject>, ClusterError>> {
        Box::pin(async move {
            let ns = key.namespace.as_str();
            let name = key.name.as_str();
            let found = match &key.kind {
                ObjectKind::Job => get_typed::<Job>(self.api(ns), name)
                    .await?
                    .map(ClusterObject::Job),
                ObjectKind::CronJob => get_typed::<CronJob>(self.api(ns), name)
                    .await?
                    .map(ClusterObject::CronJob),
                ObjectKind::Deployment => get_typed::<Deployment>(self.api(ns), name)
                    .await?
                    .map(ClusterObject::Deployment),
                ObjectKind::Service => get_typed::<Service>(self.api(ns), name)
                    .await?
                    .map(ClusterObject::Service),
                ObjectKind::ConfigMap => get_typed::<ConfigMap>(self.api(ns), name)
                    .await?
                    .map(ClusterObject::ConfigMap),
                ObjectKind::Custom { api_version, kind } => {
                    get_typed(self.dynamic_api(ns, api_version, kind), name)
                        .await?
                        .map(|o| ClusterObject::Custom(from_dynamic(o, api_version, kind)))
                }
            };
            Ok(found)
        })
    }

    fn replace<'a>(&'a self, object: ClusterObject) -> BoxFuture<'a, Result<ClusterObject, ClusterError>> {
        Box::pin(async move {
            let ns = namespace_of(&object);
            let name = object.name().to_string();
            let replaced = match object {
                ClusterObject::Job(o) => {
                    ClusterObject::Job(replace_typed(self.api(&ns), &name, &o).await?)
                }
                ClusterObject::CronJob(o) => {
                    ClusterObject::CronJob(replace_typed(self.api(&ns), &name, &o).await?)
                }
                ClusterObject::Deployment(o) => {
                    ClusterObject::Deployment(replace_typed(self.api(&ns), &name, &o).await?)
                }
                ClusterObject::Service(o) => {
                    ClusterObject::Service(replace_typed(self.api(&ns), &name, &o).await?)
                }
                ClusterObject::ConfigMap(o) => {
                    ClusterObject::ConfigMap(replace_typed(self.api(&ns), &name, &o).await?)
                }
                ClusterObject::Custom(o) => {
                    let api = self.dynamic_api(&ns, &o.api_version, &o.kind);
                    let replaced = replace_typed(api, &name, &to_dynamic(&o)).await?;
                    ClusterObject::Custom(from_dynamic(replaced, &o.api_version, &o.kind))
                }
            };
            Ok(replaced)
        })
    }

    fn delete<'a>(&'a self, key: &'a ObjectKey) -> BoxFuture<'a, Result<bool, ClusterError>> {
        Box::pin(async move {
            let ns = key.namespace.as_str();
            let name = key.name.as_str();
            match &key.kind {
                ObjectKind::Job => delete_typed::<Job>(self.api(ns), name).await,
                ObjectKind::CronJob => delete_typed::<CronJob>(self.api(ns), name).await,
                ObjectKind::Deployment => delete_typed::<Deployment>(self.api(ns), name).await,
                ObjectKind::Service => delete_typed::<Service>(self.api(ns), name).await,
                ObjectKind::ConfigMap => delete_typed::<ConfigMap>(self.api(ns), name).await,
                ObjectKind::Custom { api_version, kind } => {
                    delete_typed(self.dynamic_api(ns, api_version, kind), name).await
                }
            }
        })
    }

    fn logs<'a>(&'a self, key: &'a ObjectKey) -> BoxFuture<'a, Result<Option<String>, ClusterError>> {
        Box::pin(async move {
            if key.kind != ObjectKind::Job {
                return Ok(None);
            }
            let pods: Api<Pod> = self.api(&key.namespace);
            let selector = format!("job-name={}", key.name);
            let list = pods
                .list(&ListParams::default().labels(&selector))
                .await
                .map_err(to_cluster_error)?;

            let mut collected = Vec::new();
            for pod in list.items {
                let Some(pod_name) = pod.metadata.name else {
                    continue;
                };
                match pods.logs(&pod_name, &LogParams::default()).await {
                    Ok(text) => collected.push(text),
                    Err(e) => warn!(pod = %pod_name, error = %e, "failed to read pod logs"),
                }
            }
            Ok((!collected.is_empty()).then(|| collected.join("\n")))
        })
    }
}
