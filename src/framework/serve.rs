// src/framework/serve.rs

//! Long-running services: a deployment, plus a service when ports are
//! declared. Stopping scales to zero; resuming restores the replica count.

use std::sync::Arc;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{ContainerPort, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde_json::json;
use tracing::{info, warn};

use super::objects::{self, labels, metadata, pod_template, selector};
use super::{ClusterOps, Framework, FrameworkSettings, unexpected_object};
use crate::cluster::{BoxFuture, ClusterError, ClusterObject, ObjectKey, ObjectKind};
use crate::errors::{EngineError, Result};
use crate::run::PortSpec;
use crate::runnable::{ErrorDetail, FrameworkKind, Runnable, RunnableBody};
use crate::types::RunnableState;

#[derive(Debug, Clone)]
pub struct ServeFramework {
    settings: Arc<FrameworkSettings>,
    ops: ClusterOps,
}

struct ServeShape<'a> {
    replicas: i32,
    ports: &'a [PortSpec],
    service_type: Option<&'a str>,
}

fn shape(runnable: &Runnable) -> Result<ServeShape<'_>> {
    match &runnable.body {
        RunnableBody::Serve {
            replicas,
            ports,
            service_type,
        } => Ok(ServeShape {
            replicas: *replicas,
            ports,
            service_type: service_type.as_deref(),
        }),
        _ => Err(EngineError::InvalidArgument(format!(
            "runnable '{}' is not a service",
            runnable.id
        ))),
    }
}

impl ServeFramework {
    pub fn new(settings: Arc<FrameworkSettings>, ops: ClusterOps) -> Self {
        Self { settings, ops }
    }

    fn name(&self, runnable: &Runnable) -> String {
        objects::object_name(&self.settings, FrameworkKind::Serve, &runnable.id)
    }

    fn key(&self, kind: ObjectKind, runnable: &Runnable) -> ObjectKey {
        ObjectKey::new(kind, self.settings.namespace.clone(), self.name(runnable))
    }

    fn build_deployment(&self, runnable: &Runnable, shape: &ServeShape<'_>) -> Result<Deployment> {
        let mut template = pod_template(&self.settings, runnable, FrameworkKind::Serve, "Always")?;
        if let Some(container) = template
            .spec
            .as_mut()
            .and_then(|spec| spec.containers.first_mut())
        {
            let ports: Vec<ContainerPort> = shape
                .ports
                .iter()
                .map(|p| ContainerPort {
                    container_port: p.target_port.unwrap_or(p.port),
                    name: p.name.clone(),
                    ..Default::default()
                })
                .collect();
            container.ports = (!ports.is_empty()).then_some(ports);
        }

        Ok(Deployment {
            metadata: metadata(
                &self.settings,
                &self.name(runnable),
                labels(&self.settings, runnable, FrameworkKind::Serve),
            ),
            spec: Some(DeploymentSpec {
                replicas: Some(shape.replicas),
                selector: LabelSelector {
                    match_labels: Some(selector(runnable)),
                    ..Default::default()
                },
                template,
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    fn build_service(&self, runnable: &Runnable, shape: &ServeShape<'_>) -> Option<Service> {
        if shape.ports.is_empty() {
            return None;
        }
        let ports = shape
            .ports
            .iter()
            .map(|p| ServicePort {
                port: p.port,
                target_port: Some(IntOrString::Int(p.target_port.unwrap_or(p.port))),
                name: p.name.clone(),
                ..Default::default()
            })
            .collect();

        Some(Service {
            metadata: metadata(
                &self.settings,
                &self.name(runnable),
                labels(&self.settings, runnable, FrameworkKind::Serve),
            ),
            spec: Some(ServiceSpec {
                selector: Some(selector(runnable)),
                ports: Some(ports),
                type_: shape.service_type.map(str::to_string),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    async fn scale(&self, runnable: &Runnable, replicas: i32) -> Result<()> {
        let key = self.key(ObjectKind::Deployment, runnable);
        let mut deployment = match self.ops.get(&key).await? {
            Some(ClusterObject::Deployment(deployment)) => deployment,
            Some(other) => return Err(unexpected_object(&key, &other).into()),
            None => return Err(ClusterError::not_found(&key).into()),
        };
        if let Some(spec) = deployment.spec.as_mut() {
            spec.replicas = Some(replicas);
        }
        self.ops.replace(ClusterObject::Deployment(deployment)).await?;
        info!(runnable_id = %runnable.id, deployment = %key.name, replicas, "deployment scaled");
        Ok(())
    }
}

impl Framework for ServeFramework {
    fn kind(&self) -> FrameworkKind {
        FrameworkKind::Serve
    }

    fn build(&self, runnable: &Runnable) -> Result<Vec<ClusterObject>> {
        let shape = shape(runnable)?;
        let mut objects = vec![ClusterObject::Deployment(
            self.build_deployment(runnable, &shape)?,
        )];
        if let Some(service) = self.build_service(runnable, &shape) {
            objects.push(ClusterObject::Service(service));
        }
        Ok(objects)
    }

    fn run<'a>(&'a self, mut runnable: Runnable) -> BoxFuture<'a, Result<Runnable>> {
        Box::pin(async move {
            for object in self.build(&runnable)? {
                self.ops.ensure(object).await?;
            }

            let name = self.name(&runnable);
            let shape = shape(&runnable)?;
            let mut results = json!({ "deployment": name });
            if let Some(port) = shape.ports.first() {
                results["service"] = json!(name);
                results["url"] = json!(format!(
                    "http://{name}.{}.svc.cluster.local:{}",
                    self.settings.namespace, port.port
                ));
            }
            info!(runnable_id = %runnable.id, deployment = %name, "service deployed");
            runnable.results.insert("serve".to_string(), results);
            runnable.transition_to(RunnableState::Running, Some(format!("deployment {name} created")));
            Ok(runnable)
        })
    }

    fn stop<'a>(&'a self, mut runnable: Runnable) -> BoxFuture<'a, Result<Runnable>> {
        Box::pin(async move {
            self.scale(&runnable, 0).await?;
            runnable.transition_to(RunnableState::Stopped, Some("scaled to zero".to_string()));
            Ok(runnable)
        })
    }

    fn resume<'a>(&'a self, mut runnable: Runnable) -> BoxFuture<'a, Result<Runnable>> {
        Box::pin(async move {
            let replicas = shape(&runnable)?.replicas;
            self.scale(&runnable, replicas).await?;
            runnable.transition_to(
                RunnableState::Running,
                Some(format!("scaled to {replicas} replicas")),
            );
            Ok(runnable)
        })
    }

    fn delete<'a>(&'a self, mut runnable: Runnable) -> BoxFuture<'a, Result<Runnable>> {
        Box::pin(async move {
            self.ops.remove(&self.key(ObjectKind::Service, &runnable)).await?;
            self.ops.remove(&self.key(ObjectKind::Deployment, &runnable)).await?;
            let name = self.name(&runnable);
            runnable.transition_to(RunnableState::Deleted, Some(format!("deployment {name} deleted")));
            Ok(runnable)
        })
    }

    fn refresh<'a>(&'a self, mut runnable: Runnable) -> BoxFuture<'a, Result<Runnable>> {
        Box::pin(async move {
            let deployment_key = self.key(ObjectKind::Deployment, &runnable);
            let Some(deployment) = self.ops.get(&deployment_key).await? else {
                warn!(runnable_id = %runnable.id, key = %deployment_key, "deployment disappeared");
                runnable.fail(ErrorDetail::new(
                    "NotFound",
                    format!("deployment {} no longer exists", deployment_key.name),
                ));
                return Ok(runnable);
            };

            if !shape(&runnable)?.ports.is_empty() {
                let service_key = self.key(ObjectKind::Service, &runnable);
                if self.ops.get(&service_key).await?.is_none() {
                    warn!(runnable_id = %runnable.id, key = %service_key, "service disappeared");
                    runnable.fail(ErrorDetail::new(
                        "NotFound",
                        format!("service {} no longer exists", service_key.name),
                    ));
                    return Ok(runnable);
                }
            }

            if let ClusterObject::Deployment(Deployment {
                status: Some(status),
                ..
            }) = &deployment
            {
                runnable
                    .results
                    .insert("deployment_status".to_string(), serde_json::to_value(status)?);
            }
            Ok(runnable)
        })
    }
}
