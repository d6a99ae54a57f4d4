// src/framework/custom.rs

//! Custom resources (workflow engines and other operators).
//!
//! The body is opaque to the engine. On refresh the object's `status` is
//! copied into the results as-is, and only the conventional `status.phase`
//! is read to detect completion or failure.

use std::sync::Arc;

use tracing::{info, warn};

use super::objects::{self, labels, metadata};
use super::{ClusterOps, Framework, FrameworkSettings, unexpected_object};
use crate::cluster::{BoxFuture, ClusterObject, CustomObject, ObjectKey, ObjectKind};
use crate::errors::{EngineError, Result};
use crate::runnable::{ErrorDetail, FrameworkKind, Runnable, RunnableBody};
use crate::types::RunnableState;

#[derive(Debug, Clone)]
pub struct CustomResourceFramework {
    settings: Arc<FrameworkSettings>,
    ops: ClusterOps,
}

impl CustomResourceFramework {
    pub fn new(settings: Arc<FrameworkSettings>, ops: ClusterOps) -> Self {
        Self { settings, ops }
    }

    fn build_object(&self, runnable: &Runnable) -> Result<CustomObject> {
        let RunnableBody::CustomResource {
            api_version,
            kind,
            spec,
        } = &runnable.body
        else {
            return Err(EngineError::InvalidArgument(format!(
                "runnable '{}' is not a custom resource",
                runnable.id
            )));
        };

        let name = objects::object_name(&self.settings, FrameworkKind::CustomResource, &runnable.id);
        Ok(CustomObject {
            api_version: api_version.clone(),
            kind: kind.clone(),
            metadata: metadata(
                &self.settings,
                &name,
                labels(&self.settings, runnable, FrameworkKind::CustomResource),
            ),
            spec: spec.clone(),
            status: None,
        })
    }

    fn key(&self, runnable: &Runnable) -> Result<ObjectKey> {
        let object = self.build_object(runnable)?;
        Ok(ObjectKey::new(
            ObjectKind::Custom {
                api_version: object.api_version,
                kind: object.kind,
            },
            self.settings.namespace.clone(),
            object.metadata.name.unwrap_or_default(),
        ))
    }
}

fn phase_of(status: &serde_json::Value) -> Option<&str> {
    status.get("phase").and_then(|p| p.as_str())
}

impl Framework for CustomResourceFramework {
    fn kind(&self) -> FrameworkKind {
        FrameworkKind::CustomResource
    }

    fn build(&self, runnable: &Runnable) -> Result<Vec<ClusterObject>> {
        Ok(vec![ClusterObject::Custom(self.build_object(runnable)?)])
    }

    fn run<'a>(&'a self, mut runnable: Runnable) -> BoxFuture<'a, Result<Runnable>> {
        Box::pin(async move {
            let object = self
                .ops
                .ensure(ClusterObject::Custom(self.build_object(&runnable)?))
                .await?;
            let key = object.key();
            info!(runnable_id = %runnable.id, %key, "custom resource created");
            runnable.transition_to(RunnableState::Running, Some(format!("{key} created")));
            Ok(runnable)
        })
    }

    /// Custom resources have no suspend; stopping removes the object.
    fn stop<'a>(&'a self, mut runnable: Runnable) -> BoxFuture<'a, Result<Runnable>> {
        Box::pin(async move {
            let key = self.key(&runnable)?;
            self.ops.remove(&key).await?;
            runnable.transition_to(RunnableState::Stopped, Some(format!("{key} removed")));
            Ok(runnable)
        })
    }

    fn delete<'a>(&'a self, mut runnable: Runnable) -> BoxFuture<'a, Result<Runnable>> {
        Box::pin(async move {
            let key = self.key(&runnable)?;
            self.ops.remove(&key).await?;
            runnable.transition_to(RunnableState::Deleted, Some(format!("{key} deleted")));
            Ok(runnable)
        })
    }

    fn refresh<'a>(&'a self, mut runnable: Runnable) -> BoxFuture<'a, Result<Runnable>> {
        Box::pin(async move {
            let key = self.key(&runnable)?;
            let Some(object) = self.ops.get(&key).await? else {
                warn!(runnable_id = %runnable.id, %key, "custom resource disappeared");
                runnable.fail(ErrorDetail::new("NotFound", format!("{key} no longer exists")));
                return Ok(runnable);
            };
            let object = match object {
                ClusterObject::Custom(object) => object,
                other => return Err(unexpected_object(&key, &other).into()),
            };
            let Some(status) = object.status else {
                return Ok(runnable);
            };

            runnable.results.insert("status".to_string(), status.clone());
            match phase_of(&status) {
                Some("Succeeded") | Some("Completed") => {
                    runnable.transition_to(RunnableState::Completed, Some(format!("{key} succeeded")));
                }
                Some("Failed") | Some("Error") => {
                    let message = status
                        .get("message")
                        .and_then(|m| m.as_str())
                        .unwrap_or("custom resource failed")
                        .to_string();
                    runnable.fail(ErrorDetail::new("Failed", message));
                }
                _ => {}
            }
            Ok(runnable)
        })
    }
}
