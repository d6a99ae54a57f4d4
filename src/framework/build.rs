// src/framework/build.rs

//! Image builds: the build context travels in a config map, an init stage
//! unpacks it into a shared workspace and the builder image runs as a job.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use serde_json::json;
use tracing::info;

use super::job::JobFramework;
use super::objects::{self, labels, metadata};
use super::{Framework, FrameworkSettings};
use crate::cluster::{BoxFuture, ClusterObject, ObjectKey, ObjectKind};
use crate::errors::{EngineError, Result};
use crate::run::{VolumeKind, VolumeSpec};
use crate::runnable::{FrameworkKind, InitStage, Runnable, RunnableBody};
use crate::types::RunnableState;

pub const DIGEST_ANNOTATION: &str = "runplane.io/context-digest";
pub const DOCKERFILE: &str = "Dockerfile";
const CONTEXT_MOUNT: &str = "/context";
const WORKSPACE_MOUNT: &str = "/workspace";

/// Stable digest over the context files and the Dockerfile.
pub fn context_digest(files: &BTreeMap<String, String>) -> String {
    let mut hasher = blake3::Hasher::new();
    for (name, content) in files {
        hasher.update(name.as_bytes());
        hasher.update(&[0]);
        hasher.update(content.as_bytes());
        hasher.update(&[0]);
    }
    hasher.finalize().to_hex().to_string()
}

struct BuildShape<'a> {
    context: &'a BTreeMap<String, String>,
    instructions: &'a [String],
    target_image: &'a str,
    backoff_limit: Option<i32>,
}

fn shape(runnable: &Runnable) -> Result<BuildShape<'_>> {
    match &runnable.body {
        RunnableBody::Build {
            context,
            instructions,
            target_image,
            backoff_limit,
        } => Ok(BuildShape {
            context,
            instructions,
            target_image,
            backoff_limit: *backoff_limit,
        }),
        _ => Err(EngineError::InvalidArgument(format!(
            "runnable '{}' is not an image build",
            runnable.id
        ))),
    }
}

#[derive(Debug, Clone)]
pub struct BuildFramework {
    job: JobFramework,
}

impl BuildFramework {
    pub fn new(job: JobFramework) -> Self {
        Self { job }
    }

    fn settings(&self) -> &FrameworkSettings {
        self.job.settings()
    }

    fn name(&self, runnable: &Runnable) -> String {
        objects::object_name(self.settings(), FrameworkKind::Build, &runnable.id)
    }

    fn keys(&self, runnable: &Runnable) -> (ObjectKey, ObjectKey) {
        let name = self.name(runnable);
        let ns = self.settings().namespace.clone();
        (
            ObjectKey::new(ObjectKind::ConfigMap, ns.clone(), name.clone()),
            ObjectKey::new(ObjectKind::Job, ns, name),
        )
    }

    fn build_config_map(&self, runnable: &Runnable, shape: &BuildShape<'_>) -> ConfigMap {
        let mut files = shape.context.clone();
        files.insert(DOCKERFILE.to_string(), shape.instructions.join("\n"));

        let mut meta = metadata(
            self.settings(),
            &self.name(runnable),
            labels(self.settings(), runnable, FrameworkKind::Build),
        );
        meta.annotations = Some(BTreeMap::from([(
            DIGEST_ANNOTATION.to_string(),
            context_digest(&files),
        )]));

        ConfigMap {
            metadata: meta,
            data: Some(files),
            ..Default::default()
        }
    }

    /// The runnable as the builder job sees it: context volume, workspace
    /// volume, unpacking init stage and builder arguments.
    fn builder_runnable(&self, runnable: &Runnable, shape: &BuildShape<'_>) -> Result<Runnable> {
        let mut builder = runnable.clone();
        let name = self.name(runnable);
        let container = builder.container.as_mut().ok_or_else(|| {
            EngineError::InvalidArgument(format!(
                "runnable '{}' has no builder container",
                runnable.id
            ))
        })?;

        container.volumes.push(VolumeSpec {
            name: "build-context".to_string(),
            kind: VolumeKind::ConfigMap,
            mount_path: CONTEXT_MOUNT.to_string(),
            source: Some(name),
        });
        container.volumes.push(VolumeSpec {
            name: "workspace".to_string(),
            kind: VolumeKind::EmptyDir,
            mount_path: WORKSPACE_MOUNT.to_string(),
            source: None,
        });
        container.init = Some(InitStage {
            image: self.settings().context_image.clone(),
            command: vec!["sh".to_string(), "-c".to_string()],
            args: vec![format!("cp -rL {CONTEXT_MOUNT}/. {WORKSPACE_MOUNT}/")],
        });

        let mut args = vec![
            format!("--dockerfile={WORKSPACE_MOUNT}/{DOCKERFILE}"),
            format!("--context=dir://{WORKSPACE_MOUNT}"),
            format!("--destination={}", shape.target_image),
        ];
        args.append(&mut container.args);
        container.args = args;

        builder.body = RunnableBody::Job {
            backoff_limit: shape.backoff_limit,
        };
        Ok(builder)
    }

    async fn remove_all(&self, runnable: &Runnable) -> Result<()> {
        let (config_map, job) = self.keys(runnable);
        self.job.ops().remove(&job).await?;
        self.job.ops().remove(&config_map).await?;
        Ok(())
    }
}

impl Framework for BuildFramework {
    fn kind(&self) -> FrameworkKind {
        FrameworkKind::Build
    }

    fn build(&self, runnable: &Runnable) -> Result<Vec<ClusterObject>> {
        let shape = shape(runnable)?;
        let builder = self.builder_runnable(runnable, &shape)?;
        let job = self.job.job_named(
            &builder,
            &self.name(runnable),
            FrameworkKind::Build,
            shape.backoff_limit,
        )?;
        Ok(vec![
            ClusterObject::ConfigMap(self.build_config_map(runnable, &shape)),
            ClusterObject::Job(job),
        ])
    }

    fn run<'a>(&'a self, mut runnable: Runnable) -> BoxFuture<'a, Result<Runnable>> {
        Box::pin(async move {
            // Context first: the job's init stage mounts it.
            for object in self.build(&runnable)? {
                self.job.ops().ensure(object).await?;
            }
            let name = self.name(&runnable);
            let target = shape(&runnable)?.target_image.to_string();
            info!(runnable_id = %runnable.id, job = %name, image = %target, "image build submitted");
            runnable
                .results
                .insert("build".to_string(), json!({ "job": name, "image": target }));
            runnable.transition_to(RunnableState::Running, Some(format!("building {target}")));
            Ok(runnable)
        })
    }

    fn stop<'a>(&'a self, mut runnable: Runnable) -> BoxFuture<'a, Result<Runnable>> {
        Box::pin(async move {
            self.remove_all(&runnable).await?;
            runnable.transition_to(RunnableState::Stopped, Some("build cancelled".to_string()));
            Ok(runnable)
        })
    }

    fn delete<'a>(&'a self, mut runnable: Runnable) -> BoxFuture<'a, Result<Runnable>> {
        Box::pin(async move {
            self.remove_all(&runnable).await?;
            runnable.transition_to(RunnableState::Deleted, Some("build removed".to_string()));
            Ok(runnable)
        })
    }

    fn refresh<'a>(&'a self, runnable: Runnable) -> BoxFuture<'a, Result<Runnable>> {
        Box::pin(async move {
            let (_, job) = self.keys(&runnable);
            let mut refreshed = self.job.observe(runnable, &job).await?;
            if refreshed.state == RunnableState::Completed {
                let image = shape(&refreshed)?.target_image.to_string();
                refreshed
                    .results
                    .insert("image".to_string(), serde_json::Value::String(image));
            }
            Ok(refreshed)
        })
    }
}
