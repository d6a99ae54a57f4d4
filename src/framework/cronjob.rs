// src/framework/cronjob.rs

//! Scheduled jobs. Stopping suspends the schedule rather than deleting it.

use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec, JobTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::{info, warn};

use super::job::JobFramework;
use super::objects::{self, labels, metadata};
use super::{Framework, FrameworkSettings, unexpected_object};
use crate::cluster::{BoxFuture, ClusterError, ClusterObject, ObjectKey, ObjectKind};
use crate::errors::{EngineError, Result};
use crate::runnable::{ErrorDetail, FrameworkKind, Runnable, RunnableBody};
use crate::types::RunnableState;

#[derive(Debug, Clone)]
pub struct CronJobFramework {
    job: JobFramework,
}

impl CronJobFramework {
    pub fn new(job: JobFramework) -> Self {
        Self { job }
    }

    fn settings(&self) -> &FrameworkSettings {
        self.job.settings()
    }

    fn key(&self, runnable: &Runnable) -> ObjectKey {
        ObjectKey::new(
            ObjectKind::CronJob,
            self.settings().namespace.clone(),
            objects::object_name(self.settings(), FrameworkKind::CronJob, &runnable.id),
        )
    }

    fn build_cron_job(&self, runnable: &Runnable) -> Result<CronJob> {
        let RunnableBody::CronJob {
            schedule,
            backoff_limit,
        } = &runnable.body
        else {
            return Err(EngineError::InvalidArgument(format!(
                "runnable '{}' is not a scheduled job",
                runnable.id
            )));
        };

        let settings = self.settings();
        let name = objects::object_name(settings, FrameworkKind::CronJob, &runnable.id);
        let labels = labels(settings, runnable, FrameworkKind::CronJob);

        Ok(CronJob {
            metadata: metadata(settings, &name, labels.clone()),
            spec: Some(CronJobSpec {
                schedule: schedule.clone(),
                suspend: Some(false),
                concurrency_policy: Some("Forbid".to_string()),
                job_template: JobTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels),
                        ..Default::default()
                    }),
                    spec: Some(self.job.job_spec(runnable, FrameworkKind::CronJob, *backoff_limit)?),
                },
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    /// Flip `suspend` on the live object.
    async fn set_suspended(&self, runnable: &Runnable, suspended: bool) -> Result<()> {
        let key = self.key(runnable);
        let mut cron = match self.job.ops().get(&key).await? {
            Some(ClusterObject::CronJob(cron)) => cron,
            Some(other) => return Err(unexpected_object(&key, &other).into()),
            None => return Err(ClusterError::not_found(&key).into()),
        };
        if let Some(spec) = cron.spec.as_mut() {
            spec.suspend = Some(suspended);
        }
        self.job.ops().replace(ClusterObject::CronJob(cron)).await?;
        info!(runnable_id = %runnable.id, cron_job = %key.name, suspended, "cron job updated");
        Ok(())
    }
}

impl Framework for CronJobFramework {
    fn kind(&self) -> FrameworkKind {
        FrameworkKind::CronJob
    }

    fn build(&self, runnable: &Runnable) -> Result<Vec<ClusterObject>> {
        Ok(vec![ClusterObject::CronJob(self.build_cron_job(runnable)?)])
    }

    fn run<'a>(&'a self, mut runnable: Runnable) -> BoxFuture<'a, Result<Runnable>> {
        Box::pin(async move {
            let cron = self
                .job
                .ops()
                .ensure(ClusterObject::CronJob(self.build_cron_job(&runnable)?))
                .await?;
            let name = cron.name().to_string();
            info!(runnable_id = %runnable.id, cron_job = %name, "cron job scheduled");
            runnable
                .results
                .insert("cron_job".to_string(), serde_json::Value::String(name.clone()));
            runnable.transition_to(RunnableState::Running, Some(format!("cron job {name} scheduled")));
            Ok(runnable)
        })
    }

    fn stop<'a>(&'a self, mut runnable: Runnable) -> BoxFuture<'a, Result<Runnable>> {
        Box::pin(async move {
            self.set_suspended(&runnable, true).await?;
            runnable.transition_to(RunnableState::Stopped, Some("schedule suspended".to_string()));
            Ok(runnable)
        })
    }

    fn resume<'a>(&'a self, mut runnable: Runnable) -> BoxFuture<'a, Result<Runnable>> {
        Box::pin(async move {
            self.set_suspended(&runnable, false).await?;
            runnable.transition_to(RunnableState::Running, Some("schedule resumed".to_string()));
            Ok(runnable)
        })
    }

    fn delete<'a>(&'a self, mut runnable: Runnable) -> BoxFuture<'a, Result<Runnable>> {
        Box::pin(async move {
            let key = self.key(&runnable);
            self.job.ops().remove(&key).await?;
            runnable.transition_to(
                RunnableState::Deleted,
                Some(format!("cron job {} deleted", key.name)),
            );
            Ok(runnable)
        })
    }

    fn refresh<'a>(&'a self, mut runnable: Runnable) -> BoxFuture<'a, Result<Runnable>> {
        Box::pin(async move {
            let key = self.key(&runnable);
            match self.job.ops().get(&key).await? {
                Some(ClusterObject::CronJob(cron)) => {
                    if let Some(status) = &cron.status {
                        runnable
                            .results
                            .insert("cron_job_status".to_string(), serde_json::to_value(status)?);
                    }
                }
                Some(_) => {}
                None => {
                    warn!(runnable_id = %runnable.id, %key, "cron job disappeared");
                    runnable.fail(ErrorDetail::new(
                        "NotFound",
                        format!("cron job {} no longer exists", key.name),
                    ));
                }
            }
            Ok(runnable)
        })
    }
}
