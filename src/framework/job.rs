// src/framework/job.rs

//! Run-to-completion batch jobs.

use std::sync::Arc;

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use tracing::{debug, info, warn};

use super::objects::{self, labels, metadata, pod_template};
use super::{ClusterOps, Framework, FrameworkSettings, unexpected_object};
use crate::cluster::{BoxFuture, ClusterObject, ObjectKey, ObjectKind};
use crate::errors::Result;
use crate::runnable::{ErrorDetail, FrameworkKind, Runnable, RunnableBody};
use crate::types::RunnableState;

/// What a job's status says about the workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Active,
    Succeeded,
    Failed(String),
}

pub fn job_outcome(job: &Job) -> JobOutcome {
    let Some(status) = &job.status else {
        return JobOutcome::Active;
    };

    let condition = |kind: &str| {
        status
            .conditions
            .iter()
            .flatten()
            .find(|c| c.type_ == kind && c.status == "True")
    };

    if let Some(failed) = condition("Failed") {
        let message = failed
            .message
            .clone()
            .or_else(|| failed.reason.clone())
            .unwrap_or_else(|| "job failed".to_string());
        return JobOutcome::Failed(message);
    }
    if condition("Complete").is_some() || status.succeeded.unwrap_or(0) > 0 {
        return JobOutcome::Succeeded;
    }
    JobOutcome::Active
}

#[derive(Debug, Clone)]
pub struct JobFramework {
    settings: Arc<FrameworkSettings>,
    ops: ClusterOps,
}

impl JobFramework {
    pub fn new(settings: Arc<FrameworkSettings>, ops: ClusterOps) -> Self {
        Self { settings, ops }
    }

    pub fn settings(&self) -> &FrameworkSettings {
        &self.settings
    }

    pub fn ops(&self) -> &ClusterOps {
        &self.ops
    }

    pub fn job_key(&self, name: &str) -> ObjectKey {
        ObjectKey::new(ObjectKind::Job, self.settings.namespace.clone(), name)
    }

    /// Job spec for `runnable`, shared with the cron job and build shapes.
    pub fn job_spec(
        &self,
        runnable: &Runnable,
        kind: FrameworkKind,
        backoff_limit: Option<i32>,
    ) -> Result<JobSpec> {
        let defaults = &self.settings.job;
        Ok(JobSpec {
            template: pod_template(&self.settings, runnable, kind, "Never")?,
            backoff_limit: Some(backoff_limit.unwrap_or(defaults.backoff_limit)),
            active_deadline_seconds: defaults.active_deadline_seconds,
            ttl_seconds_after_finished: defaults.ttl_seconds_after_finished,
            ..Default::default()
        })
    }

    /// A named job for `runnable`, labelled as `kind`.
    pub fn job_named(
        &self,
        runnable: &Runnable,
        name: &str,
        kind: FrameworkKind,
        backoff_limit: Option<i32>,
    ) -> Result<Job> {
        Ok(Job {
            metadata: metadata(&self.settings, name, labels(&self.settings, runnable, kind)),
            spec: Some(self.job_spec(runnable, kind, backoff_limit)?),
            ..Default::default()
        })
    }

    fn build_job(&self, runnable: &Runnable) -> Result<Job> {
        let backoff_limit = match &runnable.body {
            RunnableBody::Job { backoff_limit } => *backoff_limit,
            _ => None,
        };
        let name = objects::object_name(&self.settings, FrameworkKind::Job, &runnable.id);
        self.job_named(runnable, &name, FrameworkKind::Job, backoff_limit)
    }

    /// Read the job behind `key` and fold its status into `runnable`.
    ///
    /// A missing job is an error on the runnable; a failed read, or a key
    /// that resolves to something other than a job, is returned to the
    /// caller and the runnable stays as it was.
    pub async fn observe(&self, mut runnable: Runnable, key: &ObjectKey) -> Result<Runnable> {
        let Some(object) = self.ops.get(key).await? else {
            warn!(runnable_id = %runnable.id, %key, "job disappeared");
            runnable.fail(ErrorDetail::new(
                "NotFound",
                format!("job {} no longer exists", key.name),
            ));
            return Ok(runnable);
        };
        let job = match object {
            ClusterObject::Job(job) => job,
            other => return Err(unexpected_object(key, &other).into()),
        };

        if let Some(status) = &job.status {
            runnable
                .results
                .insert("job_status".to_string(), serde_json::to_value(status)?);
        }

        match job_outcome(&job) {
            JobOutcome::Active => {
                debug!(runnable_id = %runnable.id, job = %key.name, "job still active");
                runnable.transition_to(RunnableState::Running, runnable.message.clone());
            }
            JobOutcome::Succeeded => {
                runnable.logs = self.capture_logs(key).await;
                info!(runnable_id = %runnable.id, job = %key.name, "job succeeded");
                runnable.transition_to(
                    RunnableState::Completed,
                    Some(format!("job {} succeeded", key.name)),
                );
            }
            JobOutcome::Failed(message) => {
                runnable.logs = self.capture_logs(key).await;
                info!(runnable_id = %runnable.id, job = %key.name, %message, "job failed");
                runnable.fail(ErrorDetail::new("JobFailed", message));
            }
        }
        Ok(runnable)
    }

    async fn capture_logs(&self, key: &ObjectKey) -> Option<String> {
        match self.ops.logs(key).await {
            Ok(logs) => logs,
            Err(e) => {
                warn!(%key, error = %e, "could not read job logs");
                None
            }
        }
    }
}

impl Framework for JobFramework {
    fn kind(&self) -> FrameworkKind {
        FrameworkKind::Job
    }

    fn build(&self, runnable: &Runnable) -> Result<Vec<ClusterObject>> {
        Ok(vec![ClusterObject::Job(self.build_job(runnable)?)])
    }

    fn run<'a>(&'a self, mut runnable: Runnable) -> BoxFuture<'a, Result<Runnable>> {
        Box::pin(async move {
            let job = self.ops.ensure(ClusterObject::Job(self.build_job(&runnable)?)).await?;
            let name = job.name().to_string();
            info!(runnable_id = %runnable.id, job = %name, "job submitted");
            runnable
                .results
                .insert("job".to_string(), serde_json::Value::String(name.clone()));
            runnable.transition_to(RunnableState::Running, Some(format!("job {name} submitted")));
            Ok(runnable)
        })
    }

    fn stop<'a>(&'a self, mut runnable: Runnable) -> BoxFuture<'a, Result<Runnable>> {
        Box::pin(async move {
            let name = objects::object_name(&self.settings, FrameworkKind::Job, &runnable.id);
            self.ops.remove(&self.job_key(&name)).await?;
            runnable.transition_to(RunnableState::Stopped, Some(format!("job {name} stopped")));
            Ok(runnable)
        })
    }

    fn delete<'a>(&'a self, mut runnable: Runnable) -> BoxFuture<'a, Result<Runnable>> {
        Box::pin(async move {
            let name = objects::object_name(&self.settings, FrameworkKind::Job, &runnable.id);
            let deleted = self.ops.remove(&self.job_key(&name)).await?;
            debug!(runnable_id = %runnable.id, job = %name, deleted, "job deleted");
            runnable.transition_to(RunnableState::Deleted, Some(format!("job {name} deleted")));
            Ok(runnable)
        })
    }

    fn refresh<'a>(&'a self, runnable: Runnable) -> BoxFuture<'a, Result<Runnable>> {
        Box::pin(async move {
            let name = objects::object_name(&self.settings, FrameworkKind::Job, &runnable.id);
            self.observe(runnable, &self.job_key(&name)).await
        })
    }
}
