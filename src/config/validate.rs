// src/config/validate.rs

use std::time::Duration;

use crate::config::model::{
    ClusterSection, EngineConfig, EngineSection, EngineSettings, RawEngineConfig, RuntimesSection,
    StoreSection, StoreSettings,
};
use crate::errors::{EngineError, Result};
use crate::framework::objects::sanitize_name;
use crate::framework::{FrameworkSettings, JobDefaults};
use crate::runtime::{PythonSettings, RuntimeSettings, WorkflowSettings};
use crate::types::StoreMode;

impl TryFrom<RawEngineConfig> for EngineConfig {
    type Error = EngineError;

    fn try_from(raw: RawEngineConfig) -> std::result::Result<Self, Self::Error> {
        let engine = validate_engine(&raw.engine)?;
        Ok(EngineConfig {
            store: validate_store(raw.store)?,
            frameworks: validate_cluster(raw.cluster, engine.cluster_timeout)?,
            runtimes: validate_runtimes(raw.runtimes)?,
            engine,
        })
    }
}

/// Parse a duration such as `"250ms"`, `"30s"`, `"5m"` or `"1h"`.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{num_part}': {e}"))?;

    match unit_part.trim().to_lowercase().as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 60 * 60)),
        unit => Err(format!(
            "unsupported duration unit '{unit}'; expected ms, s, m, or h"
        )),
    }
}

fn config_error(field: &str, reason: impl std::fmt::Display) -> EngineError {
    EngineError::Config(format!("{field}: {reason}"))
}

fn at_least_one(field: &str, value: usize) -> Result<usize> {
    if value == 0 {
        return Err(config_error(field, "must be >= 1 (got 0)"));
    }
    Ok(value)
}

fn positive_duration(field: &str, raw: &str) -> Result<Duration> {
    let duration = parse_duration(raw).map_err(|e| config_error(field, e))?;
    if duration.is_zero() {
        return Err(config_error(field, "must be greater than zero"));
    }
    Ok(duration)
}

fn non_empty(field: &str, value: String) -> Result<String> {
    if value.trim().is_empty() {
        return Err(config_error(field, "must not be empty"));
    }
    Ok(value)
}

fn validate_engine(section: &EngineSection) -> Result<EngineSettings> {
    Ok(EngineSettings {
        dispatch_workers: at_least_one("[engine].dispatch_workers", section.dispatch_workers)?,
        dispatch_queue: at_least_one("[engine].dispatch_queue", section.dispatch_queue)?,
        event_buffer: at_least_one("[engine].event_buffer", section.event_buffer)?,
        monitor_interval: positive_duration("[engine].monitor_interval", &section.monitor_interval)?,
        cluster_timeout: positive_duration("[engine].cluster_timeout", &section.cluster_timeout)?,
    })
}

fn validate_store(section: StoreSection) -> Result<StoreSettings> {
    if section.mode == StoreMode::File && section.path.as_os_str().is_empty() {
        return Err(config_error("[store].path", "required when mode = \"file\""));
    }
    Ok(StoreSettings {
        mode: section.mode,
        path: section.path,
    })
}

fn validate_cluster(section: ClusterSection, call_timeout: Duration) -> Result<FrameworkSettings> {
    let namespace = non_empty("[cluster].namespace", section.namespace)?;
    if sanitize_name(&namespace) != namespace {
        return Err(config_error(
            "[cluster].namespace",
            format!("'{namespace}' is not a valid DNS-1123 label"),
        ));
    }

    let name_prefix = non_empty("[cluster].name_prefix", section.name_prefix)?;
    if sanitize_name(&name_prefix) != name_prefix {
        return Err(config_error(
            "[cluster].name_prefix",
            format!("'{name_prefix}' is not a valid DNS-1123 label"),
        ));
    }

    let image_pull_policy = match section.image_pull_policy.as_str() {
        "Always" | "IfNotPresent" | "Never" => section.image_pull_policy,
        other => {
            return Err(config_error(
                "[cluster].image_pull_policy",
                format!("'{other}' (expected Always, IfNotPresent or Never)"),
            ));
        }
    };

    let job = &section.job;
    if job.backoff_limit < 0 {
        return Err(config_error("[cluster.job].backoff_limit", "must be >= 0"));
    }
    if job.active_deadline_seconds < 0 {
        return Err(config_error("[cluster.job].active_deadline_seconds", "must be >= 0"));
    }
    if job.ttl_seconds_after_finished < 0 {
        return Err(config_error("[cluster.job].ttl_seconds_after_finished", "must be >= 0"));
    }

    Ok(FrameworkSettings {
        namespace,
        name_prefix,
        image_pull_policy,
        service_account: section.service_account,
        labels: section.labels,
        job: JobDefaults {
            backoff_limit: job.backoff_limit,
            active_deadline_seconds: (job.active_deadline_seconds > 0)
                .then_some(job.active_deadline_seconds),
            ttl_seconds_after_finished: (job.ttl_seconds_after_finished > 0)
                .then_some(job.ttl_seconds_after_finished),
        },
        resources: section.resources,
        context_image: non_empty("[cluster].context_image", section.context_image)?,
        call_timeout,
    })
}

fn validate_runtimes(section: RuntimesSection) -> Result<RuntimeSettings> {
    Ok(RuntimeSettings {
        registry: non_empty("[runtimes].registry", section.registry)?
            .trim_end_matches('/')
            .to_string(),
        builder_image: non_empty("[runtimes].builder_image", section.builder_image)?,
        python: PythonSettings {
            base_image: non_empty("[runtimes.python].base_image", section.python.base_image)?,
            source_image: non_empty("[runtimes.python].source_image", section.python.source_image)?,
        },
        workflow: WorkflowSettings {
            api_version: non_empty("[runtimes.workflow].api_version", section.workflow.api_version)?,
            kind: non_empty("[runtimes.workflow].kind", section.workflow.kind)?,
            runner_image: non_empty("[runtimes.workflow].runner_image", section.workflow.runner_image)?,
            service_account: section.workflow.service_account,
        },
    })
}
