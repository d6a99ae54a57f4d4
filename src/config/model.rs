// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::framework::FrameworkSettings;
use crate::run::ResourceSpec;
use crate::runnable::file_store::DEFAULT_STORE_DIR;
use crate::runtime::RuntimeSettings;
use crate::types::StoreMode;

/// Engine configuration as read from a TOML file, before validation.
///
/// ```toml
/// [engine]
/// dispatch_workers = 4
/// monitor_interval = "30s"
///
/// [store]
/// mode = "file"
/// path = ".runplane/runnables"
///
/// [cluster]
/// namespace = "ml"
///
/// [runtimes.python]
/// base_image = "python:3.11-slim"
/// ```
///
/// Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEngineConfig {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub cluster: ClusterSection,
    #[serde(default)]
    pub runtimes: RuntimesSection,
}

/// `[engine]`: concurrency and timing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// Runnables the dispatch listener handles at once.
    pub dispatch_workers: usize,
    /// Capacity of the bounded dispatch queue.
    pub dispatch_queue: usize,
    /// Capacity of the change-event broadcast.
    pub event_buffer: usize,
    /// Duration string between monitor cycles, e.g. `"30s"`.
    pub monitor_interval: String,
    /// Duration string bounding every backend call.
    pub cluster_timeout: String,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            dispatch_workers: 4,
            dispatch_queue: 64,
            event_buffer: 256,
            monitor_interval: "30s".to_string(),
            cluster_timeout: "10s".to_string(),
        }
    }
}

/// `[store]`: where runnables live.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub mode: StoreMode,
    /// Directory for `mode = "file"`.
    pub path: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            mode: StoreMode::default(),
            path: PathBuf::from(DEFAULT_STORE_DIR),
        }
    }
}

/// `[cluster]`: how backend objects are named and shaped.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClusterSection {
    pub namespace: String,
    /// Prefix of every object name; must be a DNS-1123 label.
    pub name_prefix: String,
    pub image_pull_policy: String,
    pub service_account: Option<String>,
    /// Extra labels stamped on every object.
    pub labels: BTreeMap<String, String>,
    pub job: JobSection,
    /// Defaults applied when neither run nor task sets a resource.
    pub resources: ResourceSpec,
    /// Image unpacking build contexts.
    pub context_image: String,
}

impl Default for ClusterSection {
    fn default() -> Self {
        let defaults = FrameworkSettings::default();
        Self {
            namespace: defaults.namespace,
            name_prefix: defaults.name_prefix,
            image_pull_policy: defaults.image_pull_policy,
            service_account: None,
            labels: BTreeMap::new(),
            job: JobSection::default(),
            resources: ResourceSpec::default(),
            context_image: defaults.context_image,
        }
    }
}

/// `[cluster.job]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobSection {
    pub backoff_limit: i32,
    /// `0` leaves the deadline unset.
    pub active_deadline_seconds: i64,
    /// `0` keeps finished jobs forever.
    pub ttl_seconds_after_finished: i32,
}

impl Default for JobSection {
    fn default() -> Self {
        Self {
            backoff_limit: 0,
            active_deadline_seconds: 0,
            ttl_seconds_after_finished: 3600,
        }
    }
}

/// `[runtimes]`: images and endpoints of the built-in runtimes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimesSection {
    /// Registry built images are pushed to.
    pub registry: String,
    pub builder_image: String,
    pub python: PythonSection,
    pub workflow: WorkflowSection,
}

impl Default for RuntimesSection {
    fn default() -> Self {
        let defaults = RuntimeSettings::default();
        Self {
            registry: defaults.registry,
            builder_image: defaults.builder_image,
            python: PythonSection {
                base_image: defaults.python.base_image,
                source_image: defaults.python.source_image,
            },
            workflow: WorkflowSection {
                api_version: defaults.workflow.api_version,
                kind: defaults.workflow.kind,
                runner_image: defaults.workflow.runner_image,
                service_account: defaults.workflow.service_account,
            },
        }
    }
}

/// `[runtimes.python]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PythonSection {
    pub base_image: String,
    pub source_image: String,
}

impl Default for PythonSection {
    fn default() -> Self {
        RuntimesSection::default().python
    }
}

/// `[runtimes.workflow]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkflowSection {
    pub api_version: String,
    pub kind: String,
    pub runner_image: String,
    pub service_account: Option<String>,
}

impl Default for WorkflowSection {
    fn default() -> Self {
        RuntimesSection::default().workflow
    }
}

/// Validated engine-level settings.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub dispatch_workers: usize,
    pub dispatch_queue: usize,
    pub event_buffer: usize,
    pub monitor_interval: Duration,
    pub cluster_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            dispatch_workers: 4,
            dispatch_queue: 64,
            event_buffer: 256,
            monitor_interval: Duration::from_secs(30),
            cluster_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreSettings {
    pub mode: StoreMode,
    pub path: PathBuf,
}

/// Validated configuration.
///
/// Construct via `EngineConfig::try_from(raw)` or
/// [`load_and_validate`](crate::config::load_and_validate).
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub engine: EngineSettings,
    pub store: StoreSettings,
    pub frameworks: FrameworkSettings,
    pub runtimes: RuntimeSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            engine: EngineSettings::default(),
            store: StoreSettings {
                mode: StoreMode::default(),
                path: PathBuf::from(DEFAULT_STORE_DIR),
            },
            frameworks: FrameworkSettings::default(),
            runtimes: RuntimeSettings::default(),
        }
    }
}
