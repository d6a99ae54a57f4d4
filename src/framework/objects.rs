// src/framework/objects.rs

//! Pure builders for the pieces every container-based object shares:
//! names, labels, metadata and the pod template.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, EmptyDirVolumeSource, EnvFromSource, EnvVar,
    PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, ResourceRequirements,
    SecretEnvSource, SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use regex::Regex;

use super::FrameworkSettings;
use crate::cluster::ClusterObject;
use crate::errors::{EngineError, Result};
use crate::run::{ResourceSpec, VolumeKind, VolumeSpec};
use crate::runnable::{ContainerSpec, FrameworkKind, InitStage, Runnable};

pub const MANAGED_BY: &str = "runplane";
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const LABEL_RUNNABLE: &str = "runplane.io/runnable";
pub const LABEL_PROJECT: &str = "runplane.io/project";
pub const LABEL_RUNTIME: &str = "runplane.io/runtime";
pub const LABEL_FRAMEWORK: &str = "runplane.io/framework";

const MAX_NAME: usize = 63;
/// Hex characters of the id digest appended to altered names.
const NAME_DIGEST: usize = 8;

static INVALID_NAME_CHARS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9-]+").ok());
static INVALID_LABEL_CHARS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9._-]+").ok());
static INVALID_ENV_CHARS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"[^A-Z0-9_]+").ok());

fn replace_invalid(pattern: &LazyLock<Option<Regex>>, input: &str, with: &str) -> String {
    match pattern.as_ref() {
        Some(re) => re.replace_all(input, with).into_owned(),
        None => input.to_string(),
    }
}

/// Lower-case DNS-1123 label: `[a-z0-9-]`, alphanumeric at both ends, at
/// most 63 characters.
pub fn sanitize_name(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let replaced = replace_invalid(&INVALID_NAME_CHARS, &lowered, "-");
    let mut name: String = replaced.chars().take(MAX_NAME).collect();
    while name.contains("--") {
        name = name.replace("--", "-");
    }
    name.trim_matches('-').to_string()
}

fn sanitize_label_value(raw: &str) -> String {
    let replaced = replace_invalid(&INVALID_LABEL_CHARS, raw, "-");
    let value: String = replaced.chars().take(MAX_NAME).collect();
    value
        .trim_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string()
}

fn env_name(raw: &str) -> String {
    replace_invalid(&INVALID_ENV_CHARS, &raw.to_uppercase(), "_")
}

/// `<prefix>-<shape>-<id>`, sanitised.
///
/// When sanitising alters the id (case, characters, length) the name ends in
/// a short digest of the raw id, so distinct ids never share an object.
pub fn object_name(settings: &FrameworkSettings, kind: FrameworkKind, id: &str) -> String {
    let raw = format!("{}-{}-{}", settings.name_prefix, kind.as_str(), id);
    let name = sanitize_name(&raw);
    if name == raw {
        return name;
    }

    let digest = blake3::hash(id.as_bytes()).to_hex();
    let head: String = name.chars().take(MAX_NAME - NAME_DIGEST - 1).collect();
    format!("{}-{}", head.trim_end_matches('-'), &digest.as_str()[..NAME_DIGEST])
}

/// Whether `existing` was created for the same runnable as `wanted`.
///
/// Objects without the runnable label on the wanted side are not checked.
pub fn same_owner(wanted: &ClusterObject, existing: &ClusterObject) -> bool {
    let owner = |object: &ClusterObject| {
        object
            .metadata()
            .labels
            .as_ref()
            .and_then(|labels| labels.get(LABEL_RUNNABLE).cloned())
    };
    match owner(wanted) {
        Some(expected) => owner(existing).as_deref() == Some(expected.as_str()),
        None => true,
    }
}

/// Labels stamped on every object and pod the engine creates.
pub fn labels(
    settings: &FrameworkSettings,
    runnable: &Runnable,
    kind: FrameworkKind,
) -> BTreeMap<String, String> {
    let mut labels = settings.labels.clone();
    if let Some(container) = &runnable.container {
        labels.extend(container.labels.clone());
    }
    labels.insert(LABEL_MANAGED_BY.to_string(), MANAGED_BY.to_string());
    labels.insert(LABEL_RUNNABLE.to_string(), sanitize_label_value(&runnable.id));
    labels.insert(LABEL_PROJECT.to_string(), sanitize_label_value(&runnable.project));
    labels.insert(LABEL_RUNTIME.to_string(), sanitize_label_value(&runnable.runtime));
    labels.insert(LABEL_FRAMEWORK.to_string(), kind.as_str().to_string());
    labels
}

/// Selector matching the pods of one runnable.
pub fn selector(runnable: &Runnable) -> BTreeMap<String, String> {
    BTreeMap::from([(LABEL_RUNNABLE.to_string(), sanitize_label_value(&runnable.id))])
}

pub fn metadata(
    settings: &FrameworkSettings,
    name: &str,
    labels: BTreeMap<String, String>,
) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(settings.namespace.clone()),
        labels: Some(labels),
        ..Default::default()
    }
}

/// The container part of a runnable, or `InvalidArgument` for opaque bodies.
pub fn container_spec(runnable: &Runnable) -> Result<&ContainerSpec> {
    runnable.container.as_ref().ok_or_else(|| {
        EngineError::InvalidArgument(format!(
            "runnable '{}' has no container specification",
            runnable.id
        ))
    })
}

fn env_vars(runnable: &Runnable, spec: &ContainerSpec) -> Vec<EnvVar> {
    let mut env: Vec<EnvVar> = vec![
        EnvVar {
            name: "RUNPLANE_RUN_ID".to_string(),
            value: Some(runnable.id.clone()),
            ..Default::default()
        },
        EnvVar {
            name: "RUNPLANE_PROJECT".to_string(),
            value: Some(runnable.project.clone()),
            ..Default::default()
        },
    ];

    let injected = runnable
        .configurations
        .iter()
        .flat_map(|c| c.values.iter())
        .chain(runnable.credentials.iter().flat_map(|c| c.values.iter()));
    for (key, value) in injected {
        env.push(EnvVar {
            name: env_name(key),
            value: Some(value.clone()),
            ..Default::default()
        });
    }

    // Explicit envs last so they override injected values of the same name.
    for entry in &spec.envs {
        env.retain(|e| e.name != entry.name);
        env.push(EnvVar {
            name: entry.name.clone(),
            value: Some(entry.value.clone()),
            ..Default::default()
        });
    }
    env
}

fn quantities(pairs: &[(&str, &Option<String>)]) -> Option<BTreeMap<String, Quantity>> {
    let map: BTreeMap<String, Quantity> = pairs
        .iter()
        .filter_map(|(key, value)| {
            value
                .as_ref()
                .map(|v| (key.to_string(), Quantity(v.clone())))
        })
        .collect();
    (!map.is_empty()).then_some(map)
}

pub fn resources(spec: &ResourceSpec, defaults: &ResourceSpec) -> Option<ResourceRequirements> {
    let effective = spec.or(defaults);
    if effective.is_empty() {
        return None;
    }
    Some(ResourceRequirements {
        requests: quantities(&[
            ("cpu", &effective.cpu_request),
            ("memory", &effective.memory_request),
        ]),
        limits: quantities(&[
            ("cpu", &effective.cpu_limit),
            ("memory", &effective.memory_limit),
            ("nvidia.com/gpu", &effective.gpu),
        ]),
        ..Default::default()
    })
}

fn volume(spec: &VolumeSpec) -> Volume {
    let source = spec.source.clone().unwrap_or_else(|| spec.name.clone());
    let mut volume = Volume {
        name: spec.name.clone(),
        ..Default::default()
    };
    match spec.kind {
        VolumeKind::EmptyDir => volume.empty_dir = Some(EmptyDirVolumeSource::default()),
        VolumeKind::PersistentVolumeClaim => {
            volume.persistent_volume_claim = Some(PersistentVolumeClaimVolumeSource {
                claim_name: source,
                ..Default::default()
            })
        }
        VolumeKind::ConfigMap => {
            volume.config_map = Some(ConfigMapVolumeSource {
                name: source,
                ..Default::default()
            })
        }
        VolumeKind::Secret => {
            volume.secret = Some(SecretVolumeSource {
                secret_name: Some(source),
                ..Default::default()
            })
        }
    }
    volume
}

fn volume_mounts(volumes: &[VolumeSpec]) -> Option<Vec<VolumeMount>> {
    if volumes.is_empty() {
        return None;
    }
    Some(
        volumes
            .iter()
            .map(|v| VolumeMount {
                name: v.name.clone(),
                mount_path: v.mount_path.clone(),
                ..Default::default()
            })
            .collect(),
    )
}

fn non_empty(values: &[String]) -> Option<Vec<String>> {
    (!values.is_empty()).then(|| values.to_vec())
}

pub fn main_container(
    settings: &FrameworkSettings,
    runnable: &Runnable,
    name: &str,
) -> Result<Container> {
    let spec = container_spec(runnable)?;
    if spec.image.is_empty() {
        return Err(EngineError::InvalidArgument(format!(
            "runnable '{}' has no container image",
            runnable.id
        )));
    }

    let env_from: Vec<EnvFromSource> = spec
        .secrets
        .iter()
        .map(|secret| EnvFromSource {
            secret_ref: Some(SecretEnvSource {
                name: secret.clone(),
                ..Default::default()
            }),
            ..Default::default()
        })
        .collect();

    Ok(Container {
        name: sanitize_name(name),
        image: Some(spec.image.clone()),
        image_pull_policy: Some(settings.image_pull_policy.clone()),
        command: non_empty(&spec.command),
        args: non_empty(&spec.args),
        env: Some(env_vars(runnable, spec)),
        env_from: (!env_from.is_empty()).then_some(env_from),
        resources: resources(&spec.resources, &settings.resources),
        volume_mounts: volume_mounts(&spec.volumes),
        ..Default::default()
    })
}

fn init_container(settings: &FrameworkSettings, init: &InitStage, volumes: &[VolumeSpec]) -> Container {
    Container {
        name: "init".to_string(),
        image: Some(init.image.clone()),
        image_pull_policy: Some(settings.image_pull_policy.clone()),
        command: non_empty(&init.command),
        args: non_empty(&init.args),
        volume_mounts: volume_mounts(volumes),
        ..Default::default()
    }
}

pub fn pod_spec(
    settings: &FrameworkSettings,
    runnable: &Runnable,
    container: Container,
    restart_policy: &str,
) -> Result<PodSpec> {
    let spec = container_spec(runnable)?;
    let init_containers = spec
        .init
        .as_ref()
        .map(|init| vec![init_container(settings, init, &spec.volumes)]);
    let volumes: Vec<Volume> = spec.volumes.iter().map(volume).collect();

    Ok(PodSpec {
        containers: vec![container],
        init_containers,
        restart_policy: Some(restart_policy.to_string()),
        volumes: (!volumes.is_empty()).then_some(volumes),
        node_selector: (!spec.node_selector.is_empty()).then(|| spec.node_selector.clone()),
        affinity: spec.affinity.clone(),
        tolerations: (!spec.tolerations.is_empty()).then(|| spec.tolerations.clone()),
        runtime_class_name: spec.runtime_class.clone(),
        priority_class_name: spec.priority_class.clone(),
        service_account_name: settings.service_account.clone(),
        ..Default::default()
    })
}

pub fn pod_template(
    settings: &FrameworkSettings,
    runnable: &Runnable,
    kind: FrameworkKind,
    restart_policy: &str,
) -> Result<PodTemplateSpec> {
    let container = main_container(settings, runnable, kind.as_str())?;
    Ok(PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(labels(settings, runnable, kind)),
            ..Default::default()
        }),
        spec: Some(pod_spec(settings, runnable, container, restart_policy)?),
    })
}
