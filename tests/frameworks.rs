// tests/frameworks.rs

use std::collections::BTreeMap;
use std::error::Error;
use std::sync::Arc;

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::json;

use runplane::cluster::{
    BoxFuture, ClusterClient, ClusterError, ClusterObject, InMemoryCluster, ObjectKey, ObjectKind,
};
use runplane::framework::build::{DIGEST_ANNOTATION, DOCKERFILE, context_digest};
use runplane::framework::objects::{LABEL_RUNNABLE, object_name, sanitize_name};
use runplane::framework::{FrameworkRegistry, FrameworkSettings};
use runplane::runnable::{ContainerSpec, FrameworkKind, Runnable, RunnableBody};
use runplane::types::RunnableState;
use runplane_test_utils::builders::PROJECT;
use runplane_test_utils::init_tracing;

type TestResult = Result<(), Box<dyn Error>>;

fn runnable(id: &str, body: RunnableBody) -> Runnable {
    let container = match body {
        RunnableBody::CustomResource { .. } => None,
        _ => Some(ContainerSpec {
            image: "busybox:1.36".to_string(),
            command: vec!["sh".to_string(), "-c".to_string(), "echo hi".to_string()],
            ..Default::default()
        }),
    };
    Runnable {
        id: id.to_string(),
        project: PROJECT.to_string(),
        runtime: "container".to_string(),
        task: "container+job".to_string(),
        user: None,
        container,
        body,
        state: RunnableState::Ready,
        message: None,
        error: None,
        results: BTreeMap::new(),
        logs: None,
        credentials: Vec::new(),
        configurations: Vec::new(),
    }
}

fn frameworks(cluster: &InMemoryCluster) -> FrameworkRegistry {
    FrameworkRegistry::standard(Arc::new(cluster.clone()), FrameworkSettings::default())
}

#[test]
fn every_shape_has_a_framework() -> TestResult {
    let registry = frameworks(&InMemoryCluster::new());
    assert_eq!(registry.kinds(), FrameworkKind::ALL.to_vec());
    for kind in FrameworkKind::ALL {
        assert_eq!(registry.get(kind)?.kind(), kind);
    }
    Ok(())
}

#[test]
fn build_is_pure() -> TestResult {
    let cluster = InMemoryCluster::new();
    let registry = frameworks(&cluster);
    let job = runnable("r1", RunnableBody::Job { backoff_limit: Some(2) });

    let objects = registry.for_runnable(&job)?.build(&job)?;

    assert_eq!(objects.len(), 1);
    let ClusterObject::Job(built) = &objects[0] else {
        panic!("expected a job, got {:?}", objects[0]);
    };
    assert_eq!(built.metadata.name.as_deref(), Some("runplane-job-r1"));
    assert_eq!(built.spec.as_ref().and_then(|s| s.backoff_limit), Some(2));
    let labels = built.metadata.labels.clone().unwrap_or_default();
    assert_eq!(labels.get("app.kubernetes.io/managed-by").map(String::as_str), Some("runplane"));

    assert!(cluster.objects().is_empty());
    assert_eq!(cluster.calls("create") + cluster.calls("get"), 0);
    Ok(())
}

#[tokio::test]
async fn running_twice_creates_once_and_deleting_twice_succeeds() -> TestResult {
    init_tracing();

    let cluster = InMemoryCluster::new();
    let registry = frameworks(&cluster);
    let job = runnable("r1", RunnableBody::Job { backoff_limit: None });
    let framework = registry.for_runnable(&job)?;

    let first = framework.run(job.clone()).await?;
    let second = framework.run(job.clone()).await?;

    assert_eq!(first.state, RunnableState::Running);
    assert_eq!(second.state, RunnableState::Running);
    assert_eq!(cluster.calls("create"), 1);
    assert_eq!(cluster.objects_of(&ObjectKind::Job).len(), 1);

    let deleted = framework.delete(first).await?;
    assert_eq!(deleted.state, RunnableState::Deleted);
    let again = framework.delete(second).await?;
    assert_eq!(again.state, RunnableState::Deleted);
    assert!(cluster.objects().is_empty());
    Ok(())
}

#[tokio::test]
async fn existing_object_is_adopted_instead_of_recreated() -> TestResult {
    init_tracing();

    let cluster = InMemoryCluster::new();
    let registry = frameworks(&cluster);
    let job = runnable("r1", RunnableBody::Job { backoff_limit: None });
    let framework = registry.for_runnable(&job)?;

    // Someone else already created the job.
    let objects = framework.build(&job)?;
    cluster.create(objects[0].clone()).await?;

    let running = framework.run(job).await?;
    assert_eq!(running.state, RunnableState::Running);
    assert_eq!(cluster.objects_of(&ObjectKind::Job).len(), 1);
    Ok(())
}

#[tokio::test]
async fn plain_jobs_cannot_be_resumed() -> TestResult {
    let cluster = InMemoryCluster::new();
    let registry = frameworks(&cluster);
    let job = runnable("r1", RunnableBody::Job { backoff_limit: None });

    let err = registry.for_runnable(&job)?.resume(job).await.unwrap_err();
    assert!(err.is_permanent());
    Ok(())
}

#[tokio::test]
async fn custom_resource_status_drives_the_runnable() -> TestResult {
    init_tracing();

    let cluster = InMemoryCluster::new();
    let registry = frameworks(&cluster);
    let body = RunnableBody::CustomResource {
        api_version: "argoproj.io/v1alpha1".to_string(),
        kind: "Workflow".to_string(),
        spec: json!({ "entrypoint": "main" }),
    };
    let workflow = runnable("wf1", body);
    let framework = registry.for_runnable(&workflow)?;
    let key = ObjectKey::new(
        ObjectKind::Custom {
            api_version: "argoproj.io/v1alpha1".to_string(),
            kind: "Workflow".to_string(),
        },
        "default",
        "runplane-cr-wf1",
    );

    let running = framework.run(workflow).await?;
    assert_eq!(running.state, RunnableState::Running);

    // No status yet: nothing changes.
    let unchanged = framework.refresh(running.clone()).await?;
    assert_eq!(unchanged.state, RunnableState::Running);

    let set_status = |phase: &str, message: &str| {
        let Some(ClusterObject::Custom(mut object)) = cluster.object(&key) else {
            panic!("custom resource missing");
        };
        object.status = Some(json!({ "phase": phase, "message": message }));
        ClusterObject::Custom(object)
    };

    cluster.replace(set_status("Running", "")).await?;
    let still = framework.refresh(running.clone()).await?;
    assert_eq!(still.state, RunnableState::Running);
    assert_eq!(still.results["status"]["phase"], "Running");

    cluster.replace(set_status("Failed", "step b exited 1")).await?;
    let failed = framework.refresh(running.clone()).await?;
    assert_eq!(failed.state, RunnableState::Error);
    assert_eq!(failed.error.as_ref().map(|e| e.description.as_str()), Some("step b exited 1"));

    cluster.replace(set_status("Succeeded", "")).await?;
    let done = framework.refresh(running).await?;
    assert_eq!(done.state, RunnableState::Completed);
    assert!(done.error.is_none());
    Ok(())
}

#[tokio::test]
async fn image_build_ships_its_context_in_a_config_map() -> TestResult {
    init_tracing();

    let cluster = InMemoryCluster::new();
    let registry = frameworks(&cluster);
    let context = BTreeMap::from([("app.py".to_string(), "print('hi')".to_string())]);
    let instructions = vec!["FROM python:3.10-slim".to_string(), "COPY app.py /app.py".to_string()];
    let build = runnable(
        "img1",
        RunnableBody::Build {
            context: context.clone(),
            instructions: instructions.clone(),
            target_image: "registry.local:5000/demo/app:img1".to_string(),
            backoff_limit: None,
        },
    );
    let framework = registry.for_runnable(&build)?;

    let running = framework.run(build).await?;
    assert_eq!(running.state, RunnableState::Running);
    assert_eq!(running.results["build"]["image"], "registry.local:5000/demo/app:img1");

    let config_map = cluster
        .object(&ObjectKey::new(ObjectKind::ConfigMap, "default", "runplane-build-img1"))
        .ok_or("config map missing")?;
    let mut files = context;
    files.insert(DOCKERFILE.to_string(), instructions.join("\n"));
    let annotations = config_map.metadata().annotations.clone().unwrap_or_default();
    assert_eq!(annotations.get(DIGEST_ANNOTATION), Some(&context_digest(&files)));

    let Some(ClusterObject::Job(job)) =
        cluster.object(&ObjectKey::new(ObjectKind::Job, "default", "runplane-build-img1"))
    else {
        panic!("builder job missing");
    };
    let pod = job.spec.and_then(|s| s.template.spec).ok_or("pod spec missing")?;
    assert_eq!(pod.init_containers.map(|c| c.len()), Some(1));
    let args = pod.containers[0].args.clone().unwrap_or_default();
    assert!(args.contains(&"--destination=registry.local:5000/demo/app:img1".to_string()));

    cluster.complete_job("default", "runplane-build-img1");
    let built = framework.refresh(running.clone()).await?;
    assert_eq!(built.state, RunnableState::Completed);
    assert_eq!(built.results["image"], "registry.local:5000/demo/app:img1");

    framework.delete(built).await?;
    assert!(cluster.objects().is_empty());
    Ok(())
}

#[test]
fn context_digest_is_order_independent_and_content_sensitive() {
    let a = BTreeMap::from([
        ("a.txt".to_string(), "1".to_string()),
        ("b.txt".to_string(), "2".to_string()),
    ]);
    let mut b = BTreeMap::new();
    b.insert("b.txt".to_string(), "2".to_string());
    b.insert("a.txt".to_string(), "1".to_string());
    assert_eq!(context_digest(&a), context_digest(&b));

    b.insert("b.txt".to_string(), "3".to_string());
    assert_ne!(context_digest(&a), context_digest(&b));
}

#[test]
fn object_names_are_dns_labels() {
    assert_eq!(sanitize_name("Runplane-JOB-My_Run.42"), "runplane-job-my-run-42");
    assert_eq!(sanitize_name("--edge--case--"), "edge-case");

    let long = sanitize_name(&"x".repeat(100));
    assert_eq!(long.len(), 63);
}

#[test]
fn distinct_ids_never_share_an_object_name() {
    let settings = FrameworkSettings::default();
    let name = |id: &str| object_name(&settings, FrameworkKind::Job, id);

    assert_eq!(name("r1"), "runplane-job-r1");
    assert_eq!(name("run-a"), "runplane-job-run-a");

    let upper = name("Run-A");
    assert_ne!(upper, name("run-a"));
    assert!(upper.starts_with("runplane-job-run-a-"), "got {upper}");
    assert_eq!(upper.len(), "runplane-job-run-a-".len() + 8);

    let long_one = name(&format!("{}1", "x".repeat(60)));
    let long_two = name(&format!("{}2", "x".repeat(60)));
    assert_ne!(long_one, long_two);
    for n in [&upper, &long_one, &long_two] {
        assert!(n.len() <= 63, "{n} is too long");
        assert_eq!(&sanitize_name(n), n);
    }
}

#[test]
fn rendered_object_serialises_without_a_variant_tag() -> TestResult {
    let object = ClusterObject::ConfigMap(ConfigMap {
        metadata: ObjectMeta {
            name: Some("settings".to_string()),
            ..Default::default()
        },
        ..Default::default()
    });

    let rendered = serde_json::to_value(&object)?;
    assert_eq!(rendered["metadata"]["name"], json!("settings"));
    assert!(rendered.get("ConfigMap").is_none(), "got {rendered}");
    Ok(())
}

#[tokio::test]
async fn object_of_another_runnable_is_not_adopted() -> TestResult {
    init_tracing();

    let cluster = InMemoryCluster::new();
    let registry = frameworks(&cluster);
    let mine = runnable("r2", RunnableBody::Job { backoff_limit: None });
    let framework = registry.for_runnable(&mine)?;

    let mut foreign = framework.build(&mine)?.remove(0);
    foreign
        .metadata_mut()
        .labels
        .get_or_insert_default()
        .insert(LABEL_RUNNABLE.to_string(), "someone-else".to_string());
    let foreign = cluster.create(foreign).await?;

    let err = framework.run(mine).await.unwrap_err();
    assert!(err.to_string().contains("belongs to another runnable"), "got {err}");
    assert_eq!(cluster.object(&foreign.key()), Some(foreign));

    // Its own object is still adopted on a retried dispatch.
    let own = runnable("r3", RunnableBody::Job { backoff_limit: None });
    framework.run(own.clone()).await?;
    let again = framework.run(own).await?;
    assert_eq!(again.state, RunnableState::Running);
    assert_eq!(cluster.calls("create"), 2);
    Ok(())
}

/// Answers every `get` with a config map, whatever kind was asked for.
#[derive(Debug)]
struct MismatchedCluster(InMemoryCluster);

impl ClusterClient for MismatchedCluster {
    fn create<'a>(&'a self, object: ClusterObject) -> BoxFuture<'a, Result<ClusterObject, ClusterError>> {
        self.0.create(object)
    }

    fn get<'a>(&'a self, key: &'a ObjectKey) -> BoxFuture<'a, Result<Option<ClusterObject>, ClusterError>> {
        Box::pin(async move {
            Ok(Some(ClusterObject::ConfigMap(ConfigMap {
                metadata: ObjectMeta {
                    name: Some(key.name.clone()),
                    namespace: Some(key.namespace.clone()),
                    ..Default::default()
                },
                ..Default::default()
            })))
        })
    }

    fn replace<'a>(&'a self, object: ClusterObject) -> BoxFuture<'a, Result<ClusterObject, ClusterError>> {
        self.0.replace(object)
    }

    fn delete<'a>(&'a self, key: &'a ObjectKey) -> BoxFuture<'a, Result<bool, ClusterError>> {
        self.0.delete(key)
    }

    fn logs<'a>(&'a self, key: &'a ObjectKey) -> BoxFuture<'a, Result<Option<String>, ClusterError>> {
        self.0.logs(key)
    }
}

#[tokio::test]
async fn refresh_reports_an_unexpected_object_kind() -> TestResult {
    init_tracing();

    let cluster = Arc::new(MismatchedCluster(InMemoryCluster::new()));
    let registry = FrameworkRegistry::standard(cluster, FrameworkSettings::default());

    let mut job = runnable("r1", RunnableBody::Job { backoff_limit: None });
    job.state = RunnableState::Running;
    let err = registry.for_runnable(&job)?.refresh(job).await.unwrap_err();
    assert!(err.to_string().contains("resolved to a ConfigMap object"), "got {err}");

    let mut workflow = runnable(
        "wf1",
        RunnableBody::CustomResource {
            api_version: "argoproj.io/v1alpha1".to_string(),
            kind: "Workflow".to_string(),
            spec: json!({ "entrypoint": "main" }),
        },
    );
    workflow.state = RunnableState::Running;
    let err = registry.for_runnable(&workflow)?.refresh(workflow).await.unwrap_err();
    assert!(err.to_string().contains("resolved to a ConfigMap object"), "got {err}");
    Ok(())
}
