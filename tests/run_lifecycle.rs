// tests/run_lifecycle.rs

use std::collections::BTreeMap;
use std::error::Error;
use std::sync::Arc;

use tokio::sync::mpsc;

use runplane::dispatch::dispatch_channel;
use runplane::entities::{
    Configuration, Credentials, InMemoryEntities, StaticConfigurations, StaticCredentials,
};
use runplane::errors::EngineError;
use runplane::run::{Run, RunLifecycle, TransitionOutput};
use runplane::runnable::{InMemoryRunnableStore, Runnable, RunnableBody, RunnableStore};
use runplane::runtime::{RuntimeBase, RuntimeRegistry, RuntimeSettings};
use runplane::types::{Event, RunnableState, State};
use runplane_test_utils::builders::{FunctionBuilder, RunBuilder, TaskBuilder};
use runplane_test_utils::init_tracing;

type TestResult = Result<(), Box<dyn Error>>;

struct Harness {
    lifecycle: RunLifecycle,
    entities: Arc<InMemoryEntities>,
    store: Arc<InMemoryRunnableStore>,
    queue: mpsc::Receiver<Runnable>,
}

fn harness(credentials: StaticCredentials, configurations: StaticConfigurations) -> Result<Harness, EngineError> {
    let store = Arc::new(InMemoryRunnableStore::new());
    let base = RuntimeBase::new(store.clone());
    let runtimes = RuntimeRegistry::standard(base, RuntimeSettings::default())?;
    let entities = Arc::new(InMemoryEntities::new());
    let (queue, rx) = dispatch_channel(8);
    let lifecycle = RunLifecycle::new(
        Arc::new(runtimes),
        entities.clone(),
        Arc::new(credentials),
        Arc::new(configurations),
        store.clone(),
        queue,
    )?;
    Ok(Harness {
        lifecycle,
        entities,
        store,
        queue: rx,
    })
}

fn plain() -> Result<Harness, EngineError> {
    harness(StaticCredentials::new(), StaticConfigurations::default())
}

fn register_container_job(entities: &InMemoryEntities, id: &str) {
    entities.insert_task(
        TaskBuilder::new(&format!("task-{id}"), "container+job", &format!("fn-{id}"))
            .env("MODE", "task")
            .env("LEVEL", "1")
            .secret("db")
            .build(),
    );
    entities.insert_function(FunctionBuilder::container(&format!("fn-{id}"), "busybox:1.36").build());
}

async fn built(h: &Harness, run: &mut Run) -> Result<(), EngineError> {
    h.lifecycle.transition(run, Event::Build, None).await?;
    Ok(())
}

#[tokio::test]
async fn build_merges_task_defaults_and_snapshots_the_function() -> TestResult {
    init_tracing();

    let h = plain()?;
    register_container_job(&h.entities, "r1");
    let mut run = RunBuilder::new("r1", "container+job").env("MODE", "run").build();

    let (to, output) = h.lifecycle.transition(&mut run, Event::Build, None).await?;

    assert_eq!(to, State::Built);
    assert_eq!(run.state(), State::Built);
    assert!(matches!(output, Some(TransitionOutput::Spec(_))));

    let envs: Vec<(&str, &str)> = run
        .spec
        .k8s
        .envs
        .iter()
        .map(|e| (e.name.as_str(), e.value.as_str()))
        .collect();
    assert_eq!(envs, vec![("LEVEL", "1"), ("MODE", "run")]);
    assert_eq!(run.spec.k8s.secrets, vec!["db".to_string()]);

    let snapshot = run.spec.executable.as_ref().ok_or("no snapshot")?;
    assert_eq!(snapshot.id, "fn-r1");
    assert_eq!(snapshot.kind, "container");
    assert_eq!(snapshot.spec["image"], "busybox:1.36");
    Ok(())
}

#[tokio::test]
async fn build_with_missing_task_fails_and_keeps_run_created() -> TestResult {
    init_tracing();

    let h = plain()?;
    let mut run = RunBuilder::new("r1", "container+job").build();

    let err = h.lifecycle.transition(&mut run, Event::Build, None).await.unwrap_err();

    assert!(matches!(err, EngineError::NotFound(_)), "got {err:?}");
    assert_eq!(run.state(), State::Created);
    assert!(run.spec.executable.is_none());
    Ok(())
}

#[tokio::test]
async fn build_rejects_task_of_another_kind() -> TestResult {
    init_tracing();

    let h = plain()?;
    h.entities
        .insert_task(TaskBuilder::new("task-r1", "container+serve", "fn-r1").build());
    h.entities
        .insert_function(FunctionBuilder::container("fn-r1", "nginx").build());
    let mut run = RunBuilder::new("r1", "container+job").build();

    let err = h.lifecycle.transition(&mut run, Event::Build, None).await.unwrap_err();

    assert!(matches!(err, EngineError::InvalidArgument(_)), "got {err:?}");
    assert_eq!(run.state(), State::Created);
    Ok(())
}

#[tokio::test]
async fn build_rejects_executable_of_another_runtime() -> TestResult {
    init_tracing();

    let h = plain()?;
    h.entities
        .insert_task(TaskBuilder::new("task-r1", "container+job", "fn-r1").build());
    h.entities
        .insert_function(FunctionBuilder::python("fn-r1", "print('hi')").build());
    let mut run = RunBuilder::new("r1", "container+job").build();

    let err = h.lifecycle.transition(&mut run, Event::Build, None).await.unwrap_err();

    assert!(matches!(err, EngineError::InvalidArgument(_)), "got {err:?}");
    Ok(())
}

#[tokio::test]
async fn unknown_run_kind_is_rejected() -> TestResult {
    init_tracing();

    let h = plain()?;
    let mut run = RunBuilder::new("r1", "container+teleport").build();
    let err = h.lifecycle.transition(&mut run, Event::Build, None).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidArgument(_)), "got {err:?}");

    let mut run = RunBuilder::new("r2", "fortran+job").build();
    let err = h.lifecycle.transition(&mut run, Event::Build, None).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)), "got {err:?}");
    Ok(())
}

#[tokio::test]
async fn run_enqueues_a_ready_runnable_with_injected_credentials() -> TestResult {
    init_tracing();

    let credentials = StaticCredentials::new().with(
        "alice",
        Credentials {
            provider: "registry".to_string(),
            values: BTreeMap::from([("token".to_string(), "s3cret".to_string())]),
        },
    );
    let configurations = StaticConfigurations::new(vec![Configuration {
        provider: "tracking".to_string(),
        values: BTreeMap::from([("endpoint".to_string(), "http://tracker".to_string())]),
    }]);
    let mut h = harness(credentials, configurations)?;
    register_container_job(&h.entities, "r1");
    let mut run = RunBuilder::new("r1", "container+job")
        .user("alice")
        .parameter("epochs", serde_json::json!(3))
        .build();

    built(&h, &mut run).await?;
    let (to, output) = h.lifecycle.transition(&mut run, Event::Run, None).await?;

    assert_eq!(to, State::Ready);
    let queued = h.queue.try_recv()?;
    assert_eq!(Some(TransitionOutput::Runnable(queued.clone())), output);

    assert_eq!(queued.id, "r1");
    assert_eq!(queued.state, RunnableState::Ready);
    assert!(matches!(queued.body, RunnableBody::Job { .. }));
    assert_eq!(queued.credentials.len(), 1);
    assert_eq!(queued.credentials[0].provider, "registry");
    assert_eq!(queued.configurations.len(), 1);

    let container = queued.container.as_ref().ok_or("no container")?;
    assert_eq!(container.image, "busybox:1.36");
    assert!(
        container
            .envs
            .iter()
            .any(|e| e.name == "RUNPLANE_PARAMETERS" && e.value.contains("epochs"))
    );
    Ok(())
}

#[tokio::test]
async fn scheduled_task_produces_a_cron_job() -> TestResult {
    init_tracing();

    let mut h = plain()?;
    h.entities.insert_task(
        TaskBuilder::new("task-r1", "container+job", "fn-r1")
            .schedule("*/5 * * * *")
            .build(),
    );
    h.entities
        .insert_function(FunctionBuilder::container("fn-r1", "busybox").build());
    let mut run = RunBuilder::new("r1", "container+job").build();

    built(&h, &mut run).await?;
    h.lifecycle.transition(&mut run, Event::Run, None).await?;

    let queued = h.queue.try_recv()?;
    match queued.body {
        RunnableBody::CronJob { schedule, .. } => assert_eq!(schedule, "*/5 * * * *"),
        other => panic!("expected a cron job, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn spec_is_frozen_after_build_except_labels() -> TestResult {
    init_tracing();

    let h = plain()?;
    register_container_job(&h.entities, "r1");
    let mut run = RunBuilder::new("r1", "container+job").build();
    built(&h, &mut run).await?;

    let mut relabelled = run.spec.clone();
    relabelled.labels.insert("team".to_string(), "ml".to_string());
    run.update_spec(relabelled)?;
    assert_eq!(run.spec.labels.get("team").map(String::as_str), Some("ml"));

    let mut changed = run.spec.clone();
    changed.task = "task-other".to_string();
    let err = run.update_spec(changed).unwrap_err();
    assert!(matches!(err, EngineError::InvalidArgument(_)));
    assert_eq!(run.spec.task, "task-r1");
    Ok(())
}

#[tokio::test]
async fn run_records_the_ready_runnable_before_queueing_it() -> TestResult {
    init_tracing();

    let mut h = plain()?;
    register_container_job(&h.entities, "r1");
    let mut run = RunBuilder::new("r1", "container+job").build();
    built(&h, &mut run).await?;

    h.lifecycle.transition(&mut run, Event::Run, None).await?;

    let queued = h.queue.try_recv()?;
    let stored = h.store.find("r1")?.ok_or("runnable not stored")?;
    assert_eq!(stored, queued);
    assert_eq!(stored.state, RunnableState::Ready);

    // A stop issued before dispatch targets the recorded runnable.
    h.lifecycle.transition(&mut run, Event::Stop, None).await?;
    assert_eq!(run.state(), State::Stop);
    assert_eq!(h.queue.try_recv()?.state, RunnableState::Stop);
    assert_eq!(h.store.find("r1")?.map(|r| r.state), Some(RunnableState::Ready));
    Ok(())
}

#[tokio::test]
async fn stop_without_a_stored_runnable_fails_and_keeps_state() -> TestResult {
    init_tracing();

    let mut h = plain()?;
    register_container_job(&h.entities, "r1");
    let mut run = RunBuilder::new("r1", "container+job").build();
    built(&h, &mut run).await?;
    h.lifecycle.transition(&mut run, Event::Run, None).await?;
    let _ = h.queue.try_recv()?;
    h.store.remove("r1")?;

    let err = h.lifecycle.transition(&mut run, Event::Stop, None).await.unwrap_err();

    assert!(matches!(err, EngineError::NotFound(_)), "got {err:?}");
    assert_eq!(run.state(), State::Ready);
    Ok(())
}

#[tokio::test]
async fn stop_and_delete_enqueue_requests_for_the_stored_runnable() -> TestResult {
    init_tracing();

    let mut h = plain()?;
    register_container_job(&h.entities, "r1");
    let mut run = RunBuilder::new("r1", "container+job").build();
    built(&h, &mut run).await?;
    h.lifecycle.transition(&mut run, Event::Run, None).await?;
    let mut runnable = h.queue.try_recv()?;
    runnable.transition_to(RunnableState::Running, None);
    h.store.store(&runnable.id, &runnable)?;
    h.lifecycle.transition(&mut run, Event::Execute, Some(runnable)).await?;

    h.lifecycle.transition(&mut run, Event::Stop, None).await?;
    assert_eq!(run.state(), State::Stop);
    assert_eq!(h.queue.try_recv()?.state, RunnableState::Stop);

    h.lifecycle.transition(&mut run, Event::Deleting, None).await?;
    assert_eq!(run.state(), State::Deleting);
    assert_eq!(h.queue.try_recv()?.state, RunnableState::Deleting);
    Ok(())
}

#[tokio::test]
async fn resume_is_rejected_for_plain_jobs() -> TestResult {
    init_tracing();

    let mut h = plain()?;
    register_container_job(&h.entities, "r1");
    let mut run = RunBuilder::new("r1", "container+job").build();
    built(&h, &mut run).await?;
    h.lifecycle.transition(&mut run, Event::Run, None).await?;

    let mut stopped = h.queue.try_recv()?;
    stopped.transition_to(RunnableState::Stopped, None);
    h.store.store("r1", &stopped)?;
    run.status.state = State::Stopped;

    let err = h.lifecycle.transition(&mut run, Event::Resume, None).await.unwrap_err();

    assert!(matches!(err, EngineError::InvalidArgument(_)), "got {err:?}");
    assert_eq!(run.state(), State::Stopped);
    assert!(h.queue.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn deleting_a_run_that_never_deployed_enqueues_nothing() -> TestResult {
    init_tracing();

    let mut h = plain()?;
    let mut run = RunBuilder::new("r1", "container+job").build();
    run.status.state = State::Completed;

    let (to, output) = h.lifecycle.transition(&mut run, Event::Deleting, None).await?;
    assert_eq!(to, State::Deleting);
    assert!(output.is_none());
    assert!(h.queue.try_recv().is_err());

    let (to, _) = h.lifecycle.transition(&mut run, Event::Deleting, None).await?;
    assert_eq!(to, State::Deleted);
    Ok(())
}

#[tokio::test]
async fn completion_merges_logs_and_results_into_status() -> TestResult {
    init_tracing();

    let mut h = plain()?;
    register_container_job(&h.entities, "r1");
    let mut run = RunBuilder::new("r1", "container+job").build();
    built(&h, &mut run).await?;
    h.lifecycle.transition(&mut run, Event::Run, None).await?;
    let mut runnable = h.queue.try_recv()?;

    runnable.transition_to(RunnableState::Running, Some("job submitted".to_string()));
    h.lifecycle
        .transition(&mut run, Event::Execute, Some(runnable.clone()))
        .await?;
    assert_eq!(run.status.message.as_deref(), Some("job submitted"));

    runnable.results.insert("accuracy".to_string(), serde_json::json!(0.93));
    runnable.logs = Some("epoch 1\nepoch 2\n".to_string());
    runnable.transition_to(RunnableState::Completed, Some("done".to_string()));
    h.lifecycle
        .transition(&mut run, Event::Complete, Some(runnable))
        .await?;

    assert_eq!(run.state(), State::Completed);
    assert_eq!(run.status.message.as_deref(), Some("done"));
    assert_eq!(run.status.extra["logs"], "epoch 1\nepoch 2\n");
    assert_eq!(run.status.extra["results"]["accuracy"], 0.93);
    Ok(())
}
