// tests/dispatch.rs

use std::collections::BTreeMap;
use std::error::Error;
use std::sync::Arc;

use runplane::cluster::{ClusterErrorKind, InMemoryCluster, ObjectKey, ObjectKind};
use runplane::dispatch::{DispatchListener, EventBus, RunnableChanged, dispatch_channel};
use runplane::entities::{InMemoryEntities, StaticConfigurations, StaticCredentials};
use runplane::errors::{EngineError, Result as EngineResult};
use runplane::framework::{FrameworkRegistry, FrameworkSettings};
use runplane::monitor::Monitor;
use runplane::run::{RunLifecycle, event_for_change};
use runplane::runnable::{
    ContainerSpec, InMemoryRunnableStore, KeyedLocks, Runnable, RunnableBody, RunnableStore,
};
use runplane::runtime::{RuntimeBase, RuntimeRegistry, RuntimeSettings};
use runplane::types::{Event, RunnableState, State};
use runplane_test_utils::builders::{FunctionBuilder, PROJECT, RunBuilder, TaskBuilder};
use runplane_test_utils::{FlakyCluster, Fixture, init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn job(id: &str, state: RunnableState) -> Runnable {
    Runnable {
        id: id.to_string(),
        project: PROJECT.to_string(),
        runtime: "container".to_string(),
        task: "container+job".to_string(),
        user: None,
        container: Some(ContainerSpec {
            image: "busybox".to_string(),
            ..Default::default()
        }),
        body: RunnableBody::Job { backoff_limit: None },
        state,
        message: None,
        error: None,
        results: BTreeMap::new(),
        logs: None,
        credentials: Vec::new(),
        configurations: Vec::new(),
    }
}

fn job_key(id: &str) -> ObjectKey {
    ObjectKey::new(ObjectKind::Job, "default", format!("runplane-job-{id}"))
}

struct Listener {
    listener: DispatchListener,
    frameworks: Arc<FrameworkRegistry>,
    store: Arc<InMemoryRunnableStore>,
    locks: KeyedLocks,
    events: EventBus,
}

impl Listener {
    /// Record `runnable` the way the lifecycle does before queueing it.
    fn queued(&self, runnable: Runnable) -> EngineResult<Runnable> {
        self.store.store(&runnable.id, &runnable)?;
        Ok(runnable)
    }

    /// A request for the stored runnable `id`.
    fn request(&self, id: &str, state: RunnableState) -> Result<Runnable, Box<dyn Error>> {
        let mut runnable = self.store.find(id)?.ok_or("runnable missing")?;
        runnable.transition_to(state, None);
        Ok(runnable)
    }

    fn monitor(&self) -> Monitor {
        Monitor::new(
            Arc::clone(&self.frameworks),
            self.store.clone(),
            self.locks.clone(),
            self.events.clone(),
        )
    }
}

fn listener(cluster: FlakyCluster) -> Listener {
    let store = Arc::new(InMemoryRunnableStore::new());
    let events = EventBus::new(16);
    let locks = KeyedLocks::new();
    let frameworks = Arc::new(FrameworkRegistry::standard(Arc::new(cluster), FrameworkSettings::default()));
    let listener = DispatchListener::new(
        Arc::clone(&frameworks),
        store.clone(),
        locks.clone(),
        events.clone(),
        2,
    );
    Listener {
        listener,
        frameworks,
        store,
        locks,
        events,
    }
}

/// Refuses every write.
#[derive(Debug, Default)]
struct ReadOnlyStore(InMemoryRunnableStore);

impl RunnableStore for ReadOnlyStore {
    fn store(&self, _id: &str, _runnable: &Runnable) -> EngineResult<()> {
        Err(std::io::Error::other("store is read-only").into())
    }

    fn find(&self, id: &str) -> EngineResult<Option<Runnable>> {
        self.0.find(id)
    }

    fn find_all(&self) -> EngineResult<Vec<Runnable>> {
        self.0.find_all()
    }

    fn remove(&self, id: &str) -> EngineResult<Option<Runnable>> {
        self.0.remove(id)
    }
}

#[tokio::test]
async fn states_without_a_request_are_ignored() -> TestResult {
    init_tracing();

    let cluster = FlakyCluster::new(InMemoryCluster::new());
    let l = listener(cluster.clone());
    let mut events = l.events.subscribe();

    for state in [RunnableState::Running, RunnableState::Completed, RunnableState::Stopped] {
        assert!(l.listener.process(job("r1", state)).await.is_none());
    }

    assert!(l.store.find_all()?.is_empty());
    assert!(events.try_recv().is_err());
    assert_eq!(cluster.inner().calls("create"), 0);
    Ok(())
}

#[tokio::test]
async fn ready_runnable_is_deployed_stored_and_announced() -> TestResult {
    init_tracing();

    let cluster = FlakyCluster::new(InMemoryCluster::new());
    let l = listener(cluster.clone());
    let mut events = l.events.subscribe();

    let ready = l.queued(job("r1", RunnableState::Ready))?;
    let change = l.listener.process(ready).await.ok_or("no change")?;

    assert_eq!(change.previous_state, RunnableState::Ready);
    assert_eq!(change.new_state, RunnableState::Running);
    assert_eq!(events.try_recv()?, change);
    assert_eq!(l.store.find("r1")?.map(|r| r.state), Some(RunnableState::Running));
    assert_eq!(cluster.inner().calls("create"), 1);
    Ok(())
}

#[tokio::test]
async fn backend_failure_turns_the_runnable_into_an_error() -> TestResult {
    init_tracing();

    let cluster = FlakyCluster::new(InMemoryCluster::new());
    cluster.fail_on("create", "", ClusterErrorKind::Unavailable);
    let l = listener(cluster);

    let ready = l.queued(job("r1", RunnableState::Ready))?;
    let change = l.listener.process(ready).await.ok_or("no change")?;

    assert_eq!(change.new_state, RunnableState::Error);
    let stored = l.store.find("r1")?.ok_or("runnable missing")?;
    assert_eq!(stored.state, RunnableState::Error);
    let error = stored.error.ok_or("no error detail")?;
    assert_eq!(error.code, "Unavailable");
    assert!(error.description.contains("injected create failure"), "got {error}");
    Ok(())
}

#[tokio::test]
async fn spawned_listener_drains_until_shutdown() -> TestResult {
    init_tracing();

    let cluster = FlakyCluster::new(InMemoryCluster::new());
    let l = listener(cluster.clone());
    let (queue, rx) = dispatch_channel(2);
    let handle = l.listener.clone().spawn(rx);

    for i in 0..5 {
        queue.submit(l.queued(job(&format!("r{i}"), RunnableState::Ready))?).await?;
    }
    handle.shutdown().await;

    assert_eq!(l.store.find_by_state(RunnableState::Running)?.len(), 5);
    assert_eq!(cluster.inner().calls("create"), 5);

    let err = queue.submit(job("late", RunnableState::Ready)).await.unwrap_err();
    assert!(matches!(err, EngineError::QueueClosed), "got {err:?}");
    Ok(())
}

#[tokio::test]
async fn ready_request_for_a_forgotten_runnable_is_dropped() -> TestResult {
    init_tracing();

    let cluster = FlakyCluster::new(InMemoryCluster::new());
    let l = listener(cluster.clone());

    assert!(l.listener.process(job("r1", RunnableState::Ready)).await.is_none());

    assert!(l.store.find("r1")?.is_none());
    assert_eq!(cluster.inner().calls("create"), 0);
    Ok(())
}

#[tokio::test]
async fn queued_stop_does_not_overwrite_a_completion() -> TestResult {
    init_tracing();

    let cluster = FlakyCluster::new(InMemoryCluster::new());
    let l = listener(cluster.clone());
    let ready = l.queued(job("r1", RunnableState::Ready))?;
    l.listener.process(ready).await.ok_or("not dispatched")?;

    // Stop is requested, but the job finishes before the request is handled.
    let stop = l.request("r1", RunnableState::Stop)?;
    cluster.inner().set_logs(&job_key("r1"), "important output");
    assert!(cluster.inner().complete_job("default", "runplane-job-r1"));
    let report = l.monitor().monitor_all().await?;
    assert_eq!(report.changed, 1);

    let mut events = l.events.subscribe();
    assert!(l.listener.process(stop).await.is_none());

    let stored = l.store.find("r1")?.ok_or("runnable missing")?;
    assert_eq!(stored.state, RunnableState::Completed);
    assert_eq!(stored.logs.as_deref(), Some("important output"));
    assert!(cluster.inner().object(&job_key("r1")).is_some());
    assert!(events.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn stop_and_resume_follow_the_stored_state() -> TestResult {
    init_tracing();

    let cluster = FlakyCluster::new(InMemoryCluster::new());
    let l = listener(cluster.clone());
    let ready = l.queued(job("r1", RunnableState::Ready))?;
    l.listener.process(ready).await.ok_or("not dispatched")?;

    // Resume only applies to a stopped runnable.
    let early_resume = l.request("r1", RunnableState::Resume)?;
    assert!(l.listener.process(early_resume).await.is_none());
    assert_eq!(l.store.find("r1")?.map(|r| r.state), Some(RunnableState::Running));

    let stop = l.request("r1", RunnableState::Stop)?;
    let change = l.listener.process(stop).await.ok_or("stop dropped")?;
    assert_eq!(change.new_state, RunnableState::Stopped);
    assert!(cluster.inner().object(&job_key("r1")).is_none());

    // A second stop finds the runnable already stopped.
    let again = l.request("r1", RunnableState::Stop)?;
    assert!(l.listener.process(again).await.is_none());
    Ok(())
}

#[tokio::test]
async fn stop_before_dispatch_cancels_the_queued_run() -> TestResult {
    init_tracing();

    let cluster = FlakyCluster::new(InMemoryCluster::new());
    let l = listener(cluster.clone());
    let ready = l.queued(job("r1", RunnableState::Ready))?;
    let stop = l.request("r1", RunnableState::Stop)?;

    let change = l.listener.process(stop).await.ok_or("stop dropped")?;
    assert_eq!(change.new_state, RunnableState::Stopped);

    assert!(l.listener.process(ready).await.is_none());
    assert_eq!(l.store.find("r1")?.map(|r| r.state), Some(RunnableState::Stopped));
    assert_eq!(cluster.inner().calls("create"), 0);
    Ok(())
}

#[tokio::test]
async fn refresh_before_dispatch_leaves_the_request_alone() -> TestResult {
    init_tracing();

    let cluster = FlakyCluster::new(InMemoryCluster::new());
    let l = listener(cluster.clone());
    let ready = l.queued(job("r1", RunnableState::Ready))?;

    let refreshed = l.monitor().refresh("r1").await?.ok_or("runnable missing")?;
    assert_eq!(refreshed.state, RunnableState::Ready);
    assert_eq!(cluster.inner().calls("get"), 0);

    let change = l.listener.process(ready).await.ok_or("not dispatched")?;
    assert_eq!(change.new_state, RunnableState::Running);
    Ok(())
}

#[tokio::test]
async fn deleting_a_run_before_dispatch_leaves_nothing_behind() -> TestResult {
    init_tracing();

    let cluster = FlakyCluster::new(InMemoryCluster::new());
    let l = listener(cluster.clone());

    let entities = Arc::new(InMemoryEntities::new());
    entities.insert_task(TaskBuilder::new("task-r1", "container+job", "fn-r1").build());
    entities.insert_function(FunctionBuilder::container("fn-r1", "busybox").build());
    let runtimes = RuntimeRegistry::standard(RuntimeBase::new(l.store.clone()), RuntimeSettings::default())?;
    let (queue, mut rx) = dispatch_channel(8);
    let lifecycle = RunLifecycle::new(
        Arc::new(runtimes),
        entities,
        Arc::new(StaticCredentials::new()),
        Arc::new(StaticConfigurations::default()),
        l.store.clone(),
        queue,
    )?;

    let mut run = RunBuilder::new("r1", "container+job").task("task-r1").build();
    lifecycle.transition(&mut run, Event::Build, None).await?;
    lifecycle.transition(&mut run, Event::Run, None).await?;
    assert_eq!(l.store.find("r1")?.map(|r| r.state), Some(RunnableState::Ready));

    // Both delete steps happen while the READY request still waits.
    lifecycle.transition(&mut run, Event::Deleting, None).await?;
    lifecycle.transition(&mut run, Event::Deleting, None).await?;
    assert_eq!(run.state(), State::Deleted);

    let mut handled = 0;
    while let Ok(request) = rx.try_recv() {
        assert!(l.listener.process(request).await.is_none());
        handled += 1;
    }
    assert_eq!(handled, 2);

    assert_eq!(cluster.inner().calls("create"), 0);
    assert!(cluster.inner().objects().is_empty());
    assert!(l.store.find("r1")?.is_none());
    Ok(())
}

#[tokio::test]
async fn unpersisted_outcome_is_not_announced() -> TestResult {
    init_tracing();

    let cluster = InMemoryCluster::new();
    let ready = job("r1", RunnableState::Ready);
    let store = ReadOnlyStore::default();
    store.0.store("r1", &ready)?;

    let events = EventBus::new(4);
    let mut rx = events.subscribe();
    let listener = DispatchListener::new(
        Arc::new(FrameworkRegistry::standard(Arc::new(cluster), FrameworkSettings::default())),
        Arc::new(store),
        KeyedLocks::new(),
        events,
        1,
    );

    assert!(listener.process(ready).await.is_none());
    assert!(rx.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn failed_deployment_moves_the_run_to_error() -> TestResult {
    init_tracing();

    let flaky = FlakyCluster::new(InMemoryCluster::new());
    flaky.fail_on("create", "job-r1", ClusterErrorKind::Unavailable);
    let fx = Fixture::builder().flaky(flaky).start().await;

    let run = fx.container_job("r1", "busybox");
    fx.engine.launch(&run).await?;

    let run = fx.wait_for_run("r1", State::Error).await;
    assert_eq!(run.status.extra["error"]["code"], "Unavailable");
    assert!(fx.cluster.objects().is_empty());

    fx.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn every_processed_runnable_reaches_subscribers() -> TestResult {
    init_tracing();

    let fx = Fixture::start().await;
    let mut first = fx.engine.subscribe();
    let mut second = fx.engine.subscribe();

    fx.engine.launch(&fx.container_job("r1", "busybox")).await?;

    for rx in [&mut first, &mut second] {
        let change = with_timeout(rx.recv()).await?;
        assert_eq!(change.runnable_id, "r1");
        assert_eq!(change.new_state, RunnableState::Running);
    }

    fx.shutdown().await;
    Ok(())
}

#[test]
fn changes_map_to_run_events() {
    let change = |state| RunnableChanged::new(RunnableState::Ready, job("r1", state));

    let cases = [
        (State::Ready, RunnableState::Running, Some(Event::Execute)),
        (State::Running, RunnableState::Running, Some(Event::Loop)),
        (State::Completed, RunnableState::Running, None),
        (State::Running, RunnableState::Pending, Some(Event::Pending)),
        (State::Running, RunnableState::Completed, Some(Event::Complete)),
        (State::Running, RunnableState::Error, Some(Event::Error)),
        (State::Stop, RunnableState::Stopped, Some(Event::Stopped)),
        (State::Deleting, RunnableState::Deleted, Some(Event::Deleting)),
        (State::Ready, RunnableState::Ready, None),
        (State::Stop, RunnableState::Stop, None),
        (State::Stopped, RunnableState::Resume, None),
        (State::Deleting, RunnableState::Deleting, None),
    ];

    for (current, observed, expected) in cases {
        assert_eq!(
            event_for_change(current, &change(observed)),
            expected,
            "{current} + runnable {observed}"
        );
    }
}
