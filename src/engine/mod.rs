// src/engine/mod.rs

//! Wires every component into one running engine.
//!
//! ```text
//!   RunLifecycle ──runnable──▶ DispatchQueue ──▶ DispatchListener ──┐
//!        ▲                                                          │
//!        │                                Monitor (periodic) ───────┤
//!   RunStatusSync ◀──────────── EventBus ◀──── RunnableChanged ◀────┘
//! ```
//!
//! [`EngineBuilder::start`] spawns the listener, the status sync and
//! (unless disabled) the monitor. [`Engine::shutdown`] stops them in
//! reverse order, letting queued dispatches finish.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cluster::ClusterClient;
use crate::config::EngineConfig;
use crate::dispatch::{DispatchListener, EventBus, ListenerHandle, RunnableChanged, dispatch_channel};
use crate::entities::{
    ConfigurationProvider, CredentialsProvider, EntityProvider, InMemoryEntities, InMemoryRunRepository,
    RunRepository, StaticConfigurations, StaticCredentials,
};
use crate::errors::{EngineError, Result};
use crate::framework::FrameworkRegistry;
use crate::monitor::{CycleReport, Monitor, MonitorHandle};
use crate::run::{Run, RunLifecycle, RunStatusSync};
use crate::runnable::{FileRunnableStore, InMemoryRunnableStore, KeyedLocks, Runnable, RunnableStore};
use crate::runtime::{RuntimeBase, RuntimeRegistry};
use crate::types::{Event, State, StoreMode};

/// Collects collaborators; anything left unset gets an in-memory default.
#[derive(Debug)]
pub struct EngineBuilder {
    config: EngineConfig,
    cluster: Option<Arc<dyn ClusterClient>>,
    entities: Option<Arc<dyn EntityProvider>>,
    credentials: Option<Arc<dyn CredentialsProvider>>,
    configurations: Option<Arc<dyn ConfigurationProvider>>,
    runs: Option<Arc<dyn RunRepository>>,
    store: Option<Arc<dyn RunnableStore>>,
    monitor: bool,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            cluster: None,
            entities: None,
            credentials: None,
            configurations: None,
            runs: None,
            store: None,
            monitor: true,
        }
    }

    pub fn cluster(mut self, cluster: Arc<dyn ClusterClient>) -> Self {
        self.cluster = Some(cluster);
        self
    }

    pub fn entities(mut self, entities: Arc<dyn EntityProvider>) -> Self {
        self.entities = Some(entities);
        self
    }

    pub fn credentials(mut self, credentials: Arc<dyn CredentialsProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn configurations(mut self, configurations: Arc<dyn ConfigurationProvider>) -> Self {
        self.configurations = Some(configurations);
        self
    }

    pub fn runs(mut self, runs: Arc<dyn RunRepository>) -> Self {
        self.runs = Some(runs);
        self
    }

    /// Overrides `[store]` from the config.
    pub fn store(mut self, store: Arc<dyn RunnableStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Whether to run the periodic monitor. Cycles can always be triggered
    /// by hand through [`Engine::monitor_now`].
    pub fn periodic_monitor(mut self, enabled: bool) -> Self {
        self.monitor = enabled;
        self
    }

    fn open_store(&self) -> Result<Arc<dyn RunnableStore>> {
        if let Some(store) = &self.store {
            return Ok(Arc::clone(store));
        }
        Ok(match self.config.store.mode {
            StoreMode::Memory => Arc::new(InMemoryRunnableStore::new()),
            StoreMode::File => Arc::new(FileRunnableStore::new(&self.config.store.path)?),
        })
    }

    async fn connect_cluster(&self) -> Result<Arc<dyn ClusterClient>> {
        if let Some(cluster) = &self.cluster {
            return Ok(Arc::clone(cluster));
        }

        #[cfg(feature = "kube")]
        {
            let client = crate::cluster::KubeClusterClient::try_default().await?;
            info!("connected to cluster");
            Ok(Arc::new(client))
        }

        #[cfg(not(feature = "kube"))]
        {
            warn!("no cluster client configured; using an in-memory cluster");
            Ok(Arc::new(crate::cluster::InMemoryCluster::new()))
        }
    }

    /// Build everything and spawn the background tasks.
    pub async fn start(self) -> Result<Engine> {
        let store = self.open_store()?;
        let cluster = self.connect_cluster().await?;
        let config = self.config;

        let frameworks = Arc::new(FrameworkRegistry::standard(cluster, config.frameworks.clone()));
        let runtimes = Arc::new(RuntimeRegistry::standard(
            RuntimeBase::new(Arc::clone(&store)),
            config.runtimes.clone(),
        )?);

        let (queue, queue_rx) = dispatch_channel(config.engine.dispatch_queue);
        let events = EventBus::new(config.engine.event_buffer);
        let locks = KeyedLocks::new();

        let lifecycle = Arc::new(RunLifecycle::new(
            Arc::clone(&runtimes),
            self.entities.unwrap_or_else(|| Arc::new(InMemoryEntities::new())),
            self.credentials.unwrap_or_else(|| Arc::new(StaticCredentials::new())),
            self.configurations
                .unwrap_or_else(|| Arc::new(StaticConfigurations::default())),
            Arc::clone(&store),
            queue,
        )?);
        let runs = self
            .runs
            .unwrap_or_else(|| Arc::new(InMemoryRunRepository::new()));
        let sync = RunStatusSync::new(Arc::clone(&lifecycle), Arc::clone(&runs), Arc::clone(&store));

        // Subscribe before anything can publish.
        let sync_handle = sync.clone().spawn(events.subscribe());

        let listener = DispatchListener::new(
            Arc::clone(&frameworks),
            Arc::clone(&store),
            locks.clone(),
            events.clone(),
            config.engine.dispatch_workers,
        )
        .spawn(queue_rx);

        let monitor = Arc::new(Monitor::new(
            Arc::clone(&frameworks),
            Arc::clone(&store),
            locks,
            events.clone(),
        ));
        let monitor_handle = self
            .monitor
            .then(|| Arc::clone(&monitor).start(config.engine.monitor_interval));

        info!(
            workers = config.engine.dispatch_workers,
            queue = config.engine.dispatch_queue,
            monitor_interval = ?config.engine.monitor_interval,
            runtimes = ?runtimes.kinds().collect::<Vec<_>>(),
            "engine started"
        );

        Ok(Engine {
            config,
            store,
            runs,
            frameworks,
            runtimes,
            lifecycle,
            sync,
            monitor,
            events,
            listener,
            sync_handle,
            monitor_handle,
        })
    }
}

/// A running engine.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    store: Arc<dyn RunnableStore>,
    runs: Arc<dyn RunRepository>,
    frameworks: Arc<FrameworkRegistry>,
    runtimes: Arc<RuntimeRegistry>,
    lifecycle: Arc<RunLifecycle>,
    sync: RunStatusSync,
    monitor: Arc<Monitor>,
    events: EventBus,
    listener: ListenerHandle,
    sync_handle: JoinHandle<()>,
    monitor_handle: Option<MonitorHandle>,
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn RunnableStore> {
        &self.store
    }

    pub fn runs(&self) -> &Arc<dyn RunRepository> {
        &self.runs
    }

    pub fn frameworks(&self) -> &Arc<FrameworkRegistry> {
        &self.frameworks
    }

    pub fn runtimes(&self) -> &Arc<RuntimeRegistry> {
        &self.runtimes
    }

    pub fn lifecycle(&self) -> &Arc<RunLifecycle> {
        &self.lifecycle
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunnableChanged> {
        self.events.subscribe()
    }

    /// Register a new Run. It must still be `CREATED`.
    pub fn submit(&self, run: &Run) -> Result<()> {
        if run.state() != State::Created {
            return Err(EngineError::InvalidArgument(format!(
                "run '{}' is {}; only CREATED runs can be submitted",
                run.id,
                run.state()
            )));
        }
        if self.runs.find(&run.id)?.is_some() {
            return Err(EngineError::InvalidArgument(format!(
                "run '{}' already exists",
                run.id
            )));
        }
        self.runs.save(run)
    }

    /// Send `event` to the stored Run `run_id`.
    pub async fn transition(&self, run_id: &str, event: Event) -> Result<Run> {
        self.sync.drive(run_id, event, None).await
    }

    /// Submit, build and run in one go.
    pub async fn launch(&self, run: &Run) -> Result<Run> {
        self.submit(run)?;
        self.transition(&run.id, Event::Build).await?;
        self.transition(&run.id, Event::Run).await
    }

    pub fn run(&self, run_id: &str) -> Result<Option<Run>> {
        self.runs.find(run_id)
    }

    pub fn runnable(&self, run_id: &str) -> Result<Option<Runnable>> {
        self.store.find(run_id)
    }

    /// Re-apply every stored runnable's state to its Run. Returns how many
    /// Runs moved.
    pub async fn reconcile(&self) -> Result<usize> {
        self.sync.reconcile().await
    }

    /// One monitor cycle, now.
    pub async fn monitor_now(&self) -> Result<CycleReport> {
        self.monitor.monitor_all().await
    }

    /// Re-read one runnable from its backend, whatever its state.
    pub async fn refresh(&self, run_id: &str) -> Result<Option<Runnable>> {
        self.monitor.refresh(run_id).await
    }

    /// Stop the monitor, drain the dispatch queue, then stop the sync.
    pub async fn shutdown(self) {
        info!("engine shutting down");
        if let Some(monitor) = self.monitor_handle {
            monitor.stop().await;
        }
        self.listener.shutdown().await;
        self.sync_handle.abort();
        if let Err(e) = self.sync_handle.await {
            if !e.is_cancelled() {
                warn!(error = %e, "run status sync ended abnormally");
            }
        }
        info!("engine stopped");
    }
}
