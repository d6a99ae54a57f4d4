use std::sync::Arc;
use std::time::Duration;

use runplane::cluster::{ClusterClient, InMemoryCluster};
use runplane::config::EngineConfig;
use runplane::engine::Engine;
use runplane::entities::{Function, InMemoryEntities, StaticConfigurations, StaticCredentials, Task};
use runplane::run::Run;
use runplane::runnable::Runnable;
use runplane::types::{RunnableState, State};

use crate::builders::{FunctionBuilder, RunBuilder, TaskBuilder};
use crate::flaky_cluster::FlakyCluster;
use crate::with_timeout;

const POLL: Duration = Duration::from_millis(10);

/// Configures a [`Fixture`].
pub struct FixtureBuilder {
    config: EngineConfig,
    credentials: StaticCredentials,
    configurations: StaticConfigurations,
    flaky: Option<FlakyCluster>,
}

impl FixtureBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn credentials(mut self, credentials: StaticCredentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn configurations(mut self, configurations: StaticConfigurations) -> Self {
        self.configurations = configurations;
        self
    }

    /// Route cluster calls through `flaky`.
    pub fn flaky(mut self, flaky: FlakyCluster) -> Self {
        self.flaky = Some(flaky);
        self
    }

    pub async fn start(self) -> Fixture {
        let (client, cluster): (Arc<dyn ClusterClient>, InMemoryCluster) = match self.flaky {
            Some(flaky) => {
                let inner = flaky.inner().clone();
                (Arc::new(flaky), inner)
            }
            None => {
                let cluster = InMemoryCluster::new();
                (Arc::new(cluster.clone()), cluster)
            }
        };
        let entities = Arc::new(InMemoryEntities::new());

        let engine = Engine::builder(self.config)
            .cluster(client)
            .entities(entities.clone())
            .credentials(Arc::new(self.credentials))
            .configurations(Arc::new(self.configurations))
            .periodic_monitor(false)
            .start()
            .await
            .expect("engine should start");

        Fixture {
            engine,
            cluster,
            entities,
        }
    }
}

/// An engine wired to an in-memory cluster, with the periodic monitor off
/// so tests drive cycles through `engine.monitor_now()`.
pub struct Fixture {
    pub engine: Engine,
    pub cluster: InMemoryCluster,
    pub entities: Arc<InMemoryEntities>,
}

impl Fixture {
    pub fn builder() -> FixtureBuilder {
        let mut config = EngineConfig::default();
        config.frameworks.call_timeout = Duration::from_secs(1);
        FixtureBuilder {
            config,
            credentials: StaticCredentials::new(),
            configurations: StaticConfigurations::default(),
            flaky: None,
        }
    }

    pub async fn start() -> Self {
        Self::builder().start().await
    }

    pub fn namespace(&self) -> &str {
        &self.engine.config().frameworks.namespace
    }

    pub fn register(&self, task: Task, function: Function) {
        self.entities.insert_task(task);
        self.entities.insert_function(function);
    }

    /// Register a `container+job` task/function pair and return its run.
    pub fn container_job(&self, id: &str, image: &str) -> Run {
        let kind = "container+job";
        let function_id = format!("fn-{id}");
        let task_id = format!("task-{id}");
        self.register(
            TaskBuilder::new(&task_id, kind, &function_id).build(),
            FunctionBuilder::container(&function_id, image).build(),
        );
        RunBuilder::new(id, kind).task(&task_id).build()
    }

    /// Poll until the stored run reaches `state`.
    pub async fn wait_for_run(&self, id: &str, state: State) -> Run {
        with_timeout(async {
            loop {
                if let Some(run) = self.engine.run(id).unwrap() {
                    if run.state() == state {
                        return run;
                    }
                }
                tokio::time::sleep(POLL).await;
            }
        })
        .await
    }

    /// Poll until the stored runnable reaches `state`.
    pub async fn wait_for_runnable(&self, id: &str, state: RunnableState) -> Runnable {
        with_timeout(async {
            loop {
                if let Some(runnable) = self.engine.runnable(id).unwrap() {
                    if runnable.state == state {
                        return runnable;
                    }
                }
                tokio::time::sleep(POLL).await;
            }
        })
        .await
    }

    pub async fn shutdown(self) {
        self.engine.shutdown().await;
    }
}
