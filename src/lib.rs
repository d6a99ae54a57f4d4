// src/lib.rs

pub mod cli;
pub mod cluster;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod entities;
pub mod errors;
pub mod framework;
pub mod fsm;
pub mod logging;
pub mod monitor;
pub mod run;
pub mod runnable;
pub mod runtime;
pub mod types;

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::de::DeserializeOwned;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

use crate::cli::{CliArgs, Command, RunInputs};
use crate::cluster::InMemoryCluster;
use crate::config::{EngineConfig, default_config_path, load_and_validate};
use crate::dispatch::dispatch_channel;
use crate::engine::Engine;
use crate::entities::{Function, InMemoryEntities, StaticConfigurations, StaticCredentials, Task, Workflow};
use crate::framework::FrameworkRegistry;
use crate::run::{Run, RunLifecycle, TransitionOutput};
use crate::runnable::{InMemoryRunnableStore, RunnableStore};
use crate::runtime::{RuntimeBase, RuntimeRegistry};
use crate::types::{Event, State};

/// Pause between simulator steps so the listener and the sync catch up.
const SIMULATE_SETTLE: Duration = Duration::from_millis(50);

/// High-level entry point used by `main.rs`.
pub async fn run(args: CliArgs) -> Result<()> {
    let config = resolve_config(&args)?;

    match args.command {
        Command::Check => {
            print_check(&config);
            Ok(())
        }
        Command::Render(inputs) => render(&config, &inputs).await,
        Command::Simulate {
            inputs,
            fail,
            cycles,
        } => simulate(config, &inputs, fail, cycles).await,
    }
}

/// Explicit `--config` must exist; the default location is optional.
fn resolve_config(args: &CliArgs) -> Result<EngineConfig> {
    if let Some(path) = &args.config {
        return load_and_validate(path).with_context(|| format!("loading config {path:?}"));
    }

    let path = default_config_path();
    if path.exists() {
        load_and_validate(&path).with_context(|| format!("loading config {path:?}"))
    } else {
        debug!(path = ?path, "no config file; using defaults");
        Ok(EngineConfig::default())
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = fs::read_to_string(path).with_context(|| format!("reading {path:?}"))?;
    serde_json::from_str(&contents).with_context(|| format!("parsing JSON from {path:?}"))
}

/// Read the input documents into a Run plus the entities it refers to.
fn load_inputs(inputs: &RunInputs) -> Result<(Run, Arc<InMemoryEntities>)> {
    let run: Run = read_json(&inputs.run)?;
    let task: Task = read_json(&inputs.task)?;

    let entities = InMemoryEntities::new();
    match (&inputs.function, &inputs.workflow) {
        (Some(path), _) => entities.insert_function(read_json::<Function>(path)?),
        (None, Some(path)) => entities.insert_workflow(read_json::<Workflow>(path)?),
        (None, None) => bail!("either --function or --workflow is required"),
    }
    entities.insert_task(task);

    if run.state() != State::Created {
        bail!("run '{}' must be CREATED (got {})", run.id, run.state());
    }
    Ok((run, Arc::new(entities)))
}

fn print_check(config: &EngineConfig) {
    let store: Arc<dyn RunnableStore> = Arc::new(InMemoryRunnableStore::new());
    let runtimes = RuntimeRegistry::standard(RuntimeBase::new(store), config.runtimes.clone());
    let frameworks =
        FrameworkRegistry::standard(Arc::new(InMemoryCluster::new()), config.frameworks.clone());

    println!("runplane config OK");
    println!("  engine.dispatch_workers = {}", config.engine.dispatch_workers);
    println!("  engine.dispatch_queue = {}", config.engine.dispatch_queue);
    println!("  engine.monitor_interval = {:?}", config.engine.monitor_interval);
    println!("  engine.cluster_timeout = {:?}", config.engine.cluster_timeout);
    println!("  store = {:?} ({:?})", config.store.mode, config.store.path);
    println!("  cluster.namespace = {}", config.frameworks.namespace);
    println!();

    match runtimes {
        Ok(runtimes) => {
            println!("runtimes:");
            for kind in runtimes.kinds() {
                println!("  - {kind}");
            }
            println!("run kinds: {}", runtimes.run_kinds().join(", "));
        }
        Err(e) => println!("runtimes: unavailable ({e})"),
    }

    let shapes: Vec<String> = frameworks.kinds().iter().map(ToString::to_string).collect();
    println!("frameworks: {}", shapes.join(", "));
}

/// BUILD and RUN offline, then print what the framework would create.
async fn render(config: &EngineConfig, inputs: &RunInputs) -> Result<()> {
    let (mut run, entities) = load_inputs(inputs)?;

    let store: Arc<dyn RunnableStore> = Arc::new(InMemoryRunnableStore::new());
    let runtimes = Arc::new(RuntimeRegistry::standard(
        RuntimeBase::new(Arc::clone(&store)),
        config.runtimes.clone(),
    )?);
    let (queue, _queue_rx) = dispatch_channel(1);
    let lifecycle = RunLifecycle::new(
        runtimes,
        entities,
        Arc::new(StaticCredentials::new()),
        Arc::new(StaticConfigurations::default()),
        store,
        queue,
    )?;

    lifecycle.transition(&mut run, Event::Build, None).await?;
    let (_, output) = lifecycle.transition(&mut run, Event::Run, None).await?;
    let Some(TransitionOutput::Runnable(runnable)) = output else {
        bail!("run '{}' produced no runnable (local execution?)", run.id);
    };

    let frameworks =
        FrameworkRegistry::standard(Arc::new(InMemoryCluster::new()), config.frameworks.clone());
    let objects = frameworks.for_runnable(&runnable)?.build(&runnable)?;
    info!(run_id = %run.id, framework = %runnable.framework(), objects = objects.len(), "rendered");

    println!("{}", serde_json::to_string_pretty(&objects)?);
    Ok(())
}

/// Drive a Run against the in-memory cluster until it settles.
async fn simulate(config: EngineConfig, inputs: &RunInputs, fail: bool, cycles: usize) -> Result<()> {
    let (run, entities) = load_inputs(inputs)?;
    let cluster = InMemoryCluster::new();

    let engine = Engine::builder(config)
        .cluster(Arc::new(cluster.clone()))
        .entities(entities)
        .store(Arc::new(InMemoryRunnableStore::new()))
        .periodic_monitor(false)
        .start()
        .await?;

    let mut events = engine.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(change) => match serde_json::to_string(&change) {
                    Ok(line) => println!("{line}"),
                    Err(e) => eprintln!("unprintable change event: {e}"),
                },
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    engine.launch(&run).await?;

    for cycle in 1..=cycles {
        tokio::time::sleep(SIMULATE_SETTLE).await;
        let touched = if fail {
            cluster.fail_all_jobs("simulated failure")
        } else {
            cluster.complete_all_jobs()
        };
        let report = engine.monitor_now().await?;
        tokio::time::sleep(SIMULATE_SETTLE).await;

        let state = engine.run(&run.id)?.map(|r| r.state());
        debug!(cycle, touched, ?report, ?state, "simulation cycle");
        if matches!(state, Some(State::Completed | State::Error | State::Stopped)) {
            break;
        }
    }

    let final_run = engine
        .run(&run.id)?
        .with_context(|| format!("run '{}' disappeared", run.id))?;
    println!("{}", serde_json::to_string_pretty(&final_run)?);

    engine.shutdown().await;
    printer.abort();
    Ok(())
}
