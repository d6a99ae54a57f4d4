// src/run/lifecycle.rs

//! Entry point for moving a Run through its lifecycle.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::dispatch::DispatchQueue;
use crate::entities::{ConfigurationProvider, CredentialsProvider, EntityProvider};
use crate::errors::{EngineError, Result};
use crate::fsm::{FsmDefinition, FsmError, MachineError};
use crate::run::state_machine::{RunContext, RunMachine, TransitionOutput, run_state_machine};
use crate::run::Run;
use crate::runnable::{Runnable, RunnableStore};
use crate::runtime::RuntimeRegistry;
use crate::types::{Event, RunnableState, State};

fn engine_error(e: MachineError<RunMachine>) -> EngineError {
    match e {
        FsmError::IllegalTransition { state, event } => EngineError::IllegalTransition { state, event },
        FsmError::Configuration(msg) => EngineError::Config(msg),
        FsmError::Action(e) => e,
    }
}

/// Applies events to Runs.
///
/// Each call evaluates a fresh machine positioned at the Run's persisted
/// state, so no machine instance outlives a transition. Persisting the Run
/// afterwards is up to the caller.
pub struct RunLifecycle {
    definition: FsmDefinition<RunMachine>,
    runtimes: Arc<RuntimeRegistry>,
    entities: Arc<dyn EntityProvider>,
    credentials: Arc<dyn CredentialsProvider>,
    configurations: Arc<dyn ConfigurationProvider>,
    store: Arc<dyn RunnableStore>,
    dispatch: DispatchQueue,
}

impl fmt::Debug for RunLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunLifecycle")
            .field("definition", &self.definition)
            .field("runtimes", &self.runtimes)
            .field("dispatch", &self.dispatch)
            .finish_non_exhaustive()
    }
}

impl RunLifecycle {
    pub fn new(
        runtimes: Arc<RuntimeRegistry>,
        entities: Arc<dyn EntityProvider>,
        credentials: Arc<dyn CredentialsProvider>,
        configurations: Arc<dyn ConfigurationProvider>,
        store: Arc<dyn RunnableStore>,
        dispatch: DispatchQueue,
    ) -> Result<Self> {
        Ok(Self {
            definition: run_state_machine().map_err(engine_error)?,
            runtimes,
            entities,
            credentials,
            configurations,
            store,
            dispatch,
        })
    }

    pub fn definition(&self) -> &FsmDefinition<RunMachine> {
        &self.definition
    }

    /// Whether `event` is accepted from `state`.
    pub fn allows(&self, state: State, event: Event) -> bool {
        self.definition.allows(state, event)
    }

    /// Send `event` to `run` and apply the outcome.
    ///
    /// On success `run.status.state` holds the new state, a built spec has
    /// replaced `run.spec`, a produced runnable sits on the dispatch queue
    /// and any status fragment is merged. On failure `run` is untouched.
    ///
    /// A fresh `READY` runnable is stored before it is queued, so requests
    /// issued while it waits (stop, delete) find it.
    pub async fn transition(
        &self,
        run: &mut Run,
        event: Event,
        payload: Option<Runnable>,
    ) -> Result<(State, Option<TransitionOutput>)> {
        let from = run.state();
        let runtime = self.runtimes.for_run(run)?;

        let context = RunContext {
            run: run.clone(),
            runtime,
            entities: Arc::clone(&self.entities),
            credentials: Arc::clone(&self.credentials),
            configurations: Arc::clone(&self.configurations),
        };

        let mut machine = self.definition.start(from, context).map_err(engine_error)?;
        let (to, output) = machine.send_event(event, payload).map_err(engine_error)?;

        match &output {
            Some(TransitionOutput::Spec(spec)) => run.update_spec(spec.clone())?,
            Some(TransitionOutput::Runnable(runnable)) => self.enqueue(runnable).await?,
            Some(TransitionOutput::Status(fragment)) => run.merge_status(fragment.clone()),
            None => {}
        }

        run.status.state = to;
        info!(run_id = %run.id, kind = %run.kind, %from, %event, %to, "run transitioned");
        Ok((to, output))
    }

    async fn enqueue(&self, runnable: &Runnable) -> Result<()> {
        debug!(runnable_id = %runnable.id, state = %runnable.state, "submitting runnable");
        let fresh = runnable.state == RunnableState::Ready;
        if fresh {
            self.store.store(&runnable.id, runnable)?;
        }

        if let Err(e) = self.dispatch.submit(runnable.clone()).await {
            if fresh {
                if let Err(remove) = self.store.remove(&runnable.id) {
                    warn!(runnable_id = %runnable.id, error = %remove, "could not drop undispatched runnable");
                }
            }
            return Err(e);
        }
        Ok(())
    }
}
