// src/run/sync.rs

//! Keeps Runs in step with what the backend reports.
//!
//! Every [`RunnableChanged`] is translated into at most one Run event and
//! applied through [`RunLifecycle`]. One bad Run never stalls the stream:
//! failures are logged and the next change is processed. When the bus drops
//! changes, every stored runnable is re-applied so no Run is left behind.

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dispatch::RunnableChanged;
use crate::entities::RunRepository;
use crate::errors::{EngineError, Result};
use crate::run::{Run, RunLifecycle};
use crate::runnable::{KeyedLocks, Runnable, RunnableStore};
use crate::types::{Event, RunnableState, State};

/// Event a Run in `current` should receive for an observed change.
///
/// Request states are the engine's own output and never map to an event.
pub fn event_for_change(current: State, change: &RunnableChanged) -> Option<Event> {
    match change.new_state {
        RunnableState::Running => match current {
            State::Ready => Some(Event::Execute),
            State::Running => Some(Event::Loop),
            _ => None,
        },
        RunnableState::Pending => Some(Event::Pending),
        RunnableState::Completed => Some(Event::Complete),
        RunnableState::Error => Some(Event::Error),
        RunnableState::Stopped => Some(Event::Stopped),
        RunnableState::Deleted => Some(Event::Deleting),
        RunnableState::Ready
        | RunnableState::Stop
        | RunnableState::Resume
        | RunnableState::Deleting => None,
    }
}

/// Loads, transitions and saves Runs, one at a time per Run id.
#[derive(Debug, Clone)]
pub struct RunStatusSync {
    lifecycle: Arc<RunLifecycle>,
    runs: Arc<dyn RunRepository>,
    store: Arc<dyn RunnableStore>,
    locks: KeyedLocks,
}

impl RunStatusSync {
    pub fn new(
        lifecycle: Arc<RunLifecycle>,
        runs: Arc<dyn RunRepository>,
        store: Arc<dyn RunnableStore>,
    ) -> Self {
        Self {
            lifecycle,
            runs,
            store,
            locks: KeyedLocks::new(),
        }
    }

    pub fn lifecycle(&self) -> &Arc<RunLifecycle> {
        &self.lifecycle
    }

    pub fn runs(&self) -> &Arc<dyn RunRepository> {
        &self.runs
    }

    /// Transition the stored Run `run_id` and save it.
    pub async fn drive(&self, run_id: &str, event: Event, payload: Option<Runnable>) -> Result<Run> {
        let _guard = self.locks.lock(run_id).await;
        let mut run = self
            .runs
            .find(run_id)?
            .ok_or_else(|| EngineError::NotFound(format!("run '{run_id}'")))?;
        self.lifecycle.transition(&mut run, event, payload).await?;
        self.runs.save(&run)?;
        Ok(run)
    }

    /// Apply one change. Returns the Run's new state, or `None` when the
    /// change maps to no event for the Run's current state.
    pub async fn apply(&self, change: &RunnableChanged) -> Result<Option<State>> {
        let _guard = self.locks.lock(&change.runnable_id).await;
        let Some(mut run) = self.runs.find(&change.runnable_id)? else {
            debug!(run_id = %change.runnable_id, "change for unknown run; ignoring");
            return Ok(None);
        };

        let current = run.state();
        let Some(event) = event_for_change(current, change) else {
            return Ok(None);
        };
        if !self.lifecycle.allows(current, event) {
            debug!(
                run_id = %run.id,
                state = %current,
                %event,
                runnable_state = %change.new_state,
                "change does not apply to run state; skipping"
            );
            return Ok(None);
        }

        let (to, _) = self
            .lifecycle
            .transition(&mut run, event, Some(change.runnable.clone()))
            .await?;
        self.runs.save(&run)?;
        Ok(Some(to))
    }

    /// Apply the stored state of every runnable to its Run, as if each had
    /// just been announced. Runs already in step are left alone; a Run that
    /// missed its dispatch is moved to `RUNNING` first. Returns how many Runs
    /// moved.
    pub async fn reconcile(&self) -> Result<usize> {
        let mut moved = 0;
        for runnable in self.store.find_all()? {
            let id = runnable.id.clone();
            match self.reconcile_one(runnable).await {
                Ok(true) => moved += 1,
                Ok(false) => {}
                Err(e) => warn!(run_id = %id, error = %e, "failed to reconcile run"),
            }
        }
        Ok(moved)
    }

    async fn reconcile_one(&self, runnable: Runnable) -> Result<bool> {
        let Some(run) = self.runs.find(&runnable.id)? else {
            return Ok(false);
        };
        let current = run.state();
        let change = RunnableChanged::new(runnable.state, runnable);
        let Some(event) = event_for_change(current, &change) else {
            return Ok(false);
        };
        if event == Event::Loop {
            return Ok(false);
        }

        if current == State::Ready
            && !self.lifecycle.allows(current, event)
            && self.lifecycle.allows(State::Running, event)
        {
            let mut dispatched = change.runnable.clone();
            dispatched.transition_to(RunnableState::Running, None);
            self.apply(&RunnableChanged::new(RunnableState::Ready, dispatched))
                .await?;
        }

        Ok(self.apply(&change).await?.is_some())
    }

    /// Follow `rx` until the bus closes.
    pub fn spawn(self, mut rx: broadcast::Receiver<RunnableChanged>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("run status sync started");
            loop {
                match rx.recv().await {
                    Ok(change) => {
                        if let Err(e) = self.apply(&change).await {
                            warn!(
                                run_id = %change.runnable_id,
                                runnable_state = %change.new_state,
                                error = %e,
                                "failed to apply runnable change"
                            );
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "run status sync lagged; reconciling from the store");
                        match self.reconcile().await {
                            Ok(moved) => info!(moved, "runs reconciled"),
                            Err(e) => warn!(error = %e, "reconciliation failed"),
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            info!("run status sync stopped");
        })
    }
}
