// src/dispatch/listener.rs

//! Worker pool draining the dispatch queue.

use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::{EventBus, RunnableChanged};
use crate::framework::FrameworkRegistry;
use crate::runnable::{KeyedLocks, Runnable, RunnableStore};
use crate::types::RunnableState;

/// Backend operation requested by a runnable's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Run,
    Stop,
    Resume,
    Delete,
}

impl Operation {
    fn for_state(state: RunnableState) -> Option<Self> {
        match state {
            RunnableState::Ready => Some(Operation::Run),
            RunnableState::Stop => Some(Operation::Stop),
            RunnableState::Resume => Some(Operation::Resume),
            RunnableState::Deleting => Some(Operation::Delete),
            _ => None,
        }
    }
}

/// Executes each queued runnable against its framework, persists the
/// outcome and announces it.
///
/// Items are handled concurrently up to `workers`; while every worker is
/// busy the listener stops draining, so producers feel the queue bound.
/// Items with different ids never block each other; the same id is
/// serialised through [`KeyedLocks`].
#[derive(Debug, Clone)]
pub struct DispatchListener {
    frameworks: Arc<FrameworkRegistry>,
    store: Arc<dyn RunnableStore>,
    locks: KeyedLocks,
    events: EventBus,
    workers: usize,
}

/// Running listener task.
#[derive(Debug)]
pub struct ListenerHandle {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ListenerHandle {
    /// Wait for the listener to exit on its own (after the queue closes).
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            error!(error = %e, "dispatch listener task failed");
        }
    }

    /// Refuse new submissions, finish what is already queued, then exit.
    pub async fn shutdown(self) {
        let _ = self.stop_tx.send(true);
        self.join().await;
    }

    pub fn abort(&self) {
        self.handle.abort();
    }
}

impl DispatchListener {
    pub fn new(
        frameworks: Arc<FrameworkRegistry>,
        store: Arc<dyn RunnableStore>,
        locks: KeyedLocks,
        events: EventBus,
        workers: usize,
    ) -> Self {
        Self {
            frameworks,
            store,
            locks,
            events,
            workers: workers.max(1),
        }
    }

    /// Spawn the background loop over `rx`.
    pub fn spawn(self, mut rx: mpsc::Receiver<Runnable>) -> ListenerHandle {
        let workers = self.workers;
        let semaphore = Arc::new(Semaphore::new(workers));
        let listener = Arc::new(self);
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            info!(workers, "dispatch listener started");
            let mut inflight = JoinSet::new();
            let mut stopping = false;

            loop {
                let next = if stopping {
                    rx.recv().await
                } else {
                    tokio::select! {
                        next = rx.recv() => next,
                        Ok(()) = stop_rx.changed() => {
                            debug!("dispatch listener stopping; draining queued runnables");
                            // Buffered items are still delivered after close.
                            rx.close();
                            stopping = true;
                            continue;
                        }
                    }
                };
                let Some(runnable) = next else {
                    break;
                };

                let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                    break;
                };
                let listener = Arc::clone(&listener);
                inflight.spawn(async move {
                    let _permit = permit;
                    listener.process(runnable).await;
                });
                while inflight.try_join_next().is_some() {}
            }

            while inflight.join_next().await.is_some() {}
            info!("dispatch listener finished");
        });

        ListenerHandle { stop_tx, handle }
    }

    /// Handle one request. Returns the published change, or `None` when
    /// nothing was recorded.
    ///
    /// The request is planned against the stored runnable, re-read under
    /// the id's lock, so a request that waited in the queue never
    /// overwrites an outcome recorded in the meantime.
    pub async fn process(&self, request: Runnable) -> Option<RunnableChanged> {
        let requested = request.state;
        let Some(operation) = Operation::for_state(requested) else {
            debug!(
                runnable_id = %request.id,
                state = %requested,
                "runnable state requests no backend operation; ignoring"
            );
            return None;
        };

        let id = request.id.clone();
        let _guard = self.locks.lock(&id).await;

        let stored = match self.store.find(&id) {
            Ok(stored) => stored,
            Err(e) => {
                error!(runnable_id = %id, ?operation, error = %e, "cannot read stored runnable; dropping request");
                return None;
            }
        };

        let updated = match plan(operation, request, stored) {
            Plan::Skip(observed) => {
                info!(
                    runnable_id = %id,
                    ?operation,
                    stored = ?observed.map(RunnableState::as_str),
                    "request no longer applies; dropping"
                );
                return None;
            }
            Plan::Cleanup(request) => {
                self.cleanup(request).await;
                return None;
            }
            Plan::Settle(runnable) => {
                info!(runnable_id = %id, state = %runnable.state, "request settled without dispatch");
                runnable
            }
            Plan::Dispatch(runnable) => self.dispatch(operation, runnable).await,
        };

        if let Err(e) = self.store.store(&id, &updated) {
            error!(runnable_id = %id, error = %e, "failed to persist dispatched runnable; change not published");
            return None;
        }

        let change = RunnableChanged::new(requested, updated);
        self.events.publish(change.clone());
        Some(change)
    }

    async fn dispatch(&self, operation: Operation, runnable: Runnable) -> Runnable {
        let id = runnable.id.clone();
        let previous = runnable.state;
        debug!(runnable_id = %id, state = %previous, ?operation, "dispatching runnable");

        let outcome = match self.frameworks.for_runnable(&runnable) {
            Ok(framework) => match operation {
                Operation::Run => framework.run(runnable.clone()).await,
                Operation::Stop => framework.stop(runnable.clone()).await,
                Operation::Resume => framework.resume(runnable.clone()).await,
                Operation::Delete => framework.delete(runnable.clone()).await,
            },
            Err(e) => Err(e),
        };

        match outcome {
            Ok(updated) => {
                info!(
                    runnable_id = %id,
                    framework = %updated.framework(),
                    previous = %previous,
                    state = %updated.state,
                    "runnable dispatched"
                );
                updated
            }
            Err(e) => {
                warn!(runnable_id = %id, ?operation, error = %e, "dispatch failed");
                let mut failed = runnable;
                failed.fail(e.detail());
                failed
            }
        }
    }

    /// Release backend objects of a runnable the store has already forgotten.
    async fn cleanup(&self, request: Runnable) {
        let id = request.id.clone();
        let outcome = match self.frameworks.for_runnable(&request) {
            Ok(framework) => framework.delete(request).await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(_) => debug!(runnable_id = %id, "backend objects of forgotten runnable released"),
            Err(e) => warn!(runnable_id = %id, error = %e, "cleanup of forgotten runnable failed"),
        }
    }
}

/// What a queued request resolves to once the stored runnable is known.
#[derive(Debug)]
enum Plan {
    /// Hand the stored runnable, moved to the requested state, to its framework.
    Dispatch(Runnable),
    /// Nothing reached the backend yet; record the outcome directly.
    Settle(Runnable),
    /// The store no longer knows the id; only release backend objects.
    Cleanup(Runnable),
    /// The request is stale given the stored state (if any).
    Skip(Option<RunnableState>),
}

fn plan(operation: Operation, request: Runnable, stored: Option<Runnable>) -> Plan {
    let Some(mut current) = stored else {
        return match operation {
            Operation::Delete => Plan::Cleanup(request),
            _ => Plan::Skip(None),
        };
    };

    let observed = current.state;
    let applies = match operation {
        Operation::Run => observed == RunnableState::Ready,
        Operation::Stop => !matches!(
            observed,
            RunnableState::Completed
                | RunnableState::Error
                | RunnableState::Stopped
                | RunnableState::Deleted
        ),
        Operation::Resume => observed == RunnableState::Stopped,
        Operation::Delete => true,
    };
    if !applies {
        return Plan::Skip(Some(observed));
    }

    if operation == Operation::Stop && observed == RunnableState::Ready {
        current.transition_to(RunnableState::Stopped, Some("stopped before dispatch".to_string()));
        return Plan::Settle(current);
    }

    current.transition_to(request.state, request.message);
    Plan::Dispatch(current)
}
