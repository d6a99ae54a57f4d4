// src/monitor/mod.rs

//! Reconciliation monitor.
//!
//! Periodically re-reads every `RUNNING` runnable from its backend, persists
//! what it finds and republishes it. Each runnable is handled in isolation:
//! a failed refresh is logged, leaves that runnable untouched and does not
//! stop the rest of the cycle. Cycles never overlap.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::dispatch::{EventBus, RunnableChanged};
use crate::errors::Result;
use crate::framework::FrameworkRegistry;
use crate::runnable::{KeyedLocks, Runnable, RunnableStore};
use crate::types::RunnableState;

/// Outcome of one monitoring cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Runnables found in `RUNNING` at the start of the cycle.
    pub examined: usize,
    pub refreshed: usize,
    /// Refreshed runnables whose state moved.
    pub changed: usize,
    /// Ids whose refresh failed this cycle.
    pub failed: Vec<String>,
    /// The previous cycle was still running; nothing was done.
    pub skipped: bool,
}

#[derive(Debug)]
pub struct Monitor {
    frameworks: Arc<FrameworkRegistry>,
    store: Arc<dyn RunnableStore>,
    locks: KeyedLocks,
    events: EventBus,
    cycle: Mutex<()>,
}

impl Monitor {
    pub fn new(
        frameworks: Arc<FrameworkRegistry>,
        store: Arc<dyn RunnableStore>,
        locks: KeyedLocks,
        events: EventBus,
    ) -> Self {
        Self {
            frameworks,
            store,
            locks,
            events,
            cycle: Mutex::new(()),
        }
    }

    /// Refresh every runnable currently in `RUNNING`.
    pub async fn monitor_all(&self) -> Result<CycleReport> {
        let Ok(_cycle) = self.cycle.try_lock() else {
            debug!("previous monitor cycle still running; skipping");
            return Ok(CycleReport {
                skipped: true,
                ..Default::default()
            });
        };

        let running = self.store.find_by_state(RunnableState::Running)?;
        let mut report = CycleReport {
            examined: running.len(),
            ..Default::default()
        };

        for runnable in running {
            match self.refresh_one(&runnable.id, true).await {
                Ok(Some(change)) => {
                    report.refreshed += 1;
                    if change.previous_state != change.new_state {
                        report.changed += 1;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(runnable_id = %runnable.id, error = %e, "refresh failed; will retry next cycle");
                    report.failed.push(runnable.id);
                }
            }
        }

        debug!(
            examined = report.examined,
            refreshed = report.refreshed,
            changed = report.changed,
            failed = report.failed.len(),
            "monitor cycle finished"
        );
        Ok(report)
    }

    /// Refresh one runnable now, whatever its state. `None` if unknown; a
    /// runnable still waiting for dispatch comes back as stored.
    pub async fn refresh(&self, id: &str) -> Result<Option<Runnable>> {
        Ok(self
            .refresh_one(id, false)
            .await?
            .map(|change| change.runnable))
    }

    async fn refresh_one(&self, id: &str, only_running: bool) -> Result<Option<RunnableChanged>> {
        let _guard = self.locks.lock(id).await;

        // Re-read under the lock: a dispatch may have moved it meanwhile.
        let Some(current) = self.store.find(id)? else {
            return Ok(None);
        };
        if only_running && current.state != RunnableState::Running {
            debug!(runnable_id = %id, state = %current.state, "no longer running; skipping");
            return Ok(None);
        }
        if current.state == RunnableState::Ready {
            debug!(runnable_id = %id, "not dispatched yet; nothing to read");
            return Ok(Some(RunnableChanged::new(current.state, current)));
        }

        let framework = self.frameworks.for_runnable(&current)?;
        let previous = current.state;
        let refreshed = framework.refresh(current).await?;
        self.store.store(id, &refreshed)?;

        if refreshed.state != previous {
            info!(
                runnable_id = %id,
                framework = %refreshed.framework(),
                previous = %previous,
                state = %refreshed.state,
                "runnable state changed"
            );
        }

        let change = RunnableChanged::new(previous, refreshed);
        self.events.publish(change.clone());
        Ok(Some(change))
    }

    /// Run [`monitor_all`](Self::monitor_all) every `interval` until stopped.
    pub fn start(self: Arc<Self>, interval: Duration) -> MonitorHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            info!(?interval, "monitor started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.monitor_all().await {
                            error!(error = %e, "monitor cycle failed");
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }
            info!("monitor stopped");
        });

        MonitorHandle { stop_tx, handle }
    }
}

/// Periodic monitor task.
#[derive(Debug)]
pub struct MonitorHandle {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl MonitorHandle {
    /// Stop ticking and wait for an in-flight cycle to finish.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.handle.await {
            error!(error = %e, "monitor task failed");
        }
    }
}
