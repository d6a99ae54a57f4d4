// src/dispatch/mod.rs

//! Channels between the Run lifecycle and the backend.
//!
//! - The [`DispatchQueue`] is a bounded multi-producer queue of runnables in
//!   a request state. Producers only wait for capacity, never for backend
//!   work.
//! - The [`EventBus`] broadcasts a [`RunnableChanged`] every time the
//!   listener or the monitor has processed a runnable.
//! - [`listener`] drains the queue with a bounded worker pool.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::trace;

use crate::errors::{EngineError, Result};
use crate::runnable::Runnable;
use crate::types::RunnableState;

pub mod listener;

pub use listener::{DispatchListener, ListenerHandle};

/// A runnable was processed and persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunnableChanged {
    pub runnable_id: String,
    pub previous_state: RunnableState,
    pub new_state: RunnableState,
    pub runnable: Runnable,
    pub at: DateTime<Utc>,
}

impl RunnableChanged {
    pub fn new(previous_state: RunnableState, runnable: Runnable) -> Self {
        Self {
            runnable_id: runnable.id.clone(),
            previous_state,
            new_state: runnable.state,
            runnable,
            at: Utc::now(),
        }
    }
}

/// Producer side of the dispatch queue.
#[derive(Debug, Clone)]
pub struct DispatchQueue {
    tx: mpsc::Sender<Runnable>,
}

impl DispatchQueue {
    /// Enqueue, waiting only while the queue is full.
    pub async fn submit(&self, runnable: Runnable) -> Result<()> {
        trace!(runnable_id = %runnable.id, state = %runnable.state, "enqueueing runnable");
        self.tx
            .send(runnable)
            .await
            .map_err(|_| EngineError::QueueClosed)
    }

    /// Free slots right now.
    pub fn capacity(&self) -> usize {
        self.tx.capacity()
    }
}

/// Bounded dispatch queue of `capacity` items.
pub fn dispatch_channel(capacity: usize) -> (DispatchQueue, mpsc::Receiver<Runnable>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (DispatchQueue { tx }, rx)
}

/// Fan-out of [`RunnableChanged`] notifications.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RunnableChanged>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish to current subscribers. Having none is not an error.
    pub fn publish(&self, change: RunnableChanged) -> usize {
        trace!(
            runnable_id = %change.runnable_id,
            previous = %change.previous_state,
            new = %change.new_state,
            "publishing runnable change"
        );
        self.tx.send(change).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunnableChanged> {
        self.tx.subscribe()
    }
}
