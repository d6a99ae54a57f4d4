// src/runnable/store.rs

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{PoisonError, RwLock};

use tracing::debug;

use crate::errors::Result;
use crate::runnable::Runnable;
use crate::types::RunnableState;

/// Keyed store of runnables.
///
/// Per-key last-write-wins; callers that read-then-write serialise on
/// [`KeyedLocks`](super::KeyedLocks) first.
pub trait RunnableStore: Send + Sync + Debug {
    fn store(&self, id: &str, runnable: &Runnable) -> Result<()>;
    fn find(&self, id: &str) -> Result<Option<Runnable>>;
    fn find_all(&self) -> Result<Vec<Runnable>>;
    fn remove(&self, id: &str) -> Result<Option<Runnable>>;

    fn find_by_state(&self, state: RunnableState) -> Result<Vec<Runnable>> {
        Ok(self
            .find_all()?
            .into_iter()
            .filter(|r| r.state == state)
            .collect())
    }
}

/// Process-memory store. Readers never observe a half-written entry.
#[derive(Debug, Default)]
pub struct InMemoryRunnableStore {
    entries: RwLock<HashMap<String, Runnable>>,
}

impl InMemoryRunnableStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunnableStore for InMemoryRunnableStore {
    fn store(&self, id: &str, runnable: &Runnable) -> Result<()> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), runnable.clone());
        debug!(runnable_id = %id, state = %runnable.state, "stored runnable (memory)");
        Ok(())
    }

    fn find(&self, id: &str) -> Result<Option<Runnable>> {
        Ok(self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned())
    }

    fn find_all(&self) -> Result<Vec<Runnable>> {
        let mut all: Vec<Runnable> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    fn remove(&self, id: &str) -> Result<Option<Runnable>> {
        Ok(self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id))
    }
}
