// src/types.rs

//! Shared vocabulary: Run lifecycle states, the events that move them, and
//! the backend-observed state of a Runnable.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Logical lifecycle position of a Run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    Created,
    Built,
    Ready,
    Running,
    Stop,
    Stopped,
    Completed,
    Error,
    Deleting,
    Deleted,
}

impl State {
    pub const ALL: [State; 10] = [
        State::Created,
        State::Built,
        State::Ready,
        State::Running,
        State::Stop,
        State::Stopped,
        State::Completed,
        State::Error,
        State::Deleting,
        State::Deleted,
    ];

    /// `DELETED` is the only state without outgoing transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Deleted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            State::Created => "CREATED",
            State::Built => "BUILT",
            State::Ready => "READY",
            State::Running => "RUNNING",
            State::Stop => "STOP",
            State::Stopped => "STOPPED",
            State::Completed => "COMPLETED",
            State::Error => "ERROR",
            State::Deleting => "DELETING",
            State::Deleted => "DELETED",
        }
    }
}

impl Default for State {
    fn default() -> Self {
        State::Created
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for State {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        State::ALL
            .iter()
            .copied()
            .find(|state| state.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("invalid run state: {s}"))
    }
}

/// Trigger requesting a Run transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Event {
    Build,
    Run,
    Execute,
    Loop,
    Pending,
    Complete,
    Error,
    Stop,
    Stopped,
    Resume,
    Deleting,
}

impl Event {
    pub const ALL: [Event; 11] = [
        Event::Build,
        Event::Run,
        Event::Execute,
        Event::Loop,
        Event::Pending,
        Event::Complete,
        Event::Error,
        Event::Stop,
        Event::Stopped,
        Event::Resume,
        Event::Deleting,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Event::Build => "BUILD",
            Event::Run => "RUN",
            Event::Execute => "EXECUTE",
            Event::Loop => "LOOP",
            Event::Pending => "PENDING",
            Event::Complete => "COMPLETE",
            Event::Error => "ERROR",
            Event::Stop => "STOP",
            Event::Stopped => "STOPPED",
            Event::Resume => "RESUME",
            Event::Deleting => "DELETING",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Event {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Event::ALL
            .iter()
            .copied()
            .find(|event| event.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("invalid run event: {s}"))
    }
}

/// Backend-facing state of a Runnable.
///
/// `Ready`, `Stop`, `Resume` and `Deleting` are *requests* consumed by the
/// dispatch listener; the rest are observed outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunnableState {
    Ready,
    Pending,
    Running,
    Stop,
    Stopped,
    Resume,
    Completed,
    Error,
    Deleting,
    Deleted,
}

impl RunnableState {
    pub fn as_str(self) -> &'static str {
        match self {
            RunnableState::Ready => "READY",
            RunnableState::Pending => "PENDING",
            RunnableState::Running => "RUNNING",
            RunnableState::Stop => "STOP",
            RunnableState::Stopped => "STOPPED",
            RunnableState::Resume => "RESUME",
            RunnableState::Completed => "COMPLETED",
            RunnableState::Error => "ERROR",
            RunnableState::Deleting => "DELETING",
            RunnableState::Deleted => "DELETED",
        }
    }

    /// Whether the dispatch listener has an operation for this state.
    pub fn is_request(self) -> bool {
        matches!(
            self,
            RunnableState::Ready
                | RunnableState::Stop
                | RunnableState::Resume
                | RunnableState::Deleting
        )
    }
}

impl fmt::Display for RunnableState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where runnables are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreMode {
    /// One JSON document per runnable under `store.path`.
    File,
    /// Process memory only (lost on restart).
    Memory,
}

impl Default for StoreMode {
    fn default() -> Self {
        StoreMode::Memory
    }
}

impl FromStr for StoreMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "file" => Ok(StoreMode::File),
            "memory" => Ok(StoreMode::Memory),
            other => Err(format!(
                "invalid store mode: {other} (expected \"file\" or \"memory\")"
            )),
        }
    }
}
