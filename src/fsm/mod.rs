// src/fsm/mod.rs

//! Generic finite-state-machine engine.
//!
//! The engine knows nothing about Runs or clusters. A machine is described by
//! a [`Machine`] type bundling its state, event, context, payload, output and
//! error types, and a catalogue of [`FsmState`] definitions:
//!
//! - [`state`] holds the immutable per-state definitions and their
//!   `(event -> next state, action)` transitions.
//! - [`machine`] validates and seals a catalogue ([`FsmBuilder`] →
//!   [`FsmDefinition`]) and drives a single-owner [`Fsm`] instance.
//!
//! Actions receive the transition and an explicitly injected context. They
//! never mutate anything themselves; whatever they return is handed back to
//! the caller of [`Fsm::send_event`], which is responsible for persisting it.

use std::fmt::{Debug, Display};
use std::hash::Hash;

pub mod machine;
pub mod state;

pub use machine::{Fsm, FsmBuilder, FsmDefinition, FsmError, MachineError};
pub use state::{Action, FsmState, Transition, TransitionInput};

/// Type bundle describing one family of state machines.
pub trait Machine: 'static {
    type State: Copy + Eq + Hash + Debug + Display + Send + Sync + 'static;
    type Event: Copy + Eq + Hash + Debug + Display + Send + Sync + 'static;
    /// Read-only domain data the actions need.
    type Context;
    /// Optional data accompanying an event.
    type Payload;
    /// What an action hands back to the caller.
    type Output;
    /// Error raised by an action; propagated untouched.
    type Error;
}
