// src/run/mod.rs

//! The Run entity and everything that moves it.
//!
//! - [`model`] and [`spec`] hold the Run data and the task/run spec merge.
//! - [`state_machine`] declares the lifecycle as an FSM catalogue.
//! - [`lifecycle`] applies one event to one Run.
//! - [`sync`] feeds backend observations back in as events.

pub mod lifecycle;
pub mod model;
pub mod spec;
pub mod state_machine;
pub mod sync;

pub use lifecycle::RunLifecycle;
pub use model::{ExecutableSnapshot, Run, RunSpec, RunStatus, StatusFragment};
pub use spec::{EnvEntry, K8sSpec, PortSpec, ResourceSpec, VolumeKind, VolumeSpec, merge_k8s};
pub use state_machine::{RunContext, RunMachine, TransitionOutput, run_state_machine};
pub use sync::{RunStatusSync, event_for_change};
