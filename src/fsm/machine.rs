// src/fsm/machine.rs

//! Building, sealing and driving state machines.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, trace};

use super::state::{FsmState, TransitionInput};
use super::Machine;

#[derive(Error, Debug)]
pub enum FsmError<S, E, X> {
    /// The catalogue is inconsistent (unknown target, duplicate definition).
    #[error("invalid state machine configuration: {0}")]
    Configuration(String),

    /// No transition matches `(state, event)`. Permanent; never retried.
    #[error("illegal transition: no transition for event {event} from state {state}")]
    IllegalTransition { state: S, event: E },

    /// The transition's action failed; the machine did not move.
    #[error("transition action failed: {0}")]
    Action(X),
}

/// [`FsmError`] specialised for a [`Machine`].
pub type MachineError<M> =
    FsmError<<M as Machine>::State, <M as Machine>::Event, <M as Machine>::Error>;

/// Collects state definitions before they are validated and sealed.
pub struct FsmBuilder<M: Machine> {
    states: Vec<FsmState<M>>,
}

impl<M: Machine> Default for FsmBuilder<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Machine> FsmBuilder<M> {
    pub fn new() -> Self {
        Self { states: Vec::new() }
    }

    pub fn with_state(mut self, state: FsmState<M>) -> Self {
        self.states.push(state);
        self
    }

    /// Validate the catalogue and freeze it.
    ///
    /// Fails when a state is defined twice, when a state declares the same
    /// event twice, or when any transition targets a state without a
    /// definition.
    pub fn seal(self) -> Result<FsmDefinition<M>, MachineError<M>> {
        let mut states: HashMap<M::State, FsmState<M>> = HashMap::new();

        for def in self.states {
            let mut seen = HashSet::new();
            for transition in def.transitions() {
                if !seen.insert(transition.event()) {
                    return Err(FsmError::Configuration(format!(
                        "state {} declares event {} more than once",
                        def.state(),
                        transition.event()
                    )));
                }
            }

            let key = def.state();
            if states.insert(key, def).is_some() {
                return Err(FsmError::Configuration(format!(
                    "state {key} is defined more than once"
                )));
            }
        }

        for def in states.values() {
            for transition in def.transitions() {
                if !states.contains_key(&transition.next()) {
                    return Err(FsmError::Configuration(format!(
                        "transition {} --{}--> {} targets an undefined state",
                        def.state(),
                        transition.event(),
                        transition.next()
                    )));
                }
            }
        }

        debug!(states = states.len(), "state machine sealed");

        Ok(FsmDefinition {
            states: Arc::new(states),
        })
    }

    /// Seal and immediately start an instance.
    pub fn build(self, initial: M::State, context: M::Context) -> Result<Fsm<M>, MachineError<M>> {
        self.seal()?.start(initial, context)
    }
}

/// A sealed, shareable catalogue of states. No states can be added.
pub struct FsmDefinition<M: Machine> {
    states: Arc<HashMap<M::State, FsmState<M>>>,
}

impl<M: Machine> Clone for FsmDefinition<M> {
    fn clone(&self) -> Self {
        Self {
            states: Arc::clone(&self.states),
        }
    }
}

impl<M: Machine> fmt::Debug for FsmDefinition<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsmDefinition")
            .field("states", &self.states.len())
            .finish_non_exhaustive()
    }
}

impl<M: Machine> FsmDefinition<M> {
    /// Start a fresh instance positioned at `initial`.
    pub fn start(&self, initial: M::State, context: M::Context) -> Result<Fsm<M>, MachineError<M>> {
        if !self.states.contains_key(&initial) {
            return Err(FsmError::Configuration(format!(
                "initial state {initial} has no definition"
            )));
        }

        Ok(Fsm {
            current: initial,
            context,
            definition: self.clone(),
        })
    }

    pub fn state(&self, state: M::State) -> Option<&FsmState<M>> {
        self.states.get(&state)
    }

    /// Target state for `(state, event)`, if declared.
    pub fn target(&self, state: M::State, event: M::Event) -> Option<M::State> {
        self.states
            .get(&state)
            .and_then(|def| def.transition_for(event))
            .map(|t| t.next())
    }

    pub fn allows(&self, state: M::State, event: M::Event) -> bool {
        self.target(state, event).is_some()
    }

    pub fn states(&self) -> impl Iterator<Item = &FsmState<M>> {
        self.states.values()
    }
}

/// Single-owner machine instance. Built per evaluation and then dropped.
pub struct Fsm<M: Machine> {
    current: M::State,
    context: M::Context,
    definition: FsmDefinition<M>,
}

impl<M: Machine> fmt::Debug for Fsm<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fsm")
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

impl<M: Machine> Fsm<M> {
    pub fn current_state(&self) -> M::State {
        self.current
    }

    pub fn context(&self) -> &M::Context {
        &self.context
    }

    pub fn definition(&self) -> &FsmDefinition<M> {
        &self.definition
    }

    /// Perform exactly one transition for `event`.
    ///
    /// On success the machine moves to the declared target and the action's
    /// result is returned. On an illegal transition or a failed action the
    /// current state is left unchanged.
    pub fn send_event(
        &mut self,
        event: M::Event,
        payload: Option<M::Payload>,
    ) -> Result<(M::State, Option<M::Output>), MachineError<M>> {
        let from = self.current;

        let transition = self
            .definition
            .states
            .get(&from)
            .and_then(|def| def.transition_for(event))
            .ok_or(FsmError::IllegalTransition { state: from, event })?;

        let to = transition.next();
        trace!(%from, %event, %to, "applying transition");

        let input = TransitionInput {
            from,
            to,
            event,
            payload,
        };

        let output = transition
            .apply(&input, &self.context)
            .map_err(FsmError::Action)?;

        self.current = to;
        debug!(%from, %event, %to, has_output = output.is_some(), "transition applied");

        Ok((to, output))
    }
}
