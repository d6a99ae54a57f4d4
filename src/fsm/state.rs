// src/fsm/state.rs

//! Immutable state definitions.

use std::fmt;
use std::sync::Arc;

use super::Machine;

/// Everything an action gets to see about the transition being applied.
pub struct TransitionInput<M: Machine> {
    pub from: M::State,
    pub to: M::State,
    pub event: M::Event,
    pub payload: Option<M::Payload>,
}

/// Side effect attached to a transition.
pub type Action<M> = Arc<
    dyn Fn(
            &TransitionInput<M>,
            &<M as Machine>::Context,
        ) -> Result<Option<<M as Machine>::Output>, <M as Machine>::Error>
        + Send
        + Sync,
>;

/// One `event -> next` edge, optionally carrying an action.
pub struct Transition<M: Machine> {
    event: M::Event,
    next: M::State,
    action: Option<Action<M>>,
}

impl<M: Machine> Transition<M> {
    pub fn event(&self) -> M::Event {
        self.event
    }

    pub fn next(&self) -> M::State {
        self.next
    }

    pub fn has_action(&self) -> bool {
        self.action.is_some()
    }

    pub(crate) fn apply(
        &self,
        input: &TransitionInput<M>,
        context: &M::Context,
    ) -> Result<Option<M::Output>, M::Error> {
        match &self.action {
            Some(action) => action(input, context),
            None => Ok(None),
        }
    }
}

impl<M: Machine> Clone for Transition<M> {
    fn clone(&self) -> Self {
        Self {
            event: self.event,
            next: self.next,
            action: self.action.clone(),
        }
    }
}

impl<M: Machine> fmt::Debug for Transition<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition")
            .field("event", &self.event)
            .field("next", &self.next)
            .field("has_action", &self.action.is_some())
            .finish()
    }
}

/// A state plus its ordered list of allowed transitions.
pub struct FsmState<M: Machine> {
    state: M::State,
    transitions: Vec<Transition<M>>,
}

impl<M: Machine> FsmState<M> {
    pub fn new(state: M::State) -> Self {
        Self {
            state,
            transitions: Vec::new(),
        }
    }

    /// Add a transition without side effects.
    pub fn on(mut self, event: M::Event, next: M::State) -> Self {
        self.transitions.push(Transition {
            event,
            next,
            action: None,
        });
        self
    }

    /// Add a transition whose action runs when it fires.
    pub fn on_with<F>(mut self, event: M::Event, next: M::State, action: F) -> Self
    where
        F: Fn(&TransitionInput<M>, &M::Context) -> Result<Option<M::Output>, M::Error>
            + Send
            + Sync
            + 'static,
    {
        self.transitions.push(Transition {
            event,
            next,
            action: Some(Arc::new(action)),
        });
        self
    }

    pub fn state(&self) -> M::State {
        self.state
    }

    pub fn transitions(&self) -> &[Transition<M>] {
        &self.transitions
    }

    /// First transition matching `event`, in declaration order.
    pub fn transition_for(&self, event: M::Event) -> Option<&Transition<M>> {
        self.transitions.iter().find(|t| t.event == event)
    }

    pub fn is_terminal(&self) -> bool {
        self.transitions.is_empty()
    }
}

impl<M: Machine> Clone for FsmState<M> {
    fn clone(&self) -> Self {
        Self {
            state: self.state,
            transitions: self.transitions.clone(),
        }
    }
}

impl<M: Machine> fmt::Debug for FsmState<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsmState")
            .field("state", &self.state)
            .field("transitions", &self.transitions)
            .finish()
    }
}
