// tests/fsm_engine.rs

use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use runplane::fsm::{FsmBuilder, FsmError, FsmState, Machine};
use runplane_test_utils::init_tracing;

type TestResult = Result<(), Box<dyn Error>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Gate {
    Locked,
    Open,
    Jammed,
}

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Input {
    Coin,
    Push,
    Kick,
}

impl fmt::Display for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Counts coins; pushing a locked gate is an illegal move.
struct Turnstile;

impl Machine for Turnstile {
    type State = Gate;
    type Event = Input;
    type Context = Arc<AtomicUsize>;
    type Payload = usize;
    type Output = usize;
    type Error = String;
}

fn turnstile() -> FsmBuilder<Turnstile> {
    FsmBuilder::new()
        .with_state(
            FsmState::new(Gate::Locked)
                .on_with(Input::Coin, Gate::Open, |input, coins: &Arc<AtomicUsize>| {
                    let amount = input.payload.unwrap_or(1);
                    Ok(Some(coins.fetch_add(amount, Ordering::SeqCst) + amount))
                })
                .on_with(Input::Kick, Gate::Jammed, |_, _| Err("gate refuses to jam".to_string())),
        )
        .with_state(
            FsmState::new(Gate::Open)
                .on(Input::Push, Gate::Locked)
                .on(Input::Coin, Gate::Open),
        )
        .with_state(FsmState::new(Gate::Jammed))
}

#[test]
fn legal_transition_moves_and_returns_action_output() -> TestResult {
    init_tracing();

    let coins = Arc::new(AtomicUsize::new(0));
    let mut fsm = turnstile().build(Gate::Locked, Arc::clone(&coins))?;

    let (to, output) = fsm.send_event(Input::Coin, Some(3))?;
    assert_eq!(to, Gate::Open);
    assert_eq!(output, Some(3));
    assert_eq!(fsm.current_state(), Gate::Open);

    // No action attached: no output.
    let (to, output) = fsm.send_event(Input::Push, None)?;
    assert_eq!(to, Gate::Locked);
    assert_eq!(output, None);
    assert_eq!(coins.load(Ordering::SeqCst), 3);
    Ok(())
}

#[test]
fn illegal_transition_leaves_state_unchanged() -> TestResult {
    init_tracing();

    let mut fsm = turnstile().build(Gate::Locked, Arc::default())?;

    let err = fsm.send_event(Input::Push, None).unwrap_err();
    assert!(
        matches!(
            err,
            FsmError::IllegalTransition {
                state: Gate::Locked,
                event: Input::Push
            }
        ),
        "unexpected error: {err:?}"
    );
    assert_eq!(fsm.current_state(), Gate::Locked);
    Ok(())
}

#[test]
fn failed_action_leaves_state_unchanged() -> TestResult {
    init_tracing();

    let mut fsm = turnstile().build(Gate::Locked, Arc::default())?;

    let err = fsm.send_event(Input::Kick, None).unwrap_err();
    match err {
        FsmError::Action(message) => assert_eq!(message, "gate refuses to jam"),
        other => panic!("expected action failure, got {other:?}"),
    }
    assert_eq!(fsm.current_state(), Gate::Locked);
    Ok(())
}

#[test]
fn terminal_state_rejects_everything() -> TestResult {
    let definition = turnstile().seal()?;
    let mut fsm = definition.start(Gate::Jammed, Arc::default())?;

    for input in [Input::Coin, Input::Push, Input::Kick] {
        assert!(!definition.allows(Gate::Jammed, input));
        assert!(fsm.send_event(input, None).is_err());
    }
    assert_eq!(fsm.current_state(), Gate::Jammed);
    Ok(())
}

#[test]
fn seal_rejects_transition_to_undefined_state() {
    let result = FsmBuilder::<Turnstile>::new()
        .with_state(FsmState::new(Gate::Locked).on(Input::Coin, Gate::Open))
        .seal();

    match result {
        Err(FsmError::Configuration(message)) => {
            assert!(message.contains("undefined state"), "message: {message}")
        }
        other => panic!("expected configuration error, got {other:?}"),
    }
}

#[test]
fn seal_rejects_duplicate_state() {
    let result = FsmBuilder::<Turnstile>::new()
        .with_state(FsmState::new(Gate::Locked))
        .with_state(FsmState::new(Gate::Locked))
        .seal();

    assert!(matches!(result, Err(FsmError::Configuration(_))));
}

#[test]
fn seal_rejects_event_declared_twice_in_one_state() {
    let result = FsmBuilder::<Turnstile>::new()
        .with_state(
            FsmState::new(Gate::Locked)
                .on(Input::Coin, Gate::Locked)
                .on(Input::Coin, Gate::Locked),
        )
        .seal();

    assert!(matches!(result, Err(FsmError::Configuration(_))));
}

#[test]
fn start_rejects_initial_state_without_definition() -> TestResult {
    let definition = FsmBuilder::<Turnstile>::new()
        .with_state(FsmState::new(Gate::Locked))
        .seal()?;

    assert!(matches!(
        definition.start(Gate::Open, Arc::default()),
        Err(FsmError::Configuration(_))
    ));
    Ok(())
}

#[test]
fn instances_of_one_definition_are_independent() -> TestResult {
    let definition = turnstile().seal()?;
    let mut first = definition.start(Gate::Locked, Arc::default())?;
    let second = definition.start(Gate::Locked, Arc::default())?;

    first.send_event(Input::Coin, None)?;

    assert_eq!(first.current_state(), Gate::Open);
    assert_eq!(second.current_state(), Gate::Locked);
    assert_eq!(definition.target(Gate::Open, Input::Push), Some(Gate::Locked));
    Ok(())
}
