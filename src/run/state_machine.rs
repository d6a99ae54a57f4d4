// src/run/state_machine.rs

//! The Run lifecycle expressed as an [`fsm`](crate::fsm) catalogue.
//!
//! Every non-terminal state accepts `ERROR`; `DELETED` has no outgoing
//! transitions. Side effects delegate to the Run's runtime and are skipped
//! entirely for local-execution Runs, which the client drives itself.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::entities::{ConfigurationProvider, CredentialsProvider, EntityProvider, Executable, ExecutableType};
use crate::errors::{EngineError, Result};
use crate::fsm::{FsmBuilder, FsmDefinition, FsmState, Machine, MachineError, TransitionInput};
use crate::run::{Run, RunSpec, StatusFragment};
use crate::runnable::Runnable;
use crate::runtime::Runtime;
use crate::types::{Event, State};

/// Type bundle for the Run machine.
#[derive(Debug)]
pub struct RunMachine;

impl Machine for RunMachine {
    type State = State;
    type Event = Event;
    type Context = RunContext;
    type Payload = Runnable;
    type Output = TransitionOutput;
    type Error = EngineError;
}

/// Read-only inputs for one evaluation of the machine.
pub struct RunContext {
    pub run: Run,
    pub runtime: Arc<dyn Runtime>,
    pub entities: Arc<dyn EntityProvider>,
    pub credentials: Arc<dyn CredentialsProvider>,
    pub configurations: Arc<dyn ConfigurationProvider>,
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("run", &self.run.id)
            .field("runtime", &self.runtime.kind())
            .finish_non_exhaustive()
    }
}

/// What a transition hands back for the caller to apply.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutput {
    /// Replaces the Run spec (BUILD).
    Spec(RunSpec),
    /// Goes onto the dispatch queue.
    Runnable(Runnable),
    /// Merged into the Run status.
    Status(StatusFragment),
}

type Input = TransitionInput<RunMachine>;
type Step = fn(&Input, &RunContext) -> Result<Option<TransitionOutput>>;

/// Wrap a side effect so it is skipped for local-execution Runs.
fn remote(step: Step) -> impl Fn(&Input, &RunContext) -> Result<Option<TransitionOutput>> + Send + Sync + 'static {
    move |input: &Input, ctx: &RunContext| {
        if ctx.run.is_local() {
            debug!(run_id = %ctx.run.id, event = %input.event, "local execution; side effect skipped");
            return Ok(None);
        }
        step(input, ctx)
    }
}

fn build(_: &Input, ctx: &RunContext) -> Result<Option<TransitionOutput>> {
    let task = ctx.entities.get_task(&ctx.run.spec.task)?;
    let executable = match ctx.runtime.executable_type() {
        ExecutableType::Function => Executable::Function(ctx.entities.get_function(&task.function)?),
        ExecutableType::Workflow => Executable::Workflow(ctx.entities.get_workflow(&task.function)?),
    };
    let spec = ctx.runtime.build(&executable, &task, &ctx.run)?;
    Ok(Some(TransitionOutput::Spec(spec)))
}

fn run(_: &Input, ctx: &RunContext) -> Result<Option<TransitionOutput>> {
    let mut runnable = ctx.runtime.run(&ctx.run)?;
    if runnable.accepts_credentials() {
        runnable.inject_credentials(ctx.credentials.get_credentials(ctx.run.user.as_deref())?);
    }
    if runnable.accepts_configurations() {
        runnable.inject_configurations(ctx.configurations.get_configurations()?);
    }
    Ok(Some(TransitionOutput::Runnable(runnable)))
}

fn stop(_: &Input, ctx: &RunContext) -> Result<Option<TransitionOutput>> {
    Ok(Some(TransitionOutput::Runnable(ctx.runtime.stop(&ctx.run)?)))
}

fn resume(_: &Input, ctx: &RunContext) -> Result<Option<TransitionOutput>> {
    Ok(Some(TransitionOutput::Runnable(ctx.runtime.resume(&ctx.run)?)))
}

fn delete(_: &Input, ctx: &RunContext) -> Result<Option<TransitionOutput>> {
    Ok(ctx.runtime.delete(&ctx.run)?.map(TransitionOutput::Runnable))
}

fn status(fragment: Option<StatusFragment>) -> Option<TransitionOutput> {
    fragment
        .filter(|f| !f.is_empty())
        .map(TransitionOutput::Status)
}

fn on_running(input: &Input, ctx: &RunContext) -> Result<Option<TransitionOutput>> {
    Ok(status(ctx.runtime.on_running(&ctx.run, input.payload.as_ref())?))
}

fn on_complete(input: &Input, ctx: &RunContext) -> Result<Option<TransitionOutput>> {
    Ok(status(ctx.runtime.on_complete(&ctx.run, input.payload.as_ref())?))
}

fn on_error(input: &Input, ctx: &RunContext) -> Result<Option<TransitionOutput>> {
    Ok(status(ctx.runtime.on_error(&ctx.run, input.payload.as_ref())?))
}

fn on_stopped(input: &Input, ctx: &RunContext) -> Result<Option<TransitionOutput>> {
    Ok(status(ctx.runtime.on_stopped(&ctx.run, input.payload.as_ref())?))
}

fn on_deleted(input: &Input, ctx: &RunContext) -> Result<Option<TransitionOutput>> {
    Ok(status(ctx.runtime.on_deleted(&ctx.run, input.payload.as_ref())?))
}

/// The sealed Run state machine.
pub fn run_state_machine() -> std::result::Result<FsmDefinition<RunMachine>, MachineError<RunMachine>> {
    FsmBuilder::new()
        .with_state(
            FsmState::new(State::Created)
                .on_with(Event::Build, State::Built, remote(build))
                .on(Event::Error, State::Error)
                .on(Event::Deleting, State::Deleting),
        )
        .with_state(
            FsmState::new(State::Built)
                .on_with(Event::Run, State::Ready, remote(run))
                .on_with(Event::Error, State::Error, remote(on_error))
                .on(Event::Deleting, State::Deleting),
        )
        .with_state(
            FsmState::new(State::Ready)
                .on(Event::Pending, State::Ready)
                .on_with(Event::Execute, State::Running, remote(on_running))
                .on_with(Event::Stop, State::Stop, remote(stop))
                .on_with(Event::Error, State::Error, remote(on_error))
                .on_with(Event::Deleting, State::Deleting, remote(delete)),
        )
        .with_state(
            FsmState::new(State::Running)
                .on_with(Event::Loop, State::Running, remote(on_running))
                .on_with(Event::Execute, State::Running, remote(on_running))
                .on_with(Event::Complete, State::Completed, remote(on_complete))
                .on_with(Event::Stop, State::Stop, remote(stop))
                .on_with(Event::Error, State::Error, remote(on_error))
                .on_with(Event::Deleting, State::Deleting, remote(delete)),
        )
        .with_state(
            FsmState::new(State::Stop)
                .on_with(Event::Stopped, State::Stopped, remote(on_stopped))
                .on_with(Event::Error, State::Error, remote(on_error))
                .on_with(Event::Deleting, State::Deleting, remote(delete)),
        )
        .with_state(
            FsmState::new(State::Stopped)
                .on_with(Event::Resume, State::Ready, remote(resume))
                .on(Event::Error, State::Error)
                .on_with(Event::Deleting, State::Deleting, remote(delete)),
        )
        .with_state(
            FsmState::new(State::Completed)
                .on(Event::Error, State::Error)
                .on_with(Event::Deleting, State::Deleting, remote(delete)),
        )
        .with_state(
            FsmState::new(State::Error)
                .on(Event::Error, State::Error)
                .on_with(Event::Deleting, State::Deleting, remote(delete)),
        )
        .with_state(
            FsmState::new(State::Deleting)
                .on_with(Event::Deleting, State::Deleted, remote(on_deleted))
                .on(Event::Error, State::Error),
        )
        .with_state(FsmState::new(State::Deleted))
        .seal()
}
