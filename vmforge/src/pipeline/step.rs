//! Step contract for pipeline execution.

use super::state::StateBag;
use async_trait::async_trait;

/// What the runner should do after a step's `run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    /// Proceed to the next step.
    Continue,
    /// Stop forward progress. The step records the cause under `error`.
    Halt,
    /// Pause for operator input, then proceed.
    AskForInput,
}

/// A unit of work in a build pipeline.
///
/// `run` never returns an error: a failing step records it with
/// [`StateBag::put_error`], reports it to the UI and returns
/// [`StepAction::Halt`]. `cleanup` is called once, in reverse order, for every
/// step whose `run` was started, whatever the outcome of the build.
#[async_trait]
pub trait Step: Send {
    /// Human-readable step name for logs, metrics and debug pauses.
    fn name(&self) -> &str;

    async fn run(&mut self, state: &mut StateBag) -> StepAction;

    /// Best-effort teardown. Failures are logged, never propagated.
    async fn cleanup(&mut self, _state: &mut StateBag) {}
}

pub type BoxedStep = Box<dyn Step>;
