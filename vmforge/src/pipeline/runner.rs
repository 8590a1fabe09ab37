//! Sequential step runners.
//!
//! Both runners share one execution loop:
//!
//! ```text
//! for step in steps:
//!     cancelled?  -> stop (Cancelled)
//!     push step onto the cleanup stack, run it
//!     cancelled?  -> stop (Cancelled)
//!     Halt        -> stop (Halted)
//!     AskForInput -> pause until the operator proceeds
//!     debug mode  -> pause after the step
//! write the terminal marker
//! pop the cleanup stack: cleanup(k), cleanup(k-1), ..., cleanup(1)
//! ```

use super::metrics::{PipelineMetrics, RunOutcome, StepMetrics};
use super::state::{StateBag, keys};
use super::step::{BoxedStep, StepAction};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Where the runner paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseLocation {
    /// Debug mode, after a step's `run` returned.
    AfterRun,
    /// A step returned [`StepAction::AskForInput`].
    InputRequested,
}

/// Hook consulted when the runner pauses between steps.
///
/// Returning lets the build proceed. The runner races the pause against
/// cancellation, so an implementation may wait indefinitely.
#[async_trait]
pub trait DebugPause: Send + Sync {
    async fn pause(&self, location: PauseLocation, step: &str, state: &StateBag);
}

/// Pauses by asking the operator through the build's UI.
#[derive(Debug, Default, Clone, Copy)]
pub struct UiPause;

#[async_trait]
impl DebugPause for UiPause {
    async fn pause(&self, location: PauseLocation, step: &str, state: &StateBag) {
        let ui = match state.ui() {
            Ok(ui) => ui,
            Err(e) => {
                tracing::warn!(step = %step, "Cannot pause without a UI: {}", e);
                return;
            }
        };

        let query = match location {
            PauseLocation::AfterRun => format!(
                "Pausing after run of step '{}'. Press enter to continue.",
                step
            ),
            PauseLocation::InputRequested => format!(
                "Step '{}' is waiting for input. Press enter to continue.",
                step
            ),
        };

        if let Err(e) = ui.ask(&query).await {
            tracing::warn!(step = %step, "Pause prompt failed, continuing: {}", e);
        }
    }
}

/// Executes an ordered step list against a state bag.
#[async_trait]
pub trait Runner: Send {
    /// Run every step until completion, halt or cancellation, then clean up
    /// the started steps in reverse order.
    async fn run(&mut self, state: &mut StateBag) -> PipelineMetrics;

    /// Token that cancels this runner when triggered.
    fn cancel_token(&self) -> CancellationToken;

    /// Request cancellation. Observed before and after each step.
    fn cancel(&self) {
        tracing::info!("Cancelling the step runner...");
        self.cancel_token().cancel();
    }
}

/// Runs steps back to back.
pub struct BasicRunner {
    steps: Vec<BoxedStep>,
    cancel: CancellationToken,
}

impl BasicRunner {
    pub fn new(steps: Vec<BoxedStep>) -> Self {
        Self::with_cancellation(steps, CancellationToken::new())
    }

    pub fn with_cancellation(steps: Vec<BoxedStep>, cancel: CancellationToken) -> Self {
        Self { steps, cancel }
    }
}

#[async_trait]
impl Runner for BasicRunner {
    async fn run(&mut self, state: &mut StateBag) -> PipelineMetrics {
        execute(&mut self.steps, &self.cancel, None, state).await
    }

    fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Runs steps like [`BasicRunner`], pausing after each step for inspection.
///
/// Pausing changes only when the next step starts, never which steps run or
/// the cleanup order.
pub struct DebugRunner {
    steps: Vec<BoxedStep>,
    cancel: CancellationToken,
    pause: Arc<dyn DebugPause>,
}

impl DebugRunner {
    pub fn new(steps: Vec<BoxedStep>, pause: Arc<dyn DebugPause>) -> Self {
        Self::with_cancellation(steps, pause, CancellationToken::new())
    }

    pub fn with_cancellation(
        steps: Vec<BoxedStep>,
        pause: Arc<dyn DebugPause>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            steps,
            cancel,
            pause,
        }
    }
}

#[async_trait]
impl Runner for DebugRunner {
    async fn run(&mut self, state: &mut StateBag) -> PipelineMetrics {
        let pause = Arc::clone(&self.pause);
        execute(&mut self.steps, &self.cancel, Some(pause.as_ref()), state).await
    }

    fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

async fn execute(
    steps: &mut [BoxedStep],
    cancel: &CancellationToken,
    debug_pause: Option<&dyn DebugPause>,
    state: &mut StateBag,
) -> PipelineMetrics {
    let total_start = Instant::now();
    state.attach_cancellation(cancel.clone());

    let ui_pause = UiPause;
    let mut started: Vec<usize> = Vec::with_capacity(steps.len());
    let mut step_metrics = Vec::with_capacity(steps.len());
    let mut outcome = RunOutcome::Completed;

    for (index, step) in steps.iter_mut().enumerate() {
        if cancel.is_cancelled() {
            outcome = RunOutcome::Cancelled;
            break;
        }

        let name = step.name().to_string();
        tracing::debug!(step = %name, index, "Running step");

        started.push(index);
        let step_start = Instant::now();
        let action = step.run(state).await;
        step_metrics.push(StepMetrics {
            name: name.clone(),
            action,
            duration_ms: step_start.elapsed().as_millis(),
        });

        if cancel.is_cancelled() {
            outcome = RunOutcome::Cancelled;
            break;
        }

        let location = match action {
            StepAction::Continue => debug_pause.map(|_| PauseLocation::AfterRun),
            StepAction::Halt => {
                tracing::debug!(step = %name, "Step halted the pipeline");
                outcome = RunOutcome::Halted;
                break;
            }
            StepAction::AskForInput => Some(PauseLocation::InputRequested),
        };

        if let Some(location) = location {
            let pause: &dyn DebugPause = match debug_pause {
                Some(pause) => pause,
                None => &ui_pause,
            };
            let proceeded = tokio::select! {
                _ = cancel.cancelled() => false,
                _ = pause.pause(location, &name, state) => true,
            };
            if !proceeded {
                outcome = RunOutcome::Cancelled;
                break;
            }
        }
    }

    match outcome {
        RunOutcome::Completed => {}
        RunOutcome::Halted => state.put(keys::HALTED, true),
        RunOutcome::Cancelled => {
            tracing::info!("Pipeline cancelled, cleaning up started steps");
            state.put(keys::CANCELLED, true);
        }
    }

    let decided_error = state.error().cloned();

    let cleanup_start = Instant::now();
    while let Some(index) = started.pop() {
        let step = &mut steps[index];
        tracing::debug!(step = %step.name(), "Cleaning up step");
        step.cleanup(state).await;
    }
    let cleanup_duration_ms = cleanup_start.elapsed().as_millis();

    // The forward pass decides the build error; cleanup cannot change it.
    match decided_error {
        Some(err) => {
            if state.error() != Some(&err) {
                tracing::warn!("Restoring build error overwritten during cleanup");
                state.put_error(err);
            }
        }
        None => {
            if state.error().is_some()
                && let Some(late) = state.discard(keys::ERROR)
            {
                tracing::warn!(error = ?late, "Ignoring error recorded during cleanup");
            }
        }
    }

    PipelineMetrics {
        outcome,
        total_duration_ms: total_start.elapsed().as_millis(),
        cleanup_duration_ms,
        steps: step_metrics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Step;
    use crate::ui::testing::RecordingUi;
    use std::sync::Mutex;
    use std::time::Duration;
    use vmforge_shared::errors::VmforgeError;

    type Journal = Arc<Mutex<Vec<String>>>;

    struct RecordStep {
        name: String,
        journal: Journal,
        action: StepAction,
        error: Option<String>,
        cleanup_error: Option<String>,
        cancel_on_run: bool,
    }

    impl RecordStep {
        fn new(name: &str, journal: &Journal) -> Self {
            Self {
                name: name.to_string(),
                journal: Arc::clone(journal),
                action: StepAction::Continue,
                error: None,
                cleanup_error: None,
                cancel_on_run: false,
            }
        }

        fn halting(name: &str, journal: &Journal, error: &str) -> Self {
            Self {
                action: StepAction::Halt,
                error: Some(error.to_string()),
                ..Self::new(name, journal)
            }
        }

        fn boxed(self) -> BoxedStep {
            Box::new(self)
        }
    }

    #[async_trait]
    impl Step for RecordStep {
        fn name(&self) -> &str {
            &self.name
        }

        async fn run(&mut self, state: &mut StateBag) -> StepAction {
            self.journal
                .lock()
                .unwrap()
                .push(format!("run:{}", self.name));
            if let Some(msg) = &self.error {
                state.put_error(VmforgeError::step(
                    self.name.clone(),
                    VmforgeError::Storage(msg.clone()),
                ));
            }
            if self.cancel_on_run {
                state.cancellation().cancel();
            }
            self.action
        }

        async fn cleanup(&mut self, state: &mut StateBag) {
            self.journal
                .lock()
                .unwrap()
                .push(format!("cleanup:{}", self.name));
            if let Some(msg) = &self.cleanup_error {
                state.put_error(VmforgeError::Storage(msg.clone()));
            }
        }
    }

    fn entries(journal: &Journal, prefix: &str) -> Vec<String> {
        journal
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| e.strip_prefix(prefix).map(str::to_string))
            .collect()
    }

    fn names(range: std::ops::RangeInclusive<usize>) -> Vec<String> {
        range.map(|i| format!("s{}", i)).collect()
    }

    #[tokio::test]
    async fn test_all_continue_runs_everything_and_cleans_up_in_reverse() {
        let journal = Journal::default();
        let steps = (1..=4)
            .map(|i| RecordStep::new(&format!("s{}", i), &journal).boxed())
            .collect();
        let mut runner = BasicRunner::new(steps);
        let mut state = StateBag::new();

        let metrics = runner.run(&mut state).await;

        assert_eq!(metrics.outcome, RunOutcome::Completed);
        assert_eq!(entries(&journal, "run:"), names(1..=4));
        let mut reversed = names(1..=4);
        reversed.reverse();
        assert_eq!(entries(&journal, "cleanup:"), reversed);
        assert!(!state.is_set(keys::HALTED));
        assert!(!state.is_set(keys::CANCELLED));
        assert!(state.error().is_none());
        assert_eq!(metrics.steps.len(), 4);
        assert!(metrics.step_duration_ms("s3").is_some());
    }

    #[tokio::test]
    async fn test_halt_at_k_runs_and_cleans_only_started_steps() {
        for n in 1..=6 {
            for k in 1..=n {
                let journal = Journal::default();
                let steps = (1..=n)
                    .map(|i| {
                        let name = format!("s{}", i);
                        if i == k {
                            RecordStep::halting(&name, &journal, "failed").boxed()
                        } else {
                            RecordStep::new(&name, &journal).boxed()
                        }
                    })
                    .collect();
                let mut runner = BasicRunner::new(steps);
                let mut state = StateBag::new();

                let metrics = runner.run(&mut state).await;

                assert_eq!(metrics.outcome, RunOutcome::Halted, "n={} k={}", n, k);
                assert_eq!(entries(&journal, "run:"), names(1..=k));
                let mut reversed = names(1..=k);
                reversed.reverse();
                assert_eq!(entries(&journal, "cleanup:"), reversed, "n={} k={}", n, k);
                assert!(state.is_set(keys::HALTED));
                assert!(!state.is_set(keys::CANCELLED));
            }
        }
    }

    #[tokio::test]
    async fn test_disk_full_scenario() {
        let journal = Journal::default();
        let steps = vec![
            RecordStep::new("A", &journal).boxed(),
            RecordStep::new("B", &journal).boxed(),
            RecordStep::halting("C", &journal, "disk full").boxed(),
            RecordStep::new("D", &journal).boxed(),
            RecordStep::new("E", &journal).boxed(),
        ];
        let mut runner = BasicRunner::new(steps);
        let mut state = StateBag::new();

        let metrics = runner.run(&mut state).await;

        assert_eq!(metrics.outcome, RunOutcome::Halted);
        assert_eq!(entries(&journal, "run:"), vec!["A", "B", "C"]);
        assert_eq!(entries(&journal, "cleanup:"), vec!["C", "B", "A"]);
        assert!(state.is_set(keys::HALTED));
        let err = state.error().expect("error recorded");
        assert!(err.to_string().contains("disk full"));
    }

    #[tokio::test]
    async fn test_cancel_between_steps_is_cancelled_not_halted() {
        for k in 1..=4 {
            let journal = Journal::default();
            let steps = (1..=5)
                .map(|i| {
                    let mut step = RecordStep::new(&format!("s{}", i), &journal);
                    step.cancel_on_run = i == k;
                    step.boxed()
                })
                .collect();
            let mut runner = BasicRunner::new(steps);
            let mut state = StateBag::new();

            let metrics = runner.run(&mut state).await;

            assert_eq!(metrics.outcome, RunOutcome::Cancelled);
            assert_eq!(entries(&journal, "run:"), names(1..=k));
            let mut reversed = names(1..=k);
            reversed.reverse();
            assert_eq!(entries(&journal, "cleanup:"), reversed);
            assert!(state.is_set(keys::CANCELLED));
            assert!(!state.is_set(keys::HALTED));
        }
    }

    #[tokio::test]
    async fn test_cancel_wins_over_halt() {
        let journal = Journal::default();
        let mut halting = RecordStep::halting("s1", &journal, "interrupted");
        halting.cancel_on_run = true;
        let mut runner = BasicRunner::new(vec![
            halting.boxed(),
            RecordStep::new("s2", &journal).boxed(),
        ]);
        let mut state = StateBag::new();

        let metrics = runner.run(&mut state).await;

        assert_eq!(metrics.outcome, RunOutcome::Cancelled);
        assert!(state.is_set(keys::CANCELLED));
        assert!(!state.is_set(keys::HALTED));
    }

    #[tokio::test]
    async fn test_cancel_before_run_starts_nothing() {
        let journal = Journal::default();
        let mut runner = BasicRunner::new(vec![RecordStep::new("s1", &journal).boxed()]);
        runner.cancel();
        let mut state = StateBag::new();

        let metrics = runner.run(&mut state).await;

        assert_eq!(metrics.outcome, RunOutcome::Cancelled);
        assert!(journal.lock().unwrap().is_empty());
        assert!(metrics.steps.is_empty());
    }

    struct WaitForCancel;

    #[async_trait]
    impl Step for WaitForCancel {
        fn name(&self) -> &str {
            "wait"
        }

        async fn run(&mut self, state: &mut StateBag) -> StepAction {
            state.cancellation().cancelled().await;
            StepAction::Halt
        }
    }

    #[tokio::test]
    async fn test_external_cancel_during_long_step() {
        let journal = Journal::default();
        let mut runner = BasicRunner::new(vec![
            RecordStep::new("s1", &journal).boxed(),
            Box::new(WaitForCancel),
            RecordStep::new("s3", &journal).boxed(),
        ]);
        let token = runner.cancel_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });
        let mut state = StateBag::new();

        let metrics = runner.run(&mut state).await;

        assert_eq!(metrics.outcome, RunOutcome::Cancelled);
        assert_eq!(entries(&journal, "run:"), vec!["s1"]);
        assert_eq!(entries(&journal, "cleanup:"), vec!["s1"]);
    }

    #[tokio::test]
    async fn test_cleanup_cannot_replace_forward_error() {
        let journal = Journal::default();
        let mut first = RecordStep::new("s1", &journal);
        first.cleanup_error = Some("switch busy".into());
        let mut runner = BasicRunner::new(vec![
            first.boxed(),
            RecordStep::halting("s2", &journal, "disk full").boxed(),
        ]);
        let mut state = StateBag::new();

        runner.run(&mut state).await;

        let err = state.error().expect("error recorded");
        assert!(err.to_string().contains("disk full"));
    }

    #[tokio::test]
    async fn test_cleanup_error_does_not_fail_completed_run() {
        let journal = Journal::default();
        let mut step = RecordStep::new("s1", &journal);
        step.cleanup_error = Some("switch busy".into());
        let mut runner = BasicRunner::new(vec![step.boxed()]);
        let mut state = StateBag::new();

        let metrics = runner.run(&mut state).await;

        assert_eq!(metrics.outcome, RunOutcome::Completed);
        assert!(state.error().is_none());
    }

    #[derive(Default)]
    struct RecordPause {
        pauses: Mutex<Vec<(PauseLocation, String)>>,
    }

    #[async_trait]
    impl DebugPause for RecordPause {
        async fn pause(&self, location: PauseLocation, step: &str, _state: &StateBag) {
            self.pauses
                .lock()
                .unwrap()
                .push((location, step.to_string()));
        }
    }

    #[tokio::test]
    async fn test_debug_runner_pauses_after_each_step() {
        let journal = Journal::default();
        let pause = Arc::new(RecordPause::default());
        let mut runner = DebugRunner::new(
            vec![
                RecordStep::new("s1", &journal).boxed(),
                RecordStep::new("s2", &journal).boxed(),
                RecordStep::halting("s3", &journal, "boom").boxed(),
                RecordStep::new("s4", &journal).boxed(),
            ],
            pause.clone(),
        );
        let mut state = StateBag::new();

        let metrics = runner.run(&mut state).await;

        assert_eq!(metrics.outcome, RunOutcome::Halted);
        let pauses = pause.pauses.lock().unwrap().clone();
        assert_eq!(
            pauses,
            vec![
                (PauseLocation::AfterRun, "s1".to_string()),
                (PauseLocation::AfterRun, "s2".to_string()),
            ]
        );
        assert_eq!(entries(&journal, "cleanup:"), vec!["s3", "s2", "s1"]);
    }

    struct CancellingPause;

    #[async_trait]
    impl DebugPause for CancellingPause {
        async fn pause(&self, _location: PauseLocation, _step: &str, state: &StateBag) {
            state.cancellation().cancel();
            std::future::pending::<()>().await;
        }
    }

    #[tokio::test]
    async fn test_cancel_while_paused() {
        let journal = Journal::default();
        let mut runner = DebugRunner::new(
            vec![
                RecordStep::new("s1", &journal).boxed(),
                RecordStep::new("s2", &journal).boxed(),
            ],
            Arc::new(CancellingPause),
        );
        let mut state = StateBag::new();

        let metrics = runner.run(&mut state).await;

        assert_eq!(metrics.outcome, RunOutcome::Cancelled);
        assert_eq!(entries(&journal, "run:"), vec!["s1"]);
        assert_eq!(entries(&journal, "cleanup:"), vec!["s1"]);
    }

    #[tokio::test]
    async fn test_ask_for_input_prompts_ui_then_continues() {
        let journal = Journal::default();
        let mut asking = RecordStep::new("s1", &journal);
        asking.action = StepAction::AskForInput;
        let mut runner = BasicRunner::new(vec![
            asking.boxed(),
            RecordStep::new("s2", &journal).boxed(),
        ]);
        let ui = Arc::new(RecordingUi::default());
        let mut state = StateBag::new();
        state.put(keys::UI, ui.clone() as Arc<dyn crate::ui::Ui>);

        let metrics = runner.run(&mut state).await;

        assert_eq!(metrics.outcome, RunOutcome::Completed);
        assert_eq!(entries(&journal, "run:"), vec!["s1", "s2"]);
        let asked = ui.asked();
        assert_eq!(asked.len(), 1);
        assert!(asked[0].contains("'s1'"));
    }
}
