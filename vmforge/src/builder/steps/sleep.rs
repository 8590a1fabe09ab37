use super::step_start;
use crate::pipeline::{StateBag, Step, StepAction};
use async_trait::async_trait;
use std::time::Duration;

const STEP_NAME: &str = "StepSleep";

/// Waits a fixed time, e.g. for the unattended OS install to finish.
///
/// Cancellation ends the wait early.
pub struct StepSleep {
    duration: Duration,
    action_name: String,
}

impl StepSleep {
    pub fn new(duration: Duration, action_name: impl Into<String>) -> Self {
        Self {
            duration,
            action_name: action_name.into(),
        }
    }

    pub fn minutes(minutes: u64, action_name: impl Into<String>) -> Self {
        Self::new(Duration::from_secs(minutes.saturating_mul(60)), action_name)
    }
}

#[async_trait]
impl Step for StepSleep {
    fn name(&self) -> &str {
        STEP_NAME
    }

    async fn run(&mut self, state: &mut StateBag) -> StepAction {
        step_start(state, STEP_NAME);

        if let Ok(ui) = state.ui() {
            let message = if self.action_name.is_empty() {
                format!("Waiting {}s...", self.duration.as_secs())
            } else {
                format!("{}. Waiting {}s...", self.action_name, self.duration.as_secs())
            };
            ui.say(&message);
        }

        let cancel = state.cancellation();
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(action = %self.action_name, "Wait interrupted by cancellation");
                StepAction::Halt
            }
            _ = tokio::time::sleep(self.duration) => StepAction::Continue,
        }
    }
}
