use super::step::StepAction;

/// Terminal status of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Halted,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct StepMetrics {
    pub name: String,
    pub action: StepAction,
    pub duration_ms: u128,
}

#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub outcome: RunOutcome,
    pub total_duration_ms: u128,
    pub cleanup_duration_ms: u128,
    pub steps: Vec<StepMetrics>,
}

impl PipelineMetrics {
    pub fn step_duration_ms(&self, name: &str) -> Option<u128> {
        self.steps
            .iter()
            .find(|step| step.name == name)
            .map(|step| step.duration_ms)
    }

    /// Log a one-line summary per step.
    pub fn log_steps(&self) {
        for step in &self.steps {
            tracing::debug!(
                step = %step.name,
                action = ?step.action,
                duration_ms = step.duration_ms,
                "Step finished"
            );
        }
        tracing::info!(
            outcome = ?self.outcome,
            steps = self.steps.len(),
            total_duration_ms = self.total_duration_ms,
            cleanup_duration_ms = self.cleanup_duration_ms,
            "Pipeline finished"
        );
    }
}
