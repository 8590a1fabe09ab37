use super::{finish, step_start};
use crate::pipeline::{StateBag, Step, StepAction};
use async_trait::async_trait;
use vmforge_shared::errors::{VmforgeError, VmforgeResult};

const STEP_NAME: &str = "StepProvision";

/// Runs the configured provisioning commands on the guest, in order.
///
/// The first command with a non-zero exit code halts the build.
pub struct StepProvision {
    commands: Vec<String>,
}

impl StepProvision {
    pub fn new(commands: Vec<String>) -> Self {
        Self { commands }
    }

    async fn provision(&self, state: &StateBag) -> VmforgeResult<()> {
        let comm = state.communicator()?;
        let ui = state.ui()?;

        ui.say("Provisioning...");
        for command in &self.commands {
            let output = comm.run(command).await?;
            if !output.stdout.trim().is_empty() {
                ui.message(output.stdout.trim());
            }
            if !output.success() {
                return Err(VmforgeError::Communicator(format!(
                    "command '{}' exited with status {}: {}",
                    command,
                    output.exit_code,
                    output.stderr.trim()
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Step for StepProvision {
    fn name(&self) -> &str {
        STEP_NAME
    }

    async fn run(&mut self, state: &mut StateBag) -> StepAction {
        if self.commands.is_empty() {
            return StepAction::Continue;
        }
        step_start(state, STEP_NAME);
        let result = self.provision(state).await;
        finish(state, STEP_NAME, result)
    }
}
