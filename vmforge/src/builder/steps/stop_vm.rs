use super::{finish, step_start};
use crate::pipeline::{StateBag, Step, StepAction, keys};
use async_trait::async_trait;
use vmforge_shared::errors::VmforgeResult;

const STEP_NAME: &str = "StepStopVm";

/// Shuts the guest down before export.
#[derive(Debug, Default)]
pub struct StepStopVm;

async fn stop(state: &StateBag) -> VmforgeResult<()> {
    let driver = state.driver()?;
    let ui = state.ui()?;
    let vm_name = state.text(keys::VM_NAME)?;

    ui.say("Shutting down the virtual machine...");
    driver.stop_vm(vm_name).await?;
    ui.say("Virtual machine stopped");
    Ok(())
}

#[async_trait]
impl Step for StepStopVm {
    fn name(&self) -> &str {
        STEP_NAME
    }

    async fn run(&mut self, state: &mut StateBag) -> StepAction {
        step_start(state, STEP_NAME);
        let result = stop(state).await;
        finish(state, STEP_NAME, result)
    }
}
