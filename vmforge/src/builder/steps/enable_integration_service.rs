use super::{finish, step_start};
use crate::pipeline::{StateBag, Step, StepAction, keys};
use async_trait::async_trait;
use vmforge_shared::errors::VmforgeResult;

const STEP_NAME: &str = "StepEnableIntegrationService";

/// Enables the guest service interface so files can be copied into the VM.
#[derive(Debug, Default)]
pub struct StepEnableIntegrationService;

impl StepEnableIntegrationService {
    async fn enable(state: &StateBag) -> VmforgeResult<()> {
        let driver = state.driver()?;
        let ui = state.ui()?;
        let vm_name = state.text(keys::VM_NAME)?;

        ui.say("Enabling Integration Service...");
        driver.enable_integration_service(vm_name).await
    }
}

#[async_trait]
impl Step for StepEnableIntegrationService {
    fn name(&self) -> &str {
        STEP_NAME
    }

    async fn run(&mut self, state: &mut StateBag) -> StepAction {
        step_start(state, STEP_NAME);
        let result = Self::enable(state).await;
        finish(state, STEP_NAME, result)
    }
}
