use super::{halt, report_cleanup_error, step_start};
use crate::pipeline::{StateBag, Step, StepAction, keys};
use async_trait::async_trait;
use vmforge_shared::errors::VmforgeResult;

const STEP_NAME: &str = "StepStartVm";

/// Boots the VM from the mounted installation media.
#[derive(Debug, Default)]
pub struct StepStartVm {
    started_vm: Option<String>,
}

impl StepStartVm {
    pub fn new() -> Self {
        Self::default()
    }
}

async fn start(state: &StateBag) -> VmforgeResult<String> {
    let driver = state.driver()?;
    let ui = state.ui()?;
    let vm_name = state.text(keys::VM_NAME)?;

    ui.say("Starting the virtual machine...");
    driver.start_vm(vm_name).await?;
    Ok(vm_name.to_string())
}

#[async_trait]
impl Step for StepStartVm {
    fn name(&self) -> &str {
        STEP_NAME
    }

    async fn run(&mut self, state: &mut StateBag) -> StepAction {
        step_start(state, STEP_NAME);

        match start(state).await {
            Ok(vm_name) => {
                self.started_vm = Some(vm_name);
                StepAction::Continue
            }
            Err(e) => halt(state, STEP_NAME, e),
        }
    }

    async fn cleanup(&mut self, state: &mut StateBag) {
        let Some(vm_name) = self.started_vm.take() else {
            return;
        };
        let Ok(driver) = state.driver() else {
            return;
        };

        match driver.is_running(&vm_name).await {
            Ok(false) => {}
            Ok(true) => {
                if let Ok(ui) = state.ui() {
                    ui.say("Stopping virtual machine...");
                }
                if let Err(e) = driver.stop_vm(&vm_name).await {
                    report_cleanup_error(state, STEP_NAME, "stopping virtual machine", &e);
                }
            }
            Err(e) => report_cleanup_error(state, STEP_NAME, "querying virtual machine state", &e),
        }
    }
}
