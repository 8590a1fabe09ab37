use super::{halt, report_cleanup_error, step_start};
use crate::pipeline::{StateBag, Step, StepAction, keys};
use async_trait::async_trait;
use vmforge_shared::errors::VmforgeResult;

const STEP_NAME: &str = "StepCreateVm";

/// Creates the VM and its disk inside the build's temp directory.
///
/// Reads `tempDir` and `switchName`; publishes `vmName`.
pub struct StepCreateVm {
    vm_name: String,
    ram_size_mb: u64,
    disk_size_gb: u64,
    created: bool,
}

impl StepCreateVm {
    pub fn new(vm_name: impl Into<String>, ram_size_mb: u64, disk_size_gb: u64) -> Self {
        Self {
            vm_name: vm_name.into(),
            ram_size_mb,
            disk_size_gb,
            created: false,
        }
    }

    async fn create(&self, state: &StateBag) -> VmforgeResult<()> {
        let driver = state.driver()?;
        let ui = state.ui()?;
        let temp_dir = state.path(keys::TEMP_DIR)?;
        let switch_name = state.text(keys::SWITCH_NAME)?;

        ui.say("Creating virtual machine...");
        driver
            .create_vm(
                &self.vm_name,
                temp_dir,
                self.ram_size_mb,
                self.disk_size_gb,
                switch_name,
            )
            .await
    }
}

#[async_trait]
impl Step for StepCreateVm {
    fn name(&self) -> &str {
        STEP_NAME
    }

    async fn run(&mut self, state: &mut StateBag) -> StepAction {
        step_start(state, STEP_NAME);

        match self.create(state).await {
            Ok(()) => {
                self.created = true;
                state.put(keys::VM_NAME, self.vm_name.clone());
                StepAction::Continue
            }
            Err(e) => halt(state, STEP_NAME, e),
        }
    }

    async fn cleanup(&mut self, state: &mut StateBag) {
        if !self.created {
            return;
        }
        let Ok(driver) = state.driver() else {
            return;
        };
        if let Ok(ui) = state.ui() {
            ui.say("Unregistering and deleting virtual machine...");
        }
        if let Err(e) = driver.delete_vm(&self.vm_name).await {
            report_cleanup_error(state, STEP_NAME, "deleting virtual machine", &e);
        }
    }
}
