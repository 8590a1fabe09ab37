use super::{halt, report_cleanup_error, step_start};
use crate::pipeline::{StateBag, Step, StepAction, keys};
use async_trait::async_trait;
use std::path::PathBuf;
use vmforge_shared::errors::VmforgeResult;

const STEP_NAME: &str = "StepMountDvdDrive";

/// Inserts the installation ISO into the VM's DVD drive.
pub struct StepMountDvdDrive {
    iso_path: PathBuf,
    mounted_on: Option<String>,
}

impl StepMountDvdDrive {
    pub fn new(iso_path: impl Into<PathBuf>) -> Self {
        Self {
            iso_path: iso_path.into(),
            mounted_on: None,
        }
    }

    async fn mount(&self, state: &StateBag) -> VmforgeResult<String> {
        let driver = state.driver()?;
        let ui = state.ui()?;
        let vm_name = state.text(keys::VM_NAME)?;

        ui.say(&format!("Mounting dvd drive {}...", self.iso_path.display()));
        driver.mount_dvd(vm_name, &self.iso_path).await?;
        Ok(vm_name.to_string())
    }
}

#[async_trait]
impl Step for StepMountDvdDrive {
    fn name(&self) -> &str {
        STEP_NAME
    }

    async fn run(&mut self, state: &mut StateBag) -> StepAction {
        step_start(state, STEP_NAME);

        match self.mount(state).await {
            Ok(vm_name) => {
                self.mounted_on = Some(vm_name);
                StepAction::Continue
            }
            Err(e) => halt(state, STEP_NAME, e),
        }
    }

    async fn cleanup(&mut self, state: &mut StateBag) {
        let Some(vm_name) = self.mounted_on.take() else {
            return;
        };
        let Ok(driver) = state.driver() else {
            return;
        };
        if let Ok(ui) = state.ui() {
            ui.say("Unmounting dvd drive...");
        }
        if let Err(e) = driver.unmount_dvd(&vm_name).await {
            report_cleanup_error(state, STEP_NAME, "unmounting dvd drive", &e);
        }
    }
}
