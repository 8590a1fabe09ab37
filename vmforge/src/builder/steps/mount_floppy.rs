use super::{halt, report_cleanup_error, step_start};
use crate::pipeline::{StateBag, Step, StepAction, keys};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use vmforge_shared::errors::VmforgeResult;

const STEP_NAME: &str = "StepMountFloppyDrive";

/// Attaches the answer-file floppy image, when one is configured.
pub struct StepMountFloppyDrive {
    floppy_path: Option<PathBuf>,
    mounted_on: Option<String>,
}

impl StepMountFloppyDrive {
    pub fn new(floppy_path: Option<PathBuf>) -> Self {
        Self {
            floppy_path,
            mounted_on: None,
        }
    }
}

async fn mount(state: &StateBag, floppy_path: &Path) -> VmforgeResult<String> {
    let driver = state.driver()?;
    let ui = state.ui()?;
    let vm_name = state.text(keys::VM_NAME)?;

    ui.say(&format!("Mounting floppy drive {}...", floppy_path.display()));
    driver.mount_floppy(vm_name, floppy_path).await?;
    Ok(vm_name.to_string())
}

#[async_trait]
impl Step for StepMountFloppyDrive {
    fn name(&self) -> &str {
        STEP_NAME
    }

    async fn run(&mut self, state: &mut StateBag) -> StepAction {
        let Some(floppy_path) = &self.floppy_path else {
            tracing::debug!("No floppy image configured, skipping");
            return StepAction::Continue;
        };
        step_start(state, STEP_NAME);

        match mount(state, floppy_path).await {
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
        if let Err(e) = driver.unmount_floppy(&vm_name).await {
            report_cleanup_error(state, STEP_NAME, "unmounting floppy drive", &e);
        }
    }
}
