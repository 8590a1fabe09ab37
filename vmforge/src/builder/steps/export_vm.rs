use super::{finish, step_start};
use crate::pipeline::{StateBag, Step, StepAction, keys};
use async_trait::async_trait;
use std::path::PathBuf;
use vmforge_shared::errors::VmforgeResult;

const STEP_NAME: &str = "StepExportVm";

/// Exports the finished VM into the output directory.
pub struct StepExportVm {
    output_dir: PathBuf,
}

impl StepExportVm {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    async fn export(&self, state: &StateBag) -> VmforgeResult<()> {
        let driver = state.driver()?;
        let ui = state.ui()?;
        let vm_name = state.text(keys::VM_NAME)?;

        ui.say(&format!(
            "Exporting virtual machine to {}...",
            self.output_dir.display()
        ));
        driver.export_vm(vm_name, &self.output_dir).await
    }
}

#[async_trait]
impl Step for StepExportVm {
    fn name(&self) -> &str {
        STEP_NAME
    }

    async fn run(&mut self, state: &mut StateBag) -> StepAction {
        step_start(state, STEP_NAME);
        let result = self.export(state).await;
        finish(state, STEP_NAME, result)
    }
}
