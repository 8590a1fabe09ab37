use super::{halt, report_cleanup_error, step_start};
use crate::pipeline::{StateBag, Step, StepAction, keys};
use async_trait::async_trait;
use vmforge_shared::errors::VmforgeResult;

const STEP_NAME: &str = "StepCreateSwitch";

/// Creates the external virtual switch the VM is attached to.
pub struct StepCreateSwitch {
    switch_name: String,
    created: bool,
}

impl StepCreateSwitch {
    pub fn new(switch_name: impl Into<String>) -> Self {
        Self {
            switch_name: switch_name.into(),
            created: false,
        }
    }

    async fn create(&self, state: &StateBag) -> VmforgeResult<()> {
        let driver = state.driver()?;
        let ui = state.ui()?;

        ui.say(&format!("Creating switch '{}' if required...", self.switch_name));
        driver.create_switch(&self.switch_name).await?;
        ui.say(&format!("switch '{}' created", self.switch_name));
        Ok(())
    }
}

#[async_trait]
impl Step for StepCreateSwitch {
    fn name(&self) -> &str {
        STEP_NAME
    }

    async fn run(&mut self, state: &mut StateBag) -> StepAction {
        step_start(state, STEP_NAME);

        match self.create(state).await {
            Ok(()) => {
                self.created = true;
                state.put(keys::SWITCH_NAME, self.switch_name.clone());
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
            ui.say("Unregistering and deleting switch...");
        }
        if let Err(e) = driver.delete_switch(&self.switch_name).await {
            report_cleanup_error(state, STEP_NAME, "deleting switch", &e);
        }
    }
}
