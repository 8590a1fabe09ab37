use super::{finish, step_start};
use crate::pipeline::{StateBag, Step, StepAction};
use async_trait::async_trait;
use vmforge_shared::errors::{VmforgeError, VmforgeResult};

const STEP_NAME: &str = "StepInstallProductKey";
const SLMGR: &str = "cscript //Nologo C:\\Windows\\System32\\slmgr.vbs";

/// Installs and activates a Windows product key on the guest.
///
/// Activation contacts Microsoft, so the guest needs Internet access.
pub struct StepInstallProductKey {
    product_key: Option<String>,
}

impl StepInstallProductKey {
    pub fn new(product_key: Option<String>) -> Self {
        Self { product_key }
    }
}

async fn install(state: &StateBag, product_key: &str) -> VmforgeResult<()> {
    let comm = state.communicator()?;
    let ui = state.ui()?;

    ui.say("Install product key...");
    for (what, command) in [
        ("installing product key", format!("{} /ipk {}", SLMGR, product_key)),
        ("activating Windows", format!("{} /ato", SLMGR)),
    ] {
        let output = comm.run(&command).await?;
        if !output.success() {
            return Err(VmforgeError::Communicator(format!(
                "{} failed with status {}: {}",
                what,
                output.exit_code,
                output.stderr.trim()
            )));
        }
    }
    Ok(())
}

#[async_trait]
impl Step for StepInstallProductKey {
    fn name(&self) -> &str {
        STEP_NAME
    }

    async fn run(&mut self, state: &mut StateBag) -> StepAction {
        let Some(product_key) = &self.product_key else {
            return StepAction::Continue;
        };
        step_start(state, STEP_NAME);
        let result = install(state, product_key).await;
        finish(state, STEP_NAME, result)
    }
}
