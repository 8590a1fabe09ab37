//! Build steps, in the order the builder runs them.
//!
//! Every step follows the same failure pattern: wrap the cause with the step
//! name, record it under `error`, report it to the UI and halt. Cleanups are
//! best effort and only report.

mod configure_ip;
mod create_switch;
mod create_vm;
mod enable_integration_service;
mod export_vm;
mod install_product_key;
mod mount_dvd;
mod mount_floppy;
mod output_dir;
mod provision;
mod remote_session;
mod sleep;
mod start_vm;
mod stop_vm;

pub use configure_ip::StepConfigureIp;
pub use create_switch::StepCreateSwitch;
pub use create_vm::StepCreateVm;
pub use enable_integration_service::StepEnableIntegrationService;
pub use export_vm::StepExportVm;
pub use install_product_key::StepInstallProductKey;
pub use mount_dvd::StepMountDvdDrive;
pub use mount_floppy::StepMountFloppyDrive;
pub use output_dir::StepOutputDir;
pub use provision::StepProvision;
pub use remote_session::StepRemoteSession;
pub use sleep::StepSleep;
pub use start_vm::StepStartVm;
pub use stop_vm::StepStopVm;

use crate::pipeline::{StateBag, StepAction, keys};
use vmforge_shared::errors::{VmforgeError, VmforgeResult};

/// Log the start of a step.
pub(crate) fn step_start(state: &StateBag, step: &str) {
    let vm_name = state.text(keys::VM_NAME).unwrap_or("-");
    tracing::debug!(vm_name = %vm_name, step = %step, "Starting step");
}

/// Map a step body's result onto a [`StepAction`].
pub(crate) fn finish(state: &mut StateBag, step: &str, result: VmforgeResult<()>) -> StepAction {
    match result {
        Ok(()) => StepAction::Continue,
        Err(err) => halt(state, step, err),
    }
}

/// Record `err` as the build error, report it, and halt.
pub(crate) fn halt(state: &mut StateBag, step: &str, err: VmforgeError) -> StepAction {
    let err = VmforgeError::step(step, err);
    tracing::error!(step = %step, error = %err, "Step failed");
    if let Ok(ui) = state.ui() {
        ui.error(&err.to_string());
    }
    state.put_error(err);
    StepAction::Halt
}

/// Report a failed cleanup action without affecting the build result.
pub(crate) fn report_cleanup_error(state: &StateBag, step: &str, what: &str, err: &VmforgeError) {
    tracing::warn!(step = %step, error = %err, "Cleanup failed: {}", what);
    if let Ok(ui) = state.ui() {
        ui.error(&format!("Error {}: {}", what, err));
    }
}
