use super::{halt, step_start};
use crate::pipeline::{StateBag, Step, StepAction, keys};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use vmforge_shared::errors::{VmforgeError, VmforgeResult};

const STEP_NAME: &str = "StepConfigureIp";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Polls the hypervisor until the guest reports an IPv4 address.
///
/// Reads `driver`, `ui` and `vmName`; publishes `ip`.
pub struct StepConfigureIp {
    timeout: Duration,
    poll_interval: Duration,
}

impl StepConfigureIp {
    pub fn new(timeout: Duration) -> Self {
        Self::with_poll_interval(timeout, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }

    /// `Ok(None)` means cancelled while waiting.
    async fn discover(&self, state: &StateBag) -> VmforgeResult<Option<String>> {
        let driver = state.driver()?;
        let ui = state.ui()?;
        let vm_name = state.text(keys::VM_NAME)?;
        let cancel = state.cancellation();

        ui.say("Configuring ip address...");
        // Out-of-range timeouts mean no deadline.
        let deadline = Instant::now().checked_add(self.timeout);
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match driver.vm_ip_address(vm_name).await {
                Ok(Some(ip)) => {
                    tracing::debug!(
                        vm_name = %vm_name,
                        ip = %ip,
                        attempts,
                        "Guest reported an address"
                    );
                    return Ok(Some(ip));
                }
                Ok(None) => {}
                // Hyper-V reports transient errors while the guest is booting.
                Err(e) => tracing::debug!(vm_name = %vm_name, error = %e, "IP query failed"),
            }

            if let Some(deadline) = deadline
                && Instant::now()
                    .checked_add(self.poll_interval)
                    .is_none_or(|next| next > deadline)
            {
                return Err(VmforgeError::Driver(format!(
                    "timed out after {}s waiting for {} to report an IP address",
                    self.timeout.as_secs(),
                    vm_name
                )));
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}

#[async_trait]
impl Step for StepConfigureIp {
    fn name(&self) -> &str {
        STEP_NAME
    }

    async fn run(&mut self, state: &mut StateBag) -> StepAction {
        step_start(state, STEP_NAME);

        match self.discover(state).await {
            Ok(Some(ip)) => {
                if let Ok(ui) = state.ui() {
                    ui.say(&format!("Host IP for the Hyper-V machine: {}", ip));
                }
                state.put(keys::IP, ip);
                StepAction::Continue
            }
            Ok(None) => StepAction::Halt,
            Err(e) => halt(state, STEP_NAME, e),
        }
    }
}
