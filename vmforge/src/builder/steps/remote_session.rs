//! Remote session bootstrap: trust the guest, then open a communicator.

use super::{halt, step_start};
use crate::communicator::{Communicator, CommunicatorFactory, RemoteConfig};
use crate::pipeline::{StateBag, Step, StepAction, keys};
use async_trait::async_trait;
use std::sync::Arc;
use vmforge_shared::errors::VmforgeResult;

const STEP_NAME: &str = "StepRemoteSession";

/// Adds the guest's IP to the WSMan trusted hosts, then creates the
/// communicator every later step uses to reach the guest.
///
/// Reads `driver`, `ui`, `vmName` and `ip`; publishes `communicator`.
pub struct StepRemoteSession {
    username: String,
    password: String,
    factory: CommunicatorFactory,
    comm: Option<Arc<dyn Communicator>>,
}

impl StepRemoteSession {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        factory: CommunicatorFactory,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            factory,
            comm: None,
        }
    }

    /// The communicator created by the last successful run.
    pub fn communicator(&self) -> Option<&Arc<dyn Communicator>> {
        self.comm.as_ref()
    }

    async fn open(&self, state: &StateBag) -> VmforgeResult<Arc<dyn Communicator>> {
        let driver = state.driver()?;
        let ui = state.ui()?;
        let vm_name = state.text(keys::VM_NAME)?;
        let ip = state.text(keys::IP)?;

        ui.say("Adding to TrustedHosts (require elevated mode)");
        driver.manage(&trusted_hosts_command(ip)).await?;

        let config = RemoteConfig {
            username: self.username.clone(),
            password: self.password.clone(),
            remote_host_ip: ip.to_string(),
            vm_name: vm_name.to_string(),
            ui,
        };
        tracing::debug!(vm_name = %vm_name, ip = %ip, "Creating communicator");
        (self.factory)(config)
    }
}

fn trusted_hosts_command(ip: &str) -> String {
    format!(
        "Invoke-Command -scriptblock {{ Set-Item -path WSMan:\\localhost\\Client\\TrustedHosts '{}' -Force }}",
        ip
    )
}

#[async_trait]
impl Step for StepRemoteSession {
    fn name(&self) -> &str {
        STEP_NAME
    }

    async fn run(&mut self, state: &mut StateBag) -> StepAction {
        step_start(state, STEP_NAME);

        match self.open(state).await {
            Ok(comm) => {
                self.comm = Some(Arc::clone(&comm));
                state.put(keys::COMMUNICATOR, comm);
                StepAction::Continue
            }
            Err(e) => halt(state, STEP_NAME, e),
        }
    }
}
