//! Remote command channel into the guest.
//!
//! A communicator is created mid-build, once the guest's IP is known, and is
//! published into the state bag for every later step. The remoting protocol
//! itself belongs to the implementation.

mod remote;

pub use remote::PowerShellCommunicator;

use crate::ui::Ui;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use vmforge_shared::errors::VmforgeResult;

/// Captured result of a remote command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RemoteOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Capability for executing commands on the provisioned guest.
#[async_trait]
pub trait Communicator: Send + Sync {
    /// Run `command` on the guest and wait for it to finish.
    async fn run(&self, command: &str) -> VmforgeResult<RemoteOutput>;

    /// Copy a local file or directory to `remote_path` on the guest.
    async fn upload(&self, local_path: &Path, remote_path: &str) -> VmforgeResult<()>;
}

/// Everything needed to open a remote session to a guest.
#[derive(Clone)]
pub struct RemoteConfig {
    pub username: String,
    pub password: String,
    pub remote_host_ip: String,
    pub vm_name: String,
    /// Sink for connection status and command transcripts.
    pub ui: Arc<dyn Ui>,
}

impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("remote_host_ip", &self.remote_host_ip)
            .field("vm_name", &self.vm_name)
            .finish()
    }
}

/// Builds a communicator from a [`RemoteConfig`].
pub type CommunicatorFactory =
    Arc<dyn Fn(RemoteConfig) -> VmforgeResult<Arc<dyn Communicator>> + Send + Sync>;

/// Factory producing [`PowerShellCommunicator`]s.
pub fn powershell_factory() -> CommunicatorFactory {
    Arc::new(
        |config: RemoteConfig| -> VmforgeResult<Arc<dyn Communicator>> {
            Ok(Arc::new(PowerShellCommunicator::new(config)?))
        },
    )
}
