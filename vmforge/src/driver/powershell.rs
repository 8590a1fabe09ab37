//! Hyper-V driver backed by the local PowerShell.

use super::Driver;
use crate::util::PowerShell;
use async_trait::async_trait;
use vmforge_shared::errors::{VmforgeError, VmforgeResult};

/// Issues Hyper-V management commands through PowerShell.
///
/// Most cmdlets need an elevated session; the driver does not elevate.
#[derive(Debug, Clone)]
pub struct PowerShellDriver {
    shell: PowerShell,
}

impl PowerShellDriver {
    /// Create a driver, failing if no PowerShell is installed.
    pub fn new() -> VmforgeResult<Self> {
        let shell = PowerShell::locate()?;
        Ok(Self { shell })
    }
}

#[async_trait]
impl Driver for PowerShellDriver {
    async fn manage(&self, command: &str) -> VmforgeResult<()> {
        self.manage_output(command).await.map(|_| ())
    }

    async fn manage_output(&self, command: &str) -> VmforgeResult<String> {
        tracing::debug!(command = %command, "Issuing management command");

        let output = self.shell.run(command).await?;
        if !output.success() {
            let detail = if output.stderr.trim().is_empty() {
                output.stdout.trim()
            } else {
                output.stderr.trim()
            };
            return Err(VmforgeError::Driver(format!(
                "command exited with status {}: {}",
                output.exit_code, detail
            )));
        }

        Ok(output.stdout.trim().to_string())
    }
}
