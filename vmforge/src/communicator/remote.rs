//! Communicator over PowerShell remoting (WinRM).

use super::{Communicator, RemoteConfig, RemoteOutput};
use crate::util::{PowerShell, quote};
use async_trait::async_trait;
use std::net::IpAddr;
use std::path::Path;
use vmforge_shared::errors::{VmforgeError, VmforgeResult};

/// Runs guest commands with `Invoke-Command` from the local PowerShell.
///
/// The target IP must already be in the WSMan client's trusted hosts.
pub struct PowerShellCommunicator {
    config: RemoteConfig,
    shell: PowerShell,
}

impl PowerShellCommunicator {
    pub fn new(config: RemoteConfig) -> VmforgeResult<Self> {
        validate(&config)?;
        let shell = PowerShell::locate().map_err(|e| VmforgeError::Communicator(e.to_string()))?;

        tracing::debug!(
            vm_name = %config.vm_name,
            remote_host_ip = %config.remote_host_ip,
            username = %config.username,
            "Created PowerShell communicator"
        );

        Ok(Self { config, shell })
    }

    fn credential_prelude(&self) -> String {
        format!(
            "$ErrorActionPreference = 'Stop'; \
             $password = ConvertTo-SecureString {} -AsPlainText -Force; \
             $credential = New-Object System.Management.Automation.PSCredential({}, $password);",
            quote(&self.config.password),
            quote(&self.config.username)
        )
    }
}

fn validate(config: &RemoteConfig) -> VmforgeResult<()> {
    if config.username.is_empty() {
        return Err(VmforgeError::Communicator("username must not be empty".into()));
    }
    if config.remote_host_ip.parse::<IpAddr>().is_err() {
        return Err(VmforgeError::Communicator(format!(
            "'{}' is not a valid IP address",
            config.remote_host_ip
        )));
    }
    Ok(())
}

#[async_trait]
impl Communicator for PowerShellCommunicator {
    async fn run(&self, command: &str) -> VmforgeResult<RemoteOutput> {
        self.config
            .ui
            .message(&format!("Executing remote command: {}", command));

        let script = format!(
            "{} Invoke-Command -ComputerName {} -Credential $credential -ScriptBlock {{ {} }}",
            self.credential_prelude(),
            quote(&self.config.remote_host_ip),
            command
        );
        let output = self
            .shell
            .run(&script)
            .await
            .map_err(|e| VmforgeError::Communicator(e.to_string()))?;

        tracing::debug!(
            vm_name = %self.config.vm_name,
            exit_code = output.exit_code,
            "Remote command finished"
        );

        Ok(RemoteOutput {
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    async fn upload(&self, local_path: &Path, remote_path: &str) -> VmforgeResult<()> {
        self.config.ui.message(&format!(
            "Uploading {} => {}",
            local_path.display(),
            remote_path
        ));

        let script = format!(
            "{} $session = New-PSSession -ComputerName {} -Credential $credential; \
             try {{ Copy-Item -Path {} -Destination {} -ToSession $session -Recurse -Force }} \
             finally {{ Remove-PSSession $session }}",
            self.credential_prelude(),
            quote(&self.config.remote_host_ip),
            quote(&local_path.display().to_string()),
            quote(remote_path)
        );
        let output = self
            .shell
            .run(&script)
            .await
            .map_err(|e| VmforgeError::Communicator(e.to_string()))?;

        if !output.success() {
            return Err(VmforgeError::Communicator(format!(
                "upload of {} failed: {}",
                local_path.display(),
                output.stderr.trim()
            )));
        }
        Ok(())
    }
}
