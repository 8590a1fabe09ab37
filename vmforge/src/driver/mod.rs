//! Hypervisor management driver.
//!
//! ## Architecture
//!
//! - **Driver**: issues opaque management commands to the host. Only
//!   [`Driver::manage`] and [`Driver::manage_output`] are required; the
//!   higher-level VM operations are composed on top of them.
//! - **PowerShellDriver**: runs commands through the local PowerShell, which
//!   exposes the Hyper-V cmdlets.
//!
//! The pipeline is single-flow, so a driver sees at most one command at a
//! time from a build. Implementations that fan out internally must serialize
//! themselves.

mod powershell;

pub use powershell::PowerShellDriver;

use crate::util::quote;
use async_trait::async_trait;
use std::path::Path;
use vmforge_shared::errors::VmforgeResult;

/// Capability for issuing management commands to the virtualization host.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Issue one management command. The text is passed through verbatim.
    async fn manage(&self, command: &str) -> VmforgeResult<()>;

    /// Issue one management command and return its trimmed standard output.
    async fn manage_output(&self, command: &str) -> VmforgeResult<String>;

    /// Create an external switch bound to the first connected physical adapter.
    /// An existing switch with the same name is reused.
    async fn create_switch(&self, switch_name: &str) -> VmforgeResult<()> {
        let name = quote(switch_name);
        self.manage(&format!(
            "if (-not (Get-VMSwitch -Name {name} -ErrorAction SilentlyContinue)) {{ \
             $adapter = Get-NetAdapter -Physical | Where-Object Status -eq 'Up' | Select-Object -First 1; \
             New-VMSwitch -Name {name} -NetAdapterName $adapter.Name -AllowManagementOS $true | Out-Null }}"
        ))
        .await
    }

    async fn delete_switch(&self, switch_name: &str) -> VmforgeResult<()> {
        self.manage(&format!("Remove-VMSwitch -Name {} -Force", quote(switch_name)))
            .await
    }

    /// Create a VM with a fresh dynamic VHDX under `path`, attached to `switch_name`.
    async fn create_vm(
        &self,
        vm_name: &str,
        path: &Path,
        ram_size_mb: u64,
        disk_size_gb: u64,
        switch_name: &str,
    ) -> VmforgeResult<()> {
        let vhd = path.join(format!("{}.vhdx", vm_name));
        self.manage(&format!(
            "New-VM -Name {} -Path {} -MemoryStartupBytes {}MB -NewVHDPath {} -NewVHDSizeBytes {}GB -SwitchName {} | Out-Null",
            quote(vm_name),
            quote(&path.display().to_string()),
            ram_size_mb,
            quote(&vhd.display().to_string()),
            disk_size_gb,
            quote(switch_name)
        ))
        .await
    }

    /// Power off (if needed) and unregister a VM.
    async fn delete_vm(&self, vm_name: &str) -> VmforgeResult<()> {
        let name = quote(vm_name);
        self.manage(&format!(
            "Stop-VM -Name {name} -TurnOff -Force -ErrorAction SilentlyContinue; Remove-VM -Name {name} -Force"
        ))
        .await
    }

    async fn enable_integration_service(&self, vm_name: &str) -> VmforgeResult<()> {
        self.manage(&format!(
            "Enable-VMIntegrationService -VMName {} -Name 'Guest Service Interface'",
            quote(vm_name)
        ))
        .await
    }

    async fn mount_dvd(&self, vm_name: &str, iso_path: &Path) -> VmforgeResult<()> {
        self.manage(&format!(
            "Set-VMDvdDrive -VMName {} -ControllerNumber 1 -ControllerLocation 0 -Path {}",
            quote(vm_name),
            quote(&iso_path.display().to_string())
        ))
        .await
    }

    async fn unmount_dvd(&self, vm_name: &str) -> VmforgeResult<()> {
        self.manage(&format!(
            "Set-VMDvdDrive -VMName {} -ControllerNumber 1 -ControllerLocation 0 -Path $null",
            quote(vm_name)
        ))
        .await
    }

    async fn mount_floppy(&self, vm_name: &str, floppy_path: &Path) -> VmforgeResult<()> {
        self.manage(&format!(
            "Set-VMFloppyDiskDrive -VMName {} -Path {}",
            quote(vm_name),
            quote(&floppy_path.display().to_string())
        ))
        .await
    }

    async fn unmount_floppy(&self, vm_name: &str) -> VmforgeResult<()> {
        self.manage(&format!(
            "Set-VMFloppyDiskDrive -VMName {} -Path $null",
            quote(vm_name)
        ))
        .await
    }

    async fn start_vm(&self, vm_name: &str) -> VmforgeResult<()> {
        self.manage(&format!("Start-VM -Name {}", quote(vm_name)))
            .await
    }

    /// Gracefully shut the guest down.
    async fn stop_vm(&self, vm_name: &str) -> VmforgeResult<()> {
        self.manage(&format!("Stop-VM -Name {} -Force", quote(vm_name)))
            .await
    }

    async fn is_running(&self, vm_name: &str) -> VmforgeResult<bool> {
        let out = self
            .manage_output(&format!("(Get-VM -Name {}).State -eq 'Running'", quote(vm_name)))
            .await?;
        Ok(out.eq_ignore_ascii_case("true"))
    }

    async fn export_vm(&self, vm_name: &str, output_dir: &Path) -> VmforgeResult<()> {
        self.manage(&format!(
            "Export-VM -Name {} -Path {}",
            quote(vm_name),
            quote(&output_dir.display().to_string())
        ))
        .await
    }

    /// First IPv4 address reported by the VM's network adapter, if any yet.
    async fn vm_ip_address(&self, vm_name: &str) -> VmforgeResult<Option<String>> {
        let out = self
            .manage_output(&format!(
                "(Get-VMNetworkAdapter -VMName {}).IPAddresses | Where-Object {{ $_ -match '^\\d{{1,3}}(\\.\\d{{1,3}}){{3}}$' }} | Select-Object -First 1",
                quote(vm_name)
            ))
            .await?;
        let ip = out.trim();
        Ok((!ip.is_empty()).then(|| ip.to_string()))
    }
}
