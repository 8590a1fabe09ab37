//! Build configuration.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::OnceLock;
use vmforge_shared::errors::{VmforgeError, VmforgeResult};

/// Windows Server 2012 R2 Datacenter evaluation edition.
pub const WS2012R2DC: &str = "WindowsServer2012R2Datacenter";

/// Guest OS types the builder knows how to install.
pub const GUEST_OS_TYPES: &[&str] = &[WS2012R2DC];

pub const DEFAULT_BUILD_NAME: &str = "hyperv-iso";
pub const DEFAULT_DISK_SIZE_GB: u64 = 40;
pub const MIN_DISK_SIZE_GB: u64 = 10;
pub const DEFAULT_RAM_SIZE_MB: u64 = 1024;
pub const MIN_RAM_SIZE_MB: u64 = 512;
pub const DEFAULT_WAIT_TIME_MINUTES: u64 = 10;
pub const DEFAULT_IP_WAIT_TIMEOUT_SECS: u64 = 600;
pub const MAX_WAIT_TIME_MINUTES: u64 = 24 * 60;
pub const MAX_IP_WAIT_TIMEOUT_SECS: u64 = 24 * 60 * 60;
/// Placeholder credentials of evaluation images.
pub const DEFAULT_COMMUNICATOR_USERNAME: &str = "vagrant";
pub const DEFAULT_COMMUNICATOR_PASSWORD: &str = "vagrant";

fn product_key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Z0-9]{5}-[A-Z0-9]{5}-[A-Z0-9]{5}-[A-Z0-9]{5}-[A-Z0-9]{5}$")
            .expect("product key pattern is valid")
    })
}

/// User-facing build options, deserialized from the template file.
///
/// Zero/empty values mean "use the default"; [`BuildConfig::prepare`] fills
/// them in and validates the result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub build_name: String,
    pub disk_size_gb: u64,
    pub ram_size_mb: u64,
    pub guest_os_type: String,
    pub vm_name: String,
    pub switch_name: String,
    pub iso_url: PathBuf,
    pub floppy_path: Option<PathBuf>,
    pub wait_time_minutes: u64,
    pub ip_wait_timeout_secs: u64,
    pub product_key: Option<String>,
    pub output_directory: PathBuf,
    /// Replace an existing output directory.
    pub force: bool,
    /// Pause after every step.
    pub debug: bool,
    pub communicator_username: String,
    pub communicator_password: String,
    /// Commands run on the guest once the remote session is up.
    pub provision_commands: Vec<String>,
}

impl BuildConfig {
    /// Fill in defaults and validate.
    ///
    /// Returns warnings on success. All validation failures are collected
    /// into a single [`VmforgeError::Config`].
    pub fn prepare(&mut self) -> VmforgeResult<Vec<String>> {
        let mut errs: Vec<String> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();

        if self.build_name.is_empty() {
            self.build_name = DEFAULT_BUILD_NAME.to_string();
        }

        if self.disk_size_gb == 0 {
            self.disk_size_gb = DEFAULT_DISK_SIZE_GB;
        }
        if self.disk_size_gb < MIN_DISK_SIZE_GB {
            errs.push(format!(
                "Windows server requires disk space no less than {}GB, but defined: {}",
                MIN_DISK_SIZE_GB, self.disk_size_gb
            ));
        }

        if self.ram_size_mb == 0 {
            self.ram_size_mb = DEFAULT_RAM_SIZE_MB;
        }
        if self.ram_size_mb < MIN_RAM_SIZE_MB {
            errs.push(format!(
                "Windows server requires memory size no less than {}MB, but defined: {}",
                MIN_RAM_SIZE_MB, self.ram_size_mb
            ));
        }

        if self.vm_name.is_empty() {
            self.vm_name = format!("vmforge-{}", self.build_name);
        }
        if self.switch_name.is_empty() {
            self.switch_name = format!("vmforge-{}", self.build_name);
        }
        if self.output_directory.as_os_str().is_empty() {
            self.output_directory = PathBuf::from(format!("output-{}", self.build_name));
        }

        if self.wait_time_minutes == 0 {
            self.wait_time_minutes = DEFAULT_WAIT_TIME_MINUTES;
        }
        if self.wait_time_minutes > MAX_WAIT_TIME_MINUTES {
            errs.push(format!(
                "wait_time_minutes must be no more than {}, but defined: {}",
                MAX_WAIT_TIME_MINUTES, self.wait_time_minutes
            ));
        }
        if self.ip_wait_timeout_secs == 0 {
            self.ip_wait_timeout_secs = DEFAULT_IP_WAIT_TIMEOUT_SECS;
        }
        if self.ip_wait_timeout_secs > MAX_IP_WAIT_TIMEOUT_SECS {
            errs.push(format!(
                "ip_wait_timeout_secs must be no more than {}, but defined: {}",
                MAX_IP_WAIT_TIMEOUT_SECS, self.ip_wait_timeout_secs
            ));
        }

        if let Some(key) = &self.product_key {
            if key.is_empty() {
                self.product_key = None;
            } else if !product_key_pattern().is_match(key) {
                errs.push(
                    "Make sure the product_key follows the pattern: XXXXX-XXXXX-XXXXX-XXXXX-XXXXX"
                        .to_string(),
                );
            }
        }

        if self.iso_url.as_os_str().is_empty() {
            errs.push("iso_url must be specified.".to_string());
        } else if !self.iso_url.exists() {
            errs.push("Check iso_url is correct".to_string());
        }

        if let Some(floppy) = &self.floppy_path
            && !floppy.exists()
        {
            errs.push(format!("floppy_path {} does not exist", floppy.display()));
        }

        if !GUEST_OS_TYPES.contains(&self.guest_os_type.as_str()) {
            errs.push(format!(
                "guest_os_type is invalid. Must be one of: {:?}",
                GUEST_OS_TYPES
            ));
        }

        if self.communicator_username.is_empty() {
            self.communicator_username = DEFAULT_COMMUNICATOR_USERNAME.to_string();
        }
        if self.communicator_password.is_empty() {
            self.communicator_password = DEFAULT_COMMUNICATOR_PASSWORD.to_string();
        }
        if self.communicator_password == DEFAULT_COMMUNICATOR_PASSWORD {
            warnings.push(
                "Using the default communicator password; only suitable for evaluation images"
                    .to_string(),
            );
        }

        tracing::debug!(
            build_name = %self.build_name,
            vm_name = %self.vm_name,
            switch_name = %self.switch_name,
            disk_size_gb = self.disk_size_gb,
            ram_size_mb = self.ram_size_mb,
            wait_time_minutes = self.wait_time_minutes,
            iso_url = %self.iso_url.display(),
            guest_os_type = %self.guest_os_type,
            "Prepared build config"
        );

        if !errs.is_empty() {
            return Err(VmforgeError::Config(errs.join("; ")));
        }

        Ok(warnings)
    }
}
