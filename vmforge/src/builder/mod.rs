//! Hyper-V ISO builder.
//!
//! Turns a validated [`BuildConfig`] into an ordered step list, runs it, and
//! maps the terminal state of the run to an [`Artifact`] or an error.
//!
//! ```text
//! OutputDir → CreateSwitch → CreateVm → EnableIntegrationService
//!   → MountDvdDrive → MountFloppyDrive → StartVm → Sleep("Installing")
//!   → ConfigureIp → RemoteSession → Provision → InstallProductKey
//!   → StopVm → ExportVm
//! ```

mod artifact;
mod config;
pub mod steps;

pub use artifact::{Artifact, BUILDER_ID};
pub use config::{BuildConfig, GUEST_OS_TYPES, WS2012R2DC};

use crate::communicator::{CommunicatorFactory, powershell_factory};
use crate::driver::{Driver, PowerShellDriver};
use crate::pipeline::{
    BasicRunner, BoxedStep, DebugPause, DebugRunner, Runner, StateBag, UiPause, keys,
};
use crate::ui::Ui;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use steps::{
    StepConfigureIp, StepCreateSwitch, StepCreateVm, StepEnableIntegrationService, StepExportVm,
    StepInstallProductKey, StepMountDvdDrive, StepMountFloppyDrive, StepOutputDir, StepProvision,
    StepRemoteSession, StepSleep, StepStartVm, StepStopVm,
};
use tokio_util::sync::CancellationToken;
use ulid::Ulid;
use vmforge_shared::errors::{VmforgeError, VmforgeResult};

/// Builds a Windows Server VM image from an installation ISO.
pub struct Builder {
    config: Arc<BuildConfig>,
    warnings: Vec<String>,
    driver: Option<Arc<dyn Driver>>,
    communicator_factory: CommunicatorFactory,
    debug_pause: Option<Arc<dyn DebugPause>>,
    cancel: Mutex<CancellationToken>,
}

impl Builder {
    /// Validate `config` and create a builder for it.
    pub fn new(mut config: BuildConfig) -> VmforgeResult<Self> {
        let warnings = config.prepare()?;
        for warning in &warnings {
            tracing::warn!("{}", warning);
        }

        Ok(Self {
            config: Arc::new(config),
            warnings,
            driver: None,
            communicator_factory: powershell_factory(),
            debug_pause: None,
            cancel: Mutex::new(CancellationToken::new()),
        })
    }

    /// Use `driver` instead of locating PowerShell at run time.
    pub fn with_driver(mut self, driver: Arc<dyn Driver>) -> Self {
        self.driver = Some(driver);
        self
    }

    pub fn with_communicator_factory(mut self, factory: CommunicatorFactory) -> Self {
        self.communicator_factory = factory;
        self
    }

    /// Pause hook for debug builds. Defaults to prompting through the UI.
    pub fn with_debug_pause(mut self, pause: Arc<dyn DebugPause>) -> Self {
        self.debug_pause = Some(pause);
        self
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Warnings produced while preparing the configuration.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Cancel a running build, or the next one to start.
    ///
    /// Started steps are still cleaned up before `run` returns. A cancellation
    /// is consumed by the run it stops; later runs start fresh.
    pub fn cancel(&self) {
        tracing::info!("Cancelling the build...");
        self.cancel_token().cancel();
    }

    fn cancel_token(&self) -> MutexGuard<'_, CancellationToken> {
        self.cancel.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace a fired token so the next run is not born cancelled.
    fn reset_cancellation(&self) {
        let mut token = self.cancel_token();
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
    }

    /// Run the build to completion.
    pub async fn run(&self, ui: Arc<dyn Ui>) -> VmforgeResult<Artifact> {
        let build_id = Ulid::new();
        tracing::info!(
            build_id = %build_id,
            build_name = %self.config.build_name,
            vm_name = %self.config.vm_name,
            "Starting build"
        );

        let driver = match &self.driver {
            Some(driver) => Arc::clone(driver),
            None => {
                let driver = PowerShellDriver::new().map_err(|e| {
                    VmforgeError::Driver(format!("Failed creating Hyper-V driver: {}", e))
                })?;
                Arc::new(driver) as Arc<dyn Driver>
            }
        };

        let temp_dir = tempfile::Builder::new()
            .prefix("vmforge")
            .tempdir()
            .map_err(|e| {
                VmforgeError::Storage(format!("Failed to create temporary directory: {}", e))
            })?;

        let mut state = StateBag::new();
        state.put(keys::CONFIG, Arc::clone(&self.config));
        state.put(keys::DRIVER, driver);
        state.put(keys::UI, Arc::clone(&ui));
        state.put(keys::TEMP_DIR, temp_dir.path().to_path_buf());

        if self.config.product_key.is_some() {
            ui.say("Product key specified; the guest needs Internet access to activate Windows.");
        }

        let steps = self.steps();
        let cancel = self.cancel_token().child_token();
        let mut runner: Box<dyn Runner> = if self.config.debug {
            let pause = match &self.debug_pause {
                Some(pause) => Arc::clone(pause),
                None => Arc::new(UiPause) as Arc<dyn DebugPause>,
            };
            Box::new(DebugRunner::with_cancellation(steps, pause, cancel))
        } else {
            Box::new(BasicRunner::with_cancellation(steps, cancel))
        };

        let metrics = runner.run(&mut state).await;
        self.reset_cancellation();
        metrics.log_steps();
        tracing::info!(
            build_id = %build_id,
            outcome = ?metrics.outcome,
            total_duration_ms = metrics.total_duration_ms,
            "Build finished"
        );

        let temp_path = temp_dir.path().to_path_buf();
        if let Err(e) = temp_dir.close() {
            tracing::warn!(
                path = %temp_path.display(),
                "Failed to remove temporary directory: {}",
                e
            );
        }

        build_result(&state, &self.config.output_directory)
    }

    fn steps(&self) -> Vec<BoxedStep> {
        let config = &self.config;
        vec![
            Box::new(StepOutputDir::new(&config.output_directory, config.force)),
            Box::new(StepCreateSwitch::new(&config.switch_name)),
            Box::new(StepCreateVm::new(
                &config.vm_name,
                config.ram_size_mb,
                config.disk_size_gb,
            )),
            Box::new(StepEnableIntegrationService),
            Box::new(StepMountDvdDrive::new(&config.iso_url)),
            Box::new(StepMountFloppyDrive::new(config.floppy_path.clone())),
            Box::new(StepStartVm::new()),
            Box::new(StepSleep::minutes(config.wait_time_minutes, "Installing")),
            Box::new(StepConfigureIp::new(Duration::from_secs(
                config.ip_wait_timeout_secs,
            ))),
            Box::new(StepRemoteSession::new(
                &config.communicator_username,
                &config.communicator_password,
                Arc::clone(&self.communicator_factory),
            )),
            Box::new(StepProvision::new(config.provision_commands.clone())),
            Box::new(StepInstallProductKey::new(config.product_key.clone())),
            Box::new(StepStopVm),
            Box::new(StepExportVm::new(&config.output_directory)),
        ]
    }
}

/// Map the terminal state of a run onto the build result.
///
/// A recorded error wins, then cancellation, then halting.
fn build_result(state: &StateBag, output_dir: &Path) -> VmforgeResult<Artifact> {
    if let Some(err) = state.error() {
        return Err(err.clone());
    }
    if state.is_set(keys::CANCELLED) {
        return Err(VmforgeError::Cancelled);
    }
    if state.is_set(keys::HALTED) {
        return Err(VmforgeError::Halted);
    }
    Artifact::from_dir(output_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communicator::testing::FakeCommunicator;
    use crate::communicator::{Communicator, RemoteConfig};
    use crate::driver::testing::FakeDriver;
    use crate::pipeline::PauseLocation;
    use crate::ui::testing::RecordingUi;
    use std::sync::Mutex;
    use tempfile::{NamedTempFile, TempDir};

    struct Env {
        iso: NamedTempFile,
        out_root: TempDir,
    }

    impl Env {
        fn new() -> Self {
            Self {
                iso: NamedTempFile::new().unwrap(),
                out_root: TempDir::new().unwrap(),
            }
        }

        fn output_dir(&self) -> std::path::PathBuf {
            self.out_root.path().join("output-hyperv-iso")
        }

        fn config(&self) -> BuildConfig {
            BuildConfig {
                guest_os_type: WS2012R2DC.to_string(),
                iso_url: self.iso.path().to_path_buf(),
                output_directory: self.output_dir(),
                ..Default::default()
            }
        }
    }

    fn fake_factory() -> CommunicatorFactory {
        Arc::new(
            |config: RemoteConfig| -> VmforgeResult<Arc<dyn Communicator>> {
                Ok(Arc::new(FakeCommunicator::new(config)))
            },
        )
    }

    fn builder(config: BuildConfig, driver: &Arc<FakeDriver>) -> Builder {
        Builder::new(config)
            .unwrap()
            .with_driver(driver.clone() as Arc<dyn Driver>)
            .with_communicator_factory(fake_factory())
    }

    fn position(commands: &[String], marker: &str) -> usize {
        commands
            .iter()
            .position(|c| c.contains(marker))
            .unwrap_or_else(|| panic!("no command containing {}", marker))
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let err = Builder::new(BuildConfig::default()).err().expect("invalid");
        assert!(matches!(err, VmforgeError::Config(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_build_returns_artifact() {
        let env = Env::new();
        let driver = Arc::new(FakeDriver::new().respond("IPAddresses", "10.0.0.5"));
        let ui = Arc::new(RecordingUi::default());

        let artifact = builder(env.config(), &driver)
            .run(ui.clone())
            .await
            .expect("build succeeds");

        assert_eq!(artifact.dir, env.output_dir());
        assert_eq!(artifact.builder_id, BUILDER_ID);
        assert!(env.output_dir().is_dir());

        let commands = driver.commands();
        let order = [
            "New-VMSwitch",
            "New-VM -Name",
            "Enable-VMIntegrationService",
            "Set-VMDvdDrive",
            "Start-VM",
            "IPAddresses",
            "TrustedHosts '10.0.0.5'",
            "Stop-VM -Name 'vmforge-hyperv-iso' -Force",
            "Export-VM",
        ];
        let positions: Vec<usize> = order.iter().map(|m| position(&commands, m)).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{:?}", commands);
        assert!(!commands.iter().any(|c| c.contains("Set-VMFloppyDiskDrive")));

        // Cleanup ran in reverse: VM before switch.
        assert!(position(&commands, "Remove-VM ") < position(&commands, "Remove-VMSwitch"));
        assert!(ui.errors().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_temp_dir_is_removed_after_build() {
        let env = Env::new();
        let driver = Arc::new(FakeDriver::new().respond("IPAddresses", "10.0.0.5"));

        builder(env.config(), &driver)
            .run(Arc::new(RecordingUi::default()))
            .await
            .unwrap();

        let create = driver.commands()[position(&driver.commands(), "New-VM -Name")].clone();
        let temp = create
            .split("-Path '")
            .nth(1)
            .and_then(|rest| rest.split('\'').next())
            .expect("temp path in command");
        assert!(temp.contains("vmforge"));
        assert!(!Path::new(temp).exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_step_returns_its_error_and_cleans_up() {
        let env = Env::new();
        let driver = Arc::new(FakeDriver::new().fail_on("New-VM -Name"));

        let err = builder(env.config(), &driver)
            .run(Arc::new(RecordingUi::default()))
            .await
            .unwrap_err();

        assert!(err.to_string().starts_with("Error StepCreateVm: "));
        let commands = driver.commands();
        assert!(commands.iter().any(|c| c.starts_with("Remove-VMSwitch")));
        assert!(!commands.iter().any(|c| c.starts_with("Start-VM")));
        assert!(!env.output_dir().exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_session_failure_fails_build() {
        let env = Env::new();
        let driver = Arc::new(
            FakeDriver::new()
                .respond("IPAddresses", "10.0.0.5")
                .fail_on("TrustedHosts"),
        );

        let err = builder(env.config(), &driver)
            .run(Arc::new(RecordingUi::default()))
            .await
            .unwrap_err();

        assert!(err.to_string().starts_with("Error StepRemoteSession: "));
        assert!(!driver.commands().iter().any(|c| c.starts_with("Export-VM")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_run() {
        let env = Env::new();
        let driver = Arc::new(FakeDriver::new());
        let builder = builder(env.config(), &driver);
        builder.cancel();

        let err = builder
            .run(Arc::new(RecordingUi::default()))
            .await
            .unwrap_err();

        assert_eq!(err, VmforgeError::Cancelled);
        assert!(driver.commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_install_wait() {
        let env = Env::new();
        let driver = Arc::new(FakeDriver::new());
        let builder = Arc::new(builder(env.config(), &driver));
        let canceller = Arc::clone(&builder);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            canceller.cancel();
        });

        let err = builder
            .run(Arc::new(RecordingUi::default()))
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Build was cancelled.");
        let commands = driver.commands();
        assert!(!commands.iter().any(|c| c.contains("IPAddresses")));
        assert!(commands.iter().any(|c| c.starts_with("Remove-VMSwitch")));
        assert!(!env.output_dir().exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_builder_runs_again_after_cancelled_run() {
        let env = Env::new();
        let driver = Arc::new(FakeDriver::new().respond("IPAddresses", "10.0.0.5"));
        let builder = builder(env.config(), &driver);
        builder.cancel();

        let err = builder
            .run(Arc::new(RecordingUi::default()))
            .await
            .unwrap_err();
        assert_eq!(err, VmforgeError::Cancelled);

        let artifact = builder
            .run(Arc::new(RecordingUi::default()))
            .await
            .expect("second build succeeds");
        assert_eq!(artifact.dir, env.output_dir());
        assert!(driver.commands().iter().any(|c| c.starts_with("Export-VM")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_product_key_notice_and_install() {
        let env = Env::new();
        let driver = Arc::new(FakeDriver::new().respond("IPAddresses", "10.0.0.5"));
        let ui = Arc::new(RecordingUi::default());
        let config = BuildConfig {
            product_key: Some("ABCDE-12345-FGHIJ-67890-KLMNO".into()),
            ..env.config()
        };

        builder(config, &driver).run(ui.clone()).await.unwrap();

        assert!(ui.said()[0].starts_with("Product key specified"));
        assert!(ui.said().iter().any(|s| s == "Install product key..."));
    }

    #[derive(Default)]
    struct CountingPause {
        steps: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl DebugPause for CountingPause {
        async fn pause(&self, location: PauseLocation, step: &str, _state: &StateBag) {
            assert_eq!(location, PauseLocation::AfterRun);
            self.steps.lock().unwrap().push(step.to_string());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_debug_build_pauses_after_every_step() {
        let env = Env::new();
        let driver = Arc::new(FakeDriver::new().respond("IPAddresses", "10.0.0.5"));
        let pause = Arc::new(CountingPause::default());
        let config = BuildConfig {
            debug: true,
            ..env.config()
        };

        builder(config, &driver)
            .with_debug_pause(pause.clone())
            .run(Arc::new(RecordingUi::default()))
            .await
            .unwrap();

        let steps = pause.steps.lock().unwrap().clone();
        assert_eq!(steps.len(), 14);
        assert_eq!(steps.first().unwrap(), "StepOutputDir");
        assert_eq!(steps.last().unwrap(), "StepExportVm");
    }

    #[test]
    fn test_build_result_precedence() {
        let out = TempDir::new().unwrap();

        let mut state = StateBag::new();
        state.put(keys::HALTED, true);
        assert_eq!(
            build_result(&state, out.path()).unwrap_err(),
            VmforgeError::Halted
        );

        state.put(keys::CANCELLED, true);
        assert_eq!(
            build_result(&state, out.path()).unwrap_err(),
            VmforgeError::Cancelled
        );

        state.put_error(VmforgeError::Driver("boom".into()));
        assert_eq!(
            build_result(&state, out.path()).unwrap_err(),
            VmforgeError::Driver("boom".into())
        );

        let artifact = build_result(&StateBag::new(), out.path()).unwrap();
        assert_eq!(artifact.dir, out.path());
    }
}
