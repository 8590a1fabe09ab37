//! Output directory setup.

use super::{halt, report_cleanup_error, step_start};
use crate::pipeline::{StateBag, Step, StepAction, keys};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use vmforge_shared::errors::{VmforgeError, VmforgeResult};

const STEP_NAME: &str = "StepOutputDir";
const REMOVE_ATTEMPTS: u32 = 5;
const REMOVE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Creates the directory the exported VM lands in.
///
/// An existing directory is an error unless `force` is set, in which case it
/// is removed first. The directory is deleted again if the build does not
/// complete.
pub struct StepOutputDir {
    path: PathBuf,
    force: bool,
    created: bool,
}

impl StepOutputDir {
    pub fn new(path: impl Into<PathBuf>, force: bool) -> Self {
        Self {
            path: path.into(),
            force,
            created: false,
        }
    }

    async fn prepare(&self, state: &StateBag) -> VmforgeResult<()> {
        let ui = state.ui()?;

        if tokio::fs::try_exists(&self.path).await? {
            if !self.force {
                return Err(VmforgeError::Storage(format!(
                    "Output directory exists: {}. Use the force flag to delete it prior to building.",
                    self.path.display()
                )));
            }
            ui.say("Deleting previous output directory...");
            tokio::fs::remove_dir_all(&self.path).await.map_err(|e| {
                VmforgeError::Storage(format!(
                    "Failed to remove {}: {}",
                    self.path.display(),
                    e
                ))
            })?;
        }

        tokio::fs::create_dir_all(&self.path).await.map_err(|e| {
            VmforgeError::Storage(format!("Failed to create {}: {}", self.path.display(), e))
        })?;
        tracing::debug!(path = %self.path.display(), "Created output directory");
        Ok(())
    }
}

#[async_trait]
impl Step for StepOutputDir {
    fn name(&self) -> &str {
        STEP_NAME
    }

    async fn run(&mut self, state: &mut StateBag) -> StepAction {
        step_start(state, STEP_NAME);

        match self.prepare(state).await {
            Ok(()) => {
                self.created = true;
                StepAction::Continue
            }
            Err(e) => halt(state, STEP_NAME, e),
        }
    }

    async fn cleanup(&mut self, state: &mut StateBag) {
        if !self.created {
            return;
        }
        if !state.is_set(keys::HALTED) && !state.is_set(keys::CANCELLED) {
            return;
        }

        if let Ok(ui) = state.ui() {
            ui.say("Deleting output directory...");
        }

        // Hyper-V may still hold handles on freshly exported files.
        let mut attempt = 1;
        loop {
            match tokio::fs::remove_dir_all(&self.path).await {
                Ok(()) => return,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
                Err(e) if attempt < REMOVE_ATTEMPTS => {
                    tracing::debug!(attempt, error = %e, "Retrying output directory removal");
                    attempt += 1;
                    tokio::time::sleep(REMOVE_RETRY_DELAY).await;
                }
                Err(e) => {
                    let err: VmforgeError = e.into();
                    report_cleanup_error(state, STEP_NAME, "removing output directory", &err);
                    return;
                }
            }
        }
    }
}
