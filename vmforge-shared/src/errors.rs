//! Error taxonomy shared by every vmforge crate.

use thiserror::Error;

/// Result alias used across vmforge.
pub type VmforgeResult<T> = Result<T, VmforgeError>;

/// Errors produced while preparing or running a build.
///
/// Payloads are plain strings so the error can be cloned into the
/// pipeline state bag and handed back to the caller once the run ends.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VmforgeError {
    /// Build configuration is invalid.
    #[error("config error: {0}")]
    Config(String),

    /// A hypervisor management command failed.
    #[error("driver error: {0}")]
    Driver(String),

    /// The remote command channel failed or could not be built.
    #[error("communicator error: {0}")]
    Communicator(String),

    /// A state bag key is missing or holds a different kind of value.
    #[error("state error: {0}")]
    State(String),

    /// Filesystem or output directory failure.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),

    /// A step failed; `step` names the step that halted the pipeline.
    #[error("Error {step}: {source}")]
    Step {
        step: String,
        source: Box<VmforgeError>,
    },

    #[error("Build was cancelled.")]
    Cancelled,

    #[error("Build was halted.")]
    Halted,
}

impl VmforgeError {
    /// Wrap `source` with the name of the step it came from.
    pub fn step(step: impl Into<String>, source: VmforgeError) -> Self {
        Self::Step {
            step: step.into(),
            source: Box::new(source),
        }
    }
}

impl From<std::io::Error> for VmforgeError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}
