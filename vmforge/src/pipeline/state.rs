//! Shared execution context passed to every step.

use crate::builder::BuildConfig;
use crate::communicator::Communicator;
use crate::driver::Driver;
use crate::ui::Ui;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use vmforge_shared::errors::{VmforgeError, VmforgeResult};

/// Well-known state bag keys.
pub mod keys {
    pub const CONFIG: &str = "config";
    pub const DRIVER: &str = "driver";
    pub const UI: &str = "ui";
    pub const TEMP_DIR: &str = "tempDir";
    pub const SWITCH_NAME: &str = "switchName";
    pub const VM_NAME: &str = "vmName";
    pub const IP: &str = "ip";
    pub const COMMUNICATOR: &str = "communicator";
    pub const ERROR: &str = "error";
    /// Set by the runner when the build was cancelled.
    pub const CANCELLED: &str = "cancelled";
    /// Set by the runner when a step halted the build.
    pub const HALTED: &str = "halted";
}

/// A value stored in the [`StateBag`].
#[derive(Clone)]
pub enum StateValue {
    Text(String),
    Path(PathBuf),
    Flag(bool),
    Config(Arc<BuildConfig>),
    Driver(Arc<dyn Driver>),
    Ui(Arc<dyn Ui>),
    Communicator(Arc<dyn Communicator>),
    Error(VmforgeError),
}

impl StateValue {
    fn kind(&self) -> &'static str {
        match self {
            StateValue::Text(_) => "text",
            StateValue::Path(_) => "path",
            StateValue::Flag(_) => "flag",
            StateValue::Config(_) => "config",
            StateValue::Driver(_) => "driver",
            StateValue::Ui(_) => "ui",
            StateValue::Communicator(_) => "communicator",
            StateValue::Error(_) => "error",
        }
    }
}

impl std::fmt::Debug for StateValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateValue::Text(s) => f.debug_tuple("Text").field(s).finish(),
            StateValue::Path(p) => f.debug_tuple("Path").field(p).finish(),
            StateValue::Flag(b) => f.debug_tuple("Flag").field(b).finish(),
            StateValue::Error(e) => f.debug_tuple("Error").field(e).finish(),
            other => write!(f, "{}(..)", other.kind()),
        }
    }
}

impl From<&str> for StateValue {
    fn from(value: &str) -> Self {
        StateValue::Text(value.to_string())
    }
}

impl From<String> for StateValue {
    fn from(value: String) -> Self {
        StateValue::Text(value)
    }
}

impl From<PathBuf> for StateValue {
    fn from(value: PathBuf) -> Self {
        StateValue::Path(value)
    }
}

impl From<bool> for StateValue {
    fn from(value: bool) -> Self {
        StateValue::Flag(value)
    }
}

impl From<Arc<BuildConfig>> for StateValue {
    fn from(value: Arc<BuildConfig>) -> Self {
        StateValue::Config(value)
    }
}

impl From<Arc<dyn Driver>> for StateValue {
    fn from(value: Arc<dyn Driver>) -> Self {
        StateValue::Driver(value)
    }
}

impl From<Arc<dyn Ui>> for StateValue {
    fn from(value: Arc<dyn Ui>) -> Self {
        StateValue::Ui(value)
    }
}

impl From<Arc<dyn Communicator>> for StateValue {
    fn from(value: Arc<dyn Communicator>) -> Self {
        StateValue::Communicator(value)
    }
}

impl From<VmforgeError> for StateValue {
    fn from(value: VmforgeError) -> Self {
        StateValue::Error(value)
    }
}

/// String-keyed registry shared by all steps of one build.
///
/// Values are a closed sum type, so reading a key as the wrong kind is an
/// explicit [`VmforgeError::State`] instead of a crash. The bag lives for one
/// build and is never persisted.
#[derive(Debug, Default)]
pub struct StateBag {
    values: HashMap<String, StateValue>,
    cancel: CancellationToken,
}

macro_rules! typed_getter {
    ($(#[$doc:meta])* $name:ident, $variant:ident, $ret:ty, |$v:ident| $map:expr) => {
        $(#[$doc])*
        pub fn $name(&self, key: &str) -> VmforgeResult<$ret> {
            match self.get(key)? {
                StateValue::$variant($v) => Ok($map),
                other => Err(Self::wrong_kind(key, other, stringify!($variant))),
            }
        }
    };
}

impl StateBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key`, replacing any previous value.
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<StateValue>) {
        self.values.insert(key.into(), value.into());
    }

    /// Get the value under `key`, or a state error if absent.
    pub fn get(&self, key: &str) -> VmforgeResult<&StateValue> {
        self.values
            .get(key)
            .ok_or_else(|| VmforgeError::State(format!("key '{}' is not set", key)))
    }

    /// Get the value under `key` if present.
    pub fn get_ok(&self, key: &str) -> Option<&StateValue> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Drop a key. Only the runner uses this, to keep the forward pass's
    /// error authoritative over anything written during cleanup.
    pub(crate) fn discard(&mut self, key: &str) -> Option<StateValue> {
        self.values.remove(key)
    }

    typed_getter!(text, Text, &str, |v| v.as_str());
    typed_getter!(path, Path, &Path, |v| v.as_path());
    typed_getter!(flag, Flag, bool, |v| *v);
    typed_getter!(
        /// The build configuration seeded by the builder.
        config,
        Config,
        Arc<BuildConfig>,
        |v| Arc::clone(v)
    );
    typed_getter!(driver_at, Driver, Arc<dyn Driver>, |v| Arc::clone(v));
    typed_getter!(ui_at, Ui, Arc<dyn Ui>, |v| Arc::clone(v));
    typed_getter!(
        communicator_at,
        Communicator,
        Arc<dyn Communicator>,
        |v| Arc::clone(v)
    );

    /// The hypervisor driver under [`keys::DRIVER`].
    pub fn driver(&self) -> VmforgeResult<Arc<dyn Driver>> {
        self.driver_at(keys::DRIVER)
    }

    /// The UI sink under [`keys::UI`].
    pub fn ui(&self) -> VmforgeResult<Arc<dyn Ui>> {
        self.ui_at(keys::UI)
    }

    /// The guest communicator under [`keys::COMMUNICATOR`].
    pub fn communicator(&self) -> VmforgeResult<Arc<dyn Communicator>> {
        self.communicator_at(keys::COMMUNICATOR)
    }

    /// Record a step-fatal error under [`keys::ERROR`].
    pub fn put_error(&mut self, err: VmforgeError) {
        self.put(keys::ERROR, StateValue::Error(err));
    }

    /// The step-fatal error, if one was recorded.
    pub fn error(&self) -> Option<&VmforgeError> {
        match self.values.get(keys::ERROR) {
            Some(StateValue::Error(e)) => Some(e),
            _ => None,
        }
    }

    /// Whether a boolean marker such as [`keys::HALTED`] is set.
    pub fn is_set(&self, key: &str) -> bool {
        matches!(self.values.get(key), Some(StateValue::Flag(true)))
    }

    /// Cancellation token of the run this bag belongs to.
    ///
    /// Long-running steps should select on it to stop waiting early.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn attach_cancellation(&mut self, token: CancellationToken) {
        self.cancel = token;
    }

    fn wrong_kind(key: &str, found: &StateValue, expected: &str) -> VmforgeError {
        VmforgeError::State(format!(
            "key '{}' holds {}, expected {}",
            key,
            found.kind(),
            expected.to_lowercase()
        ))
    }
}
