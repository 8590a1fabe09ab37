//! Operator-facing output sink.
//!
//! Steps report progress through [`Ui`] rather than printing directly, so the
//! same pipeline can run under a terminal, a test recorder, or a service.

use async_trait::async_trait;
use std::io::Write;
use std::sync::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use vmforge_shared::errors::{VmforgeError, VmforgeResult};

/// Output sink shared by every step in a build.
#[async_trait]
pub trait Ui: Send + Sync {
    /// Report a progress line.
    fn say(&self, message: &str);

    /// Report supplementary detail (indented under the last `say`).
    fn message(&self, message: &str);

    /// Report a failure. Purely observational.
    fn error(&self, message: &str);

    /// Ask the operator a question and wait for one line of input.
    async fn ask(&self, query: &str) -> VmforgeResult<String>;
}

/// Terminal UI writing to stdout/stderr and reading answers from stdin.
///
/// Every line is mirrored into the tracing log.
pub struct ConsoleUi {
    prefix: String,
    // Serializes multi-line writes from concurrent tasks.
    out: Mutex<()>,
}

impl ConsoleUi {
    pub fn new() -> Self {
        Self::with_prefix("hyperv-iso")
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            out: Mutex::new(()),
        }
    }

    fn write_stdout(&self, line: &str) {
        let _lock = self.out.lock();
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "{}", line);
        let _ = stdout.flush();
    }
}

impl Default for ConsoleUi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Ui for ConsoleUi {
    fn say(&self, message: &str) {
        tracing::info!(ui = %self.prefix, "{}", message);
        self.write_stdout(&format!("==> {}: {}", self.prefix, message));
    }

    fn message(&self, message: &str) {
        tracing::info!(ui = %self.prefix, "{}", message);
        self.write_stdout(&format!("    {}: {}", self.prefix, message));
    }

    fn error(&self, message: &str) {
        tracing::error!(ui = %self.prefix, "{}", message);
        let _lock = self.out.lock();
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "==> {}: {}", self.prefix, message);
    }

    async fn ask(&self, query: &str) -> VmforgeResult<String> {
        self.write_stdout(&format!("==> {}: {}", self.prefix, query));

        let mut line = String::new();
        let mut reader = BufReader::new(tokio::io::stdin());
        let read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| VmforgeError::Internal(format!("Failed to read from stdin: {}", e)))?;
        if read == 0 {
            return Err(VmforgeError::Internal("stdin closed".into()));
        }

        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}
