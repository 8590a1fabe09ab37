//! Local PowerShell process execution.

use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use vmforge_shared::errors::{VmforgeError, VmforgeResult};

/// Captured result of one PowerShell invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ScriptOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ScriptOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Handle to a PowerShell executable.
#[derive(Debug, Clone)]
pub(crate) struct PowerShell {
    binary_path: PathBuf,
}

impl PowerShell {
    /// Find Windows PowerShell, falling back to PowerShell Core.
    pub fn locate() -> VmforgeResult<Self> {
        let binary_path = super::find_binary("powershell")
            .or_else(|_| super::find_binary("pwsh"))
            .map_err(|_| {
                VmforgeError::Driver("neither powershell nor pwsh was found on PATH".into())
            })?;

        tracing::debug!(path = %binary_path.display(), "Using PowerShell");
        Ok(Self { binary_path })
    }

    /// Run `script` non-interactively and capture its output.
    ///
    /// A non-zero exit status is not an error here; callers decide.
    pub async fn run(&self, script: &str) -> VmforgeResult<ScriptOutput> {
        let mut cmd = Command::new(&self.binary_path);
        cmd.arg("-NoProfile")
            .arg("-NonInteractive")
            .arg("-ExecutionPolicy")
            .arg("Bypass")
            .arg("-Command")
            .arg(script);

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let output = cmd.output().await.map_err(|e| {
            let err_msg = format!("Failed to spawn {}: {}", self.binary_path.display(), e);
            tracing::error!("{}", err_msg);
            VmforgeError::Driver(err_msg)
        })?;

        Ok(ScriptOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Quote `value` as a single-quoted PowerShell string literal.
pub(crate) fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
