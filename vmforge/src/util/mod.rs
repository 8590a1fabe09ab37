mod powershell;

pub(crate) use powershell::{PowerShell, quote};

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use vmforge_shared::errors::{VmforgeError, VmforgeResult};

/// Locate an executable on `PATH`, honouring `PATHEXT` on Windows.
pub(crate) fn find_binary(name: &str) -> VmforgeResult<PathBuf> {
    let paths = std::env::var_os("PATH")
        .ok_or_else(|| VmforgeError::Internal("PATH is not set".into()))?;
    let cwd = std::env::current_dir()?;
    find_binary_in(name, paths, cwd)
}

/// Locate an executable in an explicit search path.
pub(crate) fn find_binary_in(
    name: &str,
    paths: impl AsRef<OsStr>,
    cwd: impl AsRef<Path>,
) -> VmforgeResult<PathBuf> {
    which::which_in(name, Some(paths), cwd)
        .map_err(|e| VmforgeError::Internal(format!("{} not found on PATH: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_find_binary_missing() {
        let err = find_binary("vmforge-definitely-not-installed").unwrap_err();
        assert!(err.to_string().contains("not found on PATH"));
    }

    #[cfg(unix)]
    #[test]
    fn test_find_binary_in_search_path() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let exe = dir.path().join("pwsh");
        std::fs::write(&exe, b"#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();

        let found = find_binary_in("pwsh", dir.path(), dir.path()).unwrap();
        assert_eq!(found, exe);
        assert!(find_binary_in("powershell", dir.path(), dir.path()).is_err());
    }

    #[cfg(windows)]
    #[test]
    fn test_find_binary_in_honours_pathext() {
        let dir = TempDir::new().unwrap();
        let shim = dir.path().join("pwsh.cmd");
        std::fs::write(&shim, b"@echo off\r\n").unwrap();

        let found = find_binary_in("pwsh", dir.path(), dir.path()).unwrap();
        assert_eq!(
            found.to_string_lossy().to_lowercase(),
            shim.to_string_lossy().to_lowercase()
        );
    }
}
