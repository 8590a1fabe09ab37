//! Build artifact: the exported VM files.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use vmforge_shared::errors::{VmforgeError, VmforgeResult};
use walkdir::WalkDir;

/// Identifier of artifacts produced by this builder.
pub const BUILDER_ID: &str = "vmforge.hyperv.iso";

/// Files left in the output directory by a successful build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub builder_id: String,
    pub dir: PathBuf,
    /// Regular files under `dir`, sorted.
    pub files: Vec<PathBuf>,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    /// Collect every regular file below `dir`.
    pub fn from_dir(dir: impl AsRef<Path>) -> VmforgeResult<Self> {
        let dir = dir.as_ref();
        tracing::debug!(dir = %dir.display(), "Collecting artifact files");

        let mut files = Vec::new();
        for entry in WalkDir::new(dir) {
            let entry = entry.map_err(|e| {
                VmforgeError::Storage(format!("Failed to walk {}: {}", dir.display(), e))
            })?;
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }
        files.sort();

        Ok(Self {
            builder_id: BUILDER_ID.to_string(),
            dir: dir.to_path_buf(),
            files,
            created_at: Utc::now(),
        })
    }

    /// Remove the artifact from disk.
    pub fn destroy(&self) -> VmforgeResult<()> {
        std::fs::remove_dir_all(&self.dir).map_err(|e| {
            VmforgeError::Storage(format!("Failed to remove {}: {}", self.dir.display(), e))
        })
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VM files in directory: {}", self.dir.display())
    }
}
