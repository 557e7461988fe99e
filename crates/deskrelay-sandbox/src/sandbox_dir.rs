//! Request-scoped sandbox directory.
//!
//! Created once per script envelope and removed exactly once, either by
//! `close()` or by `Drop` on early return. Removal failures are logged and
//! never propagate.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::materialize::MaterializeError;

pub const SANDBOX_PREFIX: &str = "deskrelay_script_";

#[derive(Debug)]
pub struct SandboxDir {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl SandboxDir {
    /// Create a uniquely named directory under `root`, or the OS temp dir.
    pub fn create(root: Option<&Path>) -> Result<Self, MaterializeError> {
        let dir = match root {
            Some(root) => {
                fs::create_dir_all(root).map_err(MaterializeError::CreateSandbox)?;
                tempfile::Builder::new()
                    .prefix(SANDBOX_PREFIX)
                    .tempdir_in(root)
            }
            None => tempfile::Builder::new().prefix(SANDBOX_PREFIX).tempdir(),
        }
        .map_err(MaterializeError::CreateSandbox)?;

        let path = dir.path().to_path_buf();
        tracing::debug!(path = %path.display(), "Created sandbox directory");
        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the directory now.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        match dir.close() {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Removed sandbox directory"),
            Err(e) => {
                let path = self.path.display().to_string();
                tracing::warn!(path = %path, error = %e, "Failed to remove sandbox directory");
                deskrelay_core::observability::audit_sandbox_cleanup_failed(&path, &e.to_string());
            }
        }
    }
}

impl Drop for SandboxDir {
    fn drop(&mut self) {
        self.release();
    }
}
