//! Scratch workspace management.
//!
//! Remote module sources referenced by a plan get materialized into a
//! per-run temporary directory. The directory is created on pipeline
//! entry and removed when the [`Workspace`] drops, so no run leaves
//! state behind.

use crate::error::{Result, TerracartaError};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A per-run scratch directory with a module cache inside it.
#[derive(Debug)]
pub struct Workspace {
    root: TempDir,
    module_cache: PathBuf,
}

impl Workspace {
    /// Create a fresh workspace under the system temp directory.
    pub fn create() -> Result<Self> {
        let root = TempDir::with_prefix("terracarta-")
            .map_err(|e| TerracartaError::io(std::env::temp_dir(), e))?;
        let module_cache = root.path().join("module_cache");
        std::fs::create_dir_all(&module_cache)
            .map_err(|e| TerracartaError::io(&module_cache, e))?;
        tracing::debug!(path = %root.path().display(), "workspace created");
        Ok(Self { root, module_cache })
    }

    /// Root of the workspace.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.root.path()
    }

    /// Directory holding fetched module sources.
    #[must_use]
    pub fn module_cache(&self) -> &Path {
        &self.module_cache
    }
}
