//! Per-build working directories.
//!
//! A `Workdir` is created fresh for every build attempt. It is removed with
//! [`Workdir::purge`] once the install has been committed, and kept with
//! [`Workdir::retain`] when anything failed so the tree can be inspected.
//! Retained directories are removed by `cellar cleanup`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::TempDir;

use crate::core::PackageId;
use crate::util::fs::{ensure_dir, remove_dir_all_if_exists};

/// A uniquely named scratch directory for one build.
///
/// Dropping a `Workdir` without calling `purge` or `retain` removes it.
#[derive(Debug)]
pub struct Workdir {
    dir: TempDir,
}

impl Workdir {
    /// Create a new directory under `base` for `pkg_id`, named
    /// `<name>-<version>-<random>`.
    pub fn create(base: &Path, pkg_id: PackageId) -> Result<Workdir> {
        ensure_dir(base)?;

        let dir = tempfile::Builder::new()
            .prefix(&format!("{}-{}-", pkg_id.name(), pkg_id.version()))
            .tempdir_in(base)
            .with_context(|| format!("failed to create working directory in {}", base.display()))?;

        Ok(Workdir { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Delete the directory. Called after a successful commit.
    pub fn purge(self) -> Result<()> {
        tracing::debug!("Removing working directory {}", self.path().display());
        let path = self.path().to_path_buf();
        self.dir
            .close()
            .with_context(|| format!("failed to remove {}", path.display()))
    }

    /// Keep the directory on disk and return its path for diagnostics.
    pub fn retain(self) -> PathBuf {
        tracing::info!("Keeping working directory {}", self.path().display());
        self.dir.keep()
    }
}

/// Remove every retained working directory under `base`.
///
/// Returns the number of directories removed.
pub fn purge_all(base: &Path) -> Result<usize> {
    if !base.exists() {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in
        fs::read_dir(base).with_context(|| format!("failed to read {}", base.display()))?
    {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            remove_dir_all_if_exists(&entry.path())?;
            removed += 1;
        }
    }

    Ok(removed)
}
