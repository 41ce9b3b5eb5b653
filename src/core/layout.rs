//! On-disk layout of an install root.
//!
//! ```text
//! <root>/
//!   bin/ lib/ include/ share/ etc/ sbin/   links into kegs
//!   cellar/<name>/<version>/               one keg per installed package
//!   opt/<name>                             -> cellar/<name>/<version>
//!   etc/cellar.toml                        configuration
//!   var/db/installed.json                  install record
//!   var/cache/downloads/                   verified source archives
//!   var/work/                              per-build working directories
//! ```

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::core::PackageId;
use crate::util::fs::ensure_dir;

/// Directories of the shared root that receive links from a keg.
pub const LINKED_DIRS: &[&str] = &["bin", "sbin", "lib", "include", "share", "etc"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Layout { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cellar_dir(&self) -> PathBuf {
        self.root.join("cellar")
    }

    /// Install prefix of one package version.
    pub fn keg(&self, id: PackageId) -> PathBuf {
        self.cellar_dir()
            .join(id.name().as_str())
            .join(id.version().as_str())
    }

    pub fn opt_dir(&self) -> PathBuf {
        self.root.join("opt")
    }

    /// Version-independent prefix, a link to the current keg.
    pub fn opt_prefix(&self, name: &str) -> PathBuf {
        self.opt_dir().join(name)
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("etc").join("cellar.toml")
    }

    pub fn db_dir(&self) -> PathBuf {
        self.root.join("var").join("db")
    }

    pub fn record_path(&self) -> PathBuf {
        self.db_dir().join("installed.json")
    }

    pub fn download_cache(&self) -> PathBuf {
        self.root.join("var").join("cache").join("downloads")
    }

    pub fn work_dir(&self) -> PathBuf {
        self.root.join("var").join("work")
    }

    /// Create the directories every operation expects to exist.
    pub fn ensure(&self) -> Result<()> {
        for dir in [
            self.cellar_dir(),
            self.opt_dir(),
            self.db_dir(),
            self.download_cache(),
            self.work_dir(),
        ] {
            ensure_dir(&dir)?;
        }
        Ok(())
    }
}
