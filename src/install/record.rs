//! The persisted install record (`var/db/installed.json`).

use std::collections::BTreeMap;
use std::path::{Component, Path};

use serde::{Deserialize, Serialize};

use crate::core::PackageId;

/// Current on-disk format version.
pub const RECORD_VERSION: u32 = 1;

/// Every installed package and every path it claims.
///
/// Paths are stored relative to the root with `/` separators. Each path maps
/// to its claimants in claim order; the first claimant is the owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallRecord {
    pub version: u32,
    #[serde(default)]
    pub packages: BTreeMap<String, InstalledPackage>,
    #[serde(default)]
    pub paths: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPackage {
    pub version: String,
    #[serde(default)]
    pub run_dependencies: Vec<String>,
    /// Installed because the user asked for it, not as a dependency.
    #[serde(default)]
    pub requested: bool,
    /// Seconds since the Unix epoch.
    #[serde(default)]
    pub installed_at: u64,
    #[serde(default)]
    pub files: Vec<String>,
}

impl InstalledPackage {
    pub fn id(&self, name: &str) -> PackageId {
        PackageId::new(name, self.version.as_str())
    }
}

impl Default for InstallRecord {
    fn default() -> Self {
        InstallRecord {
            version: RECORD_VERSION,
            packages: BTreeMap::new(),
            paths: BTreeMap::new(),
        }
    }
}

impl InstallRecord {
    /// Add `package` under `name` and claim its files.
    pub fn insert(&mut self, name: &str, package: InstalledPackage) {
        for file in &package.files {
            let claimants = self.paths.entry(file.clone()).or_default();
            if !claimants.iter().any(|c| c == name) {
                claimants.push(name.to_string());
            }
        }
        self.packages.insert(name.to_string(), package);
    }

    /// Remove `name` and release its claims.
    ///
    /// Returns the package together with the paths that lost their last
    /// claimant and the paths still claimed by someone else.
    pub fn remove(&mut self, name: &str) -> Option<(InstalledPackage, Vec<String>, Vec<String>)> {
        let package = self.packages.remove(name)?;
        let mut orphaned = Vec::new();
        let mut shared = Vec::new();

        for file in &package.files {
            let Some(claimants) = self.paths.get_mut(file) else {
                orphaned.push(file.clone());
                continue;
            };
            claimants.retain(|c| c != name);
            if claimants.is_empty() {
                self.paths.remove(file);
                orphaned.push(file.clone());
            } else {
                shared.push(file.clone());
            }
        }

        Some((package, orphaned, shared))
    }

    /// First claimant of `path`.
    pub fn owner_of(&self, path: &str) -> Option<&str> {
        self.paths
            .get(path)
            .and_then(|claimants| claimants.first())
            .map(String::as_str)
    }

    pub fn claimants(&self, path: &str) -> &[String] {
        self.paths.get(path).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Installed packages that list `name` as a run dependency.
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.packages
            .iter()
            .filter(|(_, pkg)| pkg.run_dependencies.iter().any(|d| d == name))
            .map(|(dependent, _)| dependent.clone())
            .collect()
    }
}

/// Record key for a path relative to the root.
pub fn path_key(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
