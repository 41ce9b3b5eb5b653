//! The descriptor registry.
//!
//! A registry maps package names to descriptors. It is loaded from one or
//! more directories of `*.toml` descriptor files. Directories are searched
//! in priority order: when two directories define the same package, the
//! one listed first wins and the other is ignored with a debug log.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::core::manifest::{load_descriptor, DESCRIPTOR_EXTENSION};
use crate::core::{PackageDescriptor, PackageId};
use crate::util::fs::glob_files;
use crate::util::InternedString;

/// Known descriptors, keyed by package name.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    descriptors: BTreeMap<InternedString, Arc<PackageDescriptor>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every descriptor from `dirs`, earlier directories first.
    ///
    /// Missing directories are skipped. A descriptor that fails to parse
    /// fails the whole load: a broken registry should not silently resolve
    /// to a different graph.
    pub fn load_dirs(dirs: &[PathBuf]) -> Result<Registry> {
        let mut registry = Registry::new();

        for dir in dirs {
            if !dir.is_dir() {
                tracing::debug!("Skipping missing registry directory {}", dir.display());
                continue;
            }
            registry.load_dir(dir)?;
        }

        Ok(registry)
    }

    fn load_dir(&mut self, dir: &Path) -> Result<()> {
        let pattern = format!("*.{}", DESCRIPTOR_EXTENSION);
        let files = glob_files(dir, &[pattern])
            .with_context(|| format!("failed to list registry {}", dir.display()))?;

        for file in files {
            let descriptor = load_descriptor(&file)?;
            let name = descriptor.name();

            if let Some(existing) = self.descriptors.get(&name) {
                tracing::debug!(
                    "Ignoring {} from {}: already defined by {}",
                    descriptor.id(),
                    file.display(),
                    existing
                        .origin()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default()
                );
                continue;
            }

            self.descriptors.insert(name, Arc::new(descriptor));
        }

        Ok(())
    }

    /// Insert a descriptor, replacing any existing one with the same name.
    pub fn insert(&mut self, descriptor: PackageDescriptor) {
        self.descriptors
            .insert(descriptor.name(), Arc::new(descriptor));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<PackageDescriptor>> {
        self.descriptors.get(name)
    }

    /// Look up an exact identity. Fails if the registry has a different
    /// version of the package.
    pub fn get_exact(&self, id: PackageId) -> Option<&Arc<PackageDescriptor>> {
        self.descriptors
            .get(id.name().as_str())
            .filter(|d| d.version() == id.version())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.descriptors.contains_key(name)
    }

    /// Iterate descriptors in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<PackageDescriptor>> {
        self.descriptors.values()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Names close to `name`, for "did you mean" hints.
    pub fn suggestions(&self, name: &str) -> Vec<String> {
        let needle = name.to_ascii_lowercase();
        self.descriptors
            .keys()
            .filter(|candidate| {
                let candidate = candidate.to_ascii_lowercase();
                candidate.contains(&needle) || needle.contains(&candidate)
            })
            .take(5)
            .map(|n| n.to_string())
            .collect()
    }
}

impl FromIterator<PackageDescriptor> for Registry {
    fn from_iter<T: IntoIterator<Item = PackageDescriptor>>(iter: T) -> Self {
        let mut registry = Registry::new();
        for descriptor in iter {
            registry.insert(descriptor);
        }
        registry
    }
}
