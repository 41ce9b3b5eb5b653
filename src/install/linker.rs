//! Links keg contents into the shared root.

use std::fs;
use std::io;
use std::path::Path;

use crate::core::layout::LINKED_DIRS;
use crate::core::{Layout, PackageId};
use crate::install::record::path_key;
use crate::install::{InstallError, InstallRecorder};
use crate::util::fs::{list_files, prune_empty_dirs, relative_path, remove_file_if_exists, symlink};
use crate::util::hash::same_contents;

/// Paths touched by [`Linker::link`], as record keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkOutcome {
    /// Links created by this call.
    pub created: Vec<String>,
    /// Existing paths with identical content, now also claimed by this package.
    pub shared: Vec<String>,
}

pub struct Linker<'a> {
    layout: &'a Layout,
}

impl<'a> Linker<'a> {
    pub fn new(layout: &'a Layout) -> Self {
        Linker { layout }
    }

    /// Link every file under the keg's linked directories, then
    /// `opt/<name>`. Nothing is left behind when a conflict is found.
    pub fn link(
        &self,
        id: PackageId,
        recorder: &InstallRecorder,
    ) -> Result<LinkOutcome, InstallError> {
        let keg = self.layout.keg(id);
        if !keg.is_dir() {
            return Err(InstallError::io(&keg, "keg does not exist"));
        }

        let mut outcome = LinkOutcome::default();
        match self.link_files(id, &keg, recorder, &mut outcome) {
            Ok(()) => Ok(outcome),
            Err(err) => {
                self.unlink(&outcome.created);
                Err(err)
            }
        }
    }

    fn link_files(
        &self,
        id: PackageId,
        keg: &Path,
        recorder: &InstallRecorder,
        outcome: &mut LinkOutcome,
    ) -> Result<(), InstallError> {
        let name = id.name();
        let root = self.layout.root();

        for dir in LINKED_DIRS {
            let files = list_files(&keg.join(dir)).map_err(|e| InstallError::io(keg, e))?;

            for file in files {
                let Ok(relative) = file.strip_prefix(keg) else {
                    continue;
                };
                let key = path_key(relative);
                let target = root.join(relative);

                if target.symlink_metadata().is_err() {
                    self.create_link(&file, &target)?;
                    outcome.created.push(key);
                    continue;
                }

                let owner = recorder.owner_of(&key);
                let identical = same_contents(&target, &file).unwrap_or(false);
                match owner {
                    Some(owner) if identical || owner == name.as_str() => {
                        tracing::debug!("{} shares `{}` with {}", id, key, owner);
                        outcome.shared.push(key);
                    }
                    owner => return Err(InstallError::Conflict { path: key, owner }),
                }
            }
        }

        let opt = self.layout.opt_prefix(name.as_str());
        let key = format!("opt/{}", name);
        if opt.symlink_metadata().is_ok() {
            match recorder.owner_of(&key) {
                Some(owner) if owner == name.as_str() => outcome.shared.push(key),
                owner => return Err(InstallError::Conflict { path: key, owner }),
            }
        } else {
            self.create_link(keg, &opt)?;
            outcome.created.push(key);
        }

        Ok(())
    }

    fn create_link(&self, source: &Path, target: &Path) -> Result<(), InstallError> {
        let Some(parent) = target.parent() else {
            return Err(InstallError::io(target, "link target has no parent"));
        };
        fs::create_dir_all(parent).map_err(|e| InstallError::io(parent, e))?;
        symlink(&relative_path(parent, source), target).map_err(|e| InstallError::io(target, e))
    }

    /// Remove links by record key, pruning directories left empty.
    pub fn unlink(&self, keys: &[String]) {
        let root = self.layout.root();
        for key in keys {
            let path = root.join(key);
            if let Err(e) = remove_file_if_exists(&path) {
                tracing::warn!("failed to remove {}: {}", path.display(), e);
            }
            if let Some(parent) = path.parent() {
                prune_empty_dirs(parent, root);
            }
        }
    }

    /// Point the link at `key` into `owner`'s keg. Used when the package
    /// whose keg a shared link pointed into is removed.
    pub fn relink(&self, key: &str, owner: PackageId) -> io::Result<()> {
        let target = self.layout.root().join(key);
        if !target.symlink_metadata()?.file_type().is_symlink() {
            return Ok(());
        }

        let source = self.layout.keg(owner).join(key);
        remove_file_if_exists(&target)?;
        let parent = target.parent().unwrap_or(self.layout.root());
        symlink(&relative_path(parent, &source), &target)
    }
}
