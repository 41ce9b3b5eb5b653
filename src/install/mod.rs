//! Installation bookkeeping.
//!
//! After a build succeeds, the keg is linked into the shared root by the
//! [`Linker`] and the result is committed to the [`InstallRecorder`]. The
//! recorder is the only shared mutable state of an install operation; an
//! [`Installer`] serializes link-and-commit so two packages building at
//! once never race for the same path.

pub mod linker;
pub mod record;
pub mod recorder;

pub use linker::{LinkOutcome, Linker};
pub use record::{InstallRecord, InstalledPackage, RECORD_VERSION};
pub use recorder::{InstallEntry, InstallRecorder, RollbackReport};

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use miette::Diagnostic as MietteDiagnostic;
use thiserror::Error;

use crate::core::{Layout, PackageId};
use crate::util::diagnostic::{suggestions, Diagnostic};
use crate::util::fs::{list_files, remove_dir_all_if_exists};

/// Error while linking, recording or removing an install.
#[derive(Debug, Error, MietteDiagnostic)]
pub enum InstallError {
    /// The staged record could not be published; the previous record is
    /// still in effect.
    #[error("install record commit was interrupted at {}: {message}", path.display())]
    #[diagnostic(code(cellar::install::partial_commit))]
    PartialCommit { path: PathBuf, message: String },

    #[error("`{path}` is already provided by {}", owner_label(.owner))]
    #[diagnostic(code(cellar::install::conflict))]
    Conflict { path: String, owner: Option<String> },

    #[error("install record is locked by another process ({})", path.display())]
    #[diagnostic(code(cellar::install::locked))]
    Locked { path: PathBuf },

    #[error("package `{name}` is not installed")]
    #[diagnostic(code(cellar::install::not_installed))]
    NotInstalled { name: String },

    #[error("package `{name}` is required by {}", dependents.join(", "))]
    #[diagnostic(
        code(cellar::install::has_dependents),
        help("Uninstall the dependents first, or pass --force")
    )]
    HasDependents {
        name: String,
        dependents: Vec<String>,
    },

    #[error("I/O error at {}: {message}", path.display())]
    #[diagnostic(code(cellar::install::io))]
    Io { path: PathBuf, message: String },

    #[error("install record {} is corrupt: {message}", path.display())]
    #[diagnostic(code(cellar::install::corrupt))]
    Corrupt { path: PathBuf, message: String },
}

fn owner_label(owner: &Option<String>) -> String {
    match owner {
        Some(owner) => format!("`{}`", owner),
        None => "a file not managed by cellar".to_string(),
    }
}

impl InstallError {
    pub(crate) fn io(path: &Path, err: impl std::fmt::Display) -> Self {
        InstallError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }

    /// Convert to a user-friendly diagnostic.
    pub fn to_diagnostic(&self) -> Diagnostic {
        let diag = Diagnostic::error(self.to_string());
        match self {
            InstallError::Locked { .. } => diag.with_suggestion(suggestions::RECORD_LOCKED),
            InstallError::Conflict { owner: None, path } => diag.with_suggestion(format!(
                "Move the existing `{}` out of the way and retry",
                path
            )),
            InstallError::HasDependents { name, .. } => diag.with_suggestion(format!(
                "Run `cellar uninstall {} --force` to remove it anyway",
                name
            )),
            InstallError::Corrupt { path, .. } => diag.with_suggestion(format!(
                "Restore {} from a backup or remove it to start over",
                path.display()
            )),
            _ => diag,
        }
    }
}

/// What one successful install added.
#[derive(Debug, Clone)]
pub struct InstallReport {
    pub id: PackageId,
    /// Every claimed path: keg files, links and `opt/<name>`.
    pub files: usize,
    pub shared: usize,
}

/// Links kegs and commits them to the record, one package at a time.
pub struct Installer {
    layout: Layout,
    recorder: InstallRecorder,
    gate: Mutex<()>,
}

impl Installer {
    pub fn open(layout: &Layout) -> Result<Self, InstallError> {
        Self::open_with_timeout(layout, recorder::DEFAULT_LOCK_TIMEOUT)
    }

    pub fn open_with_timeout(
        layout: &Layout,
        lock_timeout: Duration,
    ) -> Result<Self, InstallError> {
        Ok(Installer {
            layout: layout.clone(),
            recorder: InstallRecorder::open_with_timeout(layout, lock_timeout)?,
            gate: Mutex::new(()),
        })
    }

    pub fn recorder(&self) -> &InstallRecorder {
        &self.recorder
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Link the built keg of `id` and commit it. On failure the links made
    /// here are removed again and the record is unchanged.
    pub fn install(
        &self,
        id: PackageId,
        run_dependencies: Vec<String>,
        requested: bool,
    ) -> Result<InstallReport, InstallError> {
        let _gate = self.gate.lock().unwrap_or_else(|e| e.into_inner());
        self.recorder.refresh()?;

        let name = id.name();
        if let Some(existing) = self.recorder.installed_version(name.as_str()) {
            if existing != id.version().as_str() {
                return Err(InstallError::Conflict {
                    path: format!("opt/{}", name),
                    owner: Some(format!("{} v{}", name, existing)),
                });
            }
        }

        let keg = self.layout.keg(id);
        let keg_files = list_files(&keg).map_err(|e| InstallError::io(&keg, e))?;
        let linker = Linker::new(&self.layout);
        let outcome = linker.link(id, &self.recorder)?;

        let mut files: Vec<String> = keg_files
            .iter()
            .filter_map(|path| path.strip_prefix(self.layout.root()).ok())
            .map(record::path_key)
            .collect();
        files.extend(outcome.created.iter().cloned());
        files.extend(outcome.shared.iter().cloned());

        let entry = InstallEntry {
            id,
            run_dependencies,
            requested,
            files,
        };
        let total = entry.files.len();

        if let Err(err) = self.recorder.commit(entry) {
            linker.unlink(&outcome.created);
            return Err(err);
        }

        tracing::debug!(
            "Installed {} ({} paths, {} shared)",
            id,
            total,
            outcome.shared.len()
        );

        Ok(InstallReport {
            id,
            files: total,
            shared: outcome.shared.len(),
        })
    }

    /// Remove a package's files, keeping paths other packages still claim.
    pub fn uninstall(&self, name: &str, force: bool) -> Result<RollbackReport, InstallError> {
        let _gate = self.gate.lock().unwrap_or_else(|e| e.into_inner());
        self.recorder.refresh()?;

        let Some(version) = self.recorder.installed_version(name) else {
            return Err(InstallError::NotInstalled {
                name: name.to_string(),
            });
        };

        if !force {
            let dependents = self.recorder.dependents_of(name);
            if !dependents.is_empty() {
                return Err(InstallError::HasDependents {
                    name: name.to_string(),
                    dependents,
                });
            }
        }

        self.recorder.rollback(PackageId::new(name, version.as_str()))
    }

    /// Discard the keg of a build that never got committed.
    pub fn discard_keg(&self, id: PackageId) {
        if self.recorder.installed_version(id.name().as_str()).is_some() {
            return;
        }
        let keg = self.layout.keg(id);
        if let Err(e) = remove_dir_all_if_exists(&keg) {
            tracing::warn!("failed to remove {}: {:#}", keg.display(), e);
        }
        if let Some(parent) = keg.parent() {
            crate::util::fs::prune_empty_dirs(parent, &self.layout.cellar_dir());
        }
    }
}
