//! Crash-safe persistence of the install record.
//!
//! A commit serializes the whole record to `installed.json.staging`, syncs
//! it, and renames it over `installed.json`. Readers only ever see the
//! in-memory copy of the last published record, so a failed commit is
//! invisible to them.
//!
//! Writers take an advisory lock on `installed.json.lock` and re-read the
//! committed record under it, so commits from separate processes never
//! overwrite each other. The OS drops the lock when its holder exits.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use fs4::FileExt;

use crate::core::{Layout, PackageId};
use crate::install::linker::Linker;
use crate::install::record::{InstallRecord, InstalledPackage, RECORD_VERSION};
use crate::install::InstallError;
use crate::util::fs::{
    prune_empty_dirs, remove_dir_all_if_exists, remove_file_if_exists, write_synced,
};

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

const LOCK_POLL: Duration = Duration::from_millis(25);

/// A package about to be committed.
#[derive(Debug, Clone)]
pub struct InstallEntry {
    pub id: PackageId,
    pub run_dependencies: Vec<String>,
    pub requested: bool,
    /// Record keys of every path the package claims.
    pub files: Vec<String>,
}

/// Result of removing a package.
#[derive(Debug, Clone)]
pub struct RollbackReport {
    pub id: PackageId,
    /// Paths deleted from disk.
    pub removed: Vec<String>,
    /// Paths left in place because another package still claims them.
    pub kept: Vec<String>,
}

pub struct InstallRecorder {
    layout: Layout,
    path: PathBuf,
    staging: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Duration,
    state: Mutex<InstallRecord>,
}

impl InstallRecorder {
    pub fn open(layout: &Layout) -> Result<Self, InstallError> {
        Self::open_with_timeout(layout, DEFAULT_LOCK_TIMEOUT)
    }

    /// Load the committed record. A staging file left by an interrupted
    /// commit is discarded.
    pub fn open_with_timeout(
        layout: &Layout,
        lock_timeout: Duration,
    ) -> Result<Self, InstallError> {
        let db_dir = layout.db_dir();
        fs::create_dir_all(&db_dir).map_err(|e| InstallError::io(&db_dir, e))?;

        let path = layout.record_path();
        let staging = path.with_extension("json.staging");
        let lock_path = path.with_extension("json.lock");

        if staging.exists() {
            tracing::debug!("Discarding staged record {}", staging.display());
            remove_file_if_exists(&staging).map_err(|e| InstallError::io(&staging, e))?;
        }

        let record = load(&path)?;

        Ok(InstallRecorder {
            layout: layout.clone(),
            path,
            staging,
            lock_path,
            lock_timeout,
            state: Mutex::new(record),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn state(&self) -> MutexGuard<'_, InstallRecord> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_installed(&self, name: &str) -> bool {
        self.state().packages.contains_key(name)
    }

    pub fn installed_version(&self, name: &str) -> Option<String> {
        self.state().packages.get(name).map(|p| p.version.clone())
    }

    pub fn get(&self, name: &str) -> Option<InstalledPackage> {
        self.state().packages.get(name).cloned()
    }

    pub fn owner_of(&self, path: &str) -> Option<String> {
        self.state().owner_of(path).map(str::to_string)
    }

    /// Installed packages, sorted by name.
    pub fn packages(&self) -> Vec<(String, InstalledPackage)> {
        self.state()
            .packages
            .iter()
            .map(|(name, pkg)| (name.clone(), pkg.clone()))
            .collect()
    }

    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.state().dependents_of(name)
    }

    pub fn snapshot(&self) -> InstallRecord {
        self.state().clone()
    }

    /// Re-read the committed record, picking up commits made by other
    /// processes since this recorder was opened.
    pub fn refresh(&self) -> Result<(), InstallError> {
        let mut state = self.state();
        *state = load(&self.path)?;
        Ok(())
    }

    /// Add `entry` to the record and publish it.
    pub fn commit(&self, entry: InstallEntry) -> Result<(), InstallError> {
        let mut state = self.state();
        let _lock = FileLock::acquire(&self.lock_path, self.lock_timeout)?;

        let mut next = load(&self.path)?;
        next.insert(
            entry.id.name().as_str(),
            InstalledPackage {
                version: entry.id.version().to_string(),
                run_dependencies: entry.run_dependencies,
                requested: entry.requested,
                installed_at: unix_now(),
                files: entry.files,
            },
        );

        self.persist(&next)?;
        *state = next;
        tracing::debug!("Committed {} to {}", entry.id, self.path.display());
        Ok(())
    }

    /// Remove `id` from the record, then delete the paths nobody else
    /// claims. Shared links that pointed into the removed keg are moved to
    /// the next claimant.
    pub fn rollback(&self, id: PackageId) -> Result<RollbackReport, InstallError> {
        let mut state = self.state();
        let _lock = FileLock::acquire(&self.lock_path, self.lock_timeout)?;
        *state = load(&self.path)?;

        let name = id.name();
        let not_installed = || InstallError::NotInstalled {
            name: name.to_string(),
        };
        match state.packages.get(name.as_str()) {
            Some(pkg) if pkg.version == id.version().as_str() => {}
            _ => return Err(not_installed()),
        }

        let mut next = state.clone();
        let (_, orphaned, shared) = next.remove(name.as_str()).ok_or_else(not_installed)?;

        self.persist(&next)?;
        *state = next;

        let root = self.layout.root();
        let mut removed = Vec::new();
        for key in orphaned {
            let path = root.join(&key);
            match remove_file_if_exists(&path) {
                Ok(()) => removed.push(key),
                Err(e) => tracing::warn!("failed to remove {}: {}", path.display(), e),
            }
            if let Some(parent) = path.parent() {
                prune_empty_dirs(parent, root);
            }
        }

        let linker = Linker::new(&self.layout);
        for key in &shared {
            let Some(owner) = state.owner_of(key) else {
                continue;
            };
            let Some(owner_id) = state.packages.get(owner).map(|p| p.id(owner)) else {
                continue;
            };
            if let Err(e) = linker.relink(key, owner_id) {
                tracing::warn!("failed to relink `{}` to {}: {}", key, owner_id, e);
            }
        }

        let keg = self.layout.keg(id);
        if let Err(e) = remove_dir_all_if_exists(&keg) {
            tracing::warn!("{:#}", e);
        }
        if let Some(parent) = keg.parent() {
            prune_empty_dirs(parent, root);
        }

        Ok(RollbackReport {
            id,
            removed,
            kept: shared,
        })
    }

    fn persist(&self, record: &InstallRecord) -> Result<(), InstallError> {
        self.write_staging(record)?;
        self.publish()
    }

    /// First half of a commit. Split out so tests can stop between the two.
    pub(crate) fn write_staging(&self, record: &InstallRecord) -> Result<(), InstallError> {
        let bytes =
            serde_json::to_vec_pretty(record).map_err(|e| InstallError::io(&self.staging, e))?;
        write_synced(&self.staging, &bytes).map_err(|e| InstallError::io(&self.staging, e))
    }

    fn publish(&self) -> Result<(), InstallError> {
        fs::rename(&self.staging, &self.path).map_err(|e| InstallError::PartialCommit {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        sync_dir(self.path.parent());
        Ok(())
    }
}

fn load(path: &Path) -> Result<InstallRecord, InstallError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(InstallRecord::default()),
        Err(e) => return Err(InstallError::io(path, e)),
    };

    let corrupt = |message: String| InstallError::Corrupt {
        path: path.to_path_buf(),
        message,
    };

    let record: InstallRecord =
        serde_json::from_slice(&bytes).map_err(|e| corrupt(e.to_string()))?;
    if record.version != RECORD_VERSION {
        return Err(corrupt(format!("unsupported record version {}", record.version)));
    }
    Ok(record)
}

#[cfg(unix)]
fn sync_dir(dir: Option<&Path>) {
    if let Some(dir) = dir {
        if let Err(e) = fs::File::open(dir).and_then(|d| d.sync_all()) {
            tracing::debug!("failed to sync {}: {}", dir.display(), e);
        }
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: Option<&Path>) {}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Cross-process writer lock, held for the duration of one commit.
///
/// The lock file itself is never deleted; only the advisory lock on it
/// matters.
struct FileLock {
    file: File,
}

impl FileLock {
    fn acquire(path: &Path, timeout: Duration) -> Result<FileLock, InstallError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|e| InstallError::io(path, e))?;

        let start = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(FileLock { file }),
                Err(e) if is_contended(&e) => {
                    if start.elapsed() >= timeout {
                        return Err(InstallError::Locked {
                            path: path.to_path_buf(),
                        });
                    }
                    thread::sleep(LOCK_POLL);
                }
                Err(e) => return Err(InstallError::io(path, e)),
            }
        }
    }
}

#[cfg(not(windows))]
fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
}

#[cfg(windows)]
fn is_contended(err: &io::Error) -> bool {
    // ERROR_LOCK_VIOLATION
    err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(33)
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
