//! Implementation of `cellar cleanup`.

use crate::ops::failure::Failure;
use crate::ops::session::Session;
use crate::util::fs::remove_dir_all_if_exists;
use crate::util::workdir::purge_all;

/// Options for the cleanup command.
#[derive(Debug, Clone, Default)]
pub struct CleanupOptions {
    /// Also empty the download cache
    pub downloads: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Retained working directories removed
    pub workdirs: usize,
    pub downloads_cleared: bool,
}

/// Remove working directories kept by failed builds.
pub fn cleanup(session: &Session<'_>, opts: &CleanupOptions) -> Result<CleanupReport, Failure> {
    let layout = session.layout();
    let workdirs = purge_all(&layout.work_dir())?;

    let downloads_cleared = opts.downloads && layout.download_cache().exists();
    if downloads_cleared {
        remove_dir_all_if_exists(&layout.download_cache())?;
    }

    tracing::debug!("Removed {} working director(ies)", workdirs);

    Ok(CleanupReport {
        workdirs,
        downloads_cleared,
    })
}
