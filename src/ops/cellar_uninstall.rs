//! Implementation of `cellar uninstall`.

use crate::builder::BuildEvent;
use crate::install::RollbackReport;
use crate::ops::failure::Failure;
use crate::ops::session::Session;

/// Options for the uninstall command.
#[derive(Debug, Clone, Default)]
pub struct UninstallOptions {
    pub name: String,

    /// Remove even if installed packages still depend on it
    pub force: bool,
}

/// Remove an installed package. Paths another package still claims stay.
pub fn uninstall(
    session: &Session<'_>,
    opts: &UninstallOptions,
) -> Result<RollbackReport, Failure> {
    let installer = session.installer()?;
    let report = installer.uninstall(&opts.name, opts.force)?;

    session.reporter().event(&BuildEvent::PackageRemoved {
        package_id: report.id.to_string(),
        files_removed: report.removed.len(),
        files_kept: report.kept.len(),
    });

    Ok(report)
}
