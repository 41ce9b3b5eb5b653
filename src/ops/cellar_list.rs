//! Implementation of `cellar list`.

use serde::Serialize;

use crate::ops::failure::Failure;
use crate::ops::session::Session;

/// One row of `cellar list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListEntry {
    pub name: String,
    pub version: String,
    pub installed: bool,
    /// Asked for by name rather than pulled in as a dependency.
    pub requested: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Claimed paths; zero for packages that are not installed.
    pub files: usize,
}

/// Installed packages, or with `available` every registry package.
///
/// Entries are sorted by name.
pub fn list(session: &Session<'_>, available: bool) -> Result<Vec<ListEntry>, Failure> {
    let installer = session.installer()?;
    let recorder = installer.recorder();

    if !available {
        return Ok(recorder
            .packages()
            .into_iter()
            .map(|(name, pkg)| ListEntry {
                name,
                version: pkg.version,
                installed: true,
                requested: pkg.requested,
                description: None,
                files: pkg.files.len(),
            })
            .collect());
    }

    let registry = session.registry()?;
    Ok(registry
        .iter()
        .map(|descriptor| {
            let name = descriptor.name().to_string();
            let installed = recorder.get(&name);
            ListEntry {
                version: descriptor.version().to_string(),
                installed: installed.is_some(),
                requested: installed.as_ref().is_some_and(|p| p.requested),
                description: descriptor.description().map(str::to_string),
                files: installed.map_or(0, |p| p.files.len()),
                name,
            }
        })
        .collect())
}
