//! Package identification: name plus version.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::util::InternedString;

/// A unique identifier for a package.
///
/// Both parts are interned, so a `PackageId` is `Copy` and compares in
/// constant time. Versions are kept verbatim: descriptors in the wild use
/// schemes such as `1.4.7`, `2.3.1_1` and `20240101` that are not semver.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageId {
    name: InternedString,
    version: InternedString,
}

impl PackageId {
    pub fn new(name: impl Into<InternedString>, version: impl Into<InternedString>) -> Self {
        PackageId {
            name: name.into(),
            version: version.into(),
        }
    }

    pub fn name(&self) -> InternedString {
        self.name
    }

    pub fn version(&self) -> InternedString {
        self.version
    }

    /// Get a display string like "name v1.2.3"
    pub fn display_name(&self) -> String {
        format!("{} v{}", self.name, self.version)
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} v{}", self.name, self.version)
    }
}

impl fmt::Debug for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PackageId({}@{})", self.name, self.version)
    }
}
