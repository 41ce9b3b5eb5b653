//! Package sources.
//!
//! Sources are downloaded through a [`Transport`], verified against the
//! descriptor's SHA-256, cached by digest, and extracted into a per-build
//! working directory.

pub mod archive;
pub mod fetch;
pub mod transport;

pub use archive::{extract, ArchiveKind};
pub use fetch::{Fetcher, LocalArchive, RetryPolicy};
pub use transport::{DefaultTransport, FileTransport, HttpTransport, Transport, TransportError};

use std::path::{Path, PathBuf};

use miette::Diagnostic as MietteDiagnostic;
use thiserror::Error;

use crate::util::diagnostic::{suggestions, Diagnostic};

/// Error while fetching or unpacking a source archive.
#[derive(Debug, Error, MietteDiagnostic)]
pub enum FetchError {
    /// Transport failure after all retries.
    #[error("failed to fetch {url} after {attempts} attempt(s): {message}")]
    #[diagnostic(code(cellar::fetch::network))]
    Network {
        url: String,
        attempts: u32,
        message: String,
    },

    /// The downloaded bytes do not match the recorded digest. Never retried.
    #[error("checksum mismatch for {url}: expected {expected}, got {actual}")]
    #[diagnostic(code(cellar::fetch::checksum))]
    ChecksumMismatch {
        url: String,
        expected: String,
        actual: String,
    },

    #[error("failed to extract archive: {message}")]
    #[diagnostic(code(cellar::fetch::extract))]
    Extract { message: String },

    #[error("descriptor has no sources")]
    #[diagnostic(code(cellar::fetch::no_sources))]
    NoSources,

    #[error("I/O error at {}: {message}", path.display())]
    #[diagnostic(code(cellar::fetch::io))]
    Io { path: PathBuf, message: String },
}

impl FetchError {
    pub(crate) fn io(path: &Path, err: std::io::Error) -> Self {
        FetchError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }

    /// Convert to a user-friendly diagnostic.
    pub fn to_diagnostic(&self) -> Diagnostic {
        let diag = Diagnostic::error(self.to_string());
        match self {
            FetchError::Network { .. } => diag.with_suggestion(suggestions::FETCH_FAILED),
            FetchError::ChecksumMismatch { .. } => {
                diag.with_suggestion(suggestions::CHECKSUM_MISMATCH)
            }
            _ => diag,
        }
    }
}
