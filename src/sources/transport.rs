//! Transports move bytes from a URL into memory.
//!
//! The fetcher only sees the [`Transport`] trait, so tests can serve
//! archives from memory and count calls.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use url::Url;

/// A transport-level failure. Always treated as transient by the fetcher.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        TransportError {
            message: message.into(),
        }
    }
}

/// Performs a GET of one URL.
pub trait Transport: Send + Sync {
    fn get(&self, url: &Url) -> Result<Vec<u8>, TransportError>;
}

/// HTTP(S) transport backed by a blocking reqwest client.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("cellar/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::new(format!("failed to build HTTP client: {}", e)))?;

        Ok(HttpTransport { client })
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &Url) -> Result<Vec<u8>, TransportError> {
        tracing::debug!("GET {}", url);

        let response = self
            .client
            .get(url.clone())
            .send()
            .map_err(|e| TransportError::new(format!("failed to download {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(TransportError::new(format!(
                "failed to download {}: HTTP {}",
                url,
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .map_err(|e| TransportError::new(format!("failed to read body of {}: {}", url, e)))?;

        Ok(bytes.to_vec())
    }
}

/// Reads `file://` URLs from the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileTransport;

impl Transport for FileTransport {
    fn get(&self, url: &Url) -> Result<Vec<u8>, TransportError> {
        let path: PathBuf = url
            .to_file_path()
            .map_err(|_| TransportError::new(format!("not a local file URL: {}", url)))?;

        std::fs::read(&path)
            .map_err(|e| TransportError::new(format!("failed to read {}: {}", path.display(), e)))
    }
}

/// Dispatches on the URL scheme.
pub struct DefaultTransport {
    http: HttpTransport,
    file: FileTransport,
}

impl DefaultTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        Ok(DefaultTransport {
            http: HttpTransport::new(timeout)?,
            file: FileTransport,
        })
    }
}

impl Transport for DefaultTransport {
    fn get(&self, url: &Url) -> Result<Vec<u8>, TransportError> {
        match url.scheme() {
            "file" => self.file.get(url),
            "http" | "https" => self.http.get(url),
            other => Err(TransportError::new(format!(
                "unsupported URL scheme `{}`",
                other
            ))),
        }
    }
}
