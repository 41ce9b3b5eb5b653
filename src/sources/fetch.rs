//! Downloading and verifying source archives.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::core::SourceRef;
use crate::util::fs::{ensure_dir, remove_file_if_exists, write_synced};
use crate::util::hash::{sha256_bytes, sha256_file};

use super::transport::Transport;
use super::FetchError;

/// Bounded retry with exponential backoff for transient transport errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Delay before the first retry. Doubles for every later retry.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        RetryPolicy {
            attempts: attempts.max(1),
            base_delay,
        }
    }

    /// Delay before retry number `retry` (zero-based).
    pub fn delay(&self, retry: u32) -> Duration {
        self.base_delay
            .checked_mul(1u32 << retry.min(16))
            .unwrap_or(Duration::MAX)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::new(3, Duration::from_millis(500))
    }
}

/// A verified archive in the download cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalArchive {
    pub path: PathBuf,
    pub sha256: String,
    /// True when no transport call was needed.
    pub cached: bool,
}

/// Fetches sources through a [`Transport`] into a content-addressed cache.
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    cache_dir: PathBuf,
    policy: RetryPolicy,
    retries: AtomicUsize,
}

impl Fetcher {
    pub fn new(transport: Arc<dyn Transport>, cache_dir: impl Into<PathBuf>) -> Self {
        Fetcher {
            transport,
            cache_dir: cache_dir.into(),
            policy: RetryPolicy::default(),
            retries: AtomicUsize::new(0),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Number of retries performed by this fetcher so far.
    pub fn retries(&self) -> usize {
        self.retries.load(Ordering::SeqCst)
    }

    /// Cache location of a source.
    pub fn cache_path(&self, source: &SourceRef) -> PathBuf {
        self.cache_dir
            .join(format!("{}-{}", source.sha256, source.file_name()))
    }

    /// Fetch one source.
    ///
    /// A cached archive whose digest still matches is returned without
    /// touching the network. Transport failures are retried per the
    /// policy. A checksum mismatch is returned at once and the downloaded
    /// bytes are dropped.
    pub fn fetch(&self, source: &SourceRef) -> Result<LocalArchive, FetchError> {
        let cached = self.cache_path(source);

        if cached.is_file() {
            match sha256_file(&cached) {
                Ok(actual) if actual == source.sha256 => {
                    tracing::debug!("Using cached {}", cached.display());
                    return Ok(LocalArchive {
                        path: cached,
                        sha256: actual,
                        cached: true,
                    });
                }
                _ => {
                    tracing::warn!("Discarding corrupt cache entry {}", cached.display());
                    remove_file_if_exists(&cached).map_err(|e| FetchError::io(&cached, e))?;
                }
            }
        }

        let bytes = self.download(source)?;

        let actual = sha256_bytes(&bytes);
        if actual != source.sha256 {
            return Err(FetchError::ChecksumMismatch {
                url: source.url.to_string(),
                expected: source.sha256.clone(),
                actual,
            });
        }
        tracing::debug!("Checksum verified: {}", &actual[..16]);

        self.store(&cached, &bytes)?;

        Ok(LocalArchive {
            path: cached,
            sha256: actual,
            cached: false,
        })
    }

    /// Try each mirror in order. Only network failures move on to the next
    /// mirror; any other error is returned immediately.
    pub fn fetch_any(&self, sources: &[SourceRef]) -> Result<LocalArchive, FetchError> {
        let mut last = None;

        for source in sources {
            match self.fetch(source) {
                Ok(archive) => return Ok(archive),
                Err(err @ FetchError::Network { .. }) => {
                    tracing::warn!("{}; trying next mirror", err);
                    last = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last.unwrap_or(FetchError::NoSources))
    }

    fn download(&self, source: &SourceRef) -> Result<Vec<u8>, FetchError> {
        let mut attempt = 0;
        loop {
            match self.transport.get(&source.url) {
                Ok(bytes) => return Ok(bytes),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.policy.attempts {
                        return Err(FetchError::Network {
                            url: source.url.to_string(),
                            attempts: attempt,
                            message: err.message,
                        });
                    }

                    let delay = self.policy.delay(attempt - 1);
                    tracing::debug!(
                        "Attempt {} of {} failed for {}: {}; retrying in {:?}",
                        attempt,
                        self.policy.attempts,
                        source.url,
                        err,
                        delay
                    );
                    self.retries.fetch_add(1, Ordering::SeqCst);
                    std::thread::sleep(delay);
                }
            }
        }
    }

    /// Publish bytes into the cache with write-then-rename, so concurrent
    /// readers never see a partial archive.
    fn store(&self, dest: &Path, bytes: &[u8]) -> Result<(), FetchError> {
        ensure_dir(&self.cache_dir).map_err(|e| FetchError::Io {
            path: self.cache_dir.clone(),
            message: e.to_string(),
        })?;

        let partial = dest.with_extension(format!("partial-{}", std::process::id()));
        write_synced(&partial, bytes).map_err(|e| FetchError::io(&partial, e))?;
        std::fs::rename(&partial, dest).map_err(|e| FetchError::io(dest, e))?;
        Ok(())
    }
}
