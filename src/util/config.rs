//! Configuration file support for cellar.
//!
//! The configuration lives at `<root>/etc/cellar.toml`. Every section is
//! optional; missing values fall back to the defaults below.
//!
//! ```toml
//! [install]
//! jobs = 4
//!
//! [net]
//! retries = 3
//! backoff_ms = 500
//! timeout_secs = 300
//!
//! [build]
//! cflags = ["-O2"]
//! ldflags = []
//! env = { LC_ALL = "C" }
//!
//! [verify]
//! strict = false
//!
//! [registry]
//! paths = ["/srv/cellar/registry"]
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::sources::RetryPolicy;

/// cellar configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub install: InstallConfig,
    pub net: NetConfig,
    pub build: BuildConfig,
    pub verify: VerifyConfig,
    pub registry: RegistryConfig,
}

/// Install settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallConfig {
    /// Packages built in parallel (None = number of CPUs)
    pub jobs: Option<usize>,
}

/// Network settings for source downloads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    /// Download attempts per mirror
    pub retries: Option<u32>,
    /// Delay before the first retry, doubled on each further retry
    pub backoff_ms: Option<u64>,
    /// Per-request timeout
    pub timeout_secs: Option<u64>,
}

pub const DEFAULT_RETRIES: u32 = 3;
pub const DEFAULT_BACKOFF_MS: u64 = 500;
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Flags and variables passed to every build.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub cflags: Vec<String>,
    pub ldflags: Vec<String>,
    pub env: BTreeMap<String, String>,
}

/// Post-install test policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    /// Treat a failing test as a failed command
    pub strict: bool,
}

/// Descriptor directories, searched in order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub paths: Vec<PathBuf>,
}

impl Config {
    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = crate::util::fs::read_to_string(path)?;

        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Load configuration with fallback to defaults if file doesn't exist.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            Self::load(path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {}: {:#}", path.display(), e);
                Self::default()
            })
        } else {
            Self::default()
        }
    }

    /// Merge another config into this one (other takes precedence).
    pub fn merge(&mut self, other: Config) {
        if other.install.jobs.is_some() {
            self.install.jobs = other.install.jobs;
        }

        if other.net.retries.is_some() {
            self.net.retries = other.net.retries;
        }
        if other.net.backoff_ms.is_some() {
            self.net.backoff_ms = other.net.backoff_ms;
        }
        if other.net.timeout_secs.is_some() {
            self.net.timeout_secs = other.net.timeout_secs;
        }

        if !other.build.cflags.is_empty() {
            self.build.cflags = other.build.cflags;
        }
        if !other.build.ldflags.is_empty() {
            self.build.ldflags = other.build.ldflags;
        }
        self.build.env.extend(other.build.env);

        if other.verify.strict {
            self.verify.strict = true;
        }

        if !other.registry.paths.is_empty() {
            self.registry.paths = other.registry.paths;
        }
    }

    /// Parallel package builds, defaulting to the number of CPUs.
    pub fn jobs(&self) -> usize {
        self.install
            .jobs
            .unwrap_or_else(|| std::thread::available_parallelism().map_or(1, |n| n.get()))
            .max(1)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.net.retries.unwrap_or(DEFAULT_RETRIES),
            Duration::from_millis(self.net.backoff_ms.unwrap_or(DEFAULT_BACKOFF_MS)),
        )
    }

    pub fn net_timeout(&self) -> Duration {
        Duration::from_secs(self.net.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }
}
