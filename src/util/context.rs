//! Global context for cellar operations.
//!
//! Provides centralized access to the install root, configuration and
//! registry directories.
//!
//! The root is chosen in this order:
//! 1. `--root` on the command line
//! 2. the `CELLAR_ROOT` environment variable
//! 3. the platform data directory (e.g. `~/.local/share/cellar`)

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use directories::{BaseDirs, ProjectDirs};

use crate::core::{Layout, Registry};
use crate::util::config::Config;

/// Environment variable overriding the default root.
pub const ROOT_ENV: &str = "CELLAR_ROOT";

/// Project directories for cellar
static PROJECT_DIRS: LazyLock<Option<ProjectDirs>> =
    LazyLock::new(|| ProjectDirs::from("com", "cellar", "cellar"));

/// Global context containing configuration and paths.
#[derive(Debug, Clone)]
pub struct GlobalContext {
    /// Current working directory
    cwd: PathBuf,

    /// Paths below the install root
    layout: Layout,

    /// `<root>/etc/cellar.toml` merged over defaults
    config: Config,

    /// Descriptor directories, highest priority first
    registry_dirs: Vec<PathBuf>,

    /// Whether to use verbose output
    verbose: bool,

    /// Whether to use colors in output
    color: bool,
}

impl GlobalContext {
    /// Create a context from command-line overrides.
    pub fn new(root: Option<PathBuf>, registries: Vec<PathBuf>) -> Result<Self> {
        let cwd = std::env::current_dir().context("failed to get current directory")?;
        let env_root = std::env::var(ROOT_ENV).ok();
        let root = resolve_root(root, env_root, &cwd);
        Ok(Self::with_root(cwd, root, registries))
    }

    /// Create a context for an explicit root.
    pub fn with_root(cwd: PathBuf, root: PathBuf, registries: Vec<PathBuf>) -> Self {
        let layout = Layout::new(root);
        let config = Config::load_or_default(&layout.config_path());

        let registry_dirs = if !registries.is_empty() {
            registries.into_iter().map(|p| absolutize(&cwd, p)).collect()
        } else if !config.registry.paths.is_empty() {
            config
                .registry
                .paths
                .iter()
                .map(|p| absolutize(layout.root(), p.clone()))
                .collect()
        } else {
            vec![layout.root().join("registry")]
        };

        tracing::debug!(
            "root: {}, registries: {:?}",
            layout.root().display(),
            registry_dirs
        );

        GlobalContext {
            cwd,
            layout,
            config,
            registry_dirs,
            verbose: false,
            color: true,
        }
    }

    /// Set verbose mode.
    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    /// Set color output.
    pub fn set_color(&mut self, color: bool) {
        self.color = color;
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn registry_dirs(&self) -> &[PathBuf] {
        &self.registry_dirs
    }

    /// Check if verbose mode is enabled.
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Check if color output is enabled.
    pub fn color(&self) -> bool {
        self.color
    }

    /// Load every descriptor from the registry directories.
    pub fn load_registry(&self) -> Result<Registry> {
        Registry::load_dirs(&self.registry_dirs)
    }
}

/// Pick the root from the command line, the environment, or the data dir.
pub fn resolve_root(cli: Option<PathBuf>, env: Option<String>, cwd: &Path) -> PathBuf {
    if let Some(root) = cli {
        return absolutize(cwd, root);
    }
    if let Some(root) = env.filter(|r| !r.trim().is_empty()) {
        return absolutize(cwd, PathBuf::from(root));
    }
    default_root()
}

fn default_root() -> PathBuf {
    if let Some(dirs) = PROJECT_DIRS.as_ref() {
        return dirs.data_dir().to_path_buf();
    }
    // Fallback to ~/.cellar
    BaseDirs::new()
        .map(|b| b.home_dir().join(".cellar"))
        .unwrap_or_else(|| PathBuf::from(".cellar"))
}

fn absolutize(base: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}
