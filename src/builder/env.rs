//! Build environment - prefixes, search paths and flags for one package.
//!
//! An [`Environment`] is built per package from the layout, the prefixes
//! of its already-installed dependencies and the user configuration. It
//! is passed by value to the executor and never read from process-global
//! state: the inherited `PATH` is captured once by the caller.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::builder::expand::Placeholders;
use crate::core::{Layout, PackageId};

#[cfg(windows)]
const PATH_SEP: &str = ";";
#[cfg(not(windows))]
const PATH_SEP: &str = ":";

#[derive(Debug, Clone)]
pub struct Environment {
    id: PackageId,
    /// Install prefix (the keg).
    prefix: PathBuf,
    /// Version-independent prefix.
    opt_prefix: PathBuf,
    /// Shared root.
    root: PathBuf,
    jobs: usize,
    /// Dependency prefixes, nearest dependency first.
    dep_prefixes: Vec<PathBuf>,
    base_path: Option<String>,
    cflags: Vec<String>,
    ldflags: Vec<String>,
    extra: BTreeMap<String, String>,
}

impl Environment {
    pub fn new(layout: &Layout, id: PackageId) -> Self {
        Environment {
            id,
            prefix: layout.keg(id),
            opt_prefix: layout.opt_prefix(id.name().as_str()),
            root: layout.root().to_path_buf(),
            jobs: 1,
            dep_prefixes: Vec::new(),
            base_path: None,
            cflags: Vec::new(),
            ldflags: Vec::new(),
            extra: BTreeMap::new(),
        }
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    /// Add the prefix of an installed dependency.
    pub fn with_dependency(mut self, prefix: impl Into<PathBuf>) -> Self {
        let prefix = prefix.into();
        if !self.dep_prefixes.contains(&prefix) {
            self.dep_prefixes.push(prefix);
        }
        self
    }

    /// The `PATH` inherited from the invoking process, appended last.
    pub fn with_base_path(mut self, path: Option<String>) -> Self {
        self.base_path = path;
        self
    }

    pub fn with_cflags(mut self, flags: Vec<String>) -> Self {
        self.cflags = flags;
        self
    }

    pub fn with_ldflags(mut self, flags: Vec<String>) -> Self {
        self.ldflags = flags;
        self
    }

    /// Extra variables. They override computed ones of the same name.
    pub fn with_vars(mut self, vars: BTreeMap<String, String>) -> Self {
        self.extra.extend(vars);
        self
    }

    pub fn id(&self) -> PackageId {
        self.id
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn opt_prefix(&self) -> &Path {
        &self.opt_prefix
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn jobs(&self) -> usize {
        self.jobs
    }

    /// Environment variables for child processes.
    pub fn vars(&self) -> BTreeMap<String, String> {
        let mut vars = BTreeMap::new();

        let mut path: Vec<String> = self
            .dep_prefixes
            .iter()
            .flat_map(|p| [p.join("bin"), p.join("sbin")])
            .map(|p| p.display().to_string())
            .collect();
        path.push(self.root.join("bin").display().to_string());
        if let Some(base) = &self.base_path {
            path.push(base.clone());
        }
        vars.insert("PATH".to_string(), path.join(PATH_SEP));

        let pkg_config: Vec<String> = self
            .dep_prefixes
            .iter()
            .flat_map(|p| [p.join("lib/pkgconfig"), p.join("share/pkgconfig")])
            .map(|p| p.display().to_string())
            .collect();
        if !pkg_config.is_empty() {
            vars.insert("PKG_CONFIG_PATH".to_string(), pkg_config.join(PATH_SEP));
        }

        let cppflags: Vec<String> = self
            .dep_prefixes
            .iter()
            .map(|p| format!("-I{}", p.join("include").display()))
            .collect();
        if !cppflags.is_empty() {
            vars.insert("CPPFLAGS".to_string(), cppflags.join(" "));
        }

        let mut ldflags: Vec<String> = self
            .dep_prefixes
            .iter()
            .map(|p| format!("-L{}", p.join("lib").display()))
            .collect();
        ldflags.extend(self.ldflags.iter().cloned());
        if !ldflags.is_empty() {
            vars.insert("LDFLAGS".to_string(), ldflags.join(" "));
        }

        if !self.cflags.is_empty() {
            vars.insert("CFLAGS".to_string(), self.cflags.join(" "));
        }

        vars.insert("MAKEFLAGS".to_string(), format!("-j{}", self.jobs));

        vars.extend(self.extra.clone());
        vars
    }

    /// Placeholder values for step arguments.
    pub fn placeholders(&self) -> Placeholders {
        let prefix = self.prefix.display().to_string();
        let mut p = Placeholders::new();

        p.set("prefix", prefix.clone())
            .set("opt_prefix", self.opt_prefix.display().to_string())
            .set("root", self.root.display().to_string())
            .set("name", self.id.name().as_str())
            .set("version", self.id.version().as_str())
            .set("jobs", self.jobs.to_string());

        for dir in ["bin", "sbin", "lib", "include", "share", "etc"] {
            p.set(dir, self.prefix.join(dir).display().to_string());
        }

        p.set_std_configure_args(vec![
            "--disable-debug".to_string(),
            "--disable-dependency-tracking".to_string(),
            format!("--prefix={}", prefix),
            format!("--libdir={}", self.prefix.join("lib").display()),
            "--disable-silent-rules".to_string(),
        ]);

        p
    }
}
