//! The in-memory package descriptor.
//!
//! A `PackageDescriptor` is produced once by the parser in
//! [`crate::core::manifest`] and never mutated afterwards. Everything else
//! in the crate works from shared references to it.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::core::PackageId;
use crate::util::InternedString;

/// When a dependency is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Needed only while building (compilers, generators, headers).
    Build,
    /// Needed by the installed package at run time.
    Run,
    /// Needed only by the test block.
    Test,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Build => "build",
            Phase::Run => "run",
            Phase::Test => "test",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dependency on another descriptor, by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DependencySpec {
    pub name: InternedString,
    pub phase: Phase,
}

impl DependencySpec {
    pub fn new(name: impl Into<InternedString>, phase: Phase) -> Self {
        DependencySpec {
            name: name.into(),
            phase,
        }
    }
}

/// License of the packaged software.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LicenseExpr {
    Id(String),
    /// Every listed license applies.
    AllOf(Vec<String>),
    /// Any one of the listed licenses may be chosen.
    AnyOf(Vec<String>),
}

impl fmt::Display for LicenseExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LicenseExpr::Id(id) => f.write_str(id),
            LicenseExpr::AllOf(ids) => f.write_str(&ids.join(" AND ")),
            LicenseExpr::AnyOf(ids) => f.write_str(&ids.join(" OR ")),
        }
    }
}

/// A downloadable source archive and its expected SHA-256.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    pub url: Url,
    /// Lowercase hex digest.
    pub sha256: String,
}

impl SourceRef {
    pub fn new(url: Url, sha256: impl Into<String>) -> Self {
        SourceRef {
            url,
            sha256: sha256.into(),
        }
    }

    /// File name used for the download cache entry.
    pub fn file_name(&self) -> String {
        let name = self
            .url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|s| !s.is_empty())
            .unwrap_or("source");

        name.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

/// One step of the install procedure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildStep {
    /// Run a command with arguments inside the source tree.
    Run { command: String, args: Vec<String> },
    /// Replace every occurrence of `from` with `to` in `file`.
    Replace { file: String, from: String, to: String },
}

impl BuildStep {
    pub fn run<I, S>(command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        BuildStep::Run {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Short human description, with placeholders unexpanded.
    pub fn describe(&self) -> String {
        match self {
            BuildStep::Run { command, args } => {
                let mut parts = vec![command.clone()];
                parts.extend(args.iter().cloned());
                parts.join(" ")
            }
            BuildStep::Replace { file, from, to } => {
                format!("replace `{}` with `{}` in {}", from, to, file)
            }
        }
    }
}

/// One action of a test block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestAction {
    Write { path: String, contents: String },
    Run { command: String, args: Vec<String> },
    /// Glob pattern, relative to the scratch directory unless absolute.
    AssertExists { pattern: String },
    AssertContains { path: String, text: String },
}

impl TestAction {
    pub fn describe(&self) -> String {
        match self {
            TestAction::Write { path, .. } => format!("write {}", path),
            TestAction::Run { command, args } => {
                let mut parts = vec![command.clone()];
                parts.extend(args.iter().cloned());
                parts.join(" ")
            }
            TestAction::AssertExists { pattern } => format!("assert {} exists", pattern),
            TestAction::AssertContains { path, text } => {
                format!("assert {} contains `{}`", path, text)
            }
        }
    }
}

/// The post-install smoke test.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestBlock {
    pub actions: Vec<TestAction>,
}

/// Static description of one installable package.
#[derive(Debug, Clone)]
pub struct PackageDescriptor {
    id: PackageId,
    description: Option<String>,
    homepage: Option<String>,
    license: Option<LicenseExpr>,
    sources: Vec<SourceRef>,
    dependencies: Vec<DependencySpec>,
    steps: Vec<BuildStep>,
    test: Option<TestBlock>,
    origin: Option<PathBuf>,
}

impl PackageDescriptor {
    pub fn builder(
        name: impl Into<InternedString>,
        version: impl Into<InternedString>,
    ) -> DescriptorBuilder {
        DescriptorBuilder {
            inner: PackageDescriptor {
                id: PackageId::new(name, version),
                description: None,
                homepage: None,
                license: None,
                sources: Vec::new(),
                dependencies: Vec::new(),
                steps: Vec::new(),
                test: None,
                origin: None,
            },
        }
    }

    pub fn id(&self) -> PackageId {
        self.id
    }

    pub fn name(&self) -> InternedString {
        self.id.name()
    }

    pub fn version(&self) -> InternedString {
        self.id.version()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn homepage(&self) -> Option<&str> {
        self.homepage.as_deref()
    }

    pub fn license(&self) -> Option<&LicenseExpr> {
        self.license.as_ref()
    }

    pub fn sources(&self) -> &[SourceRef] {
        &self.sources
    }

    /// All dependencies in declaration order.
    pub fn dependencies(&self) -> &[DependencySpec] {
        &self.dependencies
    }

    /// Dependencies of one phase, in declaration order.
    pub fn dependencies_for(&self, phase: Phase) -> impl Iterator<Item = &DependencySpec> {
        self.dependencies.iter().filter(move |d| d.phase == phase)
    }

    /// Names of run-time dependencies.
    pub fn run_dependencies(&self) -> Vec<InternedString> {
        self.dependencies_for(Phase::Run).map(|d| d.name).collect()
    }

    pub fn steps(&self) -> &[BuildStep] {
        &self.steps
    }

    pub fn test(&self) -> Option<&TestBlock> {
        self.test.as_ref()
    }

    /// File the descriptor was loaded from, if any.
    pub fn origin(&self) -> Option<&Path> {
        self.origin.as_deref()
    }
}

/// Assembles a [`PackageDescriptor`]. Used by the parser and by tests.
#[derive(Debug, Clone)]
pub struct DescriptorBuilder {
    inner: PackageDescriptor,
}

impl DescriptorBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.inner.description = Some(description.into());
        self
    }

    pub fn homepage(mut self, homepage: impl Into<String>) -> Self {
        self.inner.homepage = Some(homepage.into());
        self
    }

    pub fn license(mut self, license: LicenseExpr) -> Self {
        self.inner.license = Some(license);
        self
    }

    pub fn source(mut self, source: SourceRef) -> Self {
        self.inner.sources.push(source);
        self
    }

    pub fn dependency(mut self, name: impl Into<InternedString>, phase: Phase) -> Self {
        self.inner.dependencies.push(DependencySpec::new(name, phase));
        self
    }

    pub fn build_dep(self, name: impl Into<InternedString>) -> Self {
        self.dependency(name, Phase::Build)
    }

    pub fn run_dep(self, name: impl Into<InternedString>) -> Self {
        self.dependency(name, Phase::Run)
    }

    pub fn step(mut self, step: BuildStep) -> Self {
        self.inner.steps.push(step);
        self
    }

    pub fn test_action(mut self, action: TestAction) -> Self {
        self.inner
            .test
            .get_or_insert_with(TestBlock::default)
            .actions
            .push(action);
        self
    }

    pub fn origin(mut self, origin: impl Into<PathBuf>) -> Self {
        self.inner.origin = Some(origin.into());
        self
    }

    pub fn build(self) -> PackageDescriptor {
        self.inner
    }
}
