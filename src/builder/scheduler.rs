//! Plan scheduler.
//!
//! Executes a [`ResolvedPlan`] on a pool of build threads. A package starts
//! as soon as every one of its in-plan dependencies has been committed, so
//! independent branches of the graph build side by side. The first failure
//! cancels the shared token; running siblings stop at their next step and
//! nothing new is started.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use anyhow::Context;
use thiserror::Error;

use crate::builder::env::Environment;
use crate::builder::events::{BuildEvent, Reporter};
use crate::builder::executor::{BuildError, BuildExecutor};
use crate::core::{Layout, PackageId};
use crate::install::{InstallError, InstallReport, Installer};
use crate::resolver::ResolvedPlan;
use crate::sources::{extract, FetchError, Fetcher};
use crate::util::cancel::CancelToken;
use crate::util::workdir::Workdir;

/// The stage at which a package failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolve,
    Fetch,
    Build,
    Install,
    Verify,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Resolve => "resolve",
            Stage::Fetch => "fetch",
            Stage::Build => "build",
            Stage::Install => "install",
            Stage::Verify => "verify",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum FailureCause {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Install(#[from] InstallError),
    #[error("{0:#}")]
    Other(anyhow::Error),
}

/// One package's failure, with the working directory kept for inspection.
#[derive(Debug)]
pub struct PackageFailure {
    pub id: PackageId,
    pub stage: Stage,
    pub cause: FailureCause,
    pub workdir: Option<PathBuf>,
}

impl PackageFailure {
    fn new(id: PackageId, stage: Stage, cause: impl Into<FailureCause>) -> Self {
        PackageFailure {
            id,
            stage,
            cause: cause.into(),
            workdir: None,
        }
    }

    fn other(id: PackageId, stage: Stage, err: anyhow::Error) -> Self {
        PackageFailure::new(id, stage, FailureCause::Other(err))
    }

    fn with_workdir(mut self, workdir: PathBuf) -> Self {
        self.workdir = Some(workdir);
        self
    }

    /// Stopped because a sibling failed or the timeout expired.
    pub fn is_cancellation(&self) -> bool {
        matches!(&self.cause, FailureCause::Build(e) if e.is_cancelled())
    }
}

/// Flags and variables from configuration, applied to every build.
#[derive(Debug, Clone, Default)]
pub struct BuildSettings {
    pub cflags: Vec<String>,
    pub ldflags: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// `PATH` of the invoking process.
    pub base_path: Option<String>,
}

#[derive(Debug, Default)]
pub struct ScheduleReport {
    pub installed: Vec<InstallReport>,
    /// Packages whose planned version was already installed.
    pub already_installed: Vec<PackageId>,
    pub failure: Option<PackageFailure>,
    pub duration: Duration,
}

impl ScheduleReport {
    pub fn success(&self) -> bool {
        self.failure.is_none()
    }
}

enum Outcome {
    Installed(InstallReport),
    AlreadyInstalled(PackageId),
}

pub struct Scheduler<'a> {
    layout: &'a Layout,
    fetcher: &'a Fetcher,
    executor: BuildExecutor,
    installer: &'a Installer,
    reporter: Arc<dyn Reporter>,
    settings: BuildSettings,
    jobs: usize,
    timeout: Option<Duration>,
}

impl<'a> Scheduler<'a> {
    pub fn new(
        layout: &'a Layout,
        fetcher: &'a Fetcher,
        executor: BuildExecutor,
        installer: &'a Installer,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Scheduler {
            layout,
            fetcher,
            executor,
            installer,
            reporter,
            settings: BuildSettings::default(),
            jobs: 1,
            timeout: None,
        }
    }

    pub fn with_settings(mut self, settings: BuildSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build and install every entry of `plan`.
    pub fn run(&self, plan: &ResolvedPlan) -> anyhow::Result<ScheduleReport> {
        let start = Instant::now();
        let cancel = match self.timeout {
            Some(timeout) => CancelToken::with_timeout(timeout),
            None => CancelToken::new(),
        };

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.jobs)
            .thread_name(|i| format!("cellar-build-{}", i))
            .build()
            .context("failed to start build threads")?;

        let mut report = ScheduleReport::default();

        // Unfinished in-plan dependencies per package.
        let mut waiting: HashMap<PackageId, usize> = plan
            .ids()
            .into_iter()
            .map(|id| (id, plan.deps(id).len()))
            .collect();
        let ready: Vec<PackageId> = plan
            .ids()
            .into_iter()
            .filter(|id| waiting.get(id) == Some(&0))
            .collect();

        let (tx, rx) = mpsc::channel();
        let cancel = &cancel;

        pool.in_place_scope(|scope| {
            let spawn = |id: PackageId| {
                let tx = tx.clone();
                tracing::debug!("Starting {}", id);
                scope.spawn(move |_| {
                    let result = panic::catch_unwind(AssertUnwindSafe(|| {
                        self.run_package(plan, id, cancel)
                    }))
                    .unwrap_or_else(|_| {
                        cancel.cancel(format!("{} panicked", id));
                        Err(PackageFailure::other(
                            id,
                            Stage::Build,
                            anyhow::anyhow!("build thread panicked"),
                        ))
                    });
                    let _ = tx.send((id, result));
                });
            };

            let mut running = 0;
            for id in ready {
                spawn(id);
                running += 1;
            }

            while running > 0 {
                let Ok((id, result)) = rx.recv() else {
                    break;
                };
                running -= 1;

                match result {
                    Ok(outcome) => {
                        match outcome {
                            Outcome::Installed(installed) => report.installed.push(installed),
                            Outcome::AlreadyInstalled(id) => report.already_installed.push(id),
                        }
                        // After a timeout, dependents still start and fail as
                        // cancelled, so the report records why work stopped.
                        if report.failure.is_some() {
                            continue;
                        }
                        for dependent in plan.dependents(id) {
                            let Some(count) = waiting.get_mut(&dependent) else {
                                continue;
                            };
                            *count -= 1;
                            if *count == 0 {
                                spawn(dependent);
                                running += 1;
                            }
                        }
                    }
                    Err(failure) => {
                        // The root cause wins over siblings that were cancelled by it.
                        let replace = match &report.failure {
                            None => true,
                            Some(existing) => {
                                existing.is_cancellation() && !failure.is_cancellation()
                            }
                        };
                        if replace {
                            report.failure = Some(failure);
                        }
                    }
                }
            }
        });

        report.duration = start.elapsed();
        Ok(report)
    }

    fn run_package(
        &self,
        plan: &ResolvedPlan,
        id: PackageId,
        cancel: &CancelToken,
    ) -> Result<Outcome, PackageFailure> {
        let result = self.install_package(plan, id, cancel);

        if let Err(failure) = &result {
            if !failure.is_cancellation() {
                cancel.cancel(format!("{} failed", id));
            }
            self.reporter.event(&BuildEvent::failed(
                id,
                failure.stage.as_str(),
                failure.cause.to_string(),
            ));
        }

        result
    }

    fn install_package(
        &self,
        plan: &ResolvedPlan,
        id: PackageId,
        cancel: &CancelToken,
    ) -> Result<Outcome, PackageFailure> {
        let Some(descriptor) = plan.get(id) else {
            return Err(PackageFailure::other(
                id,
                Stage::Resolve,
                anyhow::anyhow!("{} is not part of the plan", id),
            ));
        };

        let recorder = self.installer.recorder();
        if recorder.installed_version(id.name().as_str()).as_deref() == Some(id.version().as_str())
        {
            tracing::debug!("{} is already installed", id);
            return Ok(Outcome::AlreadyInstalled(id));
        }

        if cancel.is_cancelled() {
            return Err(PackageFailure::new(
                id,
                Stage::Build,
                BuildError::Cancelled {
                    index: 0,
                    reason: cancel.reason().unwrap_or_else(|| "cancelled".to_string()),
                },
            ));
        }

        let start = Instant::now();

        if let Some(source) = descriptor.sources().first() {
            self.reporter.event(&BuildEvent::FetchStarted {
                package_id: id.to_string(),
                url: source.url.to_string(),
            });
        }
        let archive = self
            .fetcher
            .fetch_any(descriptor.sources())
            .map_err(|e| PackageFailure::new(id, Stage::Fetch, e))?;
        self.reporter.event(&BuildEvent::FetchFinished {
            package_id: id.to_string(),
            cached: archive.cached,
        });

        let workdir = Workdir::create(&self.layout.work_dir(), id)
            .map_err(|e| PackageFailure::other(id, Stage::Build, e))?;

        let source_root = match extract(&archive.path, workdir.path()) {
            Ok(root) => root,
            Err(e) => {
                let kept = workdir.retain();
                return Err(PackageFailure::new(id, Stage::Fetch, e).with_workdir(kept));
            }
        };

        let env = self.environment(plan, id);
        if let Err(e) = self.executor.execute(descriptor, &source_root, &env, cancel) {
            self.installer.discard_keg(id);
            let kept = workdir.retain();
            return Err(PackageFailure::new(id, Stage::Build, e).with_workdir(kept));
        }

        let run_deps = descriptor
            .run_dependencies()
            .into_iter()
            .map(|name| name.to_string())
            .collect();
        let installed = match self.installer.install(id, run_deps, plan.is_root(id)) {
            Ok(installed) => installed,
            Err(e) => {
                self.installer.discard_keg(id);
                let kept = workdir.retain();
                return Err(PackageFailure::new(id, Stage::Install, e).with_workdir(kept));
            }
        };

        if let Err(e) = workdir.purge() {
            tracing::warn!("{:#}", e);
        }

        self.reporter.event(&BuildEvent::PackageInstalled {
            package_id: id.to_string(),
            files: installed.files,
            duration_ms: start.elapsed().as_millis() as u64,
        });

        Ok(Outcome::Installed(installed))
    }

    /// Build environment for `id`, with every in-plan dependency's keg.
    pub fn environment(&self, plan: &ResolvedPlan, id: PackageId) -> Environment {
        let mut env = Environment::new(self.layout, id)
            .with_jobs(self.jobs)
            .with_base_path(self.settings.base_path.clone())
            .with_cflags(self.settings.cflags.clone())
            .with_ldflags(self.settings.ldflags.clone())
            .with_vars(self.settings.env.clone());

        for dep in plan.transitive_deps(id).into_iter().rev() {
            env = env.with_dependency(self.layout.keg(dep));
        }
        env
    }
}
