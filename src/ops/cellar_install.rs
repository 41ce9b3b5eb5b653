//! Implementation of `cellar install`.

use std::time::{Duration, Instant};

use crate::builder::{BuildEvent, BuildExecutor, BuildSettings, Scheduler};
use crate::core::PackageId;
use crate::install::InstallReport;
use crate::ops::failure::Failure;
use crate::ops::session::Session;
use crate::resolver::{resolve_many, ResolveOptions, ResolvedPlan};
use crate::sources::Fetcher;
use crate::util::cancel::CancelToken;
use crate::verify::{VerificationFailure, VerificationResult, Verifier};

/// Options for the install command.
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Packages to install, in request order
    pub names: Vec<String>,

    /// Packages built in parallel (None = config, then CPU count)
    pub jobs: Option<usize>,

    /// Skip the post-install tests of the requested packages
    pub no_verify: bool,

    /// Cancel all builds once this much time has passed
    pub timeout: Option<Duration>,
}

/// What an install did.
#[derive(Debug)]
pub struct InstallSummary {
    /// The full plan, dependencies first
    pub plan: Vec<PackageId>,
    pub installed: Vec<InstallReport>,
    pub already_installed: Vec<PackageId>,
    /// Test results of the requested packages
    pub verification: Vec<VerificationResult>,
    pub duration: Duration,
}

impl InstallSummary {
    pub fn failed_tests(&self) -> impl Iterator<Item = &VerificationResult> {
        self.verification.iter().filter(|r| !r.passed)
    }
}

/// Resolve, fetch, build and install the requested packages.
///
/// Either every package of the plan ends up installed, or the first
/// failure is returned and nothing past it was committed. Tests of the
/// requested packages run afterwards; they only fail the operation under
/// `verify.strict`.
pub fn install(session: &Session<'_>, opts: &InstallOptions) -> Result<InstallSummary, Failure> {
    let start = Instant::now();
    let reporter = session.reporter();
    let config = session.config();
    let layout = session.layout();

    let registry = session.registry()?;
    let roots: Vec<&str> = opts.names.iter().map(String::as_str).collect();
    let plan = resolve_many(&roots, &registry, ResolveOptions::default())?;
    let plan_ids = plan.ids();
    reporter.event(&BuildEvent::plan(&plan_ids));

    layout.ensure()?;
    let installer = session.installer()?;
    let fetcher = Fetcher::new(session.transport(), layout.download_cache())
        .with_policy(config.retry_policy());
    let executor = BuildExecutor::new(session.runner(), session.reporter());

    let settings = BuildSettings {
        cflags: config.build.cflags.clone(),
        ldflags: config.build.ldflags.clone(),
        env: config.build.env.clone(),
        base_path: std::env::var("PATH").ok(),
    };
    let jobs = opts.jobs.unwrap_or_else(|| config.jobs());

    let scheduler = Scheduler::new(layout, &fetcher, executor, &installer, session.reporter())
        .with_settings(settings)
        .with_jobs(jobs)
        .with_timeout(opts.timeout);

    let report = scheduler.run(&plan)?;

    if let Some(failure) = report.failure {
        reporter.event(&BuildEvent::Finished {
            success: false,
            duration_ms: start.elapsed().as_millis() as u64,
            packages: report.installed.len(),
        });
        return Err(failure.into());
    }

    let verification = if opts.no_verify {
        Vec::new()
    } else {
        verify_roots(session, &scheduler, &plan)
    };

    let summary = InstallSummary {
        plan: plan_ids,
        installed: report.installed,
        already_installed: report.already_installed,
        verification,
        duration: start.elapsed(),
    };

    reporter.event(&BuildEvent::Finished {
        success: true,
        duration_ms: summary.duration.as_millis() as u64,
        packages: summary.installed.len(),
    });

    if config.verify.strict {
        if let Some(failure) = summary
            .failed_tests()
            .find_map(VerificationFailure::from_result)
        {
            return Err(failure.into());
        }
    }

    Ok(summary)
}

fn verify_roots(
    session: &Session<'_>,
    scheduler: &Scheduler<'_>,
    plan: &ResolvedPlan,
) -> Vec<VerificationResult> {
    let verifier = Verifier::new(session.runner());
    let reporter = session.reporter();
    let cancel = CancelToken::new();

    plan.roots()
        .iter()
        .filter_map(|id| plan.get(*id).map(|descriptor| (*id, descriptor)))
        .filter(|(_, descriptor)| descriptor.test().is_some())
        .map(|(id, descriptor)| {
            let env = scheduler.environment(plan, id);
            let result = verifier.verify(descriptor, &env, &cancel);
            reporter.event(&BuildEvent::VerifyFinished {
                package_id: id.to_string(),
                passed: result.passed,
                failed_action: result.failed_action().map(|o| o.action.clone()),
            });
            result
        })
        .collect()
}
