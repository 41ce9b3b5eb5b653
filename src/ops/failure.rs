//! Operation-level failures and their exit codes.

use thiserror::Error;

use crate::builder::{BuildError, FailureCause, PackageFailure, Stage};
use crate::install::InstallError;
use crate::resolver::ResolutionError;
use crate::util::diagnostic::{suggestions, Diagnostic};
use crate::verify::VerificationFailure;

/// Lines of captured output shown with a failed step.
const OUTPUT_TAIL: usize = 20;

/// Why a cellar operation failed.
#[derive(Debug, Error)]
pub enum Failure {
    #[error(transparent)]
    Resolve(#[from] ResolutionError),

    #[error("{} failed during {}: {}", .0.id, .0.stage, .0.cause)]
    Package(Box<PackageFailure>),

    #[error(transparent)]
    Install(#[from] InstallError),

    #[error(transparent)]
    Verify(#[from] VerificationFailure),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<PackageFailure> for Failure {
    fn from(failure: PackageFailure) -> Self {
        Failure::Package(Box::new(failure))
    }
}

impl Failure {
    /// The stage the operation stopped at, if it got that far.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Failure::Resolve(_) => Some(Stage::Resolve),
            Failure::Package(failure) => Some(failure.stage),
            Failure::Install(_) => Some(Stage::Install),
            Failure::Verify(_) => Some(Stage::Verify),
            Failure::Other(_) => None,
        }
    }

    /// Process exit code for this failure.
    ///
    /// | code | meaning |
    /// |------|---------|
    /// | 1 | anything else |
    /// | 2 | resolution |
    /// | 3 | fetch |
    /// | 4 | build |
    /// | 5 | install or record |
    /// | 6 | verification |
    pub fn exit_code(&self) -> i32 {
        match self.stage() {
            Some(Stage::Resolve) => 2,
            Some(Stage::Fetch) => 3,
            Some(Stage::Build) => 4,
            Some(Stage::Install) => 5,
            Some(Stage::Verify) => 6,
            None => 1,
        }
    }

    /// Convert to a user-facing diagnostic.
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            Failure::Resolve(err) => err.to_diagnostic(),
            Failure::Package(failure) => package_diagnostic(failure),
            Failure::Install(err) => err.to_diagnostic(),
            Failure::Verify(err) => err.to_diagnostic(),
            Failure::Other(err) => Diagnostic::error(format!("{:#}", err)),
        }
    }
}

fn package_diagnostic(failure: &PackageFailure) -> Diagnostic {
    let id = failure.id;
    let mut diag = match &failure.cause {
        FailureCause::Fetch(err) => {
            let base = err.to_diagnostic();
            let mut diag = Diagnostic::error(format!("failed to fetch `{}`", id))
                .with_context(base.message);
            for suggestion in base.suggestions {
                diag = diag.with_suggestion(suggestion);
            }
            diag
        }
        FailureCause::Build(err) => build_diagnostic(id.to_string(), err),
        FailureCause::Install(err) => {
            let base = err.to_diagnostic();
            let mut diag = Diagnostic::error(format!("failed to install `{}`", id))
                .with_context(base.message);
            for suggestion in base.suggestions {
                diag = diag.with_suggestion(suggestion);
            }
            diag
        }
        FailureCause::Other(err) => {
            Diagnostic::error(format!("`{}` failed during {}", id, failure.stage))
                .with_context(format!("{:#}", err))
        }
    };

    if let Some(workdir) = &failure.workdir {
        diag = diag
            .with_context(format!("working directory kept at {}", workdir.display()))
            .with_location(workdir.clone())
            .with_suggestion(suggestions::BUILD_FAILED);
    }
    diag
}

fn build_diagnostic(id: String, err: &BuildError) -> Diagnostic {
    match err {
        BuildError::StepFailed {
            index,
            exit_code,
            command,
            output,
        } => {
            let status = match exit_code {
                Some(code) => format!("exit code {}", code),
                None => "killed by a signal".to_string(),
            };
            Diagnostic::error(format!("failed to build `{}`", id))
                .with_context(format!("step {}: {}", index + 1, command))
                .with_context(status)
                .with_output_tail(output, OUTPUT_TAIL)
        }
        BuildError::Cancelled { reason, .. } => {
            Diagnostic::error(format!("build of `{}` was cancelled", id))
                .with_context(reason.clone())
        }
        other => Diagnostic::error(format!("failed to build `{}`", id))
            .with_context(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use crate::core::PackageId;
    use crate::sources::FetchError;

    fn package_failure(stage: Stage, cause: FailureCause) -> Failure {
        Failure::from(PackageFailure {
            id: PackageId::new("xkbcomp", "1.4.7"),
            stage,
            cause,
            workdir: Some(PathBuf::from("/tmp/cellar/work/xkbcomp-1.4.7-1")),
        })
    }

    #[test]
    fn test_exit_codes() {
        let unknown = ResolutionError::Unknown {
            name: "nope".into(),
            required_by: None,
            suggestions: vec![],
        };
        assert_eq!(Failure::from(unknown).exit_code(), 2);

        let fetch = package_failure(Stage::Fetch, FailureCause::Fetch(FetchError::NoSources));
        assert_eq!(fetch.exit_code(), 3);

        let build = package_failure(
            Stage::Build,
            FailureCause::Build(BuildError::Cancelled {
                index: 0,
                reason: "timeout".into(),
            }),
        );
        assert_eq!(build.exit_code(), 4);

        let locked = InstallError::Locked {
            path: PathBuf::from("/tmp/installed.json.lock"),
        };
        assert_eq!(Failure::from(locked).exit_code(), 5);

        let verify = VerificationFailure {
            package: PackageId::new("xkbcomp", "1.4.7"),
            index: 2,
            action: "assert_exists test.xkm".into(),
            detail: None,
        };
        assert_eq!(Failure::from(verify).exit_code(), 6);

        assert_eq!(Failure::from(anyhow::anyhow!("boom")).exit_code(), 1);
    }

    #[test]
    fn test_step_failure_diagnostic() {
        let output: String = (1..=30).map(|i| format!("line {}\n", i)).collect();
        let failure = package_failure(
            Stage::Build,
            FailureCause::Build(BuildError::StepFailed {
                index: 1,
                exit_code: Some(2),
                command: "make -j4".into(),
                output,
            }),
        );

        let diag = failure.to_diagnostic();
        assert_eq!(diag.message, "failed to build `xkbcomp v1.4.7`");
        assert!(diag.context.iter().any(|c| c == "step 2: make -j4"));
        assert!(diag.context.iter().any(|c| c == "exit code 2"));
        assert!(diag.context.iter().any(|c| c.contains("working directory kept at")));
        // 20 lines plus the omission marker.
        assert_eq!(diag.output.len(), 21);
        assert_eq!(diag.output.last().map(String::as_str), Some("line 30"));
    }
}
