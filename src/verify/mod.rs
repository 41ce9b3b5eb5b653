//! Post-install smoke tests.
//!
//! A descriptor's test block runs against the installed keg in a scratch
//! directory. Results are advisory: a failing test never rolls back the
//! install, and only `verify.strict` turns it into a failing exit code.

pub mod runner;

pub use runner::Verifier;

use miette::Diagnostic as MietteDiagnostic;
use thiserror::Error;

use crate::core::PackageId;
use crate::util::diagnostic::Diagnostic;

/// Outcome of one test action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    /// Zero-based position in the test block.
    pub index: usize,
    pub action: String,
    pub passed: bool,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationResult {
    pub package: PackageId,
    pub passed: bool,
    /// Outcomes of the actions that ran. Actions after a failure are not run.
    pub outcomes: Vec<ActionOutcome>,
}

impl VerificationResult {
    pub fn failed_action(&self) -> Option<&ActionOutcome> {
        self.outcomes.iter().find(|o| !o.passed)
    }

    /// The descriptor has no test block.
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

/// A failed verification, raised only under `verify.strict`.
#[derive(Debug, Error, MietteDiagnostic)]
#[error("test of `{package}` failed at action {}: {action}", .index + 1)]
#[diagnostic(code(cellar::verify::failed))]
pub struct VerificationFailure {
    pub package: PackageId,
    pub index: usize,
    pub action: String,
    pub detail: Option<String>,
}

impl VerificationFailure {
    pub fn from_result(result: &VerificationResult) -> Option<Self> {
        result.failed_action().map(|outcome| VerificationFailure {
            package: result.package,
            index: outcome.index,
            action: outcome.action.clone(),
            detail: outcome.detail.clone(),
        })
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        let mut diag = Diagnostic::error(self.to_string());
        if let Some(detail) = &self.detail {
            diag = diag.with_output_tail(detail, 20);
        }
        diag.with_suggestion(format!(
            "Re-run the test with `cellar test {} -v`",
            self.package.name()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_from_result() {
        let result = VerificationResult {
            package: PackageId::new("xkbcomp", "1.4.7"),
            passed: false,
            outcomes: vec![
                ActionOutcome {
                    index: 0,
                    action: "write test.xkb".into(),
                    passed: true,
                    detail: None,
                },
                ActionOutcome {
                    index: 1,
                    action: "assert test.xkm exists".into(),
                    passed: false,
                    detail: Some("no match".into()),
                },
            ],
        };

        let failure = VerificationFailure::from_result(&result).unwrap();
        assert_eq!(failure.index, 1);
        assert_eq!(
            failure.to_string(),
            "test of `xkbcomp v1.4.7` failed at action 2: assert test.xkm exists"
        );
    }
}
