//! Resolution error types and diagnostics.

use miette::Diagnostic as MietteDiagnostic;
use thiserror::Error;

use crate::core::PackageId;
use crate::util::diagnostic::{suggestions, Diagnostic};

/// Error during dependency resolution.
///
/// Resolution errors are never retried: the registry is static for the
/// lifetime of one operation, so asking again gives the same answer.
#[derive(Debug, Error, MietteDiagnostic)]
pub enum ResolutionError {
    /// The path starts and ends with the package that closes the cycle.
    #[error("dependency cycle: {}", display_path(.0))]
    #[diagnostic(
        code(cellar::resolve::cycle),
        help("Break the cycle by removing or re-phasing one of the dependencies")
    )]
    Cycle(Vec<PackageId>),

    #[error("unknown package `{name}`{}", required_by_suffix(.required_by))]
    #[diagnostic(code(cellar::resolve::unknown))]
    Unknown {
        name: String,
        required_by: Option<PackageId>,
        suggestions: Vec<String>,
    },
}

fn display_path(path: &[PackageId]) -> String {
    path.iter()
        .map(|id| id.name().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn required_by_suffix(required_by: &Option<PackageId>) -> String {
    match required_by {
        Some(id) => format!(" (required by `{}`)", id),
        None => String::new(),
    }
}

impl ResolutionError {
    /// Convert to a user-friendly diagnostic.
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            ResolutionError::Cycle(path) => Diagnostic::error("cycle detected in dependency graph")
                .with_context(format!("cycle: {}", display_path(path)))
                .with_suggestion(
                    "Break the cycle by removing or restructuring dependencies".to_string(),
                ),

            ResolutionError::Unknown {
                name,
                required_by,
                suggestions: hints,
            } => {
                let mut diag = Diagnostic::error(format!("could not find package `{}`", name));

                if let Some(parent) = required_by {
                    diag = diag.with_context(format!("required by `{}`", parent));
                }

                if !hints.is_empty() {
                    diag = diag.with_context(format!("did you mean: {}?", hints.join(", ")));
                }

                diag.with_suggestion(suggestions::PACKAGE_NOT_FOUND)
            }
        }
    }
}
