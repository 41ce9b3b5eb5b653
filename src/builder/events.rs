//! Install event types for JSON output.
//!
//! This module defines the stable JSON schema for machine-readable output.
//! These events are emitted when using `--message-format=json`, one JSON
//! object per line on stdout.
//!
//! # Stability
//!
//! New fields may be added, but existing fields should not be removed or
//! renamed.

use serde::Serialize;

use crate::core::PackageId;

/// An event emitted while installing, testing or removing packages.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason")]
pub enum BuildEvent {
    /// The resolved plan, in build order.
    #[serde(rename = "plan")]
    Plan { packages: Vec<String> },

    #[serde(rename = "fetch-started")]
    FetchStarted { package_id: String, url: String },

    #[serde(rename = "fetch-finished")]
    FetchFinished { package_id: String, cached: bool },

    #[serde(rename = "build-started")]
    BuildStarted { package_id: String, steps: usize },

    /// One step is about to run. `index` is zero-based.
    #[serde(rename = "step-started")]
    StepStarted {
        package_id: String,
        index: usize,
        command: String,
    },

    #[serde(rename = "package-installed")]
    PackageInstalled {
        package_id: String,
        files: usize,
        duration_ms: u64,
    },

    #[serde(rename = "package-failed")]
    PackageFailed {
        package_id: String,
        stage: String,
        message: String,
    },

    #[serde(rename = "verify-finished")]
    VerifyFinished {
        package_id: String,
        passed: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        failed_action: Option<String>,
    },

    #[serde(rename = "package-removed")]
    PackageRemoved {
        package_id: String,
        files_removed: usize,
        files_kept: usize,
    },

    /// The whole operation completed (success or failure).
    #[serde(rename = "finished")]
    Finished {
        success: bool,
        duration_ms: u64,
        packages: usize,
    },

    #[serde(rename = "warning")]
    Warning { message: String },
}

impl BuildEvent {
    pub fn plan(ids: &[PackageId]) -> Self {
        BuildEvent::Plan {
            packages: ids.iter().map(|id| id.to_string()).collect(),
        }
    }

    pub fn step_started(id: PackageId, index: usize, command: impl Into<String>) -> Self {
        BuildEvent::StepStarted {
            package_id: id.to_string(),
            index,
            command: command.into(),
        }
    }

    pub fn failed(id: PackageId, stage: impl Into<String>, message: impl Into<String>) -> Self {
        BuildEvent::PackageFailed {
            package_id: id.to_string(),
            stage: stage.into(),
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        BuildEvent::Warning {
            message: message.into(),
        }
    }

    /// Serialize this event to a JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Receives events from the scheduler and the operations.
///
/// Implementations must be cheap and thread-safe: concurrent builds report
/// from several worker threads at once.
pub trait Reporter: Send + Sync {
    fn event(&self, event: &BuildEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn event(&self, _event: &BuildEvent) {}
}
