//! Package builds.
//!
//! This module runs descriptor install steps against an explicit build
//! environment and schedules the builds of a resolved plan.

pub mod env;
pub mod events;
pub mod executor;
pub mod expand;
pub mod scheduler;

pub use env::Environment;
pub use events::{BuildEvent, NullReporter, Reporter};
pub use executor::{BuildError, BuildExecutor, BuildResult};
pub use expand::Placeholders;
pub use scheduler::{
    BuildSettings, FailureCause, PackageFailure, ScheduleReport, Scheduler, Stage,
};
