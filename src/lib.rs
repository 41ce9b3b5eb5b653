//! cellar - a declarative package-build descriptor engine
//!
//! This crate provides the library behind the `cellar` binary: descriptor
//! parsing, dependency resolution, source fetching, build execution,
//! transactional installs and post-install smoke tests.

pub mod builder;
pub mod core;
pub mod install;
pub mod ops;
pub mod resolver;
pub mod sources;
pub mod util;
pub mod verify;

/// Test utilities and fakes for cellar unit tests.
///
/// This module is only available when compiling with `--cfg test`. It
/// provides a scripted process runner, an in-memory transport and
/// descriptor and archive fixtures.
#[cfg(test)]
pub mod test_support;

pub use core::{Layout, PackageDescriptor, PackageId, Registry};
pub use resolver::ResolvedPlan;
pub use util::context::GlobalContext;
