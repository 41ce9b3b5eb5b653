//! High-level operations.
//!
//! This module contains the implementation of cellar commands. Each
//! operation takes a [`Session`] and returns a typed [`Failure`] that
//! carries its exit code.

pub mod cellar_cleanup;
pub mod cellar_deps;
pub mod cellar_install;
pub mod cellar_list;
pub mod cellar_uninstall;
pub mod failure;
pub mod session;

pub use cellar_cleanup::{cleanup, CleanupOptions, CleanupReport};
pub use cellar_deps::deps;
pub use cellar_install::{install, InstallOptions, InstallSummary};
pub use cellar_list::{list, ListEntry};
pub use cellar_test::test;
pub use cellar_uninstall::{uninstall, UninstallOptions};
pub use failure::Failure;
pub use session::Session;
