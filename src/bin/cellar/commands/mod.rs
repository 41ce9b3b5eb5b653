//! Command implementations

pub mod cleanup;
pub mod completions;
pub mod deps;
pub mod install;
pub mod list;
pub mod uninstall;
