//! Core data structures for cellar.
//!
//! This module contains the foundational types used throughout cellar:
//! - Package identities
//! - The immutable descriptor model and its TOML parser
//! - The descriptor registry
//! - The on-disk layout of an install root

pub mod descriptor;
pub mod layout;
pub mod manifest;
pub mod package_id;
pub mod registry;

pub use descriptor::{
    BuildStep, DependencySpec, LicenseExpr, PackageDescriptor, Phase, SourceRef, TestAction,
    TestBlock,
};
pub use layout::Layout;
pub use manifest::{load_descriptor, parse_descriptor, DescriptorError, SCHEMA_VERSION};
pub use package_id::PackageId;
pub use registry::Registry;
