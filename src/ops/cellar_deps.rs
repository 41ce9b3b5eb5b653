//! Implementation of `cellar deps`.

use crate::ops::failure::Failure;
use crate::ops::session::Session;
use crate::resolver::{resolve_many, ResolveOptions, ResolvedPlan};

/// Resolve a package without building anything.
pub fn deps(
    session: &Session<'_>,
    name: &str,
    include_test: bool,
) -> Result<ResolvedPlan, Failure> {
    let registry = session.registry()?;
    let plan = resolve_many(&[name], &registry, ResolveOptions { include_test })?;
    Ok(plan)
}
