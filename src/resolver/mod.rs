//! Dependency resolution.
//!
//! Resolution is a depth-first walk over the registry with three-color
//! marking. Each descriptor's build dependencies are visited before its run
//! dependencies, each group in declaration order, so the plan is fully
//! determined by the registry and the requested roots. Resolution is pure:
//! descriptors are already loaded and nothing is fetched here.

pub mod errors;
pub mod resolve;

pub use errors::ResolutionError;
pub use resolve::ResolvedPlan;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::core::{PackageDescriptor, PackageId, Phase, Registry};
use crate::util::InternedString;

/// Options controlling which dependency edges are followed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions {
    /// Also follow `test` dependencies of the requested packages, including
    /// a requested package first reached as another one's dependency.
    pub include_test: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

/// Resolve a single package with default options.
pub fn resolve(root: &str, registry: &Registry) -> Result<ResolvedPlan, ResolutionError> {
    resolve_many(&[root], registry, ResolveOptions::default())
}

/// Resolve several requested packages into one plan.
///
/// Shared dependencies appear once. Either the whole plan is returned or an
/// error; a partial plan never escapes.
pub fn resolve_many(
    roots: &[&str],
    registry: &Registry,
    options: ResolveOptions,
) -> Result<ResolvedPlan, ResolutionError> {
    let root_ids = roots
        .iter()
        .map(|name| {
            registry
                .get(name)
                .map(|d| d.id())
                .ok_or_else(|| unknown(registry, name, None))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut walker = Walker {
        registry,
        options,
        roots: root_ids.iter().map(|id| id.name()).collect(),
        marks: HashMap::new(),
        stack: Vec::new(),
        plan: ResolvedPlan::new(root_ids.clone()),
    };

    for id in &root_ids {
        walker.visit(id.name(), None)?;
    }

    tracing::debug!(
        "Resolved {} package(s): {}",
        walker.plan.len(),
        walker
            .plan
            .ids()
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );

    Ok(walker.plan)
}

fn unknown(registry: &Registry, name: &str, required_by: Option<PackageId>) -> ResolutionError {
    ResolutionError::Unknown {
        name: name.to_string(),
        required_by,
        suggestions: registry.suggestions(name),
    }
}

struct Walker<'a> {
    registry: &'a Registry,
    options: ResolveOptions,
    roots: HashSet<InternedString>,
    marks: HashMap<InternedString, Mark>,
    /// Packages currently in progress, outermost first.
    stack: Vec<PackageId>,
    plan: ResolvedPlan,
}

impl Walker<'_> {
    fn visit(
        &mut self,
        name: InternedString,
        required_by: Option<PackageId>,
    ) -> Result<PackageId, ResolutionError> {
        let descriptor: Arc<PackageDescriptor> = self
            .registry
            .get(name.as_str())
            .cloned()
            .ok_or_else(|| unknown(self.registry, name.as_str(), required_by))?;
        let id = descriptor.id();

        match self.marks.get(&name) {
            Some(Mark::Done) => return Ok(id),
            Some(Mark::InProgress) => {
                let start = self
                    .stack
                    .iter()
                    .position(|entry| entry.name() == name)
                    .unwrap_or(0);
                let mut path = self.stack[start..].to_vec();
                path.push(id);
                return Err(ResolutionError::Cycle(path));
            }
            None => {}
        }

        self.marks.insert(name, Mark::InProgress);
        self.stack.push(id);

        let mut phases = vec![Phase::Build, Phase::Run];
        if self.options.include_test && self.roots.contains(&name) {
            phases.push(Phase::Test);
        }

        let mut direct = Vec::new();
        for phase in phases {
            let deps: Vec<InternedString> =
                descriptor.dependencies_for(phase).map(|d| d.name).collect();
            for dep in deps {
                direct.push(self.visit(dep, Some(id))?);
            }
        }

        self.stack.pop();
        self.marks.insert(name, Mark::Done);

        self.plan.push(descriptor);
        for dep in direct {
            self.plan.add_edge(id, dep);
        }

        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(plan: &ResolvedPlan) -> Vec<String> {
        plan.ids().iter().map(|id| id.name().to_string()).collect()
    }

    fn registry(descs: Vec<PackageDescriptor>) -> Registry {
        descs.into_iter().collect()
    }

    /// Every dependency must precede its dependents.
    fn assert_topological(plan: &ResolvedPlan) {
        let ids = plan.ids();
        for (pos, id) in ids.iter().enumerate() {
            for dep in plan.deps(*id) {
                let dep_pos = ids.iter().position(|x| *x == dep).unwrap();
                assert!(dep_pos < pos, "{} must precede {}", dep, id);
            }
        }
    }

    #[test]
    fn test_simple_chain() {
        let reg = registry(vec![
            PackageDescriptor::builder("a", "1.0").run_dep("b").build(),
            PackageDescriptor::builder("b", "1.0").build(),
        ]);

        let plan = resolve("a", &reg).unwrap();
        assert_eq!(names(&plan), vec!["b", "a"]);
    }

    #[test]
    fn test_two_node_cycle() {
        let reg = registry(vec![
            PackageDescriptor::builder("a", "1.0").run_dep("b").build(),
            PackageDescriptor::builder("b", "1.0").run_dep("a").build(),
        ]);

        let err = resolve("a", &reg).unwrap_err();
        match err {
            ResolutionError::Cycle(path) => {
                let path: Vec<&str> = path.iter().map(|id| id.name().as_str()).collect();
                assert_eq!(path, vec!["a", "b", "a"]);
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_cycle_path_excludes_prefix() {
        let reg = registry(vec![
            PackageDescriptor::builder("root", "1.0").build_dep("x").build(),
            PackageDescriptor::builder("x", "1.0").run_dep("y").build(),
            PackageDescriptor::builder("y", "1.0").run_dep("z").build(),
            PackageDescriptor::builder("z", "1.0").run_dep("x").build(),
        ]);

        match resolve("root", &reg).unwrap_err() {
            ResolutionError::Cycle(path) => {
                let path: Vec<&str> = path.iter().map(|id| id.name().as_str()).collect();
                assert_eq!(path, vec!["x", "y", "z", "x"]);
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_self_cycle() {
        let reg = registry(vec![PackageDescriptor::builder("a", "1.0")
            .build_dep("a")
            .build()]);

        assert!(matches!(
            resolve("a", &reg),
            Err(ResolutionError::Cycle(path)) if path.len() == 2
        ));
    }

    #[test]
    fn test_unknown_dependency() {
        let reg = registry(vec![PackageDescriptor::builder("xkbcomp", "1.4.7")
            .run_dep("libx11")
            .build()]);

        match resolve("xkbcomp", &reg).unwrap_err() {
            ResolutionError::Unknown {
                name, required_by, ..
            } => {
                assert_eq!(name, "libx11");
                assert_eq!(required_by, Some(PackageId::new("xkbcomp", "1.4.7")));
            }
            other => panic!("expected unknown, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_root() {
        let reg = Registry::new();
        assert!(matches!(
            resolve("nothing", &reg),
            Err(ResolutionError::Unknown { required_by: None, .. })
        ));
    }

    #[test]
    fn test_build_deps_before_run_deps() {
        let reg = registry(vec![
            PackageDescriptor::builder("xkbcomp", "1.4.7")
                .run_dep("libx11")
                .build_dep("pkgconf")
                .run_dep("libxkbfile")
                .build_dep("xorgproto")
                .build(),
            PackageDescriptor::builder("libx11", "1.8.10")
                .build_dep("xorgproto")
                .build(),
            PackageDescriptor::builder("libxkbfile", "1.1.3")
                .run_dep("libx11")
                .build(),
            PackageDescriptor::builder("pkgconf", "2.3.0").build(),
            PackageDescriptor::builder("xorgproto", "2024.1").build(),
        ]);

        let plan = resolve("xkbcomp", &reg).unwrap();
        assert_eq!(
            names(&plan),
            vec!["pkgconf", "xorgproto", "libx11", "libxkbfile", "xkbcomp"]
        );
        assert_topological(&plan);
    }

    #[test]
    fn test_diamond_is_deterministic() {
        let make = || {
            registry(vec![
                PackageDescriptor::builder("top", "1.0")
                    .run_dep("left")
                    .run_dep("right")
                    .build(),
                PackageDescriptor::builder("left", "1.0").run_dep("base").build(),
                PackageDescriptor::builder("right", "1.0").run_dep("base").build(),
                PackageDescriptor::builder("base", "1.0").build(),
            ])
        };

        let first = resolve("top", &make()).unwrap();
        let second = resolve("top", &make()).unwrap();
        assert_eq!(names(&first), names(&second));
        assert_eq!(names(&first), vec!["base", "left", "right", "top"]);
        assert_topological(&first);
        assert_eq!(first.deps(PackageId::new("top", "1.0")).len(), 2);
    }

    #[test]
    fn test_test_deps_only_when_requested() {
        let reg = registry(vec![
            PackageDescriptor::builder("tool", "1.0")
                .dependency("checker", Phase::Test)
                .build(),
            PackageDescriptor::builder("checker", "1.0").build(),
        ]);

        let plan = resolve("tool", &reg).unwrap();
        assert_eq!(names(&plan), vec!["tool"]);

        let plan = resolve_many(&["tool"], &reg, ResolveOptions { include_test: true }).unwrap();
        assert_eq!(names(&plan), vec!["checker", "tool"]);
    }

    #[test]
    fn test_test_deps_of_root_reached_as_dependency() {
        let reg = registry(vec![
            PackageDescriptor::builder("app", "1.0").run_dep("lib").build(),
            PackageDescriptor::builder("lib", "1.0")
                .dependency("checker", Phase::Test)
                .build(),
            PackageDescriptor::builder("checker", "1.0").build(),
        ]);

        let options = ResolveOptions { include_test: true };
        let plan = resolve_many(&["app", "lib"], &reg, options).unwrap();
        assert_eq!(names(&plan), vec!["checker", "lib", "app"]);

        // Not requested, so its test dependencies stay out.
        let plan = resolve_many(&["app"], &reg, options).unwrap();
        assert_eq!(names(&plan), vec!["lib", "app"]);
    }

    #[test]
    fn test_many_roots_share_dependencies() {
        let reg = registry(vec![
            PackageDescriptor::builder("a", "1.0").run_dep("common").build(),
            PackageDescriptor::builder("b", "1.0").run_dep("common").build(),
            PackageDescriptor::builder("common", "1.0").build(),
        ]);

        let plan = resolve_many(&["a", "b"], &reg, ResolveOptions::default()).unwrap();
        assert_eq!(names(&plan), vec!["common", "a", "b"]);
        assert_eq!(plan.roots().len(), 2);
    }

    #[test]
    fn test_wide_acyclic_registry_is_topological() {
        // Package i depends on every j < i with j dividing i.
        let descs = (1..=40)
            .map(|i| {
                let mut b = PackageDescriptor::builder(format!("p{}", i), "1.0");
                for j in 1..i {
                    if i % j == 0 {
                        b = b.run_dep(format!("p{}", j));
                    }
                }
                b.build()
            })
            .collect::<Vec<_>>();
        let reg = registry(descs);

        let roots: Vec<String> = (30..=40).map(|i| format!("p{}", i)).collect();
        let roots: Vec<&str> = roots.iter().map(|s| s.as_str()).collect();
        let plan = resolve_many(&roots, &reg, ResolveOptions::default()).unwrap();
        assert_topological(&plan);
    }
}
