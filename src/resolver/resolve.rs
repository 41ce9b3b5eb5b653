//! ResolvedPlan - the ordered build plan for one install request.
//!
//! A plan is built once per request and is read-only afterwards. Entries
//! are ordered so that every package appears after all of its in-plan
//! dependencies.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use crate::core::{PackageDescriptor, PackageId};

/// The resolved, dependency-ordered plan.
#[derive(Debug, Clone, Default)]
pub struct ResolvedPlan {
    /// Descriptors, dependencies first
    entries: Vec<Arc<PackageDescriptor>>,

    /// Requested packages, in request order
    roots: Vec<PackageId>,

    /// Edge `a -> b` means "a depends on b"
    graph: DiGraph<PackageId, ()>,

    pkg_to_node: HashMap<PackageId, NodeIndex>,
}

impl ResolvedPlan {
    pub(crate) fn new(roots: Vec<PackageId>) -> Self {
        ResolvedPlan {
            roots,
            ..Default::default()
        }
    }

    /// Append a descriptor. The caller guarantees its dependencies were
    /// pushed before it.
    pub(crate) fn push(&mut self, descriptor: Arc<PackageDescriptor>) {
        let id = descriptor.id();
        if self.pkg_to_node.contains_key(&id) {
            return;
        }
        let node = self.graph.add_node(id);
        self.pkg_to_node.insert(id, node);
        self.entries.push(descriptor);
    }

    /// Record that `from` depends on `to`.
    pub(crate) fn add_edge(&mut self, from: PackageId, to: PackageId) {
        if let (Some(&from_node), Some(&to_node)) =
            (self.pkg_to_node.get(&from), self.pkg_to_node.get(&to))
        {
            if !self.graph.contains_edge(from_node, to_node) {
                self.graph.add_edge(from_node, to_node, ());
            }
        }
    }

    /// Descriptors in build order.
    pub fn entries(&self) -> &[Arc<PackageDescriptor>] {
        &self.entries
    }

    /// Package ids in build order.
    pub fn ids(&self) -> Vec<PackageId> {
        self.entries.iter().map(|d| d.id()).collect()
    }

    pub fn roots(&self) -> &[PackageId] {
        &self.roots
    }

    pub fn is_root(&self, id: PackageId) -> bool {
        self.roots.contains(&id)
    }

    pub fn get(&self, id: PackageId) -> Option<&Arc<PackageDescriptor>> {
        self.entries.iter().find(|d| d.id() == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: PackageId) -> bool {
        self.pkg_to_node.contains_key(&id)
    }

    /// Direct in-plan dependencies of a package.
    pub fn deps(&self, id: PackageId) -> Vec<PackageId> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// In-plan packages that depend directly on the given package.
    pub fn dependents(&self, id: PackageId) -> Vec<PackageId> {
        self.neighbors(id, Direction::Incoming)
    }

    fn neighbors(&self, id: PackageId, direction: Direction) -> Vec<PackageId> {
        let Some(&node) = self.pkg_to_node.get(&id) else {
            return Vec::new();
        };
        let found: HashSet<PackageId> = self
            .graph
            .neighbors_directed(node, direction)
            .map(|n| self.graph[n])
            .collect();
        // Plan order keeps the output deterministic.
        self.entries
            .iter()
            .map(|d| d.id())
            .filter(|id| found.contains(id))
            .collect()
    }

    /// All transitive in-plan dependencies, in plan order.
    pub fn transitive_deps(&self, id: PackageId) -> Vec<PackageId> {
        let mut visited = HashSet::new();
        let mut stack = self.deps(id);

        while let Some(current) = stack.pop() {
            if visited.insert(current) {
                stack.extend(self.deps(current));
            }
        }

        self.entries
            .iter()
            .map(|d| d.id())
            .filter(|id| visited.contains(id))
            .collect()
    }

    /// Names of every package in the plan.
    pub fn names(&self) -> BTreeSet<String> {
        self.entries.iter().map(|d| d.name().to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_of(edges: &[(&str, &str)], order: &[&str]) -> ResolvedPlan {
        let mut plan = ResolvedPlan::new(vec![PackageId::new(order[order.len() - 1], "1.0")]);
        for name in order {
            plan.push(Arc::new(PackageDescriptor::builder(*name, "1.0").build()));
        }
        for (from, to) in edges {
            plan.add_edge(PackageId::new(*from, "1.0"), PackageId::new(*to, "1.0"));
        }
        plan
    }

    #[test]
    fn test_deps_and_dependents() {
        let plan = plan_of(&[("a", "b"), ("a", "c"), ("b", "c")], &["c", "b", "a"]);
        let a = PackageId::new("a", "1.0");
        let b = PackageId::new("b", "1.0");
        let c = PackageId::new("c", "1.0");

        assert_eq!(plan.deps(a), vec![c, b]);
        assert_eq!(plan.dependents(c), vec![b, a]);
        assert_eq!(plan.transitive_deps(a), vec![c, b]);
        assert!(plan.is_root(a));
    }

    #[test]
    fn test_push_is_idempotent() {
        let mut plan = ResolvedPlan::new(vec![]);
        let desc = Arc::new(PackageDescriptor::builder("a", "1.0").build());
        plan.push(desc.clone());
        plan.push(desc);
        assert_eq!(plan.len(), 1);
    }
}
