//! Dependency resolution
//!
//! Computes a load order in which every package follows its dependencies,
//! reporting missing dependencies and cycles instead of failing on them.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

use crate::package::PackageRegistry;

/// Read-only view of a dependency graph keyed by package id
pub trait DependencyGraph {
    fn contains(&self, package_id: &str) -> bool;

    /// Declared dependencies, empty for unknown ids
    fn dependencies(&self, package_id: &str) -> &[String];

    /// Every package id, sorted
    fn ids(&self) -> Vec<&str>;
}

impl DependencyGraph for PackageRegistry {
    fn contains(&self, package_id: &str) -> bool {
        PackageRegistry::contains(self, package_id)
    }

    fn dependencies(&self, package_id: &str) -> &[String] {
        self.get(package_id)
            .map(|definition| definition.dependencies())
            .unwrap_or(&[])
    }

    fn ids(&self) -> Vec<&str> {
        PackageRegistry::ids(self).collect()
    }
}

impl DependencyGraph for BTreeMap<String, Vec<String>> {
    fn contains(&self, package_id: &str) -> bool {
        self.contains_key(package_id)
    }

    fn dependencies(&self, package_id: &str) -> &[String] {
        self.get(package_id).map(Vec::as_slice).unwrap_or(&[])
    }

    fn ids(&self) -> Vec<&str> {
        self.keys().map(String::as_str).collect()
    }
}

/// A package whose dependencies are not all present
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnresolvedPackage {
    pub package_id: String,
    pub missing: Vec<String>,
}

/// Result of [`resolve_dependency_order`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyResolution {
    /// Best-effort order; packages on cycles or with missing dependencies still appear
    pub load_order: Vec<String>,
    pub unresolvable: Vec<UnresolvedPackage>,
    pub circular: Vec<Vec<String>>,
}

impl DependencyResolution {
    /// No missing dependencies and no cycles
    pub fn is_clean(&self) -> bool {
        self.unresolvable.is_empty() && self.circular.is_empty()
    }

    /// The load order without any package that has a missing dependency,
    /// lies on a cycle, or depends (transitively) on such a package
    pub fn strict_order<G: DependencyGraph + ?Sized>(&self, graph: &G) -> Vec<String> {
        let mut broken: HashSet<&str> = self
            .unresolvable
            .iter()
            .map(|u| u.package_id.as_str())
            .chain(self.circular.iter().flatten().map(String::as_str))
            .collect();

        loop {
            let newly_broken: Vec<&str> = self
                .load_order
                .iter()
                .map(String::as_str)
                .filter(|id| !broken.contains(id))
                .filter(|id| {
                    graph
                        .dependencies(id)
                        .iter()
                        .any(|dep| broken.contains(dep.as_str()))
                })
                .collect();
            if newly_broken.is_empty() {
                break;
            }
            broken.extend(newly_broken);
        }

        self.load_order
            .iter()
            .filter(|id| !broken.contains(id.as_str()))
            .cloned()
            .collect()
    }
}

/// Outcome of [`check_dependencies`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyCheck {
    pub satisfied: bool,
    pub missing: Vec<String>,
}

struct Walker<'g, G: ?Sized> {
    graph: &'g G,
    resolved: HashSet<String>,
    visiting: HashSet<String>,
    path: Vec<String>,
    load_order: Vec<String>,
    circular: Vec<Vec<String>>,
}

impl<G: DependencyGraph + ?Sized> Walker<'_, G> {
    fn visit(&mut self, package_id: &str) {
        if self.resolved.contains(package_id) {
            return;
        }
        if self.visiting.contains(package_id) {
            if let Some(start) = self.path.iter().position(|id| id == package_id) {
                let cycle = self.path[start..].to_vec();
                debug!("Dependency cycle: {}", cycle.join(" -> "));
                self.circular.push(cycle);
            }
            return;
        }

        self.visiting.insert(package_id.to_string());
        self.path.push(package_id.to_string());

        let graph = self.graph;
        for dependency in graph.dependencies(package_id) {
            if graph.contains(dependency) {
                self.visit(dependency);
            }
        }

        self.path.pop();
        self.visiting.remove(package_id);
        self.resolved.insert(package_id.to_string());
        self.load_order.push(package_id.to_string());
    }
}

/// Order packages so dependencies load first
pub fn resolve_dependency_order<G: DependencyGraph + ?Sized>(graph: &G) -> DependencyResolution {
    let ids = graph.ids();

    let unresolvable: Vec<UnresolvedPackage> = ids
        .iter()
        .filter_map(|id| {
            let missing: Vec<String> = graph
                .dependencies(id)
                .iter()
                .filter(|dep| !graph.contains(dep))
                .cloned()
                .collect();
            (!missing.is_empty()).then(|| UnresolvedPackage {
                package_id: id.to_string(),
                missing,
            })
        })
        .collect();

    let mut walker = Walker {
        graph,
        resolved: HashSet::new(),
        visiting: HashSet::new(),
        path: Vec::new(),
        load_order: Vec::with_capacity(ids.len()),
        circular: Vec::new(),
    };
    for id in &ids {
        walker.visit(id);
    }

    debug!(
        "Resolved {} packages ({} unresolvable, {} cycles)",
        walker.load_order.len(),
        unresolvable.len(),
        walker.circular.len()
    );

    DependencyResolution {
        load_order: walker.load_order,
        unresolvable,
        circular: walker.circular,
    }
}

/// Transitive dependencies of a package in discovery order
///
/// Missing ids are included; the package itself never is.
pub fn get_all_dependencies<G: DependencyGraph + ?Sized>(graph: &G, package_id: &str) -> Vec<String> {
    fn collect<G: DependencyGraph + ?Sized>(
        graph: &G,
        package_id: &str,
        seen: &mut HashSet<String>,
        out: &mut Vec<String>,
    ) {
        for dependency in graph.dependencies(package_id) {
            if seen.insert(dependency.clone()) {
                out.push(dependency.clone());
                collect(graph, dependency, seen, out);
            }
        }
    }

    let mut seen = HashSet::from([package_id.to_string()]);
    let mut out = Vec::new();
    collect(graph, package_id, &mut seen, &mut out);
    out
}

/// Packages that directly depend on `package_id`, sorted
pub fn get_dependents<G: DependencyGraph + ?Sized>(graph: &G, package_id: &str) -> Vec<String> {
    graph
        .ids()
        .into_iter()
        .filter(|id| graph.dependencies(id).iter().any(|dep| dep == package_id))
        .map(str::to_string)
        .collect()
}

/// Whether every direct dependency of a package is present
pub fn check_dependencies<G: DependencyGraph + ?Sized>(graph: &G, package_id: &str) -> DependencyCheck {
    if !graph.contains(package_id) {
        return DependencyCheck {
            satisfied: false,
            missing: vec![package_id.to_string()],
        };
    }

    let missing: Vec<String> = graph
        .dependencies(package_id)
        .iter()
        .filter(|dep| !graph.contains(dep))
        .cloned()
        .collect();
    DependencyCheck {
        satisfied: missing.is_empty(),
        missing,
    }
}
