//! Dependency layering of registered services.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

use super::service::ServiceInfo;

/// Start order computed from service dependencies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DependencyPlan {
    /// Each layer depends only on services in earlier layers.
    pub layers: Vec<BTreeSet<String>>,

    /// Services on or behind a dependency cycle.
    pub unresolved: BTreeSet<String>,

    /// Dependencies on services that are not registered, by dependent.
    pub missing: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyPlan {
    /// Returns true if every service was placed in a layer.
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }
}

/// Groups services into layers with Kahn's algorithm.
///
/// Dependencies on unregistered ids do not block a service.
pub fn resolve<'a, I>(services: I) -> DependencyPlan
where
    I: IntoIterator<Item = &'a ServiceInfo>,
{
    let services: Vec<&ServiceInfo> = services.into_iter().collect();
    let nodes: BTreeSet<String> = services.iter().map(|info| info.service_id()).collect();

    let mut plan = DependencyPlan::default();

    // edges[A] = deps of A, reverse[B] = services depending on B
    let mut edges: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut reverse: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for info in &services {
        let id = info.service_id();
        let deps = edges.entry(id.clone()).or_default();
        for dep in &info.dependencies {
            if nodes.contains(dep) {
                deps.insert(dep.clone());
                reverse.entry(dep.clone()).or_default().insert(id.clone());
            } else {
                plan.missing.entry(id.clone()).or_default().insert(dep.clone());
            }
        }
    }

    for (service, deps) in &plan.missing {
        warn!(
            service = %service,
            missing = ?deps,
            "Service depends on unregistered services"
        );
    }

    let mut in_degree: BTreeMap<&str, usize> = edges
        .iter()
        .map(|(id, deps)| (id.as_str(), deps.len()))
        .collect();

    let mut current: BTreeSet<String> = in_degree
        .iter()
        .filter(|(_, &degree)| degree == 0)
        .map(|(id, _)| (*id).to_string())
        .collect();

    while !current.is_empty() {
        let mut next = BTreeSet::new();
        for id in &current {
            in_degree.remove(id.as_str());
            let Some(dependents) = reverse.get(id) else {
                continue;
            };
            for dependent in dependents {
                if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        next.insert(dependent.clone());
                    }
                }
            }
        }
        plan.layers.push(current);
        current = next;
    }

    plan.unresolved = in_degree.keys().map(|id| (*id).to_string()).collect();
    if !plan.unresolved.is_empty() {
        warn!(
            services = ?plan.unresolved,
            "Circular dependencies detected, services left unordered"
        );
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(app: &str, deps: &[&str]) -> ServiceInfo {
        ServiceInfo::new(app, "default", 8000).with_dependencies(deps.iter().copied())
    }

    fn layer(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|id| format!("{}:default", id)).collect()
    }

    #[test]
    fn test_layers() {
        let services = vec![
            service("c", &["b:default", "d:default"]),
            service("a", &[]),
            service("b", &["a:default"]),
            service("d", &["a:default"]),
        ];

        let plan = resolve(&services);
        assert_eq!(plan.layers, vec![layer(&["a"]), layer(&["b", "d"]), layer(&["c"])]);
        assert!(plan.is_complete());
        assert!(plan.missing.is_empty());
    }

    #[test]
    fn test_empty() {
        let plan = resolve(&Vec::<ServiceInfo>::new());
        assert!(plan.layers.is_empty());
        assert!(plan.is_complete());
    }

    #[test]
    fn test_missing_dependency_does_not_block() {
        let services = vec![service("web", &["cache:default"]), service("db", &[])];

        let plan = resolve(&services);
        assert_eq!(plan.layers, vec![layer(&["db", "web"])]);
        assert_eq!(
            plan.missing.get("web:default"),
            Some(&["cache:default".to_string()].into_iter().collect())
        );
    }

    #[test]
    fn test_cycle_is_unresolved() {
        let services = vec![
            service("a", &[]),
            service("b", &["c:default"]),
            service("c", &["b:default"]),
            service("d", &["b:default"]),
        ];

        let plan = resolve(&services);
        assert_eq!(plan.layers, vec![layer(&["a"])]);
        assert_eq!(plan.unresolved, layer(&["b", "c", "d"]));
        assert!(!plan.is_complete());
    }

    #[test]
    fn test_self_dependency_is_unresolved() {
        let services = vec![service("a", &["a:default"])];

        let plan = resolve(&services);
        assert!(plan.layers.is_empty());
        assert_eq!(plan.unresolved, layer(&["a"]));
    }

    #[test]
    fn test_duplicate_dependencies_count_once() {
        let services = vec![
            service("a", &[]),
            service("b", &["a:default", "a:default"]),
        ];

        let plan = resolve(&services);
        assert_eq!(plan.layers, vec![layer(&["a"]), layer(&["b"])]);
    }
}
