//! Diff computation between applied state and a desired graph

use crate::graph::{Graph, topological_sort};
use crate::state::StackState;
use crate::types::{OperationKind, Properties, Resource, ResourceKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// One changed property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyChange {
    pub property: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Value>,
}

/// What will happen to one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub resource: String,
    pub resource_kind: ResourceKind,
    pub kind: OperationKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<PropertyChange>,
    /// Why a replace was chosen when no immutable property changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Plan counts per operation kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub delete: usize,
    pub unchanged: usize,
}

impl PlanSummary {
    /// Total number of changes
    pub fn total(&self) -> usize {
        self.create + self.update + self.replace + self.delete
    }
}

/// One operation per resource present in either side
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    operations: Vec<Operation>,
}

impl Plan {
    /// Operations: desired resources dependencies first, then deletions
    /// dependents first
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn get(&self, resource: &str) -> Option<&Operation> {
        self.operations.iter().find(|op| op.resource == resource)
    }

    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for op in &self.operations {
            match op.kind {
                OperationKind::Create => summary.create += 1,
                OperationKind::Update => summary.update += 1,
                OperationKind::Replace => summary.replace += 1,
                OperationKind::Delete => summary.delete += 1,
                OperationKind::NoOp => summary.unchanged += 1,
            }
        }
        summary
    }

    /// Check if there are any changes
    pub fn has_changes(&self) -> bool {
        self.operations.iter().any(|op| op.kind.is_change())
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Compute the structural difference between two property maps
pub fn property_changes(before: &Properties, after: &Properties) -> Vec<PropertyChange> {
    let keys: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
    keys.into_iter()
        .filter(|k| before.get(*k) != after.get(*k))
        .map(|k| PropertyChange {
            property: k.clone(),
            before: before.get(k).cloned(),
            after: after.get(k).cloned(),
        })
        .collect()
}

fn classify(previous: &Resource, desired: &Resource) -> (OperationKind, Vec<PropertyChange>) {
    let changes = property_changes(&previous.properties(), &desired.properties());
    if changes.is_empty() && previous.kind() == desired.kind() {
        return (OperationKind::NoOp, changes);
    }

    let kind = desired.kind();
    let needs_replace = previous.kind() != kind
        || changes.iter().any(|c| kind.is_immutable(&c.property));

    if needs_replace {
        (OperationKind::Replace, changes)
    } else {
        (OperationKind::Update, changes)
    }
}

/// Compute one operation for every resource in `previous` or `desired`
pub fn diff(previous: &StackState, desired: &Graph) -> Plan {
    let mut operations = Vec::with_capacity(desired.len() + previous.resources.len());
    let mut kinds: BTreeMap<&str, OperationKind> = BTreeMap::new();

    for name in desired.topological_order() {
        let Some(resource) = desired.get(name) else {
            continue;
        };

        let mut op = match previous.resources.get(name) {
            None => Operation {
                resource: name.clone(),
                resource_kind: resource.kind(),
                kind: OperationKind::Create,
                changes: property_changes(&Properties::new(), &resource.properties()),
                reason: None,
            },
            Some(state) => {
                let (kind, changes) = classify(&state.resource, resource);
                Operation {
                    resource: name.clone(),
                    resource_kind: resource.kind(),
                    kind,
                    changes,
                    reason: None,
                }
            }
        };

        // A replaced dependency gets a new provider id; anything still bound
        // to it has to be recreated as well.
        if matches!(op.kind, OperationKind::NoOp | OperationKind::Update)
            && let Some(state) = previous.resources.get(name)
        {
            let previous_deps = state.resource.dependencies();
            let replaced = desired.dependencies(name).into_iter().find(|d| {
                previous_deps.contains(d)
                    && kinds.get(d.as_str()) == Some(&OperationKind::Replace)
            });
            if let Some(dep) = replaced {
                op.kind = OperationKind::Replace;
                op.reason = Some(format!("dependency '{dep}' is replaced"));
            }
        }

        kinds.insert(name.as_str(), op.kind);
        operations.push(op);
    }

    let removed: Vec<String> = previous
        .resources
        .keys()
        .filter(|n| !desired.contains(n))
        .cloned()
        .collect();
    for name in previous_order(previous).into_iter().rev() {
        if !removed.contains(&name) {
            continue;
        }
        let state = &previous.resources[&name];
        operations.push(Operation {
            resource_kind: state.resource.kind(),
            kind: OperationKind::Delete,
            changes: property_changes(&state.resource.properties(), &Properties::new()),
            reason: None,
            resource: name,
        });
    }

    let plan = Plan { operations };
    log::debug!("Computed plan: {:?}", plan.summary());
    plan
}

/// Dependency order of the resources recorded in state
pub(crate) fn previous_order(previous: &StackState) -> Vec<String> {
    let names: Vec<String> = previous.resources.keys().cloned().collect();
    // A record that made it through load() came from a DAG; fall back to
    // name order rather than failing if it was edited by hand.
    topological_sort(&names, |n| {
        previous
            .resources
            .get(n)
            .map(|s| s.resource.dependencies())
            .unwrap_or_default()
    })
    .unwrap_or(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphBuilder;
    use crate::types::{ResourceSpec, ResourceState};

    fn webapp(port: u16) -> Graph {
        GraphBuilder::new()
            .declare(Resource::network("N"))
            .declare(Resource::image("I", "nginx:alpine"))
            .declare(Resource::container("C", "I").on_network("N").with_port(80, port))
            .build()
            .unwrap()
    }

    fn applied(graph: &Graph) -> StackState {
        let mut state = StackState::empty("test");
        for r in graph.iter() {
            state.resources.insert(
                r.name.clone(),
                ResourceState {
                    resource: r.clone(),
                    id: format!("id-{}", r.name),
                    outputs: Default::default(),
                },
            );
        }
        state
    }

    fn kinds(plan: &Plan) -> Vec<(&str, OperationKind)> {
        plan.operations()
            .iter()
            .map(|op| (op.resource.as_str(), op.kind))
            .collect()
    }

    #[test]
    fn test_first_run_creates_everything() {
        let plan = diff(&StackState::empty("test"), &webapp(8080));
        assert_eq!(
            kinds(&plan),
            [
                ("N", OperationKind::Create),
                ("I", OperationKind::Create),
                ("C", OperationKind::Create)
            ]
        );
        assert_eq!(plan.summary().create, 3);
    }

    #[test]
    fn test_identical_graph_is_all_noop() {
        let graph = webapp(8080);
        let plan = diff(&applied(&graph), &graph);
        assert!(!plan.has_changes());
        assert_eq!(plan.summary().unchanged, 3);
    }

    #[test]
    fn test_port_change_updates_container_only() {
        let plan = diff(&applied(&webapp(8080)), &webapp(9090));
        assert_eq!(
            kinds(&plan),
            [
                ("N", OperationKind::NoOp),
                ("I", OperationKind::NoOp),
                ("C", OperationKind::Update)
            ]
        );
        let change = &plan.get("C").unwrap().changes[0];
        assert_eq!(change.property, "ports");
    }

    #[test]
    fn test_removed_resource_is_deleted() {
        let previous = applied(&webapp(8080));
        let desired = GraphBuilder::new()
            .declare(Resource::network("N"))
            .declare(Resource::image("I", "nginx:alpine"))
            .build()
            .unwrap();
        let plan = diff(&previous, &desired);
        assert_eq!(
            kinds(&plan),
            [
                ("N", OperationKind::NoOp),
                ("I", OperationKind::NoOp),
                ("C", OperationKind::Delete)
            ]
        );
    }

    #[test]
    fn test_deletions_run_dependents_first() {
        let plan = diff(&applied(&webapp(8080)), &Graph::empty());
        let order: Vec<_> = plan.operations().iter().map(|o| o.resource.as_str()).collect();
        let pos = |n: &str| order.iter().position(|o| *o == n).unwrap();
        assert!(pos("C") < pos("N"));
        assert!(pos("C") < pos("I"));
    }

    #[test]
    fn test_immutable_change_replaces_and_cascades() {
        let previous = applied(&webapp(8080));
        let mut graph = GraphBuilder::new();
        let mut net = Resource::network("N");
        if let ResourceSpec::Network(args) = &mut net.spec {
            args.driver = "overlay".into();
        }
        graph.push(net);
        graph.push(Resource::image("I", "nginx:alpine"));
        graph.push(Resource::container("C", "I").on_network("N").with_port(80, 8080));
        let plan = diff(&previous, &graph.build().unwrap());

        assert_eq!(plan.get("N").unwrap().kind, OperationKind::Replace);
        assert_eq!(plan.get("I").unwrap().kind, OperationKind::NoOp);
        let c = plan.get("C").unwrap();
        assert_eq!(c.kind, OperationKind::Replace);
        assert!(c.changes.is_empty());
        assert_eq!(c.reason.as_deref(), Some("dependency 'N' is replaced"));
    }

    #[test]
    fn test_kind_change_replaces() {
        let mut previous = StackState::empty("test");
        previous.resources.insert(
            "x".into(),
            ResourceState {
                resource: Resource::network("x"),
                id: "n1".into(),
                outputs: Default::default(),
            },
        );
        let desired = GraphBuilder::new()
            .declare(Resource::image("x", "redis:7"))
            .build()
            .unwrap();
        assert_eq!(diff(&previous, &desired).get("x").unwrap().kind, OperationKind::Replace);
    }

    #[test]
    fn test_property_changes_are_structural() {
        let a = Resource::container("C", "I").with_port(80, 8080).properties();
        let b = Resource::container("C", "I").with_port(80, 8080).properties();
        assert!(property_changes(&a, &b).is_empty());
    }
}
