//! Resource graph construction
//!
//! Turns an ordered sequence of declarations into a validated DAG.

use crate::error::{Error, Result};
use crate::types::Resource;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A validated set of resources for one stack
#[derive(Debug, Clone, Default)]
pub struct Graph {
    resources: BTreeMap<String, Resource>,
    /// Declaration order
    order: Vec<String>,
    topo: Vec<String>,
    dependents: BTreeMap<String, BTreeSet<String>>,
}

impl Graph {
    /// Graph with no resources (what `destroy` converges to)
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Resource> {
        self.resources.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resources.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Resources in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.order.iter().filter_map(|n| self.resources.get(n))
    }

    /// Names a resource depends on
    pub fn dependencies(&self, name: &str) -> BTreeSet<String> {
        self.resources
            .get(name)
            .map(Resource::dependencies)
            .unwrap_or_default()
    }

    /// Names that depend on a resource
    pub fn dependents(&self, name: &str) -> BTreeSet<String> {
        self.dependents.get(name).cloned().unwrap_or_default()
    }

    /// Dependencies first; ties keep declaration order
    pub fn topological_order(&self) -> &[String] {
        &self.topo
    }
}

/// Builds a [`Graph`] from declarations
#[derive(Debug, Default)]
pub struct GraphBuilder {
    declarations: Vec<Resource>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a declaration (builder style)
    pub fn declare(mut self, resource: Resource) -> Self {
        self.declarations.push(resource);
        self
    }

    /// Add a declaration
    pub fn push(&mut self, resource: Resource) {
        self.declarations.push(resource);
    }

    /// Validate declarations and build the graph
    pub fn build(self) -> Result<Graph> {
        let mut resources = BTreeMap::new();
        let mut order = Vec::with_capacity(self.declarations.len());

        for resource in self.declarations {
            resource.validate()?;
            if resources.contains_key(&resource.name) {
                return Err(Error::DuplicateName {
                    name: resource.name,
                });
            }
            order.push(resource.name.clone());
            resources.insert(resource.name.clone(), resource);
        }

        let mut dependents: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for name in &order {
            let resource = &resources[name];
            for dep in resource.dependencies() {
                if dep == *name {
                    return Err(Error::CycleDetected {
                        cycle: vec![name.clone(), name.clone()],
                    });
                }
                if !resources.contains_key(&dep) {
                    return Err(Error::UnresolvedReference {
                        resource: name.clone(),
                        reference: dep,
                    });
                }
                dependents.entry(dep).or_default().insert(name.clone());
            }
            for (reference, expected) in resource.spec.references() {
                let actual = resources[reference].kind();
                if actual != expected {
                    return Err(Error::InvalidReference {
                        resource: name.clone(),
                        reference: reference.to_string(),
                        expected,
                        actual,
                    });
                }
            }
        }

        let topo = topological_sort(&order, |n| resources[n].dependencies())?;
        log::debug!("Built graph with {} resources: {:?}", resources.len(), topo);

        Ok(Graph {
            resources,
            order,
            topo,
            dependents,
        })
    }
}

/// Kahn's algorithm over `nodes`, ties broken by position in `nodes`.
///
/// Edges to names outside `nodes` are ignored.
pub(crate) fn topological_sort<F>(nodes: &[String], deps_of: F) -> Result<Vec<String>>
where
    F: Fn(&str) -> BTreeSet<String>,
{
    let index: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.as_str(), i))
        .collect();

    let mut remaining = vec![0usize; nodes.len()];
    let mut waiting_on_me: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    let mut edges: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (i, name) in nodes.iter().enumerate() {
        for dep in deps_of(name) {
            if let Some(&j) = index.get(dep.as_str()) {
                remaining[i] += 1;
                waiting_on_me[j].push(i);
                edges[i].push(j);
            }
        }
    }

    let mut ready: BTreeSet<usize> = (0..nodes.len()).filter(|&i| remaining[i] == 0).collect();
    let mut sorted = Vec::with_capacity(nodes.len());

    while let Some(i) = ready.pop_first() {
        sorted.push(nodes[i].clone());
        for &k in &waiting_on_me[i] {
            remaining[k] -= 1;
            if remaining[k] == 0 {
                ready.insert(k);
            }
        }
    }

    if sorted.len() == nodes.len() {
        return Ok(sorted);
    }

    let stuck: Vec<usize> = (0..nodes.len()).filter(|&i| remaining[i] > 0).collect();
    Err(Error::CycleDetected {
        cycle: find_cycle(&stuck, &edges, nodes),
    })
}

/// Walk dependency edges from a stuck node until a node repeats
fn find_cycle(stuck: &[usize], edges: &[Vec<usize>], nodes: &[String]) -> Vec<String> {
    let stuck_set: BTreeSet<usize> = stuck.iter().copied().collect();
    let Some(&start) = stuck.first() else {
        return Vec::new();
    };

    let mut path = vec![start];
    let mut seen: HashMap<usize, usize> = HashMap::from([(start, 0)]);
    let mut current = start;

    // Every stuck node has at least one stuck dependency, so this terminates.
    loop {
        let Some(&next) = edges[current].iter().find(|j| stuck_set.contains(j)) else {
            break;
        };
        if let Some(&pos) = seen.get(&next) {
            let mut cycle: Vec<String> = path[pos..].iter().map(|&i| nodes[i].clone()).collect();
            cycle.push(nodes[next].clone());
            return cycle;
        }
        seen.insert(next, path.len());
        path.push(next);
        current = next;
    }

    path.iter().map(|&i| nodes[i].clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResourceKind;

    fn webapp() -> GraphBuilder {
        GraphBuilder::new()
            .declare(Resource::network("net"))
            .declare(Resource::image("img", "nginx:alpine"))
            .declare(Resource::container("web", "img").on_network("net"))
    }

    #[test]
    fn test_build_orders_dependencies_first() {
        let graph = webapp().build().unwrap();
        assert_eq!(graph.topological_order(), ["net", "img", "web"]);
        assert_eq!(graph.dependents("net").into_iter().collect::<Vec<_>>(), ["web"]);
        assert_eq!(graph.dependencies("web").len(), 2);
    }

    #[test]
    fn test_forward_references_resolve() {
        let graph = GraphBuilder::new()
            .declare(Resource::container("web", "img"))
            .declare(Resource::image("img", "nginx:alpine"))
            .build()
            .unwrap();
        assert_eq!(graph.topological_order(), ["img", "web"]);
        let declared: Vec<_> = graph.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(declared, ["web", "img"]);
    }

    #[test]
    fn test_duplicate_name() {
        let err = webapp().declare(Resource::network("net")).build().unwrap_err();
        assert!(matches!(err, Error::DuplicateName { name } if name == "net"));
    }

    #[test]
    fn test_unresolved_reference() {
        let err = GraphBuilder::new()
            .declare(Resource::container("web", "missing-image"))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            Error::UnresolvedReference { resource, reference }
                if resource == "web" && reference == "missing-image"
        ));
    }

    #[test]
    fn test_reference_of_wrong_kind() {
        let err = GraphBuilder::new()
            .declare(Resource::network("net"))
            .declare(Resource::container("web", "net"))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidReference { expected: ResourceKind::Image, actual: ResourceKind::Network, .. }
        ));
    }

    #[test]
    fn test_cycle_detected() {
        let err = GraphBuilder::new()
            .declare(Resource::network("a").depends_on("c"))
            .declare(Resource::network("b").depends_on("a"))
            .declare(Resource::network("c").depends_on("b"))
            .declare(Resource::network("d"))
            .build()
            .unwrap_err();
        match err {
            Error::CycleDetected { cycle } => {
                assert_eq!(cycle.first(), cycle.last());
                assert_eq!(cycle.len(), 4);
                assert!(!cycle.contains(&"d".to_string()));
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let err = GraphBuilder::new()
            .declare(Resource::network("a").depends_on("a"))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::CycleDetected { .. }));
    }

    #[test]
    fn test_invalid_properties_fail_construction() {
        let err = GraphBuilder::new()
            .declare(Resource::image("img", ""))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidProperty { .. }));
    }
}
