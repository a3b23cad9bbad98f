//! Resource graph
//!
//! Turns an ordered list of declarations into a validated, acyclic graph.
//! Edges point from a dependency to its dependent: `from` is applied before `to`,
//! and destroyed after it.

use crate::error::{Result, ValidationError};
use crate::model::{AttrValue, ReplaceStrategy, ResourceAddress, ResourceDecl, ResourceFlags};
use crate::schema::SchemaRegistry;
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Derived from an attribute reference
    Reference,
    /// Declared with `depends-on`
    Explicit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyEdge {
    pub from: ResourceAddress,
    pub to: ResourceAddress,
    pub kind: EdgeKind,
}

/// A validated resource in the graph
#[derive(Debug, Clone)]
pub struct ResourceNode {
    pub address: ResourceAddress,
    pub attributes: BTreeMap<String, AttrValue>,
    pub flags: ResourceFlags,
    /// Effective strategy (declaration flag, else the type's default)
    pub replace_strategy: ReplaceStrategy,
    /// Position in the declaration file
    pub index: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    nodes: Vec<ResourceNode>,
    lookup: HashMap<ResourceAddress, usize>,
    edges: Vec<DependencyEdge>,
    predecessors: Vec<Vec<usize>>,
    successors: Vec<Vec<usize>>,
}

impl ResourceGraph {
    /// Nodes in declaration order
    pub fn nodes(&self) -> &[ResourceNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, address: &ResourceAddress) -> Option<&ResourceNode> {
        self.lookup.get(address).map(|&i| &self.nodes[i])
    }

    pub fn contains(&self, address: &ResourceAddress) -> bool {
        self.lookup.contains_key(address)
    }

    /// Direct dependencies (resources that must be applied first)
    pub fn dependencies(&self, address: &ResourceAddress) -> Vec<&ResourceAddress> {
        self.neighbours(address, &self.predecessors)
    }

    /// Direct dependents (resources applied after this one)
    pub fn dependents(&self, address: &ResourceAddress) -> Vec<&ResourceAddress> {
        self.neighbours(address, &self.successors)
    }

    fn neighbours<'a>(
        &'a self,
        address: &ResourceAddress,
        adjacency: &'a [Vec<usize>],
    ) -> Vec<&'a ResourceAddress> {
        self.lookup
            .get(address)
            .map(|&i| adjacency[i].iter().map(|&j| &self.nodes[j].address).collect())
            .unwrap_or_default()
    }

    /// All resources reachable through dependent edges, in declaration order
    pub fn transitive_dependents(&self, address: &ResourceAddress) -> Vec<&ResourceAddress> {
        let Some(&start) = self.lookup.get(address) else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        let mut stack = vec![start];
        while let Some(i) = stack.pop() {
            for &j in &self.successors[i] {
                if seen.insert(j) {
                    stack.push(j);
                }
            }
        }
        let mut found: Vec<usize> = seen.into_iter().collect();
        found.sort_unstable();
        found.into_iter().map(|i| &self.nodes[i].address).collect()
    }

    /// Topological order; ties are broken by declaration order so the
    /// result is identical across runs.
    pub fn topological_order(&self) -> Vec<&ResourceNode> {
        let mut remaining: Vec<usize> = self.predecessors.iter().map(|p| p.len()).collect();
        let mut ready: BinaryHeap<Reverse<usize>> = remaining
            .iter()
            .enumerate()
            .filter(|(_, n)| **n == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(Reverse(i)) = ready.pop() {
            order.push(&self.nodes[i]);
            for &j in &self.successors[i] {
                remaining[j] -= 1;
                if remaining[j] == 0 {
                    ready.push(Reverse(j));
                }
            }
        }
        order
    }

    /// Graphviz rendering
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph resources {\n  rankdir=LR;\n");
        for node in &self.nodes {
            let _ = writeln!(out, "  \"{}\";", node.address);
        }
        for edge in &self.edges {
            let style = match edge.kind {
                EdgeKind::Reference => "solid",
                EdgeKind::Explicit => "dashed",
            };
            let _ = writeln!(
                out,
                "  \"{}\" -> \"{}\" [style={}];",
                edge.from, edge.to, style
            );
        }
        out.push_str("}\n");
        out
    }
}

/// Builds a `ResourceGraph` from declarations
pub struct GraphBuilder<'a> {
    registry: &'a SchemaRegistry,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(registry: &'a SchemaRegistry) -> Self {
        Self { registry }
    }

    pub fn build(&self, decls: Vec<ResourceDecl>) -> Result<ResourceGraph> {
        let mut graph = ResourceGraph::default();
        // depends-on is resolved once every node is known
        let mut explicit: Vec<(usize, Vec<ResourceAddress>)> = Vec::new();

        for decl in decls {
            if graph.lookup.contains_key(&decl.address) {
                return Err(ValidationError::DuplicateName(decl.address));
            }
            let ty = self.registry.describe(&decl.address.resource_type)?;
            ty.validate(&decl)?;

            let index = graph.nodes.len();
            graph.lookup.insert(decl.address.clone(), index);
            graph.nodes.push(ResourceNode {
                replace_strategy: decl.flags.replace_strategy.unwrap_or(ty.replace_strategy),
                address: decl.address,
                attributes: decl.attributes,
                flags: decl.flags,
                index,
            });
            graph.predecessors.push(Vec::new());
            graph.successors.push(Vec::new());
            if !decl.depends_on.is_empty() {
                explicit.push((index, decl.depends_on));
            }
        }

        self.link(&mut graph, explicit)?;
        detect_cycle(&graph)?;

        tracing::debug!(
            "built resource graph: {} nodes, {} edges",
            graph.nodes.len(),
            graph.edges.len()
        );
        Ok(graph)
    }

    fn link(
        &self,
        graph: &mut ResourceGraph,
        explicit: Vec<(usize, Vec<ResourceAddress>)>,
    ) -> Result<()> {
        let mut seen: HashSet<(usize, usize)> = HashSet::new();
        let mut new_edges = Vec::new();

        for (to, node) in graph.nodes.iter().enumerate() {
            for value in node.attributes.values() {
                for reference in value.references() {
                    let from = *graph.lookup.get(&reference.target).ok_or_else(|| {
                        ValidationError::UnresolvedReference {
                            from: node.address.clone(),
                            reference: reference.clone(),
                        }
                    })?;
                    self.registry.validate_reference(&node.address, reference)?;
                    if seen.insert((from, to)) {
                        new_edges.push((from, to, EdgeKind::Reference));
                    }
                }
            }
        }

        for (to, targets) in explicit {
            for target in targets {
                let from = *graph.lookup.get(&target).ok_or_else(|| {
                    ValidationError::UnresolvedDependency {
                        from: graph.nodes[to].address.clone(),
                        target: target.clone(),
                    }
                })?;
                if seen.insert((from, to)) {
                    new_edges.push((from, to, EdgeKind::Explicit));
                }
            }
        }

        for (from, to, kind) in new_edges {
            graph.successors[from].push(to);
            graph.predecessors[to].push(from);
            graph.edges.push(DependencyEdge {
                from: graph.nodes[from].address.clone(),
                to: graph.nodes[to].address.clone(),
                kind,
            });
        }
        for adjacency in graph.successors.iter_mut().chain(graph.predecessors.iter_mut()) {
            adjacency.sort_unstable();
        }
        Ok(())
    }
}

/// Convenience wrapper around `GraphBuilder`
pub fn build_graph(decls: Vec<ResourceDecl>, registry: &SchemaRegistry) -> Result<ResourceGraph> {
    GraphBuilder::new(registry).build(decls)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// Depth-first search with recursion-stack marking; returns the first cycle
/// found as `a -> b -> ... -> a`.
fn detect_cycle(graph: &ResourceGraph) -> Result<()> {
    let mut marks = vec![Mark::Unvisited; graph.nodes.len()];
    let mut stack: Vec<usize> = Vec::new();

    for start in 0..graph.nodes.len() {
        if marks[start] != Mark::Unvisited {
            continue;
        }
        // explicit stack of (node, next successor position)
        let mut frames: Vec<(usize, usize)> = vec![(start, 0)];
        marks[start] = Mark::OnStack;
        stack.push(start);

        while let Some(frame) = frames.last_mut() {
            let (node, pos) = *frame;
            if let Some(&next) = graph.successors[node].get(pos) {
                frame.1 += 1;
                match marks[next] {
                    Mark::Unvisited => {
                        marks[next] = Mark::OnStack;
                        stack.push(next);
                        frames.push((next, 0));
                    }
                    Mark::OnStack => {
                        let begin = stack.iter().position(|&n| n == next).unwrap_or(0);
                        let mut cycle: Vec<ResourceAddress> = stack[begin..]
                            .iter()
                            .map(|&n| graph.nodes[n].address.clone())
                            .collect();
                        cycle.push(graph.nodes[next].address.clone());
                        return Err(ValidationError::Cycle(cycle));
                    }
                    Mark::Done => {}
                }
            } else {
                marks[node] = Mark::Done;
                stack.pop();
                frames.pop();
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Reference;

    fn reference(expr: &str) -> AttrValue {
        AttrValue::Ref(expr.parse::<Reference>().unwrap())
    }

    fn network(name: &str) -> ResourceDecl {
        ResourceDecl::new("network", name)
    }

    fn subnet(name: &str, network_ref: &str) -> ResourceDecl {
        ResourceDecl::new("subnetwork", name)
            .with_attribute("network", reference(network_ref))
            .with_attribute("ip_cidr_range", "10.0.0.0/20")
    }

    #[test]
    fn test_reference_creates_edge() {
        let registry = SchemaRegistry::builtin();
        let graph = build_graph(
            vec![network("main"), subnet("nodes", "network.main.self_link")],
            &registry,
        )
        .unwrap();

        assert_eq!(graph.len(), 2);
        assert_eq!(graph.edges().len(), 1);
        let edge = &graph.edges()[0];
        assert_eq!(edge.from, ResourceAddress::new("network", "main"));
        assert_eq!(edge.to, ResourceAddress::new("subnetwork", "nodes"));
        assert_eq!(edge.kind, EdgeKind::Reference);
    }

    #[test]
    fn test_explicit_dependency_creates_edge() {
        let registry = SchemaRegistry::builtin();
        let decls = vec![
            network("main"),
            ResourceDecl::new("router", "r")
                .with_attribute("network", "main")
                .with_dependency(ResourceAddress::new("network", "main")),
        ];
        let graph = build_graph(decls, &registry).unwrap();
        assert_eq!(graph.edges()[0].kind, EdgeKind::Explicit);
        assert_eq!(
            graph.dependencies(&ResourceAddress::new("router", "r")),
            vec![&ResourceAddress::new("network", "main")]
        );
    }

    #[test]
    fn test_duplicate_name() {
        let registry = SchemaRegistry::builtin();
        let err = build_graph(vec![network("main"), network("main")], &registry).unwrap_err();
        assert!(matches!(err, ValidationError::DuplicateName(a) if a.name == "main"));
    }

    #[test]
    fn test_unresolved_reference() {
        let registry = SchemaRegistry::builtin();
        let err = build_graph(vec![subnet("nodes", "network.missing.self_link")], &registry)
            .unwrap_err();
        assert!(matches!(err, ValidationError::UnresolvedReference { .. }));
    }

    #[test]
    fn test_unresolved_explicit_dependency() {
        let registry = SchemaRegistry::builtin();
        let decl = network("main").with_dependency(ResourceAddress::new("network", "ghost"));
        let err = build_graph(vec![decl], &registry).unwrap_err();
        assert!(matches!(err, ValidationError::UnresolvedDependency { .. }));
    }

    #[test]
    fn test_reference_to_unknown_attribute() {
        let registry = SchemaRegistry::builtin();
        let err = build_graph(
            vec![network("main"), subnet("nodes", "network.main.colour")],
            &registry,
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::SchemaViolation { .. }));
    }

    #[test]
    fn test_cycle_is_rejected() {
        let registry = SchemaRegistry::builtin();
        let decls = vec![
            ResourceDecl::new("router", "a").with_attribute("network", reference("router.b.id")),
            ResourceDecl::new("router", "b").with_attribute("network", reference("router.a.id")),
        ];
        let err = build_graph(decls, &registry).unwrap_err();
        let ValidationError::Cycle(cycle) = err else {
            panic!("expected a cycle error");
        };
        assert_eq!(cycle.first(), cycle.last());
        assert_eq!(cycle.len(), 3);
    }

    #[test]
    fn test_cycle_through_explicit_dependency() {
        let registry = SchemaRegistry::builtin();
        let decls = vec![
            network("a").with_dependency(ResourceAddress::new("network", "c")),
            subnet("b", "network.a.self_link"),
            network("c").with_dependency(ResourceAddress::new("subnetwork", "b")),
        ];
        let err = build_graph(decls, &registry).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let registry = SchemaRegistry::builtin();
        let decls =
            vec![ResourceDecl::new("router", "a").with_attribute("network", reference("router.a.id"))];
        assert!(matches!(
            build_graph(decls, &registry),
            Err(ValidationError::Cycle(_))
        ));
    }

    #[test]
    fn test_topological_order_uses_declaration_tie_break() {
        let registry = SchemaRegistry::builtin();
        // subnet declared before its network; independent networks keep their order
        let decls = vec![
            subnet("s", "network.n2.self_link"),
            network("n1"),
            network("n2"),
            network("n3"),
        ];
        let graph = build_graph(decls, &registry).unwrap();
        let order: Vec<String> = graph
            .topological_order()
            .iter()
            .map(|n| n.address.to_string())
            .collect();
        assert_eq!(
            order,
            vec!["network.n1", "network.n2", "subnetwork.s", "network.n3"]
        );
    }

    #[test]
    fn test_transitive_dependents() {
        let registry = SchemaRegistry::builtin();
        let decls = vec![
            network("main"),
            subnet("nodes", "network.main.self_link"),
            ResourceDecl::new("cluster", "gke")
                .with_attribute("location", "asia-northeast1")
                .with_attribute("subnetwork", reference("subnetwork.nodes.self_link")),
            network("other"),
        ];
        let graph = build_graph(decls, &registry).unwrap();
        let deps = graph.transitive_dependents(&ResourceAddress::new("network", "main"));
        assert_eq!(
            deps,
            vec![
                &ResourceAddress::new("subnetwork", "nodes"),
                &ResourceAddress::new("cluster", "gke")
            ]
        );
        assert!(graph
            .transitive_dependents(&ResourceAddress::new("network", "other"))
            .is_empty());
    }

    #[test]
    fn test_effective_replace_strategy() {
        let registry = SchemaRegistry::builtin();
        let decls = vec![
            ResourceDecl::new("iam-member", "m")
                .with_attribute("project", "p")
                .with_attribute("role", "roles/viewer")
                .with_attribute("member", "user:a@example.com"),
            network("n").with_replace_strategy(ReplaceStrategy::CreateFirst),
            network("d"),
        ];
        let graph = build_graph(decls, &registry).unwrap();
        let strategy = |ty: &str, name: &str| {
            graph
                .get(&ResourceAddress::new(ty, name))
                .unwrap()
                .replace_strategy
        };
        assert_eq!(strategy("iam-member", "m"), ReplaceStrategy::CreateFirst);
        assert_eq!(strategy("network", "n"), ReplaceStrategy::CreateFirst);
        assert_eq!(strategy("network", "d"), ReplaceStrategy::DestroyFirst);
    }

    #[test]
    fn test_to_dot() {
        let registry = SchemaRegistry::builtin();
        let graph = build_graph(
            vec![network("main"), subnet("nodes", "network.main.self_link")],
            &registry,
        )
        .unwrap();
        let dot = graph.to_dot();
        assert!(dot.starts_with("digraph"));
        assert!(dot.contains("\"network.main\" -> \"subnetwork.nodes\""));
    }
}
