//! Dependency graph builder
//!
//! One adjacency structure with tagged edges. `Order` edges must form a DAG
//! and determine execution order; `Notify` edges only carry refresh signals.

use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::types::{ResourceId, ResourceRef};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap};
use std::fmt::Write as _;

/// Kind of relation between two resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    /// `from` must complete before `to` starts
    Order,
    /// `from` signals `to` when it changes
    Notify,
}

/// Resolved edge between two registered resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Edge {
    pub from: ResourceId,
    pub to: ResourceId,
    pub kind: EdgeKind,
}

/// Graph construction options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphOptions {
    /// A notify relation also orders its source before its target
    pub notify_implies_order: bool,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            notify_implies_order: true,
        }
    }
}

/// Validated, acyclic dependency graph with a fixed execution order
#[derive(Debug, Clone)]
pub struct Graph {
    edges: Vec<Edge>,
    successors: Vec<Vec<ResourceId>>,
    predecessors: Vec<Vec<ResourceId>>,
    notify: Vec<Vec<ResourceId>>,
    order: Vec<ResourceId>,
    position: Vec<usize>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InStack,
    Done,
}

impl Graph {
    /// Build with default options
    pub fn build(registry: &Registry) -> Result<Self> {
        Self::build_with(registry, GraphOptions::default())
    }

    /// Resolve declared relationships, reject cycles, fix the execution order
    pub fn build_with(registry: &Registry, options: GraphOptions) -> Result<Self> {
        let n = registry.len();
        let mut unique = BTreeSet::new();

        for declared in registry.edges() {
            let resolve = |reference: &ResourceRef| {
                registry
                    .lookup(reference)
                    .ok_or_else(|| Error::UnknownResource {
                        missing: reference.clone(),
                        relationship: declared.origin.clone(),
                    })
            };
            let from = resolve(&declared.from)?;
            let to = resolve(&declared.to)?;

            unique.insert(Edge {
                from,
                to,
                kind: declared.kind,
            });
            if declared.kind == EdgeKind::Notify && options.notify_implies_order {
                unique.insert(Edge {
                    from,
                    to,
                    kind: EdgeKind::Order,
                });
            }
        }

        let edges: Vec<Edge> = unique.into_iter().collect();
        let mut successors = vec![Vec::new(); n];
        let mut predecessors = vec![Vec::new(); n];
        let mut notify = vec![Vec::new(); n];
        for edge in &edges {
            match edge.kind {
                EdgeKind::Order => {
                    successors[edge.from.index()].push(edge.to);
                    predecessors[edge.to.index()].push(edge.from);
                }
                EdgeKind::Notify => notify[edge.from.index()].push(edge.to),
            }
        }

        if let Some(cycle) = find_cycle(&successors) {
            let path = cycle
                .into_iter()
                .filter_map(|id| registry.get(id).map(|r| r.reference.clone()))
                .collect();
            return Err(Error::CyclicDependency { path });
        }

        let order = stable_order(&successors, &predecessors);
        let mut position = vec![0; n];
        for (pos, id) in order.iter().enumerate() {
            position[id.index()] = pos;
        }

        log::debug!(
            "graph built: {} resources, {} edges",
            n,
            edges.len()
        );

        Ok(Self {
            edges,
            successors,
            predecessors,
            notify,
            order,
            position,
        })
    }

    /// Execution order: topological, ties broken by declaration order
    pub fn topological_order(&self) -> &[ResourceId] {
        &self.order
    }

    /// Position of a resource in the execution order
    pub fn position(&self, id: ResourceId) -> usize {
        self.position[id.index()]
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Resources that must complete before `id` starts
    pub fn order_predecessors(&self, id: ResourceId) -> &[ResourceId] {
        &self.predecessors[id.index()]
    }

    pub fn order_successors(&self, id: ResourceId) -> &[ResourceId] {
        &self.successors[id.index()]
    }

    /// Resources refreshed when `id` changes
    pub fn notify_targets(&self, id: ResourceId) -> &[ResourceId] {
        &self.notify[id.index()]
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Weakly connected components over both edge kinds
    ///
    /// Members of each component are in execution order; components are
    /// ordered by their first member.
    pub fn components(&self) -> Vec<Vec<ResourceId>> {
        let n = self.order.len();
        let mut parent: Vec<usize> = (0..n).collect();

        fn find(parent: &mut [usize], mut x: usize) -> usize {
            while parent[x] != x {
                parent[x] = parent[parent[x]];
                x = parent[x];
            }
            x
        }

        for edge in &self.edges {
            let a = find(&mut parent, edge.from.index());
            let b = find(&mut parent, edge.to.index());
            if a != b {
                parent[a.max(b)] = a.min(b);
            }
        }

        let mut by_root: Vec<Option<usize>> = vec![None; n];
        let mut components: Vec<Vec<ResourceId>> = Vec::new();
        for &id in &self.order {
            let root = find(&mut parent, id.index());
            match by_root[root] {
                Some(slot) => components[slot].push(id),
                None => {
                    by_root[root] = Some(components.len());
                    components.push(vec![id]);
                }
            }
        }
        components
    }

    /// Graphviz rendering, order edges solid and notify edges dashed
    pub fn to_dot(&self, registry: &Registry) -> String {
        let label = |id: ResourceId| {
            registry
                .get(id)
                .map(|r| r.reference.to_string().replace('"', "\\\""))
                .unwrap_or_default()
        };

        let mut out = String::from("digraph converge {\n    rankdir=LR;\n");
        for &id in &self.order {
            let _ = writeln!(out, "    n{} [label=\"{}\"];", id.index(), label(id));
        }
        for edge in &self.edges {
            let style = match edge.kind {
                EdgeKind::Order => "",
                EdgeKind::Notify => " [style=dashed]",
            };
            let _ = writeln!(
                out,
                "    n{} -> n{}{};",
                edge.from.index(),
                edge.to.index(),
                style
            );
        }
        out.push_str("}\n");
        out
    }
}

/// Depth-first search with recursion-stack marking
///
/// Returns the first cycle found as a closed path (first == last).
fn find_cycle(successors: &[Vec<ResourceId>]) -> Option<Vec<ResourceId>> {
    let mut marks = vec![Mark::Unvisited; successors.len()];
    let mut stack = Vec::new();

    fn visit(
        node: usize,
        successors: &[Vec<ResourceId>],
        marks: &mut [Mark],
        stack: &mut Vec<ResourceId>,
    ) -> Option<Vec<ResourceId>> {
        marks[node] = Mark::InStack;
        stack.push(ResourceId(node));

        for next in &successors[node] {
            match marks[next.index()] {
                Mark::InStack => {
                    let start = stack.iter().position(|id| id == next).unwrap_or(0);
                    let mut cycle = stack[start..].to_vec();
                    cycle.push(*next);
                    return Some(cycle);
                }
                Mark::Unvisited => {
                    if let Some(cycle) = visit(next.index(), successors, marks, stack) {
                        return Some(cycle);
                    }
                }
                Mark::Done => {}
            }
        }

        stack.pop();
        marks[node] = Mark::Done;
        None
    }

    for node in 0..successors.len() {
        if marks[node] == Mark::Unvisited
            && let Some(cycle) = visit(node, successors, &mut marks, &mut stack)
        {
            return Some(cycle);
        }
    }
    None
}

/// Kahn's algorithm with a min-heap on declaration index
fn stable_order(successors: &[Vec<ResourceId>], predecessors: &[Vec<ResourceId>]) -> Vec<ResourceId> {
    let mut in_degree: Vec<usize> = predecessors.iter().map(Vec::len).collect();
    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, degree)| **degree == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(successors.len());
    while let Some(Reverse(node)) = ready.pop() {
        order.push(ResourceId(node));
        for next in &successors[node] {
            let degree = &mut in_degree[next.index()];
            *degree -= 1;
            if *degree == 0 {
                ready.push(Reverse(next.index()));
            }
        }
    }
    order
}
