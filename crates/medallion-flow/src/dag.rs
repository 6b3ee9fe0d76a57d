//! Directed acyclic graph over tables.
//!
//! Nodes are tables; an edge `a -> b` means the rule producing `b` reads
//! `a`. All orderings break ties by insertion order, so the same rule set
//! always yields the same plan.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Display;
use std::hash::Hash;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

use crate::error::{FlowError, Result};

/// A directed graph with deterministic topological ordering.
#[derive(Debug, Clone)]
pub struct Dag<T>
where
    T: Clone + Eq + Hash + Display,
{
    graph: DiGraph<T, ()>,
    index_map: HashMap<T, NodeIndex>,
    /// Tie-breaker for every ordering the graph returns.
    insertion_order: Vec<NodeIndex>,
}

impl<T> Dag<T>
where
    T: Clone + Eq + Hash + Display,
{
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index_map: HashMap::new(),
            insertion_order: Vec::new(),
        }
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns the number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Adds a node, or returns the existing one's index.
    pub fn add_node(&mut self, value: T) -> NodeIndex {
        if let Some(&idx) = self.index_map.get(&value) {
            return idx;
        }
        let idx = self.graph.add_node(value.clone());
        self.index_map.insert(value, idx);
        self.insertion_order.push(idx);
        idx
    }

    /// Adds a directed edge from `from` to `to`.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::DagNodeNotFound`] if either index is invalid.
    pub fn add_edge(&mut self, from: NodeIndex, to: NodeIndex) -> Result<()> {
        self.weight(from)?;
        self.weight(to)?;
        if self.graph.find_edge(from, to).is_none() {
            self.graph.add_edge(from, to, ());
        }
        Ok(())
    }

    /// Returns the nodes in topological order.
    ///
    /// Kahn's algorithm; among nodes that become ready together, earlier
    /// inserted nodes come first.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::CyclicDependency`] naming every node that could
    /// not be ordered: the cycle itself and everything downstream of it.
    pub fn toposort(&self) -> Result<Vec<T>> {
        let node_count = self.graph.node_count();
        let mut in_degree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|idx| (idx, 0))
            .collect();
        for edge in self.graph.edge_references() {
            *in_degree.entry(edge.target()).or_insert(0) += 1;
        }

        let mut queue: VecDeque<NodeIndex> = self
            .insertion_order
            .iter()
            .filter(|idx| in_degree.get(idx).copied().unwrap_or(0) == 0)
            .copied()
            .collect();

        let mut result = Vec::with_capacity(node_count);
        while let Some(idx) = queue.pop_front() {
            result.push(self.weight(idx)?.clone());
            for neighbor in self.sorted_neighbors(idx, Direction::Outgoing) {
                if let Some(deg) = in_degree.get_mut(&neighbor) {
                    *deg = deg.saturating_sub(1);
                    if *deg == 0 {
                        queue.push_back(neighbor);
                    }
                }
            }
        }

        if result.len() != node_count {
            let tables = self
                .insertion_order
                .iter()
                .filter(|idx| in_degree.get(idx).copied().unwrap_or(0) > 0)
                .filter_map(|&idx| self.graph.node_weight(idx))
                .map(ToString::to_string)
                .collect();
            return Err(FlowError::CyclicDependency { tables });
        }
        Ok(result)
    }

    /// Returns the direct upstream nodes of `node`, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::DagNodeNotFound`] if the index is invalid.
    pub fn upstream(&self, node: NodeIndex) -> Result<Vec<T>> {
        self.weight(node)?;
        Ok(self.values(self.sorted_neighbors(node, Direction::Incoming)))
    }

    /// Returns the direct downstream nodes of `node`, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::DagNodeNotFound`] if the index is invalid.
    pub fn downstream(&self, node: NodeIndex) -> Result<Vec<T>> {
        self.weight(node)?;
        Ok(self.values(self.sorted_neighbors(node, Direction::Outgoing)))
    }

    /// Returns every node reachable from `node`, excluding `node` itself,
    /// in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::DagNodeNotFound`] if the index is invalid.
    pub fn descendants(&self, node: NodeIndex) -> Result<Vec<T>> {
        self.weight(node)?;
        let mut seen = HashSet::new();
        let mut stack = vec![node];
        while let Some(idx) = stack.pop() {
            for next in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                if seen.insert(next) {
                    stack.push(next);
                }
            }
        }
        seen.remove(&node);
        let ordered = self
            .insertion_order
            .iter()
            .filter(|idx| seen.contains(idx))
            .copied();
        Ok(self.values(ordered))
    }

    /// Returns nodes with no incoming edges, in insertion order.
    #[must_use]
    pub fn roots(&self) -> Vec<T> {
        self.boundary(Direction::Incoming)
    }

    /// Returns nodes with no outgoing edges, in insertion order.
    #[must_use]
    pub fn leaves(&self) -> Vec<T> {
        self.boundary(Direction::Outgoing)
    }

    /// Returns true if the node exists.
    #[must_use]
    pub fn contains(&self, node: &T) -> bool {
        self.index_map.contains_key(node)
    }

    /// Returns the index of a node.
    #[must_use]
    pub fn get_index(&self, value: &T) -> Option<NodeIndex> {
        self.index_map.get(value).copied()
    }

    fn weight(&self, idx: NodeIndex) -> Result<&T> {
        self.graph
            .node_weight(idx)
            .ok_or_else(|| FlowError::DagNodeNotFound {
                node: format!("index {}", idx.index()),
            })
    }

    fn position(&self, idx: NodeIndex) -> usize {
        self.insertion_order
            .iter()
            .position(|&i| i == idx)
            .unwrap_or(usize::MAX)
    }

    fn sorted_neighbors(&self, idx: NodeIndex, direction: Direction) -> Vec<NodeIndex> {
        let mut neighbors: Vec<NodeIndex> = self.graph.neighbors_directed(idx, direction).collect();
        neighbors.sort_by_key(|n| self.position(*n));
        neighbors
    }

    fn boundary(&self, direction: Direction) -> Vec<T> {
        let ordered = self.insertion_order.iter().copied().filter(|&idx| {
            self.graph
                .neighbors_directed(idx, direction)
                .next()
                .is_none()
        });
        self.values(ordered)
    }

    fn values(&self, indices: impl IntoIterator<Item = NodeIndex>) -> Vec<T> {
        indices
            .into_iter()
            .filter_map(|idx| self.graph.node_weight(idx).cloned())
            .collect()
    }
}

impl<T> Default for Dag<T>
where
    T: Clone + Eq + Hash + Display,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dag(nodes: &[&str], edges: &[(&str, &str)]) -> Dag<String> {
        let mut dag = Dag::new();
        for n in nodes {
            dag.add_node((*n).to_string());
        }
        for (a, b) in edges {
            let a = dag.add_node((*a).to_string());
            let b = dag.add_node((*b).to_string());
            dag.add_edge(a, b).unwrap();
        }
        dag
    }

    #[test]
    fn empty_dag_sorts_to_nothing() {
        let dag: Dag<String> = Dag::new();
        assert!(dag.toposort().unwrap().is_empty());
        assert_eq!(dag.node_count(), 0);
    }

    #[test]
    fn add_node_is_idempotent() {
        let mut dag: Dag<String> = Dag::new();
        let a = dag.add_node("a".into());
        assert_eq!(dag.add_node("a".into()), a);
        assert_eq!(dag.node_count(), 1);
    }

    #[test]
    fn duplicate_edges_collapse() {
        let dag = dag(&[], &[("a", "b"), ("a", "b")]);
        assert_eq!(dag.edge_count(), 1);
    }

    #[test]
    fn linear_dag_sorts_in_dependency_order() {
        let dag = dag(&["c", "b", "a"], &[("a", "b"), ("b", "c")]);
        assert_eq!(dag.toposort().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn ties_break_by_insertion_order() {
        let forward = dag(&["a", "b", "c", "d"], &[("a", "c"), ("b", "c"), ("c", "d")]);
        let swapped = dag(&["b", "a", "c", "d"], &[("a", "c"), ("b", "c"), ("c", "d")]);
        assert_eq!(forward.toposort().unwrap(), vec!["a", "b", "c", "d"]);
        assert_eq!(swapped.toposort().unwrap(), vec!["b", "a", "c", "d"]);
    }

    #[test]
    fn cycle_reports_cycle_and_downstream_nodes() {
        let dag = dag(&["root"], &[("root", "a"), ("a", "b"), ("b", "a"), ("b", "tail")]);
        let err = dag.toposort().unwrap_err();
        match err {
            FlowError::CyclicDependency { tables } => {
                assert_eq!(tables, vec!["a", "b", "tail"]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let dag = dag(&[], &[("a", "a")]);
        assert!(matches!(
            dag.toposort(),
            Err(FlowError::CyclicDependency { .. })
        ));
    }

    #[test]
    fn upstream_and_downstream_follow_insertion_order() {
        let dag = dag(&["a", "b", "c"], &[("b", "c"), ("a", "c")]);
        let c = dag.get_index(&"c".to_string()).unwrap();
        assert_eq!(dag.upstream(c).unwrap(), vec!["a", "b"]);
        let a = dag.get_index(&"a".to_string()).unwrap();
        assert_eq!(dag.downstream(a).unwrap(), vec!["c"]);
    }

    #[test]
    fn descendants_are_transitive() {
        let dag = dag(
            &["a", "b", "c", "d", "e"],
            &[("a", "b"), ("b", "c"), ("a", "d"), ("e", "c")],
        );
        let a = dag.get_index(&"a".to_string()).unwrap();
        assert_eq!(dag.descendants(a).unwrap(), vec!["b", "c", "d"]);
        let e = dag.get_index(&"e".to_string()).unwrap();
        assert_eq!(dag.descendants(e).unwrap(), vec!["c"]);
    }

    #[test]
    fn roots_and_leaves() {
        let dag = dag(&["c", "a", "b"], &[("a", "c"), ("b", "c")]);
        assert_eq!(dag.roots(), vec!["a", "b"]);
        assert_eq!(dag.leaves(), vec!["c"]);
        assert!(dag.contains(&"a".to_string()));
    }
}
