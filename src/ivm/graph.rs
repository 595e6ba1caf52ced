//! Operator graph arena: topological commit order and cycle detection.
//!
//! Compiled queries hold only integer [`NodeId`]s into this arena; the
//! engine steps delta operators in topological order at version commit so
//! a node never runs before its upstream deltas are complete.
//!
//! Topological sort is Kahn's algorithm:
//! - Kahn, A.B. (1962). "Topological sorting of large networks."
//!   Communications of the ACM, 5(11), 558–562.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::RivuletError;

/// Identifies a node in the operator graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// In-memory dependency graph of operator nodes.
#[derive(Default)]
pub struct OpGraph {
    /// Forward edges: node → downstream nodes.
    edges: HashMap<NodeId, Vec<NodeId>>,
    /// Reverse edges: node → upstream nodes.
    reverse_edges: HashMap<NodeId, Vec<NodeId>>,
    /// Display names for error messages.
    names: HashMap<NodeId, String>,
    all_nodes: HashSet<NodeId>,
    next_id: usize,
}

impl OpGraph {
    pub fn new() -> OpGraph {
        OpGraph::default()
    }

    pub fn add_node(&mut self, name: impl Into<String>) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.all_nodes.insert(id);
        self.names.insert(id, name.into());
        id
    }

    /// Add a dataflow edge `from → to`.
    pub fn add_edge(&mut self, from: NodeId, to: NodeId) {
        self.edges.entry(from).or_default().push(to);
        self.reverse_edges.entry(to).or_default().push(from);
    }

    pub fn node_count(&self) -> usize {
        self.all_nodes.len()
    }

    pub fn name(&self, id: NodeId) -> &str {
        self.names.get(&id).map(String::as_str).unwrap_or("?")
    }

    pub fn upstream(&self, id: NodeId) -> &[NodeId] {
        self.reverse_edges
            .get(&id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn downstream(&self, id: NodeId) -> &[NodeId] {
        self.edges.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Kahn's algorithm. Nodes with no incoming edges first; a leftover
    /// node means a cycle, reported with its member names.
    pub fn topological_order(&self) -> Result<Vec<NodeId>, RivuletError> {
        let mut in_degree: HashMap<NodeId, usize> = self
            .all_nodes
            .iter()
            .map(|&n| (n, self.upstream(n).len()))
            .collect();

        let mut queue: VecDeque<NodeId> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(&n, _)| n)
            .collect();
        let mut queue_vec: Vec<NodeId> = queue.drain(..).collect();
        queue_vec.sort();
        let mut queue: VecDeque<NodeId> = queue_vec.into();

        let mut order = Vec::with_capacity(self.all_nodes.len());
        while let Some(node) = queue.pop_front() {
            order.push(node);
            for &next in self.downstream(node) {
                let degree = in_degree.get_mut(&next).ok_or_else(|| {
                    RivuletError::Internal(format!("edge to unregistered node {next:?}"))
                })?;
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(next);
                }
            }
        }

        if order.len() != self.all_nodes.len() {
            let mut cycle: Vec<String> = self
                .all_nodes
                .iter()
                .filter(|n| !order.contains(n))
                .map(|n| self.name(*n).to_string())
                .collect();
            cycle.sort();
            return Err(RivuletError::CycleDetected(cycle));
        }
        Ok(order)
    }
}
