// Copyright (c) Asymptotic
// SPDX-License-Identifier: Apache-2.0

//! Directed graphs used by the control-flow analyses.
//!
//! Construction happens on a [`MutableGraph`], an arena graph which tolerates node and edge
//! removal. Once construction is over it is converted into a [`Graph`], a dense, read-only
//! representation with precomputed adjacency, which is what all analyses consume. Both refuse
//! parallel edges: there is at most one edge per ordered pair of nodes.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use log::debug;
use petgraph::{
    stable_graph::{EdgeIndex, NodeIndex, StableGraph},
    visit::EdgeRef,
    Direction,
};

/// Index of a node in a frozen [`Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Index of an edge in a frozen [`Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeId(pub usize);

/// Adjacency queries needed by traversals and dominance.
pub trait FlowGraph {
    fn node_count(&self) -> usize;
    fn successors(&self, node: NodeId) -> &[NodeId];
    fn predecessors(&self, node: NodeId) -> &[NodeId];

    fn node_ids(&self) -> Box<dyn Iterator<Item = NodeId> + '_> {
        Box::new((0..self.node_count()).map(NodeId))
    }
}

/// Graph under construction.
#[derive(Debug, Clone)]
pub struct MutableGraph<N, E> {
    inner: StableGraph<N, E>,
}

impl<N, E> Default for MutableGraph<N, E> {
    fn default() -> Self {
        Self {
            inner: StableGraph::new(),
        }
    }
}

impl<N, E> MutableGraph<N, E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, weight: N) -> NodeIndex {
        self.inner.add_node(weight)
    }

    /// Adds an edge unless one between the same ordered pair already exists.
    pub fn add_edge(&mut self, source: NodeIndex, target: NodeIndex, weight: E) -> Option<EdgeIndex> {
        if self.inner.find_edge(source, target).is_some() {
            debug!(
                "refusing duplicate edge {} -> {}",
                source.index(),
                target.index()
            );
            return None;
        }
        Some(self.inner.add_edge(source, target, weight))
    }

    pub fn contains_node(&self, node: NodeIndex) -> bool {
        self.inner.contains_node(node)
    }

    pub fn node(&self, node: NodeIndex) -> Option<&N> {
        self.inner.node_weight(node)
    }

    pub fn node_mut(&mut self, node: NodeIndex) -> Option<&mut N> {
        self.inner.node_weight_mut(node)
    }

    pub fn node_indices(&self) -> Vec<NodeIndex> {
        self.inner.node_indices().collect()
    }

    pub fn out_edges(&self, node: NodeIndex) -> Vec<(NodeIndex, &E)> {
        let mut edges = self
            .inner
            .edges_directed(node, Direction::Outgoing)
            .map(|edge| (edge.target(), edge.weight()))
            .collect::<Vec<_>>();
        edges.sort_by_key(|(target, _)| *target);
        edges
    }

    pub fn predecessors(&self, node: NodeIndex) -> BTreeSet<NodeIndex> {
        self.inner
            .neighbors_directed(node, Direction::Incoming)
            .collect()
    }

    pub fn in_degree(&self, node: NodeIndex) -> usize {
        self.inner
            .edges_directed(node, Direction::Incoming)
            .count()
    }

    /// Removes all outgoing edges of `node`.
    pub fn clear_out_edges(&mut self, node: NodeIndex) {
        let edges = self
            .inner
            .edges_directed(node, Direction::Outgoing)
            .map(|edge| edge.id())
            .collect::<Vec<_>>();
        for edge in edges {
            self.inner.remove_edge(edge);
        }
    }

    pub fn remove_node(&mut self, node: NodeIndex) -> Option<N> {
        self.inner.remove_node(node)
    }

    /// Nodes from which `start` can be reached, in breadth-first order from `start`, excluding
    /// `start` itself unless it lies on a cycle.
    pub fn reverse_reachable(&self, start: NodeIndex) -> Vec<NodeIndex> {
        let mut result = vec![];
        let mut seen = BTreeSet::new();
        let mut work = VecDeque::from(vec![start]);
        while let Some(node) = work.pop_front() {
            for pred in self.predecessors(node) {
                if seen.insert(pred) {
                    result.push(pred);
                    work.push_back(pred);
                }
            }
        }
        result
    }
}

impl<N: Clone, E: Clone> MutableGraph<N, E> {
    /// Builds a dense read-only copy, returning it together with the index translation.
    pub fn snapshot(&self) -> (Graph<N, E>, BTreeMap<NodeIndex, NodeId>) {
        let mut remap = BTreeMap::new();
        let mut nodes = vec![];
        for index in self.inner.node_indices() {
            remap.insert(index, NodeId(nodes.len()));
            nodes.push(self.inner[index].clone());
        }
        let mut edges = vec![];
        for index in self.inner.node_indices() {
            for (target, weight) in self.out_edges(index) {
                edges.push(Edge {
                    source: remap[&index],
                    target: remap[&target],
                    weight: weight.clone(),
                });
            }
        }
        (Graph::new(nodes, edges), remap)
    }

    /// Ends construction.
    pub fn freeze(self) -> (Graph<N, E>, BTreeMap<NodeIndex, NodeId>) {
        self.snapshot()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge<E> {
    pub source: NodeId,
    pub target: NodeId,
    pub weight: E,
}

/// Frozen graph with dense node and edge indices.
#[derive(Debug, Clone)]
pub struct Graph<N, E> {
    nodes: Vec<N>,
    edges: Vec<Edge<E>>,
    out_edges: Vec<Vec<EdgeId>>,
    in_edges: Vec<Vec<EdgeId>>,
    successors: Vec<Vec<NodeId>>,
    predecessors: Vec<Vec<NodeId>>,
}

impl<N, E> Graph<N, E> {
    fn new(nodes: Vec<N>, edges: Vec<Edge<E>>) -> Self {
        let mut out_edges = vec![vec![]; nodes.len()];
        let mut in_edges = vec![vec![]; nodes.len()];
        let mut successors = vec![vec![]; nodes.len()];
        let mut predecessors = vec![vec![]; nodes.len()];
        for (index, edge) in edges.iter().enumerate() {
            out_edges[edge.source.0].push(EdgeId(index));
            in_edges[edge.target.0].push(EdgeId(index));
            successors[edge.source.0].push(edge.target);
            predecessors[edge.target.0].push(edge.source);
        }
        Self {
            nodes,
            edges,
            out_edges,
            in_edges,
            successors,
            predecessors,
        }
    }

    pub fn node(&self, node: NodeId) -> &N {
        &self.nodes[node.0]
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &N)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(index, weight)| (NodeId(index), weight))
    }

    pub fn edge(&self, edge: EdgeId) -> &Edge<E> {
        &self.edges[edge.0]
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge<E>> {
        self.edges.iter()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn out_edges(&self, node: NodeId) -> impl Iterator<Item = &Edge<E>> {
        self.out_edges[node.0].iter().map(move |id| self.edge(*id))
    }

    pub fn in_edges(&self, node: NodeId) -> impl Iterator<Item = &Edge<E>> {
        self.in_edges[node.0].iter().map(move |id| self.edge(*id))
    }

    pub fn in_degree(&self, node: NodeId) -> usize {
        self.in_edges[node.0].len()
    }

    pub fn out_degree(&self, node: NodeId) -> usize {
        self.out_edges[node.0].len()
    }

    pub fn find_edge(&self, source: NodeId, target: NodeId) -> Option<&Edge<E>> {
        self.out_edges(source).find(|edge| edge.target == target)
    }

    /// Edge-inverted view of this graph.
    pub fn reversed(&self) -> Reversed<'_, Self> {
        Reversed(self)
    }
}

impl<N, E> FlowGraph for Graph<N, E> {
    fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn successors(&self, node: NodeId) -> &[NodeId] {
        &self.successors[node.0]
    }

    fn predecessors(&self, node: NodeId) -> &[NodeId] {
        &self.predecessors[node.0]
    }
}

/// A graph seen with all edges inverted.
#[derive(Debug, Clone, Copy)]
pub struct Reversed<'a, G>(pub &'a G);

impl<G: FlowGraph> FlowGraph for Reversed<'_, G> {
    fn node_count(&self) -> usize {
        self.0.node_count()
    }

    fn successors(&self, node: NodeId) -> &[NodeId] {
        self.0.predecessors(node)
    }

    fn predecessors(&self, node: NodeId) -> &[NodeId] {
        self.0.successors(node)
    }
}

/// Depth-first post-order of the nodes reachable from `root`.
pub fn postorder<G: FlowGraph + ?Sized>(graph: &G, root: NodeId) -> Vec<NodeId> {
    let mut order = vec![];
    let mut visited = vec![false; graph.node_count()];
    let mut stack = vec![(root, 0usize)];
    visited[root.0] = true;
    while let Some((node, next_child)) = stack.last_mut() {
        let node = *node;
        let successors = graph.successors(node);
        if let Some(child) = successors.get(*next_child) {
            *next_child += 1;
            if !visited[child.0] {
                visited[child.0] = true;
                stack.push((*child, 0));
            }
        } else {
            order.push(node);
            stack.pop();
        }
    }
    order
}
