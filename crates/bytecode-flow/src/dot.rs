// Copyright (c) Asymptotic
// SPDX-License-Identifier: Apache-2.0

//! Graphviz rendering of control-flow graphs and dominator trees, for diagnostics.

use petgraph::{dot::Dot, graph::DiGraph};

use crate::{
    control_flow::ControlFlowGraph,
    dominance::DominatorTree,
    graph::{FlowGraph, NodeId},
};

impl ControlFlowGraph {
    /// Renders nodes labelled with their kind and address range, and edges with their branch
    /// kind.
    pub fn to_dot(&self) -> String {
        let mut graph = DiGraph::<String, String>::new();
        let nodes = self
            .graph()
            .nodes()
            .map(|(id, _)| graph.add_node(self.node_label(id)))
            .collect::<Vec<_>>();
        for edge in self.graph().edges() {
            graph.add_edge(
                nodes[edge.source.0],
                nodes[edge.target.0],
                edge.weight.to_string(),
            );
        }
        format!("{}", Dot::new(&graph))
    }
}

impl DominatorTree {
    /// Renders the dominator tree, or the post-dominator tree if `post` is set.
    pub fn to_dot(&self, cfg: &ControlFlowGraph, post: bool) -> String {
        let mut graph = DiGraph::<String, String>::new();
        let nodes = (0..cfg.node_count())
            .map(|index| graph.add_node(cfg.node_label(NodeId(index))))
            .collect::<Vec<_>>();
        for (parent, child) in self.tree_edges(post) {
            graph.add_edge(nodes[parent.0], nodes[child.0], String::new());
        }
        format!("{}", Dot::new(&graph))
    }
}
