// Copyright (c) Asymptotic
// SPDX-License-Identifier: Apache-2.0

//! Dominator and post-dominator trees with their frontiers.
//!
//! Immediate dominators are computed with the iterative algorithm of Cooper, Harvey and Kennedy
//! ("A Simple, Fast Dominance Algorithm", 2001): nodes are visited in reverse post-order and
//! each node's dominator is the intersection of the dominators of its already-processed
//! predecessors, until a full pass changes nothing. Post-dominators are the same computation on
//! the edge-inverted graph, rooted at the exit.

use std::collections::BTreeSet;

use log::debug;

use crate::graph::{postorder, FlowGraph, NodeId, Reversed};

#[derive(Debug, Clone)]
pub struct DominatorTree {
    entry: NodeId,
    exit: NodeId,
    idom: Vec<Option<NodeId>>,
    ipdom: Vec<Option<NodeId>>,
    frontier: Vec<BTreeSet<NodeId>>,
    post_frontier: Vec<BTreeSet<NodeId>>,
}

impl DominatorTree {
    pub fn compute<G: FlowGraph>(graph: &G, entry: NodeId, exit: NodeId) -> Self {
        let idom = immediate_dominators(graph, entry);
        let frontier = dominance_frontier(graph, &idom);

        let reversed = Reversed(graph);
        let ipdom = immediate_dominators(&reversed, exit);
        let post_frontier = dominance_frontier(&reversed, &ipdom);

        Self {
            entry,
            exit,
            idom,
            ipdom,
            frontier,
            post_frontier,
        }
    }

    pub fn entry(&self) -> NodeId {
        self.entry
    }

    pub fn exit(&self) -> NodeId {
        self.exit
    }

    /// Immediate dominator of `node`. The entry maps to itself; nodes unreachable from the entry
    /// have none.
    pub fn immediate_dominator(&self, node: NodeId) -> Option<NodeId> {
        self.idom[node.0]
    }

    /// Immediate post-dominator of `node`. The exit maps to itself; nodes which cannot reach the
    /// exit have none.
    pub fn immediate_post_dominator(&self, node: NodeId) -> Option<NodeId> {
        self.ipdom[node.0]
    }

    pub fn dominates(&self, dominator: NodeId, node: NodeId) -> bool {
        chain_contains(&self.idom, dominator, node)
    }

    pub fn strictly_dominates(&self, dominator: NodeId, node: NodeId) -> bool {
        dominator != node && self.dominates(dominator, node)
    }

    pub fn post_dominates(&self, dominator: NodeId, node: NodeId) -> bool {
        chain_contains(&self.ipdom, dominator, node)
    }

    pub fn frontier(&self, node: NodeId) -> &BTreeSet<NodeId> {
        &self.frontier[node.0]
    }

    pub fn post_frontier(&self, node: NodeId) -> &BTreeSet<NodeId> {
        &self.post_frontier[node.0]
    }

    /// Dominators of `node`, from the node itself up to the root.
    pub fn dominators_of(&self, node: NodeId) -> Vec<NodeId> {
        chain(&self.idom, node)
    }

    pub fn post_dominators_of(&self, node: NodeId) -> Vec<NodeId> {
        chain(&self.ipdom, node)
    }

    /// Tree edges (parent, child), excluding the root's self-mapping.
    pub fn tree_edges(&self, post: bool) -> Vec<(NodeId, NodeId)> {
        let parents = if post { &self.ipdom } else { &self.idom };
        parents
            .iter()
            .enumerate()
            .filter_map(|(index, parent)| {
                let parent = (*parent)?;
                (parent.0 != index).then_some((parent, NodeId(index)))
            })
            .collect()
    }
}

fn chain(parents: &[Option<NodeId>], node: NodeId) -> Vec<NodeId> {
    let mut result = vec![];
    let mut current = Some(node);
    while let Some(next) = current {
        if parents[next.0].is_none() {
            break;
        }
        result.push(next);
        current = parents[next.0].filter(|parent| *parent != next);
    }
    result
}

fn chain_contains(parents: &[Option<NodeId>], dominator: NodeId, node: NodeId) -> bool {
    chain(parents, node).contains(&dominator)
}

fn immediate_dominators<G: FlowGraph>(graph: &G, root: NodeId) -> Vec<Option<NodeId>> {
    let order = postorder(graph, root);
    let mut postorder_number = vec![0usize; graph.node_count()];
    for (number, node) in order.iter().enumerate() {
        postorder_number[node.0] = number;
    }

    let mut idom: Vec<Option<NodeId>> = vec![None; graph.node_count()];
    idom[root.0] = Some(root);
    let mut passes = 0;
    let mut changed = true;
    while changed {
        changed = false;
        passes += 1;
        for node in order.iter().rev().filter(|node| **node != root) {
            let mut new_idom = None;
            for pred in graph.predecessors(*node) {
                if idom[pred.0].is_none() {
                    continue;
                }
                new_idom = Some(match new_idom {
                    None => *pred,
                    Some(current) => intersect(&idom, &postorder_number, root, *pred, current),
                });
            }
            if new_idom.is_some() && idom[node.0] != new_idom {
                idom[node.0] = new_idom;
                changed = true;
            }
        }
    }
    debug!("dominators rooted at {} converged after {} passes", root, passes);
    idom
}

/// Nearest common ancestor of `a` and `b` in the partially built tree.
fn intersect(
    idom: &[Option<NodeId>],
    postorder_number: &[usize],
    root: NodeId,
    mut a: NodeId,
    mut b: NodeId,
) -> NodeId {
    while a != b {
        while postorder_number[a.0] < postorder_number[b.0] {
            a = idom[a.0].unwrap_or(root);
        }
        while postorder_number[b.0] < postorder_number[a.0] {
            b = idom[b.0].unwrap_or(root);
        }
    }
    a
}

fn dominance_frontier<G: FlowGraph>(graph: &G, idom: &[Option<NodeId>]) -> Vec<BTreeSet<NodeId>> {
    let mut frontier = vec![BTreeSet::new(); graph.node_count()];
    for node in graph.node_ids() {
        let Some(node_idom) = idom[node.0] else {
            continue;
        };
        let preds = graph
            .predecessors(node)
            .iter()
            .filter(|pred| idom[pred.0].is_some())
            .collect::<Vec<_>>();
        if preds.len() < 2 {
            continue;
        }
        for pred in preds {
            let mut runner = *pred;
            while runner != node_idom {
                frontier[runner.0].insert(node);
                match idom[runner.0] {
                    Some(parent) if parent != runner => runner = parent,
                    _ => break,
                }
            }
        }
    }
    frontier
}
