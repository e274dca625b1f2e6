// Copyright (c) Asymptotic
// SPDX-License-Identifier: Apache-2.0

use std::collections::{BTreeMap, BTreeSet};

use crate::{dominance::DominatorTree, graph::NodeId};

/// Control dependences derived from the post-dominance frontier: a node depends on every node
/// of its post-dominance frontier.
#[derive(Debug, Clone, Default)]
pub struct ControlDependence {
    /// Node to the nodes deciding whether it executes.
    conditions: BTreeMap<NodeId, BTreeSet<NodeId>>,
    /// Deciding node to the nodes depending on it.
    dependents: BTreeMap<NodeId, BTreeSet<NodeId>>,
}

impl ControlDependence {
    pub fn compute(dominators: &DominatorTree, node_count: usize) -> Self {
        let mut result = Self::default();
        for node in (0..node_count).map(NodeId) {
            for condition in dominators.post_frontier(node) {
                result.conditions.entry(node).or_default().insert(*condition);
                result.dependents.entry(*condition).or_default().insert(node);
            }
        }
        result
    }

    pub fn conditions_of(&self, node: NodeId) -> Option<&BTreeSet<NodeId>> {
        self.conditions.get(&node)
    }

    pub fn dependents_of(&self, node: NodeId) -> Option<&BTreeSet<NodeId>> {
        self.dependents.get(&node)
    }

    pub fn depends_on(&self, node: NodeId, condition: NodeId) -> bool {
        self.conditions
            .get(&node)
            .map_or(false, |conditions| conditions.contains(&condition))
    }

    /// Dependence edges as (condition, dependent) pairs.
    pub fn edges(&self) -> impl Iterator<Item = (NodeId, NodeId)> + '_ {
        self.dependents.iter().flat_map(|(condition, dependents)| {
            dependents.iter().map(move |dependent| (*condition, *dependent))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}
