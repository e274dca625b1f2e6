// Copyright (c) Asymptotic
// SPDX-License-Identifier: Apache-2.0

use crate::{control_flow::ControlFlowGraph, graph::NodeId};

/// The per-node transfer function of an analysis.
pub trait Transfer {
    type State;

    /// Computes the state on the far side of `node` from the state on its near side: output
    /// from input in a forward analysis, input from output in a backward one.
    fn run(&self, cfg: &ControlFlowGraph, node: NodeId, state: &Self::State) -> Self::State;
}

/// Input and output state of every node of a control-flow graph.
#[derive(Debug, Clone, PartialEq)]
pub struct States<S> {
    input: Vec<S>,
    output: Vec<S>,
}

impl<S: Clone> States<S> {
    pub fn new(node_count: usize, init: S) -> Self {
        Self {
            input: vec![init.clone(); node_count],
            output: vec![init; node_count],
        }
    }

    pub fn input(&self, node: NodeId) -> &S {
        &self.input[node.0]
    }

    pub fn output(&self, node: NodeId) -> &S {
        &self.output[node.0]
    }

    pub fn set_input(&mut self, node: NodeId, state: S) {
        self.input[node.0] = state;
    }

    pub fn set_output(&mut self, node: NodeId, state: S) {
        self.output[node.0] = state;
    }

    pub fn len(&self) -> usize {
        self.input.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeId> {
        (0..self.input.len()).map(NodeId)
    }
}
