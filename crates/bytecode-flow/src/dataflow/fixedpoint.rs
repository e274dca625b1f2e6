// Copyright (c) Asymptotic
// SPDX-License-Identifier: Apache-2.0

//! Worklist-driven fixed-point engine over a control-flow graph.

use std::collections::VecDeque;

use log::{debug, error};

use crate::{
    control_flow::ControlFlowGraph,
    dataflow::{lattice::Lattice, state::States, state::Transfer},
    error::AnalysisError,
    graph::{FlowGraph, NodeId},
    options::DEFAULT_MAX_DATAFLOW_STEPS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// A dataflow analysis of one control-flow graph.
///
/// In a forward analysis the input of a node is the join of its predecessors' outputs and the
/// entry starts from the initial state; a backward analysis mirrors this with successors and
/// the exit. Nodes are processed from a FIFO worklist until no output changes, or until the step
/// ceiling is hit.
pub struct Dataflow<'a, L, T> {
    cfg: &'a ControlFlowGraph,
    lattice: &'a L,
    transfer: &'a T,
    direction: Option<Direction>,
    max_steps: usize,
}

impl<'a, L, T> Dataflow<'a, L, T>
where
    L: Lattice,
    T: Transfer<State = L::State>,
{
    /// Creates an analysis without a direction; see [`Self::with_direction`].
    pub fn new(cfg: &'a ControlFlowGraph, lattice: &'a L, transfer: &'a T) -> Self {
        Self {
            cfg,
            lattice,
            transfer,
            direction: None,
            max_steps: DEFAULT_MAX_DATAFLOW_STEPS,
        }
    }

    pub fn forward(cfg: &'a ControlFlowGraph, lattice: &'a L, transfer: &'a T) -> Self {
        Self::new(cfg, lattice, transfer).with_direction(Direction::Forward)
    }

    pub fn backward(cfg: &'a ControlFlowGraph, lattice: &'a L, transfer: &'a T) -> Self {
        Self::new(cfg, lattice, transfer).with_direction(Direction::Backward)
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn direction(&self) -> Option<Direction> {
        self.direction
    }

    /// Runs the analysis to its fixed point.
    pub fn analyze(&self) -> Result<States<L::State>, AnalysisError> {
        let direction = self.require_direction()?;
        let node_count = self.cfg.node_count();
        let boundary = self.boundary(direction);

        let mut states = States::new(node_count, self.lattice.init_state());
        let mut queued = vec![true; node_count];
        queued[boundary.0] = false;
        let mut worklist = (0..node_count)
            .map(NodeId)
            .filter(|node| *node != boundary)
            .collect::<VecDeque<_>>();

        let mut steps = 0;
        while let Some(node) = worklist.pop_front() {
            queued[node.0] = false;
            steps += 1;
            if steps > self.max_steps {
                error!(
                    "{}: dataflow analysis exceeded {} steps",
                    self.cfg.name(),
                    self.max_steps
                );
                return Err(AnalysisError::NonTermination {
                    max_steps: self.max_steps,
                });
            }

            self.join(direction, node, &mut states);
            if !self.flow(direction, node, &mut states) {
                continue;
            }
            let neighbors = match direction {
                Direction::Forward => self.cfg.successors(node),
                Direction::Backward => self.cfg.predecessors(node),
            };
            for next in neighbors {
                if *next != boundary && !queued[next.0] {
                    queued[next.0] = true;
                    worklist.push_back(*next);
                }
            }
        }

        self.join(direction, boundary, &mut states);
        debug!(
            "{}: {:?} dataflow converged after {} steps",
            self.cfg.name(),
            direction,
            steps
        );
        Ok(states)
    }

    /// Whether `states` is a fixed point: recomputing any node's join and transfer changes
    /// nothing.
    pub fn is_fixed_point(&self, states: &States<L::State>) -> Result<bool, AnalysisError> {
        let direction = self.require_direction()?;
        let boundary = self.boundary(direction);
        Ok(states
            .nodes()
            .filter(|node| *node != boundary)
            .all(|node| {
                let joined = self.joined(direction, node, states);
                let (near, far) = match direction {
                    Direction::Forward => (states.input(node), states.output(node)),
                    Direction::Backward => (states.output(node), states.input(node)),
                };
                joined == *near && self.transfer.run(self.cfg, node, &joined) == *far
            }))
    }

    fn require_direction(&self) -> Result<Direction, AnalysisError> {
        self.direction.ok_or_else(|| {
            error!("{}: dataflow analysis has no direction", self.cfg.name());
            AnalysisError::MissingDirection
        })
    }

    /// The node left out of the worklist and only materialized at the end.
    fn boundary(&self, direction: Direction) -> NodeId {
        match direction {
            Direction::Forward => self.cfg.exit(),
            Direction::Backward => self.cfg.entry(),
        }
    }

    fn joined(&self, direction: Direction, node: NodeId, states: &States<L::State>) -> L::State {
        let init = self.lattice.init_state();
        match direction {
            Direction::Forward if node == self.cfg.entry() => init,
            Direction::Forward => self.lattice.join_all(
                self.cfg
                    .predecessors(node)
                    .iter()
                    .map(|pred| states.output(*pred)),
            ),
            Direction::Backward if node == self.cfg.exit() => init,
            Direction::Backward => self.lattice.join_all(
                self.cfg.successors(node).iter().map(|succ| {
                    if *succ == self.cfg.exit() {
                        &init
                    } else {
                        states.input(*succ)
                    }
                }),
            ),
        }
    }

    fn join(&self, direction: Direction, node: NodeId, states: &mut States<L::State>) {
        let joined = self.joined(direction, node, states);
        match direction {
            Direction::Forward => states.set_input(node, joined),
            Direction::Backward => states.set_output(node, joined),
        }
    }

    /// Applies the transfer function to `node` and reports whether its far-side state changed.
    fn flow(&self, direction: Direction, node: NodeId, states: &mut States<L::State>) -> bool {
        let (near, far) = match direction {
            Direction::Forward => (states.input(node), states.output(node)),
            Direction::Backward => (states.output(node), states.input(node)),
        };
        let new_state = self.transfer.run(self.cfg, node, near);
        if new_state == *far {
            return false;
        }
        match direction {
            Direction::Forward => states.set_output(node, new_state),
            Direction::Backward => states.set_input(node, new_state),
        }
        true
    }
}
