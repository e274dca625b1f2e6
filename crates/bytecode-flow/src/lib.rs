// Copyright (c) Asymptotic
// SPDX-License-Identifier: Apache-2.0

//! Control-flow and dataflow analysis of stack-machine bytecode.
//!
//! Starting from a decoded instruction stream per lexical scope, this crate recovers basic
//! blocks and a control-flow graph, computes dominators, post-dominators and control
//! dependence, and runs lattice-based fixed-point analyses over the graph, with
//! definition-use chains as the reference client.

pub mod assembler;
pub mod control_dependence;
pub mod control_flow;
pub mod dataflow;
pub mod def_use;
pub mod dominance;
mod dot;
pub mod error;
pub mod graph;
pub mod instruction;
pub mod options;
pub mod pipeline;
pub mod statements;

use crate::{
    control_dependence::ControlDependence,
    control_flow::ControlFlowGraph,
    dataflow::{Dataflow, Direction, Lattice, States, Transfer},
    def_use::DefUse,
    dominance::DominatorTree,
    error::AnalysisError,
    instruction::CodeScope,
    options::AnalysisOptions,
};

/// Builds the frozen control-flow graph of `scope`.
pub fn build_cfg(scope: &CodeScope, options: &AnalysisOptions) -> ControlFlowGraph {
    ControlFlowGraph::build(scope, options)
}

/// Dominator tree of `cfg`, computed on first use.
pub fn dominators(cfg: &ControlFlowGraph) -> &DominatorTree {
    cfg.dominators()
}

/// Control dependence of `cfg`, computed on first use.
pub fn control_dependence(cfg: &ControlFlowGraph) -> &ControlDependence {
    cfg.control_dependence()
}

/// Runs a client analysis to its fixed point.
pub fn analyze<L, T>(
    cfg: &ControlFlowGraph,
    lattice: &L,
    transfer: &T,
    forward: bool,
    options: &AnalysisOptions,
) -> Result<States<L::State>, AnalysisError>
where
    L: Lattice,
    T: Transfer<State = L::State>,
{
    let direction = if forward {
        Direction::Forward
    } else {
        Direction::Backward
    };
    Dataflow::new(cfg, lattice, transfer)
        .with_direction(direction)
        .with_max_steps(options.max_dataflow_steps)
        .analyze()
}

/// Definition-use chains of `cfg`.
pub fn def_use(cfg: &ControlFlowGraph, options: &AnalysisOptions) -> Result<DefUse, AnalysisError> {
    DefUse::compute(cfg, options.max_dataflow_steps)
}
