// Copyright (c) Asymptotic
// SPDX-License-Identifier: Apache-2.0

//! Definition-use chains.
//!
//! A forward analysis tracks, per variable, the addresses of the statements generating its
//! reaching definitions (GEN), of the statements using it (USE), and of the definitions
//! overwritten within the analyzed path (KILL). Chains are then read by replaying every block
//! from its converged input state: each use is linked to the blocks holding the definitions which
//! reach it at that statement. A variable used without any reaching definition escapes the scope.

use std::collections::{BTreeMap, BTreeSet};

use im::{OrdMap, OrdSet};
use log::debug;

use crate::{
    control_flow::{BlockId, ControlFlowGraph},
    dataflow::{Dataflow, Lattice, States, Transfer},
    error::AnalysisError,
    graph::NodeId,
    instruction::CodeOffset,
    statements::Statement,
};

pub type AddressMap = OrdMap<String, OrdSet<CodeOffset>>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefUseState {
    pub gen: AddressMap,
    pub uses: AddressMap,
    pub kill: AddressMap,
}

impl DefUseState {
    fn generate(&mut self, var: &str, address: CodeOffset) {
        if var == "None" {
            return;
        }
        if let Some(previous) = self.gen.get(var).cloned() {
            let killed = self.kill.get(var).cloned().unwrap_or_default();
            self.kill.insert(var.to_string(), killed.union(previous));
        }
        self.gen.insert(var.to_string(), OrdSet::unit(address));
    }

    fn use_at(&mut self, var: &str, address: CodeOffset) {
        let mut addresses = self.uses.get(var).cloned().unwrap_or_default();
        addresses.insert(address);
        self.uses.insert(var.to_string(), addresses);
    }

    /// Applies one statement: its uses first, then its stores.
    fn step(&mut self, statement: &Statement) {
        for var in statement.uses() {
            self.use_at(var, statement.start);
        }
        for var in &statement.stores {
            self.generate(var, statement.start);
        }
    }
}

fn union_maps(left: &AddressMap, right: &AddressMap) -> AddressMap {
    left.clone().union_with(right.clone(), |a, b| a.union(b))
}

pub struct DefUseLattice;

impl Lattice for DefUseLattice {
    type State = DefUseState;

    fn init_state(&self) -> DefUseState {
        DefUseState::default()
    }

    fn join(&self, left: &DefUseState, right: &DefUseState) -> DefUseState {
        DefUseState {
            gen: union_maps(&left.gen, &right.gen),
            uses: union_maps(&left.uses, &right.uses),
            kill: union_maps(&left.kill, &right.kill),
        }
    }
}

pub struct DefUseTransfer;

impl Transfer for DefUseTransfer {
    type State = DefUseState;

    fn run(&self, cfg: &ControlFlowGraph, node: NodeId, state: &DefUseState) -> DefUseState {
        let mut result = state.clone();
        let Some(block) = cfg.block_of(node) else {
            return result;
        };
        for statement in cfg.statements(block) {
            result.step(statement);
        }
        result
    }
}

/// Definition-use chains of one scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefUse {
    /// Variable to generating block to the blocks using that definition.
    pub definitions: BTreeMap<String, BTreeMap<BlockId, BTreeSet<BlockId>>>,
    /// Variable to using block to the blocks whose definitions reach the use.
    pub use_sites: BTreeMap<String, BTreeMap<BlockId, BTreeSet<BlockId>>>,
    /// Variables used without a reaching definition in the scope.
    pub escaped: BTreeSet<String>,
}

impl DefUse {
    pub fn compute(cfg: &ControlFlowGraph, max_steps: usize) -> Result<Self, AnalysisError> {
        let states = Dataflow::forward(cfg, &DefUseLattice, &DefUseTransfer)
            .with_max_steps(max_steps)
            .analyze()?;
        Ok(Self::from_states(cfg, &states))
    }

    /// Reads the chains off converged states.
    pub fn from_states(cfg: &ControlFlowGraph, states: &States<DefUseState>) -> Self {
        let mut result = Self::default();
        for node in states.nodes() {
            let Some(block) = cfg.block_of(node) else {
                continue;
            };
            let mut current = states.input(node).clone();
            for statement in cfg.statements(block) {
                for var in statement.uses() {
                    match current.gen.get(var).filter(|gens| !gens.is_empty()) {
                        None => {
                            result.escaped.insert(var.to_string());
                        }
                        Some(gens) => {
                            for gen_block in gens.iter().filter_map(|address| cfg.block_at(*address)) {
                                result.link(var, gen_block, block);
                            }
                        }
                    }
                }
                current.step(statement);
            }
        }
        debug!(
            "{}: def-use chains for {} variables, {} escaped",
            cfg.name(),
            result.definitions.len(),
            result.escaped.len()
        );
        result
    }

    fn link(&mut self, var: &str, gen_block: BlockId, use_block: BlockId) {
        self.definitions
            .entry(var.to_string())
            .or_default()
            .entry(gen_block)
            .or_default()
            .insert(use_block);
        self.use_sites
            .entry(var.to_string())
            .or_default()
            .entry(use_block)
            .or_default()
            .insert(gen_block);
    }

    pub fn uses_of(&self, var: &str, gen_block: BlockId) -> Option<&BTreeSet<BlockId>> {
        self.definitions.get(var)?.get(&gen_block)
    }

    pub fn definitions_reaching(&self, var: &str, use_block: BlockId) -> Option<&BTreeSet<BlockId>> {
        self.use_sites.get(var)?.get(&use_block)
    }

    pub fn is_escaped(&self, var: &str) -> bool {
        self.escaped.contains(var)
    }
}
