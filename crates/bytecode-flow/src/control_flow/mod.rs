// Copyright (c) Asymptotic
// SPDX-License-Identifier: Apache-2.0

//! Control-flow graph recovery
//!
//! Partitions a scope's instruction stream into basic blocks, wires them between a synthetic
//! entry and a synthetic implicit-return exit, and resolves break, continue, return and raise
//! into real edges before the graph is frozen.

mod block_builder;
mod cfg;
mod construction;
mod helpers;
mod types;

pub use block_builder::BlockBuilder;
pub use cfg::ControlFlowGraph;
pub use helpers::{block_starting_at, loop_header};
pub use types::{
    BasicBlock, BlockId, BlockKind, BranchKind, CfgNode, Jump, JumpTarget, NodeKind,
};
