// Copyright (c) Asymptotic
// SPDX-License-Identifier: Apache-2.0

use log::debug;
use petgraph::stable_graph::NodeIndex;

use crate::{
    control_flow::types::{BasicBlock, BlockId, BranchKind, CfgNode, JumpTarget, NodeKind},
    graph::MutableGraph,
    instruction::CodeOffset,
};

/// Finds the block starting at `address`, if any.
pub fn block_starting_at(blocks: &[BasicBlock], address: CodeOffset) -> Option<BlockId> {
    blocks
        .binary_search_by_key(&address, |block| block.start_address)
        .ok()
        .map(BlockId)
}

/// Finds the loop enclosing `address` among the nodes from which `node` can be reached. Of all
/// loop setups whose range strictly contains the address, the innermost one wins.
pub fn enclosing_loop(
    graph: &MutableGraph<CfgNode, BranchKind>,
    blocks: &[BasicBlock],
    node: NodeIndex,
    address: CodeOffset,
) -> Option<BlockId> {
    let mut innermost: Option<BlockId> = None;
    for pred in graph.reverse_reachable(node) {
        let Some(CfgNode {
            kind: NodeKind::Loop,
            block: Some(block),
        }) = graph.node(pred).copied()
        else {
            continue;
        };
        let candidate = &blocks[block.0];
        let Some(end) = candidate.end_target else {
            continue;
        };
        let contains = candidate.start_address < address && address < end;
        let inner =
            innermost.map_or(true, |best| blocks[best.0].start_address < candidate.start_address);
        if contains && inner {
            innermost = Some(block);
        }
    }
    debug!(
        "[enclosing_loop] address={} loop={:?}",
        address, innermost
    );
    innermost
}

/// Returns the header of the loop opened by `setup`: the first block of the loop range which is
/// the target of a backward jump from inside the range. Falls back to the block following the
/// setup.
pub fn loop_header(blocks: &[BasicBlock], setup: BlockId) -> Option<BlockId> {
    let setup_block = &blocks[setup.0];
    let end = setup_block.end_target?;
    let inside = |address: CodeOffset| setup_block.end_address() <= address && address < end;
    let is_back_edge_target = |candidate: &BasicBlock| {
        blocks.iter().any(|source| {
            inside(source.start_address)
                && source.start_address >= candidate.start_address
                && source
                    .jumps
                    .iter()
                    .any(|jump| jump.target == JumpTarget::Address(candidate.start_address))
        })
    };
    blocks
        .iter()
        .enumerate()
        .find(|(_, candidate)| inside(candidate.start_address) && is_back_edge_target(candidate))
        .map(|(index, _)| BlockId(index))
        .or_else(|| block_starting_at(blocks, setup_block.end_address()))
}
