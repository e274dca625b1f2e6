// Copyright (c) Asymptotic
// SPDX-License-Identifier: Apache-2.0

//! Wiring of basic blocks into a graph and the one-time finalization rewrite.

use std::collections::BTreeSet;

use log::{debug, warn};
use petgraph::stable_graph::NodeIndex;

use crate::{
    control_flow::{
        helpers::{block_starting_at, enclosing_loop, loop_header},
        types::{BasicBlock, BlockId, BranchKind, CfgNode, Jump, JumpTarget, NodeKind},
    },
    dominance::DominatorTree,
    error::StructuralIssue,
    graph::MutableGraph,
    instruction::CodeOffset,
    options::AnalysisOptions,
};

/// A control-flow graph while it is still mutable.
pub(crate) struct Construction<'a> {
    name: &'a str,
    options: &'a AnalysisOptions,
    pub blocks: Vec<BasicBlock>,
    pub graph: MutableGraph<CfgNode, BranchKind>,
    pub entry: NodeIndex,
    pub exit: NodeIndex,
    /// Node of each block, indexed by block id.
    pub block_nodes: Vec<NodeIndex>,
    end_address: CodeOffset,
    pub issues: Vec<StructuralIssue>,
}

impl<'a> Construction<'a> {
    pub fn new(
        name: &'a str,
        blocks: Vec<BasicBlock>,
        end_address: CodeOffset,
        options: &'a AnalysisOptions,
    ) -> Self {
        let mut graph = MutableGraph::new();
        let entry = graph.add_node(CfgNode {
            kind: NodeKind::Entry,
            block: None,
        });
        let exit = graph.add_node(CfgNode {
            kind: NodeKind::ImplicitReturn,
            block: None,
        });
        let block_nodes = blocks
            .iter()
            .enumerate()
            .map(|(index, block)| {
                graph.add_node(CfgNode {
                    kind: NodeKind::from_block(block.kind),
                    block: Some(BlockId(index)),
                })
            })
            .collect();
        Self {
            name,
            options,
            blocks,
            graph,
            entry,
            exit,
            block_nodes,
            end_address,
            issues: vec![],
        }
    }

    /// Connects entry and exit, and materializes an edge for every address jump.
    pub fn wire(&mut self) {
        let (Some(first), Some(last)) = (
            self.block_nodes.first().copied(),
            self.block_nodes.last().copied(),
        ) else {
            self.graph
                .add_edge(self.entry, self.exit, BranchKind::Unconditional);
            return;
        };
        self.graph
            .add_edge(self.entry, first, BranchKind::Unconditional);
        self.graph
            .add_edge(last, self.exit, BranchKind::Unconditional);

        let mut edges = vec![];
        for (index, block) in self.blocks.iter().enumerate() {
            for address in &block.undecodable_jumps {
                self.issues.push(StructuralIssue::UndecodableJump {
                    block: BlockId(index),
                    address: *address,
                });
            }
            for jump in &block.jumps {
                let JumpTarget::Address(target) = jump.target else {
                    continue;
                };
                match self.node_at(target) {
                    Some(node) => edges.push((self.block_nodes[index], node, jump.kind)),
                    None => self.issues.push(StructuralIssue::UnknownJumpTarget {
                        block: BlockId(index),
                        target,
                    }),
                }
            }
        }
        for (source, target, kind) in edges {
            self.graph.add_edge(source, target, kind);
        }
        for issue in &self.issues {
            warn!("{}: {}", self.name, issue);
        }
    }

    /// Rewrites the graph in place: condition reclassification, marker resolution, then pruning
    /// of unreachable jumps.
    pub fn finalize(&mut self) {
        self.reclassify_conditions();
        for index in 0..self.blocks.len() {
            let markers = self.blocks[index]
                .jumps
                .iter()
                .filter(|jump| jump.target.is_marker())
                .map(|jump| jump.target)
                .collect::<BTreeSet<_>>();
            if markers.contains(&JumpTarget::Break) {
                self.resolve_loop_exit(BlockId(index), JumpTarget::Break);
            }
            if markers.contains(&JumpTarget::Continue) {
                self.resolve_loop_exit(BlockId(index), JumpTarget::Continue);
            }
            if markers.contains(&JumpTarget::Return) {
                self.redirect_to_exit(BlockId(index), BranchKind::Return);
            }
            if markers.contains(&JumpTarget::Raise) {
                self.redirect_to_exit(BlockId(index), BranchKind::Exception);
            }
        }
        if self.options.prune_unreachable_jumps {
            self.prune_unreachable_jumps();
        }
    }

    fn node_at(&self, address: CodeOffset) -> Option<NodeIndex> {
        if address == self.end_address {
            return Some(self.exit);
        }
        block_starting_at(&self.blocks, address).map(|block| self.block_nodes[block.0])
    }

    fn reclassify_conditions(&mut self) {
        for node in self.graph.node_indices() {
            let kinds = self
                .graph
                .out_edges(node)
                .into_iter()
                .map(|(_, kind)| *kind)
                .collect::<BTreeSet<_>>();
            if kinds.contains(&BranchKind::True) && kinds.contains(&BranchKind::False) {
                if let Some(weight) = self.graph.node_mut(node) {
                    weight.kind = NodeKind::Condition;
                }
            }
        }
    }

    /// Resolves a break to the end of its loop, or a continue to its loop header.
    fn resolve_loop_exit(&mut self, block: BlockId, marker: JumpTarget) {
        let address = self.blocks[block.0]
            .marker_address(marker)
            .unwrap_or(self.blocks[block.0].start_address);
        let node = self.block_nodes[block.0];
        let unresolved = if marker == JumpTarget::Break {
            StructuralIssue::UnresolvedBreak { block, address }
        } else {
            StructuralIssue::UnresolvedContinue { block, address }
        };
        let Some(loop_block) = enclosing_loop(&self.graph, &self.blocks, node, address) else {
            self.report(unresolved);
            return;
        };
        if self.options.require_dominating_loop && !self.dominates(loop_block, block) {
            self.report(StructuralIssue::NonDominatingLoop { block, loop_block });
        }

        let destination = if marker == JumpTarget::Break {
            self.blocks[loop_block.0].end_target
        } else {
            self.continue_destination(block, loop_block)
        };
        let Some(destination) = destination else {
            self.report(unresolved);
            return;
        };
        let Some(target) = self.node_at(destination) else {
            self.report(StructuralIssue::UnknownJumpTarget {
                block,
                target: destination,
            });
            return;
        };
        debug!(
            "{}: {:?} in {} resolved to {} through loop {}",
            self.name, marker, block, destination, loop_block
        );

        self.graph.clear_out_edges(node);
        self.graph.add_edge(node, target, BranchKind::Unconditional);
        let jumps = &mut self.blocks[block.0].jumps;
        jumps.retain(|jump| jump.target.is_marker() && jump.target != marker);
        jumps.insert(Jump::new(
            JumpTarget::Address(destination),
            BranchKind::Unconditional,
        ));
    }

    /// The encoded destination of a continue when it starts a block inside the loop, otherwise the
    /// loop header.
    fn continue_destination(&self, block: BlockId, loop_block: BlockId) -> Option<CodeOffset> {
        let setup = &self.blocks[loop_block.0];
        let encoded = self.blocks[block.0].continue_target.filter(|target| {
            setup.end_address() <= *target
                && setup.end_target.map_or(false, |end| *target < end)
                && block_starting_at(&self.blocks, *target).is_some()
        });
        if encoded.is_none() {
            debug!(
                "{}: continue in {} falls back to the header of loop {}",
                self.name, block, loop_block
            );
        }
        encoded.or_else(|| {
            loop_header(&self.blocks, loop_block).map(|header| self.blocks[header.0].start_address)
        })
    }

    fn redirect_to_exit(&mut self, block: BlockId, kind: BranchKind) {
        let node = self.block_nodes[block.0];
        self.graph.clear_out_edges(node);
        self.graph.add_edge(node, self.exit, kind);
        self.blocks[block.0]
            .jumps
            .retain(|jump| jump.target.is_marker());
    }

    fn dominates(&self, dominator: BlockId, block: BlockId) -> bool {
        let (snapshot, remap) = self.graph.snapshot();
        let ids = (
            remap.get(&self.entry),
            remap.get(&self.exit),
            remap.get(&self.block_nodes[dominator.0]),
            remap.get(&self.block_nodes[block.0]),
        );
        let (Some(entry), Some(exit), Some(dominator), Some(block)) = ids else {
            return true;
        };
        DominatorTree::compute(&snapshot, *entry, *exit).dominates(*dominator, *block)
    }

    fn prune_unreachable_jumps(&mut self) {
        let unreachable = self
            .blocks
            .iter()
            .zip(self.block_nodes.iter())
            .filter(|(block, node)| {
                self.graph.contains_node(**node)
                    && self.graph.in_degree(**node) == 0
                    && block
                        .first_instruction()
                        .map_or(false, |instr| instr.op.is_jump())
            })
            .map(|(_, node)| *node)
            .collect::<Vec<_>>();
        for node in unreachable {
            debug!("{}: pruning unreachable jump node {}", self.name, node.index());
            self.graph.remove_node(node);
        }
    }

    fn report(&mut self, issue: StructuralIssue) {
        warn!("{}: {}", self.name, issue);
        self.issues.push(issue);
    }
}
