// Copyright (c) Asymptotic
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use bimap::btree::BiBTreeMap;
use log::debug;
use once_cell::sync::OnceCell;

use crate::{
    control_dependence::ControlDependence,
    control_flow::{
        block_builder::BlockBuilder,
        construction::Construction,
        types::{BasicBlock, BlockId, BranchKind, CfgNode, NodeKind},
    },
    dominance::DominatorTree,
    error::StructuralIssue,
    graph::{FlowGraph, Graph, NodeId},
    instruction::{CodeOffset, CodeScope, ScopeId},
    options::AnalysisOptions,
    statements::{split_statements, Statement},
};

/// The frozen control-flow graph of one scope.
///
/// Besides the graph proper it owns the basic blocks, the statements recovered from them, and
/// the structural issues found during construction. Dominators and control dependence are
/// computed on first request and kept for the lifetime of the graph.
#[derive(Debug)]
pub struct ControlFlowGraph {
    scope: ScopeId,
    name: String,
    blocks: Vec<BasicBlock>,
    statements: Vec<Vec<Statement>>,
    graph: Graph<CfgNode, BranchKind>,
    entry: NodeId,
    exit: NodeId,
    block_nodes: BiBTreeMap<BlockId, NodeId>,
    block_starts: BTreeMap<CodeOffset, BlockId>,
    issues: Vec<StructuralIssue>,
    dominators: OnceCell<DominatorTree>,
    control_dependence: OnceCell<ControlDependence>,
}

impl ControlFlowGraph {
    pub fn build(scope: &CodeScope, options: &AnalysisOptions) -> Self {
        let blocks = BlockBuilder::new(scope).build();
        debug!("{}: {} basic blocks", scope.name, blocks.len());

        let mut construction = Construction::new(&scope.name, blocks, scope.end_address(), options);
        construction.wire();
        construction.finalize();
        let Construction {
            blocks,
            graph,
            entry,
            exit,
            block_nodes: mutable_block_nodes,
            mut issues,
            ..
        } = construction;

        let (graph, remap) = graph.freeze();
        let mut block_nodes = BiBTreeMap::new();
        for (index, node) in mutable_block_nodes.iter().enumerate() {
            if let Some(node) = remap.get(node) {
                block_nodes.insert(BlockId(index), *node);
            }
        }

        let mut statements = vec![];
        for (index, block) in blocks.iter().enumerate() {
            let recovered = split_statements(block);
            let hands_over = block
                .last_instruction()
                .map_or(false, |instr| instr.op.hands_operands_to_successor());
            let reported = recovered.len().saturating_sub(usize::from(hands_over));
            for statement in recovered[..reported]
                .iter()
                .filter(|statement| !statement.balanced)
            {
                debug!(
                    "{}: unbalanced statement at {} in b{}",
                    scope.name, statement.start, index
                );
                issues.push(StructuralIssue::UnbalancedStatement {
                    block: BlockId(index),
                    start: statement.start,
                    depth: statement.depth,
                });
            }
            statements.push(recovered);
        }

        let block_starts = blocks
            .iter()
            .enumerate()
            .map(|(index, block)| (block.start_address, BlockId(index)))
            .collect();
        debug!(
            "{}: cfg has {} nodes, {} edges, {} issues",
            scope.name,
            graph.node_count(),
            graph.edge_count(),
            issues.len()
        );

        Self {
            scope: scope.id,
            name: scope.name.clone(),
            blocks,
            statements,
            entry: remap[&entry],
            exit: remap[&exit],
            graph,
            block_nodes,
            block_starts,
            issues,
            dominators: OnceCell::new(),
            control_dependence: OnceCell::new(),
        }
    }

    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn graph(&self) -> &Graph<CfgNode, BranchKind> {
        &self.graph
    }

    pub fn entry(&self) -> NodeId {
        self.entry
    }

    pub fn exit(&self) -> NodeId {
        self.exit
    }

    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    pub fn block(&self, block: BlockId) -> &BasicBlock {
        &self.blocks[block.0]
    }

    pub fn statements(&self, block: BlockId) -> &[Statement] {
        &self.statements[block.0]
    }

    pub fn node(&self, node: NodeId) -> &CfgNode {
        self.graph.node(node)
    }

    pub fn kind(&self, node: NodeId) -> NodeKind {
        self.graph.node(node).kind
    }

    /// The node of a block, or `None` if the block was pruned.
    pub fn node_of(&self, block: BlockId) -> Option<NodeId> {
        self.block_nodes.get_by_left(&block).copied()
    }

    pub fn block_of(&self, node: NodeId) -> Option<BlockId> {
        self.block_nodes.get_by_right(&node).copied()
    }

    /// The block whose address range contains `address`.
    pub fn block_at(&self, address: CodeOffset) -> Option<BlockId> {
        let (_, block) = self.block_starts.range(..=address).next_back()?;
        self.blocks[block.0].contains(address).then_some(*block)
    }

    pub fn nodes_of_kind(&self, kind: NodeKind) -> Vec<NodeId> {
        self.graph
            .nodes()
            .filter(|(_, node)| node.kind == kind)
            .map(|(id, _)| id)
            .collect()
    }

    pub fn issues(&self) -> &[StructuralIssue] {
        &self.issues
    }

    pub fn dominators(&self) -> &DominatorTree {
        self.dominators
            .get_or_init(|| DominatorTree::compute(&self.graph, self.entry, self.exit))
    }

    pub fn control_dependence(&self) -> &ControlDependence {
        self.control_dependence
            .get_or_init(|| ControlDependence::compute(self.dominators(), self.graph.node_count()))
    }

    /// Short label of a node used in diagnostics.
    pub fn node_label(&self, node: NodeId) -> String {
        let weight = self.graph.node(node);
        match weight.block {
            Some(block) => {
                let block = &self.blocks[block.0];
                format!(
                    "{} [{}, {})",
                    weight.kind,
                    block.start_address,
                    block.end_address()
                )
            }
            None => weight.kind.to_string(),
        }
    }
}

impl FlowGraph for ControlFlowGraph {
    fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    fn successors(&self, node: NodeId) -> &[NodeId] {
        self.graph.successors(node)
    }

    fn predecessors(&self, node: NodeId) -> &[NodeId] {
        self.graph.predecessors(node)
    }
}
