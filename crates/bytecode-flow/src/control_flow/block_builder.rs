// Copyright (c) Asymptotic
// SPDX-License-Identifier: Apache-2.0

//! Partitioning of a scope's instruction stream into basic blocks.

use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;
use log::{debug, warn};

use crate::{
    control_flow::types::{BasicBlock, BlockKind, BranchKind, Jump, JumpTarget},
    instruction::{CodeOffset, CodeScope, ControlTransfer, OpCode, SetupKind},
};

pub struct BlockBuilder<'a> {
    scope: &'a CodeScope,
    /// Argument of the extended-argument prefix preceding an instruction, by instruction index.
    prefixes: BTreeMap<usize, u32>,
    /// Address of a prefixed instruction mapped to the address of its prefix.
    anchors: BTreeMap<CodeOffset, CodeOffset>,
}

impl<'a> BlockBuilder<'a> {
    pub fn new(scope: &'a CodeScope) -> Self {
        let mut prefixes = BTreeMap::new();
        let mut anchors = BTreeMap::new();
        for (index, (prefix, instr)) in scope.instructions().iter().tuple_windows().enumerate() {
            if prefix.op == OpCode::ExtendedArg {
                prefixes.insert(index + 1, prefix.operand.as_arg().unwrap_or(0));
                anchors.insert(instr.address, prefix.address);
            }
        }
        Self {
            scope,
            prefixes,
            anchors,
        }
    }

    /// Returns the blocks of the scope in address order.
    pub fn build(&self) -> Vec<BasicBlock> {
        let instructions = self.scope.instructions();
        if instructions.is_empty() {
            return vec![];
        }
        let end = self.scope.end_address();
        let boundaries = self
            .targets()
            .into_iter()
            .filter(|address| {
                let known = *address == end || self.scope.position_of(*address).is_some();
                if !known {
                    warn!(
                        "{}: ignoring block boundary at {} which is not an instruction address",
                        self.scope.name, address
                    );
                }
                known
            })
            .collect::<BTreeSet<_>>();
        debug!(
            "{}: block boundaries {:?}",
            self.scope.name,
            boundaries.iter().collect_vec()
        );

        boundaries
            .iter()
            .tuple_windows()
            .filter_map(|(start, end)| {
                let lower = self.scope.position_of(*start)?;
                let upper = self.scope.position_of(*end).unwrap_or(instructions.len());
                (lower < upper).then(|| self.make_block(lower, upper, *end - *start))
            })
            .collect()
    }

    /// Block boundaries: jump destinations, the instruction after every jump which may fall
    /// through, the entry address and the end of the stream.
    fn targets(&self) -> BTreeSet<CodeOffset> {
        let instructions = self.scope.instructions();
        let mut targets = BTreeSet::new();
        for (index, instr) in instructions.iter().enumerate() {
            if instr.op.jump_addressing().is_none() {
                continue;
            }
            if let Some(destination) = self.destination(index) {
                targets.insert(destination);
            }
            if !instr.op.is_no_fall_through() {
                if let Some(next) = instructions.get(index + 1) {
                    targets.insert(next.address);
                }
            }
        }
        targets.insert(self.scope.metadata.entry_address);
        targets.insert(self.scope.end_address());
        targets
    }

    /// Resolved destination of the jump at `index`, re-anchored onto an extended-argument prefix.
    fn destination(&self, index: usize) -> Option<CodeOffset> {
        let instr = &self.scope.instructions()[index];
        let extended = self.prefixes.get(&index).copied().unwrap_or(0);
        let destination =
            instr.jump_destination(extended, self.scope.metadata.relative_jump_width)?;
        Some(
            self.anchors
                .get(&destination)
                .copied()
                .unwrap_or(destination),
        )
    }

    fn make_block(&self, lower: usize, upper: usize, length: u32) -> BasicBlock {
        let instructions = &self.scope.instructions()[lower..upper];
        let mut block = BasicBlock::new(instructions[0].address, length, instructions.to_vec());
        if instructions[0].op == OpCode::ForIter {
            block.kind = BlockKind::Loop;
        }

        for (offset, instr) in instructions.iter().enumerate() {
            let index = lower + offset;
            match instr.op.control() {
                ControlTransfer::None => {}
                ControlTransfer::Setup(setup) => {
                    let Some(destination) = self.destination(index) else {
                        self.undecodable(&mut block, index);
                        continue;
                    };
                    let (kind, branch) = match setup {
                        SetupKind::Loop => (BlockKind::Loop, BranchKind::Unconditional),
                        SetupKind::Finally => (BlockKind::ExceptionHandler, BranchKind::Finally),
                        SetupKind::Except | SetupKind::With => {
                            (BlockKind::ExceptionHandler, BranchKind::Exception)
                        }
                    };
                    block.kind = kind;
                    block.end_target = Some(destination);
                    block
                        .jumps
                        .insert(Jump::new(JumpTarget::Address(destination), branch));
                }
                ControlTransfer::Jump => self.add_jump(&mut block, index, BranchKind::Unconditional),
                ControlTransfer::JumpIfFalse | ControlTransfer::IterExhausted => {
                    self.add_jump(&mut block, index, BranchKind::False)
                }
                ControlTransfer::JumpIfTrue => self.add_jump(&mut block, index, BranchKind::True),
                ControlTransfer::Return => add_marker(&mut block, JumpTarget::Return, BranchKind::Return),
                ControlTransfer::Break => {
                    add_marker(&mut block, JumpTarget::Break, BranchKind::Unconditional)
                }
                ControlTransfer::Continue => {
                    block.continue_target = self.destination(index);
                    add_marker(&mut block, JumpTarget::Continue, BranchKind::Unconditional)
                }
                ControlTransfer::Raise => add_marker(&mut block, JumpTarget::Raise, BranchKind::Exception),
            }
        }

        let last = instructions[instructions.len() - 1].op.control();
        let next = self.scope.instructions().get(upper);
        match next {
            Some(next)
                if !block.has_return_path
                    && !instructions[instructions.len() - 1].op.is_no_fall_through() =>
            {
                let kind = match last {
                    ControlTransfer::JumpIfFalse | ControlTransfer::IterExhausted => BranchKind::True,
                    ControlTransfer::JumpIfTrue => BranchKind::False,
                    _ => BranchKind::Unconditional,
                };
                block.fallthrough = true;
                block
                    .jumps
                    .insert(Jump::new(JumpTarget::Address(next.address), kind));
            }
            _ => block.fallthrough = false,
        }

        if block.kind == BlockKind::Unclassified
            && matches!(
                last,
                ControlTransfer::JumpIfFalse | ControlTransfer::JumpIfTrue
            )
        {
            block.kind = BlockKind::Conditional;
        }
        block
    }

    fn add_jump(&self, block: &mut BasicBlock, index: usize, kind: BranchKind) {
        match self.destination(index) {
            Some(destination) => {
                block
                    .jumps
                    .insert(Jump::new(JumpTarget::Address(destination), kind));
            }
            None => self.undecodable(block, index),
        }
    }

    fn undecodable(&self, block: &mut BasicBlock, index: usize) {
        let address = self.scope.instructions()[index].address;
        debug!(
            "{}: jump at {} has no representable destination",
            self.scope.name, address
        );
        block.undecodable_jumps.push(address);
    }
}

fn add_marker(block: &mut BasicBlock, marker: JumpTarget, kind: BranchKind) {
    block.has_return_path = true;
    block.jumps.insert(Jump::new(marker, kind));
}
