// Copyright (c) Asymptotic
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeSet;
use std::fmt;

use crate::instruction::{CodeOffset, Instruction};

/// Index of a basic block in a scope, in address order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub usize);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Entry,
    ImplicitReturn,
    Unclassified,
    /// Opens a loop or is a loop header.
    Loop,
    /// Ends in a conditional jump.
    Conditional,
    /// Opens an exception, finally or with handler.
    ExceptionHandler,
}

/// Label carried by a control transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BranchKind {
    Unconditional,
    True,
    False,
    Exception,
    Finally,
    Return,
}

impl fmt::Display for BranchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BranchKind::Unconditional => "",
            BranchKind::True => "T",
            BranchKind::False => "F",
            BranchKind::Exception => "E",
            BranchKind::Finally => "finally",
            BranchKind::Return => "return",
        };
        f.write_str(label)
    }
}

/// Destination of a provisional jump. The marker variants stand for transfers whose real target
/// is only known once the whole block set exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JumpTarget {
    Address(CodeOffset),
    Return,
    Break,
    Continue,
    Raise,
}

impl JumpTarget {
    pub fn is_marker(&self) -> bool {
        !matches!(self, JumpTarget::Address(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Jump {
    pub target: JumpTarget,
    pub kind: BranchKind,
}

impl Jump {
    pub fn new(target: JumpTarget, kind: BranchKind) -> Self {
        Self { target, kind }
    }
}

/// A maximal straight-line run of instructions of one scope.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub kind: BlockKind,
    pub start_address: CodeOffset,
    /// Address span covered by the block.
    pub length: u32,
    pub fallthrough: bool,
    pub has_return_path: bool,
    /// End of the loop or handler scope opened by this block.
    pub end_target: Option<CodeOffset>,
    /// Encoded destination of a continue in this block.
    pub continue_target: Option<CodeOffset>,
    /// Addresses of jumps whose destination could not be decoded.
    pub undecodable_jumps: Vec<CodeOffset>,
    pub jumps: BTreeSet<Jump>,
    instructions: Vec<Instruction>,
}

impl BasicBlock {
    pub(crate) fn new(start_address: CodeOffset, length: u32, instructions: Vec<Instruction>) -> Self {
        Self {
            kind: BlockKind::Unclassified,
            start_address,
            length,
            fallthrough: false,
            has_return_path: false,
            end_target: None,
            continue_target: None,
            undecodable_jumps: vec![],
            jumps: BTreeSet::new(),
            instructions,
        }
    }

    pub fn end_address(&self) -> CodeOffset {
        self.start_address + self.length
    }

    pub fn contains(&self, address: CodeOffset) -> bool {
        self.start_address <= address && address < self.end_address()
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn first_instruction(&self) -> Option<&Instruction> {
        self.instructions.first()
    }

    pub fn last_instruction(&self) -> Option<&Instruction> {
        self.instructions.last()
    }

    pub fn has_marker(&self, marker: JumpTarget) -> bool {
        self.jumps.iter().any(|jump| jump.target == marker)
    }

    /// Address of the first instruction carrying the given marker control transfer.
    pub fn marker_address(&self, marker: JumpTarget) -> Option<CodeOffset> {
        use crate::instruction::ControlTransfer;
        let wanted = match marker {
            JumpTarget::Return => ControlTransfer::Return,
            JumpTarget::Break => ControlTransfer::Break,
            JumpTarget::Continue => ControlTransfer::Continue,
            JumpTarget::Raise => ControlTransfer::Raise,
            JumpTarget::Address(_) => return None,
        };
        self.instructions
            .iter()
            .find(|instr| instr.op.control() == wanted)
            .map(|instr| instr.address)
    }
}

/// Classification of a control-flow graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Entry,
    ImplicitReturn,
    Unknown,
    Loop,
    If,
    Except,
    /// Has exactly one true and one false outgoing edge.
    Condition,
}

impl NodeKind {
    pub fn from_block(kind: BlockKind) -> Self {
        match kind {
            BlockKind::Entry => NodeKind::Entry,
            BlockKind::ImplicitReturn => NodeKind::ImplicitReturn,
            BlockKind::Unclassified => NodeKind::Unknown,
            BlockKind::Loop => NodeKind::Loop,
            BlockKind::Conditional => NodeKind::If,
            BlockKind::ExceptionHandler => NodeKind::Except,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeKind::Entry => "entry",
            NodeKind::ImplicitReturn => "implicit-return",
            NodeKind::Unknown => "block",
            NodeKind::Loop => "loop",
            NodeKind::If => "if",
            NodeKind::Except => "except",
            NodeKind::Condition => "condition",
        };
        f.write_str(name)
    }
}

/// Payload of a control-flow graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CfgNode {
    pub kind: NodeKind,
    pub block: Option<BlockId>,
}
