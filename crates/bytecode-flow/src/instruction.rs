// Copyright (c) Asymptotic
// SPDX-License-Identifier: Apache-2.0

//! The decoded instruction stream consumed by the analyses.
//!
//! Decoding the on-disk container is done elsewhere; this module only fixes the shape of a
//! decoded instruction, the closed set of operations of the stack machine, and the side tables
//! (encoded width, jump addressing, control transfer, stack effect) the analyses need.

use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// An address inside one scope's instruction stream.
pub type CodeOffset = u32;

/// Identifies the lexical scope (module body, function, closure, class body) owning code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ScopeId(pub u32);

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Positive,
    Negative,
    Not,
    Invert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    FloorDivide,
    Modulo,
    Power,
    LeftShift,
    RightShift,
    And,
    Or,
    Xor,
}

/// How a jump-carrying operation encodes its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpAddressing {
    /// The argument is the destination address.
    Absolute,
    /// The argument is added to the address following the instruction.
    Relative,
}

/// The scope kind opened by a setup operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupKind {
    Loop,
    Except,
    Finally,
    With,
}

/// Control transfer performed by an operation, as seen by the block builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlTransfer {
    /// Falls through to the next instruction.
    None,
    /// Always jumps, never falls through.
    Jump,
    /// Jumps when the tested value is true, falls through otherwise.
    JumpIfTrue,
    /// Jumps when the tested value is false, falls through otherwise.
    JumpIfFalse,
    /// Jumps once the iterator is exhausted.
    IterExhausted,
    /// Opens a loop/handler scope ending at the jump destination.
    Setup(SetupKind),
    Return,
    Break,
    Continue,
    Raise,
}

/// The closed set of operations of the stack machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Nop,
    ExtendedArg,
    PopTop,
    RotTwo,
    RotThree,
    DupTop,
    Unary(UnaryOp),
    Binary(BinaryOp),
    InPlace(BinaryOp),
    CompareOp,
    BinarySubscr,
    StoreSubscr,
    DeleteSubscr,
    LoadConst,
    LoadName,
    StoreName,
    DeleteName,
    LoadFast,
    StoreFast,
    DeleteFast,
    LoadGlobal,
    StoreGlobal,
    DeleteGlobal,
    LoadDeref,
    StoreDeref,
    LoadClosure,
    LoadAttr,
    StoreAttr,
    DeleteAttr,
    BuildTuple,
    BuildList,
    BuildMap,
    StoreMap,
    ListAppend,
    UnpackSequence,
    CallFunction,
    CallFunctionVar,
    CallFunctionKw,
    CallFunctionVarKw,
    MakeFunction,
    MakeClosure,
    BuildClass,
    ImportName,
    ImportFrom,
    GetIter,
    ForIter,
    JumpForward,
    JumpAbsolute,
    PopJumpIfFalse,
    PopJumpIfTrue,
    JumpIfFalseOrPop,
    JumpIfTrueOrPop,
    SetupLoop,
    SetupExcept,
    SetupFinally,
    SetupWith,
    PopBlock,
    EndFinally,
    WithCleanup,
    BreakLoop,
    ContinueLoop,
    ReturnValue,
    RaiseVarargs,
    YieldValue,
    PrintItem,
    PrintNewline,
}

/// Number of values an operation pops from and pushes onto the operand stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StackEffect {
    pub pops: u32,
    pub pushes: u32,
}

impl StackEffect {
    pub const fn new(pops: u32, pushes: u32) -> Self {
        Self { pops, pushes }
    }

    pub fn net(&self) -> i64 {
        self.pushes as i64 - self.pops as i64
    }
}

/// The role a name-carrying operation plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameAccess {
    Load,
    Store,
    Delete,
    LoadAttr,
    StoreAttr,
    DeleteAttr,
}

impl OpCode {
    /// Whether the operation carries an argument, which also fixes its encoded width.
    pub fn has_argument(&self) -> bool {
        use OpCode::*;
        !matches!(
            self,
            Nop | PopTop
                | RotTwo
                | RotThree
                | DupTop
                | Unary(_)
                | Binary(_)
                | InPlace(_)
                | BinarySubscr
                | StoreSubscr
                | DeleteSubscr
                | StoreMap
                | BuildClass
                | GetIter
                | PopBlock
                | EndFinally
                | WithCleanup
                | BreakLoop
                | ReturnValue
                | YieldValue
                | PrintItem
                | PrintNewline
        )
    }

    /// Size of the encoded instruction in address units.
    pub fn encoded_width(&self) -> u32 {
        if self.has_argument() {
            3
        } else {
            1
        }
    }

    pub fn jump_addressing(&self) -> Option<JumpAddressing> {
        use OpCode::*;
        match self {
            JumpAbsolute | PopJumpIfFalse | PopJumpIfTrue | JumpIfFalseOrPop | JumpIfTrueOrPop
            | ContinueLoop => Some(JumpAddressing::Absolute),
            JumpForward | ForIter | SetupLoop | SetupExcept | SetupFinally | SetupWith => {
                Some(JumpAddressing::Relative)
            }
            _ => None,
        }
    }

    pub fn control(&self) -> ControlTransfer {
        use OpCode::*;
        match self {
            JumpForward | JumpAbsolute => ControlTransfer::Jump,
            PopJumpIfTrue | JumpIfTrueOrPop => ControlTransfer::JumpIfTrue,
            PopJumpIfFalse | JumpIfFalseOrPop => ControlTransfer::JumpIfFalse,
            ForIter => ControlTransfer::IterExhausted,
            SetupLoop => ControlTransfer::Setup(SetupKind::Loop),
            SetupExcept => ControlTransfer::Setup(SetupKind::Except),
            SetupFinally => ControlTransfer::Setup(SetupKind::Finally),
            SetupWith => ControlTransfer::Setup(SetupKind::With),
            ReturnValue => ControlTransfer::Return,
            BreakLoop => ControlTransfer::Break,
            ContinueLoop => ControlTransfer::Continue,
            RaiseVarargs => ControlTransfer::Raise,
            _ => ControlTransfer::None,
        }
    }

    /// Whether the operation is a jump in the narrow sense: a conditional or unconditional
    /// transfer to an encoded destination.
    pub fn is_jump(&self) -> bool {
        matches!(
            self.control(),
            ControlTransfer::Jump
                | ControlTransfer::JumpIfTrue
                | ControlTransfer::JumpIfFalse
                | ControlTransfer::IterExhausted
        )
    }

    /// Operations after which control never reaches the next instruction.
    pub fn is_no_fall_through(&self) -> bool {
        matches!(self, OpCode::JumpAbsolute | OpCode::JumpForward)
    }

    /// Operations which leave values on the stack for the block control reaches next, such as a
    /// loop iterator.
    pub fn hands_operands_to_successor(&self) -> bool {
        use OpCode::*;
        matches!(
            self,
            GetIter | ForIter | SetupWith | JumpIfFalseOrPop | JumpIfTrueOrPop
        )
    }

    pub fn name_access(&self) -> Option<NameAccess> {
        use OpCode::*;
        match self {
            LoadName | LoadFast | LoadGlobal | LoadDeref | LoadClosure => Some(NameAccess::Load),
            StoreName | StoreFast | StoreGlobal | StoreDeref => Some(NameAccess::Store),
            DeleteName | DeleteFast | DeleteGlobal => Some(NameAccess::Delete),
            LoadAttr => Some(NameAccess::LoadAttr),
            StoreAttr => Some(NameAccess::StoreAttr),
            DeleteAttr => Some(NameAccess::DeleteAttr),
            _ => None,
        }
    }

    /// The stack-effect side table. Conditional operations report their fall-through effect.
    pub fn stack_effect(&self, operand: &Operand) -> StackEffect {
        use OpCode::*;
        let arg = operand.as_arg().unwrap_or(0);
        let (pops, pushes) = match self {
            Nop | ExtendedArg | PopBlock | PrintNewline | BreakLoop | ContinueLoop => (0, 0),
            JumpForward | JumpAbsolute | SetupLoop | SetupExcept | SetupFinally => (0, 0),
            DeleteName | DeleteFast | DeleteGlobal => (0, 0),
            PopTop | PrintItem | ReturnValue | EndFinally | WithCleanup => (1, 0),
            PopJumpIfFalse | PopJumpIfTrue | JumpIfFalseOrPop | JumpIfTrueOrPop => (1, 0),
            StoreName | StoreFast | StoreGlobal | StoreDeref | DeleteAttr | ListAppend => (1, 0),
            RotTwo => (2, 2),
            RotThree => (3, 3),
            DupTop => (1, 2),
            Unary(_) | LoadAttr | GetIter | YieldValue => (1, 1),
            Binary(_) | InPlace(_) | CompareOp | BinarySubscr | ImportName => (2, 1),
            StoreSubscr => (3, 0),
            DeleteSubscr | StoreAttr => (2, 0),
            LoadConst | LoadName | LoadFast | LoadGlobal | LoadDeref | LoadClosure | BuildMap => {
                (0, 1)
            }
            StoreMap | BuildClass => (3, 1),
            BuildTuple | BuildList => (arg, 1),
            UnpackSequence => (1, arg),
            CallFunction => (call_arguments(arg) + 1, 1),
            CallFunctionVar | CallFunctionKw => (call_arguments(arg) + 2, 1),
            CallFunctionVarKw => (call_arguments(arg) + 3, 1),
            MakeFunction => (arg + 1, 1),
            MakeClosure => (arg + 2, 1),
            ImportFrom | ForIter | SetupWith => (1, 2),
            RaiseVarargs => (arg, 0),
        };
        StackEffect::new(pops, pushes)
    }
}

/// Positional arguments in the low byte, keyword pairs in the high byte.
fn call_arguments(arg: u32) -> u32 {
    (arg & 0xff) + 2 * ((arg >> 8) & 0xff)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Constant {
    None,
    Bool(bool),
    Int(i64),
    Str(String),
    /// A nested code object, identified by the scope it defines.
    Code(ScopeId),
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::None => write!(f, "None"),
            Constant::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            Constant::Int(i) => write!(f, "{}", i),
            Constant::Str(s) => write!(f, "{:?}", s),
            Constant::Code(scope) => write!(f, "<code {}>", scope),
        }
    }
}

/// The dereferenced operand of an instruction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Operand {
    #[default]
    None,
    Arg(u32),
    Name(String),
    Const(Constant),
}

impl Operand {
    pub fn name(name: impl Into<String>) -> Self {
        Operand::Name(name.into())
    }

    pub fn as_arg(&self) -> Option<u32> {
        match self {
            Operand::Arg(arg) => Some(*arg),
            _ => None,
        }
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            Operand::Name(name) => Some(name.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::None => Ok(()),
            Operand::Arg(arg) => write!(f, "{}", arg),
            Operand::Name(name) => write!(f, "{}", name),
            Operand::Const(c) => write!(f, "{}", c),
        }
    }
}

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub address: CodeOffset,
    pub line: u32,
    pub op: OpCode,
    pub operand: Operand,
    pub is_jump_target: bool,
    pub scope: ScopeId,
}

impl Instruction {
    pub fn new(address: CodeOffset, op: OpCode, operand: Operand, scope: ScopeId) -> Self {
        Self {
            address,
            line: 0,
            op,
            operand,
            is_jump_target: false,
            scope,
        }
    }

    /// Address of the instruction that follows this one in the encoding.
    pub fn next_address(&self) -> CodeOffset {
        self.address + self.op.encoded_width()
    }

    /// Resolves the destination of a jump-carrying instruction. `extended` is the argument of an
    /// immediately preceding extended-argument prefix, or zero.
    /// `None` when there is no encoded destination or it does not fit a code offset.
    pub fn jump_destination(&self, extended: u32, relative_width: u32) -> Option<CodeOffset> {
        let addressing = self.op.jump_addressing()?;
        let folded = (u64::from(extended) << 16) | u64::from(self.operand.as_arg()?);
        let arg = CodeOffset::try_from(folded).ok()?;
        match addressing {
            JumpAddressing::Absolute => Some(arg),
            JumpAddressing::Relative => self.address.checked_add(relative_width)?.checked_add(arg),
        }
    }

    pub fn stack_effect(&self) -> StackEffect {
        self.op.stack_effect(&self.operand)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>4}({:>4}) {:?}", self.line, self.address, self.op)?;
        if !matches!(self.operand, Operand::None) {
            write!(f, " ({})", self.operand)?;
        }
        Ok(())
    }
}

/// Jump conventions and entry point of a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeMetadata {
    pub entry_address: CodeOffset,
    /// Width added to an instruction's address when resolving a relative jump.
    pub relative_jump_width: u32,
}

impl Default for ScopeMetadata {
    fn default() -> Self {
        Self {
            entry_address: 0,
            relative_jump_width: 3,
        }
    }
}

/// The instruction stream of a single lexical scope, in address order.
#[derive(Debug, Clone)]
pub struct CodeScope {
    pub id: ScopeId,
    pub name: String,
    pub metadata: ScopeMetadata,
    instructions: Vec<Instruction>,
}

impl CodeScope {
    pub fn new(
        id: ScopeId,
        name: impl Into<String>,
        metadata: ScopeMetadata,
        instructions: Vec<Instruction>,
    ) -> Self {
        let instructions = instructions
            .into_iter()
            .sorted_by_key(|instr| instr.address)
            .collect();
        Self {
            id,
            name: name.into(),
            metadata,
            instructions,
        }
    }

    /// Extracts the instructions owned by `id` from a stream which interleaves nested scopes,
    /// starting at the scope's entry address.
    pub fn from_stream(
        id: ScopeId,
        name: impl Into<String>,
        metadata: ScopeMetadata,
        stream: &[Instruction],
    ) -> Self {
        let instructions = stream
            .iter()
            .filter(|instr| instr.scope == id && instr.address >= metadata.entry_address)
            .cloned()
            .collect();
        Self::new(id, name, metadata, instructions)
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// First address past the encoding of the last instruction.
    pub fn end_address(&self) -> CodeOffset {
        self.instructions
            .last()
            .map(Instruction::next_address)
            .unwrap_or(self.metadata.entry_address)
    }

    /// Index of the instruction at `address` in the stream.
    pub fn position_of(&self, address: CodeOffset) -> Option<usize> {
        self.instructions
            .binary_search_by_key(&address, |instr| instr.address)
            .ok()
    }

    pub fn listing(&self) -> String {
        self.instructions.iter().map(|instr| instr.to_string()).join("\n")
    }
}
