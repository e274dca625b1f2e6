// Copyright (c) Asymptotic
// SPDX-License-Identifier: Apache-2.0

#![allow(dead_code)]

use bytecode_flow::{
    assembler::ScopeAssembler,
    instruction::{BinaryOp, CodeScope, Instruction, OpCode, Operand, ScopeId, ScopeMetadata},
};
use simplelog::{Config, LevelFilter, TestLogger};

pub fn init_logging() {
    let _ = TestLogger::init(LevelFilter::Debug, Config::default());
}

/// ```text
/// while True:
///     if c:
///         break
/// ```
pub fn loop_with_break() -> CodeScope {
    let mut asm = ScopeAssembler::new("loop_with_break");
    let top = asm.new_label();
    let end = asm.new_label();
    asm.jump(OpCode::SetupLoop, end);
    asm.bind(top);
    asm.load_name("c");
    asm.jump(OpCode::PopJumpIfFalse, top);
    asm.emit(OpCode::BreakLoop);
    asm.jump(OpCode::JumpAbsolute, top);
    asm.emit(OpCode::PopBlock);
    asm.bind(end);
    asm.load_const_none();
    asm.emit(OpCode::ReturnValue);
    asm.finish().unwrap()
}

/// ```text
/// x = 1
/// y = x + 1
/// return y
/// ```
pub fn straight_line() -> CodeScope {
    let mut asm = ScopeAssembler::new("straight_line");
    asm.load_const_int(1);
    asm.store_fast("x");
    asm.load_fast("x");
    asm.load_const_int(1);
    asm.emit(OpCode::Binary(BinaryOp::Add));
    asm.store_fast("y");
    asm.load_fast("y");
    asm.emit(OpCode::ReturnValue);
    asm.finish().unwrap()
}

/// `print g` at module level, with `g` never assigned.
pub fn global_read() -> CodeScope {
    let mut asm = ScopeAssembler::new("<module>");
    asm.load_global("g");
    asm.emit(OpCode::PrintItem);
    asm.emit(OpCode::PrintNewline);
    asm.load_const_none();
    asm.emit(OpCode::ReturnValue);
    asm.finish().unwrap()
}

/// ```text
/// while a:
///     while b:
///         continue
/// ```
/// The inner body holds the jump emitted after `continue`, which nothing reaches.
pub fn nested_continue() -> CodeScope {
    let mut asm = ScopeAssembler::new("nested_continue");
    let outer_top = asm.new_label();
    let outer_exit = asm.new_label();
    let outer_end = asm.new_label();
    let inner_top = asm.new_label();
    let inner_exit = asm.new_label();
    let inner_end = asm.new_label();
    asm.jump(OpCode::SetupLoop, outer_end);
    asm.bind(outer_top);
    asm.load_name("a");
    asm.jump(OpCode::PopJumpIfFalse, outer_exit);
    asm.jump(OpCode::SetupLoop, inner_end);
    asm.bind(inner_top);
    asm.load_name("b");
    asm.jump(OpCode::PopJumpIfFalse, inner_exit);
    asm.jump(OpCode::ContinueLoop, inner_top);
    asm.jump(OpCode::JumpAbsolute, inner_top);
    asm.bind(inner_exit);
    asm.emit(OpCode::PopBlock);
    asm.bind(inner_end);
    asm.jump(OpCode::JumpAbsolute, outer_top);
    asm.bind(outer_exit);
    asm.emit(OpCode::PopBlock);
    asm.bind(outer_end);
    asm.load_const_none();
    asm.emit(OpCode::ReturnValue);
    asm.finish().unwrap()
}

/// ```text
/// x = 0
/// if c:
///     x = 1
/// return x
/// ```
pub fn diamond() -> CodeScope {
    let mut asm = ScopeAssembler::new("diamond");
    let join = asm.new_label();
    asm.load_const_int(0);
    asm.store_fast("x");
    asm.load_fast("c");
    asm.jump(OpCode::PopJumpIfFalse, join);
    asm.load_const_int(1);
    asm.store_fast("x");
    asm.bind(join);
    asm.load_fast("x");
    asm.emit(OpCode::ReturnValue);
    asm.finish().unwrap()
}

/// `break` outside of any loop.
pub fn stray_break() -> CodeScope {
    let mut asm = ScopeAssembler::new("stray_break");
    asm.emit(OpCode::BreakLoop);
    asm.load_const_none();
    asm.emit(OpCode::ReturnValue);
    asm.finish().unwrap()
}

/// ```text
/// y = g
/// g = 1
/// ```
pub fn read_then_assign() -> CodeScope {
    let mut asm = ScopeAssembler::new("read_then_assign");
    asm.load_name("g");
    asm.store_fast("y");
    asm.load_const_int(1);
    asm.store_name("g");
    asm.load_const_none();
    asm.emit(OpCode::ReturnValue);
    asm.finish().unwrap()
}

/// ```text
/// x = 1
/// if c:
///     y = x
///     x = 2
/// ```
pub fn use_then_redefine() -> CodeScope {
    let mut asm = ScopeAssembler::new("use_then_redefine");
    let done = asm.new_label();
    asm.load_const_int(1);
    asm.store_fast("x");
    asm.load_fast("c");
    asm.jump(OpCode::PopJumpIfFalse, done);
    asm.load_fast("x");
    asm.store_fast("y");
    asm.load_const_int(2);
    asm.store_fast("x");
    asm.bind(done);
    asm.load_const_none();
    asm.emit(OpCode::ReturnValue);
    asm.finish().unwrap()
}

/// ```text
/// for x in xs:
///     pass
/// ```
pub fn for_loop() -> CodeScope {
    let mut asm = ScopeAssembler::new("for_loop");
    let head = asm.new_label();
    let exhausted = asm.new_label();
    let end = asm.new_label();
    asm.jump(OpCode::SetupLoop, end);
    asm.load_name("xs");
    asm.emit(OpCode::GetIter);
    asm.bind(head);
    asm.jump(OpCode::ForIter, exhausted);
    asm.store_fast("x");
    asm.jump(OpCode::JumpAbsolute, head);
    asm.bind(exhausted);
    asm.emit(OpCode::PopBlock);
    asm.bind(end);
    asm.load_const_none();
    asm.emit(OpCode::ReturnValue);
    asm.finish().unwrap()
}

/// ```text
/// if c:
///     raise E
/// ```
pub fn raise_if() -> CodeScope {
    let mut asm = ScopeAssembler::new("raise_if");
    let done = asm.new_label();
    asm.load_name("c");
    asm.jump(OpCode::PopJumpIfFalse, done);
    asm.load_global("E");
    asm.emit_arg(OpCode::RaiseVarargs, 1);
    asm.bind(done);
    asm.load_const_none();
    asm.emit(OpCode::ReturnValue);
    asm.finish().unwrap()
}

/// A call to `f` guarded by the handler opened with `setup`, which lands on a lone `POP_TOP`.
pub fn guarded(setup: OpCode) -> CodeScope {
    let mut asm = ScopeAssembler::new("guarded");
    let handler = asm.new_label();
    let done = asm.new_label();
    asm.jump(setup, handler);
    asm.load_name("f");
    asm.call(0);
    asm.emit(OpCode::PopTop);
    asm.emit(OpCode::PopBlock);
    asm.jump(OpCode::JumpForward, done);
    asm.bind(handler);
    asm.emit(OpCode::PopTop);
    asm.bind(done);
    asm.load_const_none();
    asm.emit(OpCode::ReturnValue);
    asm.finish().unwrap()
}

/// A conditional jump from before a loop straight onto the `break` inside it, so the loop setup
/// does not dominate the break.
pub fn jump_into_loop() -> CodeScope {
    let mut asm = ScopeAssembler::new("jump_into_loop");
    let breaking = asm.new_label();
    let end = asm.new_label();
    asm.load_name("c");
    asm.jump(OpCode::PopJumpIfTrue, breaking);
    asm.jump(OpCode::SetupLoop, end);
    asm.load_name("d");
    asm.emit(OpCode::PopTop);
    asm.bind(breaking);
    asm.emit(OpCode::BreakLoop);
    asm.emit(OpCode::PopBlock);
    asm.bind(end);
    asm.load_const_none();
    asm.emit(OpCode::ReturnValue);
    asm.finish().unwrap()
}

/// ```text
/// while True:
///     prepare
///     if c:
///         continue
/// ```
/// Nothing jumps back to the condition except the `continue` itself.
pub fn continue_to_condition() -> CodeScope {
    let mut asm = ScopeAssembler::new("continue_to_condition");
    let head = asm.new_label();
    let exit_loop = asm.new_label();
    let end = asm.new_label();
    asm.jump(OpCode::SetupLoop, end);
    asm.load_name("prepare");
    asm.emit(OpCode::PopTop);
    asm.bind(head);
    asm.load_name("c");
    asm.jump(OpCode::PopJumpIfFalse, exit_loop);
    asm.jump(OpCode::ContinueLoop, head);
    asm.bind(exit_loop);
    asm.emit(OpCode::PopBlock);
    asm.bind(end);
    asm.load_const_none();
    asm.emit(OpCode::ReturnValue);
    asm.finish().unwrap()
}

/// A conditional jump to address 7, which falls inside the following instruction.
pub fn misaligned_jump() -> CodeScope {
    let id = ScopeId(0);
    let instructions = vec![
        Instruction::new(0, OpCode::LoadName, Operand::name("c"), id),
        Instruction::new(3, OpCode::PopJumpIfFalse, Operand::Arg(7), id),
        Instruction::new(6, OpCode::LoadName, Operand::name("c"), id),
        Instruction::new(9, OpCode::ReturnValue, Operand::None, id),
    ];
    CodeScope::new(id, "misaligned_jump", ScopeMetadata::default(), instructions)
}

pub fn all_scopes() -> Vec<CodeScope> {
    vec![
        loop_with_break(),
        straight_line(),
        global_read(),
        nested_continue(),
        diamond(),
        stray_break(),
        read_then_assign(),
        use_then_redefine(),
        for_loop(),
        raise_if(),
        guarded(OpCode::SetupExcept),
        jump_into_loop(),
        continue_to_condition(),
    ]
}
