// Copyright (c) Asymptotic
// SPDX-License-Identifier: Apache-2.0

//! Construction of [`CodeScope`]s from symbolic code with labels.
//!
//! Addresses are assigned by encoded width as instructions are emitted. Jump operands refer to
//! labels and are encoded once all labels are bound, following the addressing mode of each jump.

use std::collections::BTreeMap;

use anyhow::{anyhow, bail};

use crate::instruction::{
    CodeOffset, CodeScope, Constant, Instruction, JumpAddressing, OpCode, Operand, ScopeId,
    ScopeMetadata,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Label(usize);

pub struct ScopeAssembler {
    id: ScopeId,
    name: String,
    metadata: ScopeMetadata,
    instructions: Vec<Instruction>,
    next_address: CodeOffset,
    line: u32,
    labels: Vec<Option<CodeOffset>>,
    /// Instruction index of every jump waiting for its label.
    fixups: BTreeMap<usize, Label>,
}

impl ScopeAssembler {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_scope(ScopeId(0), name, ScopeMetadata::default())
    }

    pub fn with_scope(id: ScopeId, name: impl Into<String>, metadata: ScopeMetadata) -> Self {
        Self {
            id,
            name: name.into(),
            metadata,
            instructions: vec![],
            next_address: metadata.entry_address,
            line: 1,
            labels: vec![],
            fixups: BTreeMap::new(),
        }
    }

    pub fn set_line(&mut self, line: u32) {
        self.line = line;
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Binds `label` to the address of the next emitted instruction.
    pub fn bind(&mut self, label: Label) {
        self.labels[label.0] = Some(self.next_address);
    }

    /// Address the next emitted instruction will get.
    pub fn current_address(&self) -> CodeOffset {
        self.next_address
    }

    pub fn emit_with(&mut self, op: OpCode, operand: Operand) -> CodeOffset {
        let address = self.next_address;
        let mut instr = Instruction::new(address, op, operand, self.id);
        instr.line = self.line;
        self.next_address = instr.next_address();
        self.instructions.push(instr);
        address
    }

    pub fn emit(&mut self, op: OpCode) -> CodeOffset {
        self.emit_with(op, Operand::None)
    }

    pub fn emit_arg(&mut self, op: OpCode, arg: u32) -> CodeOffset {
        self.emit_with(op, Operand::Arg(arg))
    }

    /// Emits a jump-carrying instruction whose destination is `label`.
    pub fn jump(&mut self, op: OpCode, label: Label) -> CodeOffset {
        self.fixups.insert(self.instructions.len(), label);
        self.emit_arg(op, 0)
    }

    pub fn load_const(&mut self, constant: Constant) -> CodeOffset {
        self.emit_with(OpCode::LoadConst, Operand::Const(constant))
    }

    pub fn load_const_int(&mut self, value: i64) -> CodeOffset {
        self.load_const(Constant::Int(value))
    }

    pub fn load_const_none(&mut self) -> CodeOffset {
        self.load_const(Constant::None)
    }

    pub fn load_name(&mut self, name: &str) -> CodeOffset {
        self.emit_with(OpCode::LoadName, Operand::name(name))
    }

    pub fn store_name(&mut self, name: &str) -> CodeOffset {
        self.emit_with(OpCode::StoreName, Operand::name(name))
    }

    pub fn load_fast(&mut self, name: &str) -> CodeOffset {
        self.emit_with(OpCode::LoadFast, Operand::name(name))
    }

    pub fn store_fast(&mut self, name: &str) -> CodeOffset {
        self.emit_with(OpCode::StoreFast, Operand::name(name))
    }

    pub fn load_global(&mut self, name: &str) -> CodeOffset {
        self.emit_with(OpCode::LoadGlobal, Operand::name(name))
    }

    pub fn load_attr(&mut self, attr: &str) -> CodeOffset {
        self.emit_with(OpCode::LoadAttr, Operand::name(attr))
    }

    pub fn store_attr(&mut self, attr: &str) -> CodeOffset {
        self.emit_with(OpCode::StoreAttr, Operand::name(attr))
    }

    pub fn call(&mut self, positional: u32) -> CodeOffset {
        self.emit_arg(OpCode::CallFunction, positional)
    }

    /// Encodes all pending jumps and returns the scope.
    pub fn finish(mut self) -> anyhow::Result<CodeScope> {
        for (index, label) in &self.fixups {
            let target = self.labels[label.0].ok_or_else(|| {
                anyhow!("label {} used by {} is never bound", label.0, self.name)
            })?;
            let instr = &mut self.instructions[*index];
            let arg = match instr.op.jump_addressing() {
                Some(JumpAddressing::Absolute) => target,
                Some(JumpAddressing::Relative) => {
                    let base = instr.address + self.metadata.relative_jump_width;
                    if target < base {
                        bail!(
                            "relative jump at {} in {} cannot reach {}",
                            instr.address,
                            self.name,
                            target
                        );
                    }
                    target - base
                }
                None => bail!("{:?} at {} does not carry a jump", instr.op, instr.address),
            };
            instr.operand = Operand::Arg(arg);
        }
        let bound = self.labels.iter().flatten().copied().collect::<Vec<_>>();
        for instr in &mut self.instructions {
            instr.is_jump_target = bound.contains(&instr.address);
        }
        Ok(CodeScope::new(
            self.id,
            self.name,
            self.metadata,
            self.instructions,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_jumps_by_addressing_mode() {
        let mut asm = ScopeAssembler::new("f");
        let top = asm.new_label();
        let out = asm.new_label();
        asm.bind(top);
        asm.load_name("c");
        asm.jump(OpCode::PopJumpIfFalse, out);
        asm.jump(OpCode::JumpForward, out);
        asm.jump(OpCode::JumpAbsolute, top);
        asm.bind(out);
        asm.load_const_none();
        asm.emit(OpCode::ReturnValue);
        let scope = asm.finish().unwrap();

        let args = scope
            .instructions()
            .iter()
            .map(|instr| instr.operand.as_arg())
            .collect::<Vec<_>>();
        assert_eq!(args[1], Some(12));
        assert_eq!(args[2], Some(3));
        assert_eq!(args[3], Some(0));
        assert!(scope.instructions()[0].is_jump_target);
        assert!(scope.instructions()[4].is_jump_target);
        assert!(!scope.instructions()[1].is_jump_target);
    }

    #[test]
    fn unbound_labels_are_errors() {
        let mut asm = ScopeAssembler::new("f");
        let nowhere = asm.new_label();
        asm.jump(OpCode::JumpAbsolute, nowhere);
        assert!(asm.finish().is_err());
    }
}
