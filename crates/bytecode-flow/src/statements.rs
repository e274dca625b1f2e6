// Copyright (c) Asymptotic
// SPDX-License-Identifier: Apache-2.0

//! Stack-effect driven recovery of statement boundaries.
//!
//! A statement ends after the instruction which brings the operand stack back to (or below) the
//! depth it started at. The operand stack is simulated symbolically so that names flowing into
//! stores, attribute accesses and deletes can be attributed to the statement. No expression
//! tree is built.

use log::debug;

use crate::{
    control_flow::BasicBlock,
    instruction::{CodeOffset, Instruction, NameAccess, OpCode},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub start: CodeOffset,
    /// Address of the last instruction of the statement.
    pub end: CodeOffset,
    /// Names assigned, with attribute targets as dotted paths.
    pub stores: Vec<String>,
    pub loads: Vec<String>,
    pub deletes: Vec<String>,
    /// False if the block ended before the stack returned to its initial depth.
    pub balanced: bool,
    /// Stack depth left when the statement was closed.
    pub depth: i64,
}

impl Statement {
    fn open(start: CodeOffset) -> Self {
        Self {
            start,
            end: start,
            stores: vec![],
            loads: vec![],
            deletes: vec![],
            balanced: true,
            depth: 0,
        }
    }

    pub fn is_assignment(&self) -> bool {
        !self.stores.is_empty()
    }

    /// Names read by the statement, deleted names included.
    pub fn uses(&self) -> impl Iterator<Item = &str> {
        self.loads
            .iter()
            .chain(self.deletes.iter())
            .map(String::as_str)
    }
}

/// Splits the instructions of `block` into statements.
pub fn split_statements(block: &BasicBlock) -> Vec<Statement> {
    let mut splitter = Splitter::default();
    for instr in block.instructions() {
        splitter.step(instr);
    }
    splitter.finish()
}

#[derive(Default)]
struct Splitter {
    statements: Vec<Statement>,
    current: Option<Statement>,
    /// Symbolic operand stack; an entry is the name path of the value if it is known.
    stack: Vec<Option<String>>,
    depth: i64,
}

impl Splitter {
    fn step(&mut self, instr: &Instruction) {
        let statement = self
            .current
            .get_or_insert_with(|| Statement::open(instr.address));
        statement.end = instr.address;
        let effect = instr.stack_effect();
        self.depth += effect.net();

        let name = instr.operand.as_name();
        match (instr.op.name_access(), name) {
            (Some(NameAccess::Load), Some(name)) => {
                statement.loads.push(name.to_string());
                self.stack.push(Some(name.to_string()));
            }
            (Some(NameAccess::Store), Some(name)) => {
                self.stack.pop();
                statement.stores.push(name.to_string());
            }
            (Some(NameAccess::Delete), Some(name)) => {
                statement.deletes.push(name.to_string());
            }
            (Some(NameAccess::LoadAttr), Some(attr)) => {
                let path = self.stack.pop().flatten().map(|base| format!("{}.{}", base, attr));
                if let Some(path) = &path {
                    statement.loads.push(path.clone());
                }
                self.stack.push(path);
            }
            (Some(NameAccess::StoreAttr), Some(attr)) => {
                let object = self.stack.pop().flatten();
                self.stack.pop();
                if let Some(object) = object {
                    statement.stores.push(format!("{}.{}", object, attr));
                }
            }
            (Some(NameAccess::DeleteAttr), Some(attr)) => {
                if let Some(object) = self.stack.pop().flatten() {
                    statement.deletes.push(format!("{}.{}", object, attr));
                }
            }
            _ => simulate(&mut self.stack, instr.op, effect.pops, effect.pushes),
        }

        if instr.op != OpCode::ExtendedArg && self.depth <= 0 {
            self.close(true);
        }
    }

    fn close(&mut self, balanced: bool) {
        if let Some(mut statement) = self.current.take() {
            statement.balanced = balanced;
            statement.depth = self.depth;
            self.statements.push(statement);
        }
        self.stack.clear();
        self.depth = 0;
    }

    fn finish(mut self) -> Vec<Statement> {
        if self.current.is_some() {
            debug!(
                "statement left open with {} values on the stack at end of block",
                self.depth
            );
            self.close(false);
        }
        self.statements
    }
}

fn simulate(stack: &mut Vec<Option<String>>, op: OpCode, pops: u32, pushes: u32) {
    match op {
        OpCode::DupTop => {
            let top = stack.last().cloned().flatten();
            stack.push(top);
        }
        OpCode::RotTwo if stack.len() >= 2 => {
            let len = stack.len();
            stack.swap(len - 1, len - 2);
        }
        OpCode::RotThree if stack.len() >= 3 => {
            if let Some(top) = stack.pop() {
                let len = stack.len();
                stack.insert(len - 2, top);
            }
        }
        _ => {
            for _ in 0..pops {
                stack.pop();
            }
            stack.extend((0..pushes).map(|_| None));
        }
    }
}
