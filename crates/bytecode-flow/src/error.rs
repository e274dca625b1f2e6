// Copyright (c) Asymptotic
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

use crate::{control_flow::BlockId, instruction::CodeOffset};

/// Failures which abort a single analysis call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    #[error("dataflow analysis did not converge within {max_steps} steps")]
    NonTermination { max_steps: usize },
    #[error("dataflow analysis was run without a direction")]
    MissingDirection,
}

/// Recoverable inconsistencies found while building a control-flow graph. The graph is still
/// produced; the offending construct is left in a best-effort state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralIssue {
    #[error("break at {address} in {block} has no enclosing loop")]
    UnresolvedBreak { block: BlockId, address: CodeOffset },
    #[error("continue at {address} in {block} has no enclosing loop")]
    UnresolvedContinue { block: BlockId, address: CodeOffset },
    #[error("loop {loop_block} resolving the jump in {block} does not dominate it")]
    NonDominatingLoop { block: BlockId, loop_block: BlockId },
    #[error("jump from {block} targets address {target} which starts no block")]
    UnknownJumpTarget { block: BlockId, target: CodeOffset },
    #[error("jump at {address} in {block} has no representable destination")]
    UndecodableJump { block: BlockId, address: CodeOffset },
    #[error("statement starting at {start} in {block} leaves {depth} values on the stack")]
    UnbalancedStatement {
        block: BlockId,
        start: CodeOffset,
        depth: i64,
    },
}
