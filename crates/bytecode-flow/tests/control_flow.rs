// Copyright (c) Asymptotic
// SPDX-License-Identifier: Apache-2.0

mod common;

use bytecode_flow::{
    build_cfg,
    control_flow::{BlockId, BranchKind, ControlFlowGraph, Jump, JumpTarget, NodeKind},
    error::StructuralIssue,
    graph::{FlowGraph, NodeId},
    instruction::{CodeScope, Instruction, OpCode, Operand, ScopeId, ScopeMetadata},
    options::AnalysisOptions,
};
use common::*;

fn build(scope: &CodeScope) -> ControlFlowGraph {
    init_logging();
    build_cfg(scope, &AnalysisOptions::default())
}

fn node(cfg: &ControlFlowGraph, block: usize) -> NodeId {
    cfg.node_of(BlockId(block)).unwrap()
}

#[test]
fn break_leaves_the_loop() {
    let cfg = build(&loop_with_break());
    assert_eq!(cfg.blocks().len(), 4);
    assert_eq!(cfg.nodes_of_kind(NodeKind::Condition).len(), 1);
    assert_eq!(cfg.nodes_of_kind(NodeKind::Loop), vec![node(&cfg, 0)]);
    assert!(cfg.issues().is_empty());

    let loop_end = cfg.block(BlockId(0)).end_target.unwrap();
    let after_loop = cfg.block_at(loop_end).unwrap();
    assert_eq!(cfg.block(after_loop).start_address, loop_end);
    let breaking = node(&cfg, 2);
    assert_eq!(cfg.successors(breaking), &[node(&cfg, after_loop.0)]);
    assert_eq!(
        cfg.graph()
            .find_edge(breaking, node(&cfg, after_loop.0))
            .map(|edge| edge.weight),
        Some(BranchKind::Unconditional)
    );
    assert!(!cfg.block(BlockId(2)).has_marker(JumpTarget::Break));
}

#[test]
fn loop_condition_branches_both_ways() {
    let cfg = build(&loop_with_break());
    let condition = node(&cfg, 1);
    assert_eq!(cfg.kind(condition), NodeKind::Condition);
    let kinds = cfg
        .graph()
        .out_edges(condition)
        .map(|edge| edge.weight)
        .collect::<Vec<_>>();
    assert_eq!(kinds.len(), 2);
    assert!(kinds.contains(&BranchKind::True));
    assert!(kinds.contains(&BranchKind::False));
}

#[test]
fn returns_reach_the_exit() {
    let cfg = build(&loop_with_break());
    let returning = node(&cfg, 3);
    assert_eq!(cfg.successors(returning), &[cfg.exit()]);
    assert_eq!(
        cfg.graph()
            .find_edge(returning, cfg.exit())
            .map(|edge| edge.weight),
        Some(BranchKind::Return)
    );
}

#[test]
fn continue_targets_innermost_loop_header() {
    let cfg = build(&nested_continue());
    let continuing = cfg.block_at(18).unwrap();
    let inner_header = cfg.block_at(12).unwrap();
    assert_eq!(cfg.block(inner_header).start_address, 12);
    assert_eq!(cfg.successors(node(&cfg, continuing.0)), &[node(&cfg, inner_header.0)]);

    let block = cfg.block(continuing);
    assert!(!block.has_marker(JumpTarget::Continue));
    assert!(block
        .jumps
        .contains(&Jump::new(JumpTarget::Address(12), BranchKind::Unconditional)));
    assert!(cfg.issues().is_empty());
}

#[test]
fn continue_follows_its_encoded_destination() {
    let cfg = build(&continue_to_condition());
    let continuing = cfg.block_at(13).unwrap();
    let condition = cfg.block_at(7).unwrap();
    assert_eq!(cfg.block(continuing).continue_target, Some(7));
    assert_eq!(cfg.successors(node(&cfg, continuing.0)), &[node(&cfg, condition.0)]);
    assert_eq!(cfg.kind(node(&cfg, condition.0)), NodeKind::Condition);
    assert!(cfg.issues().is_empty());
}

#[test]
fn raise_leaves_through_an_exception_edge() {
    let cfg = build(&raise_if());
    let raising = node(&cfg, 1);
    assert_eq!(cfg.successors(raising), &[cfg.exit()]);
    assert_eq!(
        cfg.graph()
            .find_edge(raising, cfg.exit())
            .map(|edge| edge.weight),
        Some(BranchKind::Exception)
    );
    assert!(!cfg.block(BlockId(1)).fallthrough);
    assert!(cfg.issues().is_empty());
}

#[test]
fn handlers_are_wired_to_their_end_target() {
    let cases = [
        (OpCode::SetupExcept, BranchKind::Exception),
        (OpCode::SetupFinally, BranchKind::Finally),
        (OpCode::SetupWith, BranchKind::Exception),
    ];
    for (setup, label) in cases {
        let cfg = build(&guarded(setup));
        assert_eq!(cfg.blocks().len(), 4, "{:?}", setup);
        let opener = node(&cfg, 0);
        assert_eq!(cfg.kind(opener), NodeKind::Except, "{:?}", setup);
        assert_eq!(cfg.block(BlockId(0)).end_target, Some(14), "{:?}", setup);
        assert_eq!(
            cfg.graph()
                .find_edge(opener, node(&cfg, 2))
                .map(|edge| edge.weight),
            Some(label),
            "{:?}",
            setup
        );
        assert_eq!(
            cfg.graph()
                .find_edge(opener, node(&cfg, 1))
                .map(|edge| edge.weight),
            Some(BranchKind::Unconditional),
            "{:?}",
            setup
        );
        assert!(cfg.issues().is_empty(), "{:?}: {:?}", setup, cfg.issues());
    }
}

#[test]
fn loop_not_dominating_its_break_is_reported() {
    let scope = jump_into_loop();
    let cfg = build(&scope);
    assert_eq!(cfg.kind(node(&cfg, 1)), NodeKind::Loop);
    assert_eq!(
        cfg.issues(),
        &[StructuralIssue::NonDominatingLoop {
            block: BlockId(3),
            loop_block: BlockId(1),
        }]
    );
    assert_eq!(cfg.successors(node(&cfg, 3)), &[node(&cfg, 4)]);
    assert_eq!(cfg.block(BlockId(4)).start_address, 15);

    let options = AnalysisOptions {
        require_dominating_loop: false,
        ..AnalysisOptions::default()
    };
    let relaxed = build_cfg(&scope, &options);
    assert!(relaxed.issues().is_empty());
    assert_eq!(relaxed.successors(node(&relaxed, 3)), &[node(&relaxed, 4)]);
}

#[test]
fn jump_into_an_instruction_is_reported() {
    let cfg = build(&misaligned_jump());
    assert_eq!(cfg.blocks().len(), 2);
    assert_eq!(
        cfg.issues(),
        &[StructuralIssue::UnknownJumpTarget {
            block: BlockId(0),
            target: 7,
        }]
    );
    assert_eq!(cfg.successors(node(&cfg, 0)), &[node(&cfg, 1)]);
}

#[test]
fn oversized_jump_is_reported() {
    let id = ScopeId(0);
    let instructions = vec![
        Instruction::new(0, OpCode::ExtendedArg, Operand::Arg(0x1_0000), id),
        Instruction::new(3, OpCode::JumpAbsolute, Operand::Arg(0), id),
        Instruction::new(6, OpCode::ReturnValue, Operand::None, id),
    ];
    let scope = CodeScope::new(id, "oversized", ScopeMetadata::default(), instructions);
    let cfg = build(&scope);
    assert_eq!(
        cfg.issues(),
        &[StructuralIssue::UndecodableJump {
            block: BlockId(0),
            address: 3,
        }]
    );
    assert_eq!(cfg.successors(node(&cfg, 0)), &[cfg.exit()]);
}

#[test]
fn iteration_blocks_are_not_unbalanced() {
    let cfg = build(&for_loop());
    assert_eq!(cfg.blocks().len(), 6);
    assert!(cfg.issues().is_empty(), "{:?}", cfg.issues());
    let prefix = cfg.statements(BlockId(1));
    assert_eq!(prefix.last().map(|statement| statement.balanced), Some(false));
    assert_eq!(cfg.kind(node(&cfg, 2)), NodeKind::Condition);
}

#[test]
fn unreachable_jumps_are_pruned() {
    let scope = nested_continue();
    let dead = BlockId(5);

    let pruned = build(&scope);
    assert_eq!(pruned.block(dead).start_address, 21);
    assert!(pruned.node_of(dead).is_none());

    let options = AnalysisOptions {
        prune_unreachable_jumps: false,
        ..AnalysisOptions::default()
    };
    let kept = build_cfg(&scope, &options);
    let dead_node = kept.node_of(dead).unwrap();
    assert_eq!(kept.graph().in_degree(dead_node), 0);
    assert_eq!(kept.node_count(), pruned.node_count() + 1);
    assert!(kept.dominators().immediate_dominator(dead_node).is_none());
}

#[test]
fn break_outside_loop_is_reported() {
    let cfg = build(&stray_break());
    assert_eq!(
        cfg.issues(),
        &[StructuralIssue::UnresolvedBreak {
            block: BlockId(0),
            address: 0,
        }]
    );
    assert_eq!(cfg.successors(node(&cfg, 0)), &[cfg.exit()]);
}

#[test]
fn single_entry_and_exit() {
    for scope in all_scopes() {
        let cfg = build(&scope);
        assert_eq!(cfg.nodes_of_kind(NodeKind::Entry), vec![cfg.entry()]);
        assert_eq!(cfg.nodes_of_kind(NodeKind::ImplicitReturn), vec![cfg.exit()]);
        assert!(cfg.predecessors(cfg.entry()).is_empty(), "{}", scope.name);
        assert!(cfg.successors(cfg.exit()).is_empty(), "{}", scope.name);
        let sources = cfg
            .node_ids()
            .filter(|node| cfg.predecessors(*node).is_empty())
            .collect::<Vec<_>>();
        assert_eq!(sources, vec![cfg.entry()], "{}", scope.name);
        for edge in cfg.graph().edges() {
            if edge.weight == BranchKind::Return {
                assert_eq!(edge.target, cfg.exit());
            }
        }
        for (id, weight) in cfg.graph().nodes() {
            if let Some(block) = weight.block {
                assert_eq!(cfg.node_of(block), Some(id));
                assert_eq!(cfg.block_of(id), Some(block));
            }
        }
    }
}

#[test]
fn dominance_is_a_partial_order() {
    for scope in all_scopes() {
        let cfg = build(&scope);
        let dominators = cfg.dominators();
        let reachable = cfg
            .node_ids()
            .filter(|node| dominators.immediate_dominator(*node).is_some())
            .collect::<Vec<_>>();
        for a in &reachable {
            assert!(dominators.dominates(*a, *a));
            assert!(dominators.dominates(cfg.entry(), *a));
            for b in &reachable {
                if a != b {
                    assert!(
                        !(dominators.dominates(*a, *b) && dominators.dominates(*b, *a)),
                        "{}: {} and {} dominate each other",
                        scope.name,
                        a,
                        b
                    );
                }
            }
        }
        for node in cfg.node_ids() {
            if dominators.immediate_post_dominator(node).is_some() {
                assert!(dominators.post_dominates(cfg.exit(), node));
            }
        }
    }
}

#[test]
fn frontier_nodes_are_just_out_of_reach() {
    for scope in all_scopes() {
        let cfg = build(&scope);
        let dominators = cfg.dominators();
        for node in cfg.node_ids() {
            for member in dominators.frontier(node) {
                assert!(!dominators.strictly_dominates(node, *member));
                assert!(cfg.predecessors(*member).iter().any(|pred| {
                    dominators.immediate_dominator(*pred).is_some()
                        && dominators.dominates(node, *pred)
                }));
            }
        }
    }
}

#[test]
fn branch_depends_on_its_condition() {
    let cfg = build(&diamond());
    let dependence = cfg.control_dependence();
    assert!(dependence.depends_on(node(&cfg, 1), node(&cfg, 0)));
    assert!(dependence.conditions_of(node(&cfg, 2)).is_none());
    assert!(cfg
        .dominators()
        .post_dominates(node(&cfg, 2), node(&cfg, 0)));
}

#[test]
fn block_lookup_by_address() {
    let cfg = build(&loop_with_break());
    assert_eq!(cfg.block_at(0), Some(BlockId(0)));
    assert_eq!(cfg.block_at(10), Some(BlockId(2)));
    assert_eq!(cfg.block_at(17), Some(BlockId(3)));
    assert_eq!(cfg.block_at(18), None);
}

#[test]
fn renders_graphviz() {
    let cfg = build(&loop_with_break());
    let dot = cfg.to_dot();
    assert!(dot.contains("digraph"));
    assert!(dot.contains("->"));
    assert!(dot.contains("loop [0, 3)"));
    let tree = cfg.dominators().to_dot(&cfg, true);
    assert!(tree.contains("digraph"));
    assert!(tree.contains("->"));
}
