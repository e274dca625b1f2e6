// Copyright (c) Asymptotic
// SPDX-License-Identifier: Apache-2.0

mod common;

use std::cell::RefCell;

use bytecode_flow::{
    assembler::ScopeAssembler,
    instruction::{OpCode, ScopeId, ScopeMetadata},
    options::AnalysisOptions,
    pipeline::{default_pipeline, Program, ScopeTarget},
};
use common::*;

#[test]
fn default_pipeline_attaches_chains() {
    init_logging();
    let options = AnalysisOptions::default();
    let pipeline = default_pipeline();
    assert_eq!(pipeline.processor_names(), vec!["dominators", "def_use"]);

    let targets = pipeline.run(&Program::new(all_scopes()), &options).unwrap();
    assert_eq!(targets.len(), all_scopes().len());
    assert!(targets.iter().all(|target| target.def_use.is_some()));

    let dump = pipeline.dump_results(&targets);
    assert!(dump.contains("=== dominators ==="));
    assert!(dump.contains("=== def_use ==="));
    assert!(dump.contains("x defined in b0 used in b0"));
    assert!(dump.contains("escaped: g"));
}

#[test]
fn hook_runs_after_each_processor() {
    init_logging();
    let options = AnalysisOptions::default();
    let mut targets = vec![ScopeTarget::new(straight_line(), &options)];
    let seen = RefCell::new(vec![]);
    default_pipeline()
        .run_with_hook(&mut targets, &options, |step, processor, targets| {
            seen.borrow_mut().push((step, processor.name(), targets.len()));
        })
        .unwrap();
    assert_eq!(
        seen.into_inner(),
        vec![(1, "dominators".to_string(), 1), (2, "def_use".to_string(), 1)]
    );
}

#[test]
fn failing_analysis_names_the_scope() {
    init_logging();
    let options = AnalysisOptions {
        max_dataflow_steps: 1,
        ..AnalysisOptions::default()
    };
    let error = default_pipeline()
        .run(&Program::new(vec![diamond()]), &options)
        .unwrap_err();
    assert!(format!("{:#}", error).contains("diamond"));
}

#[test]
fn stream_is_split_into_scopes() {
    init_logging();
    let mut module = ScopeAssembler::new("<module>");
    module.load_const_int(1);
    module.store_name("x");
    module.load_const_none();
    module.emit(OpCode::ReturnValue);
    let module = module.finish().unwrap();

    let metadata = ScopeMetadata {
        entry_address: 100,
        relative_jump_width: 3,
    };
    let mut function = ScopeAssembler::with_scope(ScopeId(1), "f", metadata);
    function.load_fast("x");
    function.emit(OpCode::ReturnValue);
    let function = function.finish().unwrap();

    let stream = module
        .instructions()
        .iter()
        .chain(function.instructions())
        .cloned()
        .collect::<Vec<_>>();
    let program = Program::from_stream(&stream, &AnalysisOptions::default());
    assert_eq!(program.scopes().len(), 2);
    assert_eq!(program.scopes()[0].name, "<module>");
    assert_eq!(program.scopes()[0].instructions().len(), 4);

    let function = program.scope(ScopeId(1)).unwrap();
    assert_eq!(function.name, "scope#1");
    assert_eq!(function.metadata.entry_address, 100);
    assert_eq!(function.instructions().len(), 2);

    let targets = default_pipeline()
        .run(&program, &AnalysisOptions::default())
        .unwrap();
    let chains = targets[1].def_use.as_ref().unwrap();
    assert!(chains.is_escaped("x"));
}
