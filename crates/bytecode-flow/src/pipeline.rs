// Copyright (c) Asymptotic
// SPDX-License-Identifier: Apache-2.0

//! Processing pipeline over the scopes of a program.
//!
//! Each scope is analyzed in isolation: its [`ScopeTarget`] owns the control-flow graph and the
//! results attached by processors. Processors run breadth-first, i.e. a processor can expect
//! that all processors before it in the pipeline have run on every scope.

use std::fmt::{self, Formatter};

use anyhow::Context;
use itertools::Itertools;
use log::debug;

use crate::{
    control_flow::ControlFlowGraph,
    def_use::DefUse,
    graph::{FlowGraph, NodeId},
    instruction::{CodeScope, Instruction, ScopeId, ScopeMetadata},
    options::AnalysisOptions,
};

/// The scopes of a decoded program, in order of first appearance in the stream.
#[derive(Debug, Clone, Default)]
pub struct Program {
    scopes: Vec<CodeScope>,
}

impl Program {
    pub fn new(scopes: Vec<CodeScope>) -> Self {
        Self { scopes }
    }

    /// Separates a stream interleaving several scopes. The first scope is the module body; the
    /// entry of every scope is its lowest address.
    pub fn from_stream(stream: &[Instruction], options: &AnalysisOptions) -> Self {
        let ids = stream.iter().map(|instr| instr.scope).unique().collect_vec();
        let scopes = ids
            .iter()
            .enumerate()
            .map(|(position, id)| {
                let entry_address = stream
                    .iter()
                    .filter(|instr| instr.scope == *id)
                    .map(|instr| instr.address)
                    .min()
                    .unwrap_or(0);
                let metadata = ScopeMetadata {
                    entry_address,
                    relative_jump_width: options.relative_jump_width,
                };
                let name = if position == 0 {
                    "<module>".to_string()
                } else {
                    id.to_string()
                };
                CodeScope::from_stream(*id, name, metadata, stream)
            })
            .collect();
        Self { scopes }
    }

    pub fn scopes(&self) -> &[CodeScope] {
        &self.scopes
    }

    pub fn scope(&self, id: ScopeId) -> Option<&CodeScope> {
        self.scopes.iter().find(|scope| scope.id == id)
    }
}

/// A scope under analysis together with the results attached to it.
#[derive(Debug)]
pub struct ScopeTarget {
    pub scope: CodeScope,
    pub cfg: ControlFlowGraph,
    pub def_use: Option<DefUse>,
}

impl ScopeTarget {
    pub fn new(scope: CodeScope, options: &AnalysisOptions) -> Self {
        let cfg = ControlFlowGraph::build(&scope, options);
        Self {
            scope,
            cfg,
            def_use: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.scope.name
    }
}

pub trait ScopeProcessor {
    /// Processes one scope, attaching results to the target.
    fn process(&self, target: &mut ScopeTarget, options: &AnalysisOptions) -> anyhow::Result<()>;

    /// Returns a name for this processor. This should be suitable as a file suffix.
    fn name(&self) -> String;

    /// Called once before any `process` call is issued.
    fn initialize(&self, _targets: &[ScopeTarget]) {}

    /// Called once after the last `process` call.
    fn finalize(&self, _targets: &[ScopeTarget]) {}

    /// A function which creates a dump of the processors results, for debugging.
    fn dump_result(&self, _f: &mut Formatter<'_>, _targets: &[ScopeTarget]) -> fmt::Result {
        Ok(())
    }
}

pub struct ProcessorResultDisplay<'a> {
    pub targets: &'a [ScopeTarget],
    pub processor: &'a dyn ScopeProcessor,
}

impl fmt::Display for ProcessorResultDisplay<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.processor.dump_result(f, self.targets)
    }
}

/// A processing pipeline for scope targets.
#[derive(Default)]
pub struct ScopePipeline {
    processors: Vec<Box<dyn ScopeProcessor>>,
}

impl ScopePipeline {
    /// Adds a processor to this pipeline. Processors are called in the order they have been
    /// added.
    pub fn add_processor(&mut self, processor: Box<dyn ScopeProcessor>) {
        self.processors.push(processor)
    }

    pub fn processor_names(&self) -> Vec<String> {
        self.processors.iter().map(|processor| processor.name()).collect()
    }

    /// Builds a target per scope of `program` and runs the pipeline on them.
    pub fn run(
        &self,
        program: &Program,
        options: &AnalysisOptions,
    ) -> anyhow::Result<Vec<ScopeTarget>> {
        let mut targets = program
            .scopes()
            .iter()
            .cloned()
            .map(|scope| ScopeTarget::new(scope, options))
            .collect_vec();
        self.run_with_hook(&mut targets, options, |_, _, _| {})?;
        Ok(targets)
    }

    /// Runs the pipeline, calling `hook_after_each_processor` with the step count once a
    /// processor has seen every target.
    pub fn run_with_hook<H>(
        &self,
        targets: &mut [ScopeTarget],
        options: &AnalysisOptions,
        hook_after_each_processor: H,
    ) -> anyhow::Result<()>
    where
        H: Fn(usize, &dyn ScopeProcessor, &[ScopeTarget]),
    {
        for (step_count, processor) in self.processors.iter().enumerate() {
            processor.initialize(targets);
            for target in targets.iter_mut() {
                debug!("running `{}` on {}", processor.name(), target.name());
                processor.process(target, options).with_context(|| {
                    format!("processor `{}` failed on {}", processor.name(), target.name())
                })?;
            }
            processor.finalize(targets);
            hook_after_each_processor(step_count + 1, processor.as_ref(), targets);
        }
        Ok(())
    }

    /// Renders the results of every processor.
    pub fn dump_results(&self, targets: &[ScopeTarget]) -> String {
        self.processors
            .iter()
            .map(|processor| {
                format!(
                    "=== {} ===\n{}",
                    processor.name(),
                    ProcessorResultDisplay {
                        targets,
                        processor: processor.as_ref(),
                    }
                )
            })
            .join("\n")
    }
}

/// Computes and caches dominators, post-dominators and control dependence.
pub struct DominatorProcessor;

impl ScopeProcessor for DominatorProcessor {
    fn process(&self, target: &mut ScopeTarget, _options: &AnalysisOptions) -> anyhow::Result<()> {
        let dependence = target.cfg.control_dependence();
        debug!(
            "{}: {} control dependences",
            target.name(),
            dependence.edges().count()
        );
        Ok(())
    }

    fn name(&self) -> String {
        "dominators".to_string()
    }

    fn dump_result(&self, f: &mut Formatter<'_>, targets: &[ScopeTarget]) -> fmt::Result {
        for target in targets {
            writeln!(f, "{}:", target.name())?;
            let cfg = &target.cfg;
            let dominators = cfg.dominators();
            for node in cfg.node_ids() {
                let show = |parent: Option<NodeId>| {
                    parent.map_or_else(|| "-".to_string(), |parent| parent.to_string())
                };
                writeln!(
                    f,
                    "  {} {}: idom {} ipdom {}",
                    node,
                    cfg.node_label(node),
                    show(dominators.immediate_dominator(node)),
                    show(dominators.immediate_post_dominator(node)),
                )?;
            }
        }
        Ok(())
    }
}

/// Attaches definition-use chains to every scope.
pub struct DefUseProcessor;

impl ScopeProcessor for DefUseProcessor {
    fn process(&self, target: &mut ScopeTarget, options: &AnalysisOptions) -> anyhow::Result<()> {
        let def_use = DefUse::compute(&target.cfg, options.max_dataflow_steps)
            .with_context(|| format!("computing def-use chains of {}", target.name()))?;
        target.def_use = Some(def_use);
        Ok(())
    }

    fn name(&self) -> String {
        "def_use".to_string()
    }

    fn dump_result(&self, f: &mut Formatter<'_>, targets: &[ScopeTarget]) -> fmt::Result {
        for target in targets {
            let Some(def_use) = &target.def_use else {
                continue;
            };
            writeln!(f, "{}:", target.name())?;
            for (var, gens) in &def_use.definitions {
                for (gen_block, use_blocks) in gens {
                    writeln!(
                        f,
                        "  {} defined in {} used in {}",
                        var,
                        gen_block,
                        use_blocks.iter().join(", ")
                    )?;
                }
            }
            if !def_use.escaped.is_empty() {
                writeln!(f, "  escaped: {}", def_use.escaped.iter().join(", "))?;
            }
        }
        Ok(())
    }
}

/// The pipeline computing structure and def-use chains of every scope.
pub fn default_pipeline() -> ScopePipeline {
    let mut pipeline = ScopePipeline::default();
    pipeline.add_processor(Box::new(DominatorProcessor));
    pipeline.add_processor(Box::new(DefUseProcessor));
    pipeline
}
