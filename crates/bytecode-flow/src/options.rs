// Copyright (c) Asymptotic
// SPDX-License-Identifier: Apache-2.0

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Default ceiling on worklist pops before a dataflow analysis is declared non-terminating.
pub const DEFAULT_MAX_DATAFLOW_STEPS: usize = 500;

/// Options steering CFG construction and dataflow analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisOptions {
    /// Worklist pops allowed per dataflow run.
    pub max_dataflow_steps: usize,
    /// Width added to an instruction's own address when resolving a relative jump, used when a
    /// scope does not carry its own convention.
    pub relative_jump_width: u32,
    /// Remove nodes with no predecessors whose first instruction is a jump.
    pub prune_unreachable_jumps: bool,
    /// Report break/continue resolutions whose loop does not dominate the jumping node.
    pub require_dominating_loop: bool,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            max_dataflow_steps: DEFAULT_MAX_DATAFLOW_STEPS,
            relative_jump_width: 3,
            prune_unreachable_jumps: true,
            require_dominating_loop: true,
        }
    }
}

impl AnalysisOptions {
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        toml::from_str(content).context("parsing analysis options")
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        toml::to_string(self).context("serializing analysis options")
    }
}
