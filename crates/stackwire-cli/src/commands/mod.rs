//! CLI command implementations for the stackwire binary.

pub mod apply;
pub mod check;
pub mod outputs;
pub mod plan;
pub mod schema;

use anyhow::{Context, Result};
use std::path::Path;

use stackwire_core::StackConfig;
use stackwire_planner::{ExecutionOrder, Planner, TierPlanner};

/// Load a stack file with its function and action group files.
pub fn load_stack(path: &Path) -> Result<StackConfig> {
    StackConfig::load_with_context(path)
        .with_context(|| format!("Failed to load stack file {}", path.display()))
}

/// Validate and order a loaded stack.
pub fn plan_stack(config: &StackConfig) -> Result<ExecutionOrder> {
    TierPlanner::new()
        .plan(config)
        .with_context(|| format!("Stack '{}' failed validation", config.name))
}
