//! `stackwire outputs` command implementation.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use stackwire_core::Topology;
use stackwire_runtime::FileStateStore;

use super::load_stack;

/// State file for `stack_path`, unless one is given explicitly.
fn state_path(stack_path: &Path, state: Option<&Path>) -> Result<PathBuf> {
    match state {
        Some(state) => Ok(state.to_path_buf()),
        None => {
            let config = load_stack(stack_path)?;
            Ok(config.deployment.state_path(&config.name))
        }
    }
}

pub fn read_state(stack_path: &Path, state: Option<&Path>) -> Result<Topology> {
    let path = state_path(stack_path, state)?;
    FileStateStore::read(&path)
        .with_context(|| format!("Failed to read state file {}", path.display()))
}

pub fn print_outputs(outputs: &BTreeMap<String, String>) {
    if outputs.is_empty() {
        println!("\nNo outputs.");
        return;
    }

    let width = outputs.keys().map(String::len).max().unwrap_or(0);
    println!("\nOutputs ({}):", outputs.len());
    println!("{}", "─".repeat(60));
    for (name, value) in outputs {
        println!("  {:<width$}  {}", name, value, width = width);
    }
}

pub fn run(stack_path: &Path, state: Option<&Path>, json: bool) -> Result<()> {
    let topology = read_state(stack_path, state)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&topology.outputs)?);
        return Ok(());
    }

    if !topology.complete {
        println!(
            "⚠️  State of '{}' is from an apply that did not complete; outputs may be partial.",
            topology.name
        );
    }
    print_outputs(&topology.outputs);
    Ok(())
}
