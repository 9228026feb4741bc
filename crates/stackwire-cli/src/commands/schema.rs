//! `stackwire schema` command implementation.

use anyhow::{Context, Result, anyhow};
use serde_json::{Map, Value};
use std::path::Path;

use stackwire_core::StackConfig;
use stackwire_policy::{render_openapi, validate_group};

use super::load_stack;

/// OpenAPI documents for an agent's action groups.
///
/// A single group renders as its document; several render as an object
/// keyed by group name.
pub fn render(config: &StackConfig, agent_id: &str, group: Option<&str>) -> Result<Value> {
    let agent = config
        .agent(agent_id)
        .ok_or_else(|| anyhow!("agent '{}' is not declared in stack '{}'", agent_id, config.name))?;

    let groups: Vec<_> = match group {
        Some(name) => vec![agent
            .action_group(name)
            .ok_or_else(|| anyhow!("agent '{}' has no action group '{}'", agent_id, name))?],
        None => agent.action_groups.iter().collect(),
    };

    for group in &groups {
        validate_group(&agent.id, group)
            .with_context(|| format!("Action group '{}' is invalid", group.name))?;
    }

    if let [group] = groups.as_slice() {
        return Ok(render_openapi(group));
    }
    let documents: Map<String, Value> = groups
        .into_iter()
        .map(|group| (group.name.clone(), render_openapi(group)))
        .collect();
    Ok(Value::Object(documents))
}

pub fn run(stack_path: &Path, agent_id: &str, group: Option<&str>) -> Result<()> {
    let config = load_stack(stack_path)?;
    let document = render(&config, agent_id, group)?;
    println!("{}", serde_json::to_string_pretty(&document)?);
    Ok(())
}
