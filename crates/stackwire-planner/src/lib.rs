//! Execution planning.
//!
//! A plan places every declared node in one of four tiers
//! (resources, functions, agents, action groups) and records what each node
//! depends on. All validation happens here: a plan is either complete or not
//! produced.

use serde::Serialize;
use std::collections::BTreeSet;

use stackwire_core::{
    AgentDef, FunctionRegistry, NodeId, OutputDef, ResourceCatalog, StackConfig, Tier, ValidationError,
    validate_id,
};
use stackwire_policy::validate_agent;

pub const IDLE_TIMEOUT_RANGE: std::ops::RangeInclusive<u32> = 60..=3600;

/// Produces an execution order from a stack declaration.
pub trait Planner: Send + Sync {
    fn plan(&self, stack: &StackConfig) -> Result<ExecutionOrder, ValidationError>;
}

/// One node of the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedNode {
    /// 1-based position in the plan.
    pub step: usize,
    pub node: NodeId,
    pub tier: Tier,
    pub depends_on: Vec<NodeId>,
}

/// A validated, dependency-ordered plan.
#[derive(Debug, Clone)]
pub struct ExecutionOrder {
    pub name: String,
    pub account: String,
    pub region: String,
    pub nodes: Vec<PlannedNode>,
    pub catalog: ResourceCatalog,
    pub registry: FunctionRegistry,
    pub agents: Vec<AgentDef>,
    pub outputs: Vec<OutputDef>,
}

impl ExecutionOrder {
    /// Nodes grouped by tier, lowest tier first. Empty tiers are skipped.
    pub fn tiers(&self) -> Vec<(Tier, Vec<&PlannedNode>)> {
        Tier::ALL
            .iter()
            .map(|tier| {
                (
                    *tier,
                    self.nodes.iter().filter(|n| n.tier == *tier).collect::<Vec<_>>(),
                )
            })
            .filter(|(_, nodes)| !nodes.is_empty())
            .collect()
    }

    /// Position of `node` in the plan.
    pub fn position(&self, node: &NodeId) -> Option<usize> {
        self.nodes.iter().position(|n| &n.node == node)
    }

    pub fn node(&self, node: &NodeId) -> Option<&PlannedNode> {
        self.nodes.iter().find(|n| &n.node == node)
    }

    pub fn agent(&self, id: &str) -> Option<&AgentDef> {
        self.agents.iter().find(|a| a.id == id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Planner ordering nodes strictly by tier, declaration order within a tier.
#[derive(Debug, Clone, Copy, Default)]
pub struct TierPlanner;

impl TierPlanner {
    pub fn new() -> Self {
        Self
    }
}

impl Planner for TierPlanner {
    fn plan(&self, stack: &StackConfig) -> Result<ExecutionOrder, ValidationError> {
        let mut catalog = ResourceCatalog::new();
        for resource in &stack.resources {
            catalog.declare(resource.clone())?;
        }

        let mut registry = FunctionRegistry::new();
        for function in &stack.functions {
            registry.register(&catalog, function.clone())?;
        }

        let mut agent_ids = BTreeSet::new();
        for agent in &stack.agents {
            validate_agent_declaration(agent)?;
            if !agent_ids.insert(agent.id.as_str()) {
                return Err(ValidationError::duplicate_agent(&agent.id));
            }
            validate_agent(agent, &registry)?;
        }

        let mut nodes = Vec::new();
        let mut push = |node: NodeId, depends_on: Vec<NodeId>| {
            nodes.push(PlannedNode {
                step: nodes.len() + 1,
                tier: node.tier(),
                node,
                depends_on,
            });
        };

        for resource in catalog.iter() {
            push(NodeId::resource(resource.id.clone()), Vec::new());
        }
        for function in registry.iter() {
            let depends_on = function
                .resource_references()
                .into_iter()
                .map(NodeId::resource)
                .collect();
            push(NodeId::function(function.id.clone()), depends_on);
        }
        // Agents wait on their targets so invoke grants can be issued right after creation.
        for agent in &stack.agents {
            let depends_on = agent
                .target_functions()
                .into_iter()
                .map(NodeId::function)
                .collect();
            push(NodeId::agent(agent.id.clone()), depends_on);
        }
        for agent in &stack.agents {
            for group in &agent.action_groups {
                push(
                    NodeId::action_group(agent.id.clone(), group.name.clone()),
                    vec![
                        NodeId::agent(agent.id.clone()),
                        NodeId::function(group.target_function.clone()),
                    ],
                );
            }
        }

        check_order(&nodes)?;
        check_outputs(&stack.outputs, &nodes)?;

        tracing::info!(
            stack = %stack.name,
            nodes = nodes.len(),
            resources = catalog.len(),
            functions = registry.len(),
            agents = stack.agents.len(),
            "Plan computed"
        );

        Ok(ExecutionOrder {
            name: stack.name.clone(),
            account: stack.account.clone(),
            region: stack.region.clone(),
            nodes,
            catalog,
            registry,
            agents: stack.agents.clone(),
            outputs: stack.outputs.clone(),
        })
    }
}

fn validate_agent_declaration(agent: &AgentDef) -> Result<(), ValidationError> {
    let node = NodeId::agent(agent.id.clone());
    validate_id(&agent.id)
        .map_err(|reason| ValidationError::invalid_declaration(node.clone(), reason))?;
    if agent.foundation_model.trim().is_empty() {
        return Err(ValidationError::invalid_declaration(
            node,
            "foundation_model must not be empty",
        ));
    }
    if !IDLE_TIMEOUT_RANGE.contains(&agent.idle_timeout_seconds) {
        return Err(ValidationError::invalid_declaration(
            node,
            format!(
                "idle_timeout_seconds {} is outside {}..={}",
                agent.idle_timeout_seconds,
                IDLE_TIMEOUT_RANGE.start(),
                IDLE_TIMEOUT_RANGE.end()
            ),
        ));
    }
    Ok(())
}

/// Every dependency must be planned, and planned earlier, in a lower tier.
fn check_order(nodes: &[PlannedNode]) -> Result<(), ValidationError> {
    for (index, planned) in nodes.iter().enumerate() {
        for dependency in &planned.depends_on {
            match nodes.iter().position(|n| &n.node == dependency) {
                None => {
                    return Err(ValidationError::dependency_cycle(
                        planned.node.clone(),
                        dependency,
                        "dependency is not declared",
                    ));
                }
                Some(position) if position >= index || nodes[position].tier >= planned.tier => {
                    return Err(ValidationError::dependency_cycle(
                        planned.node.clone(),
                        dependency,
                        "dependency is not in an earlier tier",
                    ));
                }
                Some(_) => {}
            }
        }
    }
    Ok(())
}

fn check_outputs(outputs: &[OutputDef], nodes: &[PlannedNode]) -> Result<(), ValidationError> {
    let mut names = BTreeSet::new();
    for output in outputs {
        let node: NodeId = output.node.parse().map_err(|reason: String| {
            ValidationError::new(
                stackwire_core::ValidationErrorKind::InvalidDeclaration,
                format!("Invalid declaration of output '{}': {}", output.name, reason),
            )
        })?;
        if output.name.trim().is_empty() || !names.insert(output.name.as_str()) {
            return Err(ValidationError::invalid_declaration(
                node,
                format!("output name '{}' is empty or used twice", output.name),
            ));
        }
        if !nodes.iter().any(|n| n.node == node) {
            return Err(ValidationError::invalid_declaration(
                node,
                format!("output '{}' refers to a node that is not planned", output.name),
            ));
        }
    }
    Ok(())
}
