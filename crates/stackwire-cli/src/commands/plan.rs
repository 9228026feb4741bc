//! `stackwire plan` command implementation.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;

use stackwire_core::Grant;
use stackwire_planner::{ExecutionOrder, PlannedNode};
use stackwire_policy::{PermissionBinder, PrincipalDirectory};

use super::{load_stack, plan_stack};

/// Machine-readable plan.
#[derive(Debug, Serialize)]
pub struct PlanReport<'a> {
    pub name: &'a str,
    pub account: &'a str,
    pub region: &'a str,
    pub steps: &'a [PlannedNode],
    pub grants: BTreeSet<Grant>,
}

/// Every grant a full apply of `order` issues.
///
/// Assumes every principal exists, which is the state right before the
/// last tier runs.
pub fn planned_grants(order: &ExecutionOrder) -> Result<BTreeSet<Grant>> {
    let mut principals = PrincipalDirectory::new();
    for planned in &order.nodes {
        if planned.node.has_principal() {
            principals.insert(planned.node.clone());
        }
    }
    PermissionBinder::new(&order.catalog, &order.registry)
        .bind(&order.agents, &principals)
        .context("Failed to derive grants")
}

pub fn run(stack_path: &Path, json: bool) -> Result<()> {
    let config = load_stack(stack_path)?;
    let order = plan_stack(&config)?;
    let grants = planned_grants(&order)?;

    if json {
        let report = PlanReport {
            name: &order.name,
            account: &order.account,
            region: &order.region,
            steps: &order.nodes,
            grants,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "📋 Plan for stack '{}' ({} / {}): {} step(s)",
        order.name,
        order.account,
        order.region,
        order.len()
    );

    for (tier, nodes) in order.tiers() {
        println!("\n{} ({}):", tier, nodes.len());
        println!("{}", "─".repeat(60));
        for planned in nodes {
            if planned.depends_on.is_empty() {
                println!("  {:>3}. {}", planned.step, planned.node);
            } else {
                let depends_on: Vec<String> =
                    planned.depends_on.iter().map(ToString::to_string).collect();
                println!(
                    "  {:>3}. {}  <- {}",
                    planned.step,
                    planned.node,
                    depends_on.join(", ")
                );
            }
        }
    }

    println!("\nGrants ({}):", grants.len());
    println!("{}", "─".repeat(60));
    for grant in &grants {
        println!("  {}", grant);
    }

    Ok(())
}
