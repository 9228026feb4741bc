//! `stackwire apply` command implementation.
//!
//! Applies against the in-process simulated control plane, with file-backed
//! state, lock and audit trail from the stack's `deployment` section.
//! Ctrl-C stops the run before its next step; the partial state is saved and
//! the next `apply` resumes from it.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use stackwire_runtime::{Deployer, LocalProvisioner};

use super::outputs::print_outputs;
use super::{load_stack, plan_stack};

pub async fn run(
    stack_path: &Path,
    state: Option<PathBuf>,
    concurrency: Option<usize>,
) -> Result<()> {
    let mut config = load_stack(stack_path)?;
    if let Some(state) = state {
        config.deployment.state_file = Some(state);
    }
    if let Some(concurrency) = concurrency {
        config.deployment.concurrency = concurrency;
    }

    let order = plan_stack(&config)?;
    let state_path = config.deployment.state_path(&order.name);

    let provisioner = LocalProvisioner::new(&order.account, &order.region);
    let deployer = Deployer::from_config(provisioner, &order.name, &config.deployment)
        .context("Failed to open audit log")?;

    let abort = deployer.abort_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping before the next step");
            abort.raise();
        }
    });

    println!(
        "🚀 Applying stack '{}': {} step(s), concurrency {}",
        order.name,
        order.len(),
        config.deployment.effective_concurrency()
    );

    match deployer.apply(&order).await {
        Ok(topology) => {
            let deferred = topology.deferred().count();
            println!(
                "\n✅ Applied {} node(s) and {} grant(s){}",
                topology.nodes.len() - deferred,
                topology.grants.len(),
                if deferred > 0 {
                    format!(", {} deferred", deferred)
                } else {
                    String::new()
                }
            );
            println!("State saved to {}", state_path.display());
            print_outputs(&topology.outputs);
            Ok(())
        }
        Err(failure) => {
            let applied = failure
                .topology
                .nodes
                .keys()
                .filter(|node| failure.topology.is_applied(node))
                .count();
            eprintln!(
                "\n❌ Apply halted after {} of {} node(s); state saved to {}",
                applied,
                order.len(),
                state_path.display()
            );
            eprintln!("   Re-run `stackwire apply` to resume.");
            Err(anyhow::Error::new(failure.error).context(format!("Apply of '{}' failed", order.name)))
        }
    }
}
