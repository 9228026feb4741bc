//! Apply orchestration.
//!
//! The [`Deployer`] walks an [`ExecutionOrder`] tier by tier:
//!
//! 1. **Resources, functions, agents** - nodes of one tier are independent and
//!    run with bounded concurrency. Function and agent steps create their
//!    principal first, then the node, then any grants the ledger is missing.
//! 2. **Action groups** - attached one at a time through an
//!    [`ActionGroupContract`] per agent, so invoke permissions and operation
//!    ids are checked against what has actually been applied.
//! 3. **Outputs** - resolved from recorded handles and reported when changed.
//!
//! The first failure stops new steps from starting. Everything applied so far
//! is saved, so the next apply of the same plan picks up where this one
//! stopped without repeating earlier calls.

use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use stackwire_audit::{AuditError, AuditLogger};
use stackwire_core::{
    AttachMode, DeploymentConfig, EnvValue, FunctionDef, Grant, NodeId, NodeRecord,
    ProvisionedHandle, Tier, Topology, ValidationError, ValidationErrorKind,
};
use stackwire_planner::{ExecutionOrder, PlannedNode};
use stackwire_policy::{
    ActionGroupContract, PermissionBinder, PrincipalDirectory, pending_grants, render_openapi,
};

use crate::abort::AbortSignal;
use crate::error::{ApplyError, ApplyFailure};
use crate::lock::{DeploymentLock, FileLock, MemoryLock};
use crate::provisioner::{PrincipalSpec, ProvisionError, Provisioner};
use crate::state::{FileStateStore, MemoryStateStore, StateStore};

/// Output listing action groups an operator still has to attach.
pub const NEXT_STEPS_OUTPUT: &str = "next_steps";

/// Counts for one apply run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub applied: usize,
    pub skipped: usize,
    pub deferred: usize,
}

/// Result of one step of a concurrent tier, merged into the topology in plan order.
#[derive(Debug)]
struct StepOutcome {
    step: usize,
    node: NodeId,
    started: bool,
    principal: Option<ProvisionedHandle>,
    record: Option<NodeRecord>,
    grants: Vec<Grant>,
    duration_ms: u64,
    error: Option<ApplyError>,
}

impl StepOutcome {
    fn new(planned: &PlannedNode) -> Self {
        Self {
            step: planned.step,
            node: planned.node.clone(),
            started: false,
            principal: None,
            record: None,
            grants: Vec::new(),
            duration_ms: 0,
            error: None,
        }
    }
}

/// Applies execution orders against a provisioning backend.
pub struct Deployer<P: Provisioner> {
    provisioner: P,
    state: Arc<dyn StateStore>,
    lock: Arc<dyn DeploymentLock>,
    audit: Arc<AuditLogger>,
    concurrency: usize,
    abort: AbortSignal,
}

impl<P: Provisioner> Deployer<P> {
    /// Deployer with in-memory state and locking and no audit trail.
    pub fn new(provisioner: P) -> Self {
        Self {
            provisioner,
            state: Arc::new(MemoryStateStore::new()),
            lock: Arc::new(MemoryLock::new()),
            audit: Arc::new(AuditLogger::disabled()),
            concurrency: 1,
            abort: AbortSignal::new(),
        }
    }

    /// Deployer with file-backed state, lock and audit trail from `config`.
    pub fn from_config(
        provisioner: P,
        stack_name: &str,
        config: &DeploymentConfig,
    ) -> Result<Self, AuditError> {
        Ok(Self::new(provisioner)
            .with_state(Arc::new(FileStateStore::new(config.state_path(stack_name))))
            .with_lock(Arc::new(FileLock::new(config.lock_dir.clone())))
            .with_audit(Arc::new(AuditLogger::new(&config.audit)?))
            .with_concurrency(config.effective_concurrency()))
    }

    pub fn with_state(mut self, state: Arc<dyn StateStore>) -> Self {
        self.state = state;
        self
    }

    pub fn with_lock(mut self, lock: Arc<dyn DeploymentLock>) -> Self {
        self.lock = lock;
        self
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = audit;
        self
    }

    /// Maximum nodes of one tier in flight at once. Zero is treated as one.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Handle that stops the apply before its next step.
    pub fn abort_signal(&self) -> AbortSignal {
        self.abort.clone()
    }

    pub fn provisioner(&self) -> &P {
        &self.provisioner
    }

    /// Apply `order`, resuming from any saved state.
    ///
    /// On failure the returned [`ApplyFailure`] carries the partial topology,
    /// which has also been saved.
    pub async fn apply(&self, order: &ExecutionOrder) -> Result<Topology, ApplyFailure> {
        let _guard = self.lock.acquire(&order.name).map_err(|e| ApplyFailure {
            error: e.into(),
            topology: Topology::new(&order.name),
        })?;

        let mut topology = match self.state.load(&order.name).await {
            Ok(Some(topology)) => topology,
            Ok(None) => Topology::new(&order.name),
            Err(e) => {
                return Err(ApplyFailure {
                    error: e.into(),
                    topology: Topology::new(&order.name),
                });
            }
        };
        topology.complete = false;

        tracing::info!(
            topology = %order.name,
            nodes = order.len(),
            concurrency = self.concurrency,
            resumed = !topology.nodes.is_empty(),
            "Starting apply"
        );
        report_audit(self.audit.log_plan_computed(&order.name, order.len()).await);

        let result = match self.run(order, &mut topology).await {
            Ok(summary) => {
                topology.complete = true;
                self.state
                    .save(&topology)
                    .await
                    .map(|_| summary)
                    .map_err(ApplyError::from)
            }
            Err(error) => Err(error),
        };

        match result {
            Ok(summary) => {
                tracing::info!(
                    topology = %order.name,
                    applied = summary.applied,
                    skipped = summary.skipped,
                    deferred = summary.deferred,
                    "Apply complete"
                );
                report_audit(
                    self.audit
                        .log_apply_completed(&order.name, summary.applied, summary.skipped)
                        .await,
                );
                Ok(topology)
            }
            Err(error) => {
                topology.complete = false;
                if let Err(e) = self.state.save(&topology).await {
                    tracing::warn!(topology = %order.name, error = %e, "Failed to save partial state");
                }
                tracing::error!(topology = %order.name, error = %error, "Apply halted");
                report_audit(self.audit.log_apply_halted(&order.name, &error.to_string()).await);
                Err(ApplyFailure { error, topology })
            }
        }
    }

    async fn run(&self, order: &ExecutionOrder, topology: &mut Topology) -> Result<RunSummary, ApplyError> {
        let mut summary = RunSummary::default();
        for (tier, nodes) in order.tiers() {
            match tier {
                Tier::ActionGroup => {
                    self.attach_action_groups(order, &nodes, topology, &mut summary)
                        .await?
                }
                _ => self.apply_tier(order, &nodes, topology, &mut summary).await?,
            }
            self.state.save(topology).await?;
        }
        self.report_outputs(order, topology).await?;
        Ok(summary)
    }

    // =========================================================================
    // Concurrent tiers
    // =========================================================================

    async fn apply_tier(
        &self,
        order: &ExecutionOrder,
        nodes: &[&PlannedNode],
        topology: &mut Topology,
        summary: &mut RunSummary,
    ) -> Result<(), ApplyError> {
        // Nodes of one tier never depend on each other, so every step reads
        // the topology as it was when the tier started.
        let snapshot = topology.clone();
        let halted = AtomicBool::new(false);

        let outcomes: Vec<StepOutcome> = stream::iter(nodes.iter().copied())
            .map(|planned| self.apply_node(order, planned, &snapshot, &halted))
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut first_error = None;
        for outcome in outcomes {
            if let Some(error) = self.merge(outcome, topology, summary).await {
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn apply_node(
        &self,
        order: &ExecutionOrder,
        planned: &PlannedNode,
        snapshot: &Topology,
        halted: &AtomicBool,
    ) -> StepOutcome {
        let mut outcome = StepOutcome::new(planned);
        if halted.load(Ordering::SeqCst) {
            return outcome;
        }
        if self.abort.is_raised() {
            halted.store(true, Ordering::SeqCst);
            outcome.error = Some(ApplyError::Aborted {
                next_step: planned.step,
            });
            return outcome;
        }

        outcome.started = true;
        let start = Instant::now();
        let result = match &planned.node {
            NodeId::Resource(id) => self.apply_resource(order, planned, id, snapshot, &mut outcome).await,
            NodeId::Function(id) => self.apply_function(order, planned, id, snapshot, &mut outcome).await,
            NodeId::Agent(id) => self.apply_agent(order, planned, id, snapshot, &mut outcome).await,
            // attached sequentially
            NodeId::ActionGroup { .. } => Ok(()),
        };
        outcome.duration_ms = start.elapsed().as_millis() as u64;

        if let Err(error) = result {
            halted.store(true, Ordering::SeqCst);
            outcome.error = Some(error);
        }
        outcome
    }

    async fn apply_resource(
        &self,
        order: &ExecutionOrder,
        planned: &PlannedNode,
        id: &str,
        snapshot: &Topology,
        outcome: &mut StepOutcome,
    ) -> Result<(), ApplyError> {
        if snapshot.is_applied(&planned.node) {
            return Ok(());
        }
        let resource = order
            .catalog
            .get(id)
            .ok_or_else(|| undeclared(&planned.node))?;
        let handle = self
            .provisioner
            .create_resource(resource)
            .await
            .map_err(provisioning(planned, "create_resource"))?;
        outcome.record = Some(NodeRecord::applied(planned.node.clone(), handle));
        Ok(())
    }

    async fn apply_function(
        &self,
        order: &ExecutionOrder,
        planned: &PlannedNode,
        id: &str,
        snapshot: &Topology,
        outcome: &mut StepOutcome,
    ) -> Result<(), ApplyError> {
        let function = order
            .registry
            .get(id)
            .ok_or_else(|| undeclared(&planned.node))?;
        let role = self.ensure_principal(planned, snapshot, outcome).await?;

        if !snapshot.is_applied(&planned.node) {
            let env = resolve_env(function, snapshot)?;
            let handle = self
                .provisioner
                .create_function(function, &role, &env)
                .await
                .map_err(provisioning(planned, "create_function"))?;
            outcome.record = Some(NodeRecord::applied(planned.node.clone(), handle));
        }

        let mut principals = PrincipalDirectory::from_topology(snapshot);
        principals.insert(planned.node.clone());
        let desired = PermissionBinder::new(&order.catalog, &order.registry)
            .function_grants(id, &principals)?;
        self.issue_grants(planned, desired, &role, snapshot, outcome)
            .await
    }

    async fn apply_agent(
        &self,
        order: &ExecutionOrder,
        planned: &PlannedNode,
        id: &str,
        snapshot: &Topology,
        outcome: &mut StepOutcome,
    ) -> Result<(), ApplyError> {
        let agent = order.agent(id).ok_or_else(|| undeclared(&planned.node))?;
        let role = self.ensure_principal(planned, snapshot, outcome).await?;

        if !snapshot.is_applied(&planned.node) {
            let handle = self
                .provisioner
                .create_agent(agent, &role)
                .await
                .map_err(provisioning(planned, "create_agent"))?;
            outcome.record = Some(NodeRecord::applied(planned.node.clone(), handle));
        }

        let mut principals = PrincipalDirectory::from_topology(snapshot);
        principals.insert(planned.node.clone());
        let desired = PermissionBinder::new(&order.catalog, &order.registry)
            .agent_invoke_grants(agent, &principals)?;
        self.issue_grants(planned, desired, &role, snapshot, outcome)
            .await
    }

    /// The node's principal, created if this is the first time it is needed.
    async fn ensure_principal(
        &self,
        planned: &PlannedNode,
        snapshot: &Topology,
        outcome: &mut StepOutcome,
    ) -> Result<ProvisionedHandle, ApplyError> {
        if let Some(existing) = snapshot.principal(&planned.node) {
            return Ok(existing.clone());
        }
        let spec = PrincipalSpec::for_node(&planned.node)
            .ok_or_else(|| ValidationError::unresolved_principal(planned.node.clone()))?;
        let handle = self
            .provisioner
            .create_principal(&spec)
            .await
            .map_err(provisioning(planned, "create_principal"))?;
        outcome.principal = Some(handle.clone());
        Ok(handle)
    }

    async fn issue_grants(
        &self,
        planned: &PlannedNode,
        desired: Vec<Grant>,
        principal: &ProvisionedHandle,
        snapshot: &Topology,
        outcome: &mut StepOutcome,
    ) -> Result<(), ApplyError> {
        for grant in pending_grants(desired, &snapshot.grants) {
            let target_node = grant.target.node();
            let target = snapshot
                .handle(&target_node)
                .ok_or_else(|| ApplyError::MissingHandle(target_node.clone()))?;
            self.provisioner
                .grant(&grant, principal, target)
                .await
                .map_err(provisioning(planned, "grant"))?;
            outcome.grants.push(grant);
        }
        Ok(())
    }

    /// Fold one step's outcome into the topology. Returns the step's error.
    async fn merge(
        &self,
        outcome: StepOutcome,
        topology: &mut Topology,
        summary: &mut RunSummary,
    ) -> Option<ApplyError> {
        let name = topology.name.clone();
        let node = outcome.node.to_string();

        if let Some(principal) = outcome.principal {
            topology.insert_principal(outcome.node.clone(), principal);
        }

        if let Some(record) = outcome.record {
            let identifier = record
                .handle
                .as_ref()
                .map(|h| h.identifier.clone())
                .unwrap_or_default();
            tracing::info!(
                topology = %name,
                step = outcome.step,
                node = %node,
                identifier = %identifier,
                duration_ms = outcome.duration_ms,
                "Step applied"
            );
            report_audit(
                self.audit
                    .log_step_applied(&name, &node, outcome.step, &identifier, outcome.duration_ms)
                    .await,
            );
            topology.insert_record(record);
            summary.applied += 1;
        } else if outcome.started && outcome.error.is_none() {
            tracing::debug!(topology = %name, step = outcome.step, node = %node, "Step already applied");
            report_audit(self.audit.log_step_skipped(&name, &node, outcome.step).await);
            summary.skipped += 1;
        }

        for grant in outcome.grants {
            tracing::info!(topology = %name, grant = %grant, "Grant issued");
            report_audit(self.audit.log_grant_issued(&name, &grant.to_string()).await);
            topology.record_grant(grant);
        }

        let error = outcome.error?;
        if !matches!(error, ApplyError::Aborted { .. }) {
            tracing::error!(topology = %name, step = outcome.step, node = %node, error = %error, "Step failed");
            report_audit(
                self.audit
                    .log_step_failed(&name, &node, outcome.step, &error.to_string())
                    .await,
            );
        }
        Some(error)
    }

    // =========================================================================
    // Action groups
    // =========================================================================

    async fn attach_action_groups(
        &self,
        order: &ExecutionOrder,
        nodes: &[&PlannedNode],
        topology: &mut Topology,
        summary: &mut RunSummary,
    ) -> Result<(), ApplyError> {
        let mut contracts: BTreeMap<String, ActionGroupContract> = BTreeMap::new();

        for planned in nodes {
            if self.abort.is_raised() {
                return Err(ApplyError::Aborted {
                    next_step: planned.step,
                });
            }
            let NodeId::ActionGroup { agent: agent_id, name } = &planned.node else {
                continue;
            };
            let agent = order
                .agent(agent_id)
                .ok_or_else(|| undeclared(&NodeId::agent(agent_id.clone())))?;
            let group = agent
                .action_group(name)
                .ok_or_else(|| undeclared(&planned.node))?;

            contracts
                .entry(agent_id.clone())
                .or_insert_with(|| ActionGroupContract::new(agent_id.clone()))
                .attach(group, &topology.grants)?;

            let node = planned.node.to_string();
            if topology.is_applied(&planned.node) {
                report_audit(self.audit.log_step_skipped(&topology.name, &node, planned.step).await);
                summary.skipped += 1;
                continue;
            }

            if agent.attach_mode == AttachMode::Manual {
                if topology.record(&planned.node).is_none() {
                    topology.insert_record(NodeRecord::deferred(planned.node.clone()));
                }
                tracing::info!(
                    topology = %topology.name,
                    step = planned.step,
                    node = %node,
                    "Action group left for manual attachment"
                );
                report_audit(
                    self.audit
                        .log_step_deferred(&topology.name, &node, planned.step, "attach mode is manual")
                        .await,
                );
                summary.deferred += 1;
                continue;
            }

            let agent_node = NodeId::agent(agent_id.clone());
            let agent_handle = topology
                .handle(&agent_node)
                .cloned()
                .ok_or(ApplyError::MissingHandle(agent_node))?;
            let function_node = NodeId::function(group.target_function.clone());
            let function_handle = topology
                .handle(&function_node)
                .cloned()
                .ok_or(ApplyError::MissingHandle(function_node))?;
            let schema = render_openapi(group);

            let start = Instant::now();
            let handle = match self
                .provisioner
                .attach_action_group(&agent_handle, group, &function_handle, &schema)
                .await
            {
                Ok(handle) => handle,
                Err(source) => {
                    let error = provisioning(planned, "attach_action_group")(source);
                    tracing::error!(topology = %topology.name, step = planned.step, node = %node, error = %error, "Step failed");
                    report_audit(
                        self.audit
                            .log_step_failed(&topology.name, &node, planned.step, &error.to_string())
                            .await,
                    );
                    return Err(error);
                }
            };
            let duration_ms = start.elapsed().as_millis() as u64;

            tracing::info!(
                topology = %topology.name,
                step = planned.step,
                node = %node,
                identifier = %handle.identifier,
                duration_ms,
                "Step applied"
            );
            report_audit(
                self.audit
                    .log_step_applied(&topology.name, &node, planned.step, &handle.identifier, duration_ms)
                    .await,
            );
            topology.insert_record(NodeRecord::applied(planned.node.clone(), handle));
            summary.applied += 1;
        }
        Ok(())
    }

    // =========================================================================
    // Outputs
    // =========================================================================

    async fn report_outputs(&self, order: &ExecutionOrder, topology: &mut Topology) -> Result<(), ApplyError> {
        let outputs = resolve_outputs(order, topology)?;
        for (name, value) in &outputs {
            if topology.outputs.get(name) == Some(value) {
                continue;
            }
            self.provisioner
                .output(name, value)
                .await
                .map_err(|source| ApplyError::Output {
                    name: name.clone(),
                    source,
                })?;
            report_audit(self.audit.log_output_reported(&topology.name, name, value).await);
            topology.outputs.insert(name.clone(), value.clone());
        }
        topology.outputs.retain(|name, _| outputs.contains_key(name));
        Ok(())
    }
}

/// Every output binding for the applied topology.
///
/// Besides declared outputs, each applied resource reports its name and arn,
/// each function its arn, and each agent its id and arn. Deferred action
/// groups add a [`NEXT_STEPS_OUTPUT`] entry.
pub fn resolve_outputs(
    order: &ExecutionOrder,
    topology: &Topology,
) -> Result<BTreeMap<String, String>, ApplyError> {
    let mut outputs = BTreeMap::new();

    for resource in order.catalog.iter() {
        if let Some(handle) = topology.handle(&NodeId::resource(resource.id.clone())) {
            outputs.insert(format!("resource.{}.name", resource.id), handle.identifier.clone());
            outputs.insert(format!("resource.{}.arn", resource.id), handle.arn.clone());
        }
    }
    for function in order.registry.iter() {
        if let Some(handle) = topology.handle(&NodeId::function(function.id.clone())) {
            outputs.insert(format!("function.{}.arn", function.id), handle.arn.clone());
        }
    }
    for agent in &order.agents {
        if let Some(handle) = topology.handle(&NodeId::agent(agent.id.clone())) {
            outputs.insert(format!("agent.{}.id", agent.id), handle.identifier.clone());
            outputs.insert(format!("agent.{}.arn", agent.id), handle.arn.clone());
        }
    }

    for output in &order.outputs {
        let node: NodeId = output.node.parse().map_err(|reason: String| {
            ValidationError::new(
                ValidationErrorKind::InvalidDeclaration,
                format!("output '{}': {}", output.name, reason),
            )
        })?;
        let handle = topology
            .handle(&node)
            .ok_or_else(|| ApplyError::MissingHandle(node.clone()))?;
        let value = handle
            .attr(&output.attr)
            .ok_or_else(|| ApplyError::MissingAttribute {
                node: node.clone(),
                attr: output.attr.clone(),
            })?;
        outputs.insert(output.name.clone(), value.to_string());
    }

    let deferred: Vec<String> = topology
        .deferred()
        .filter(|node| order.position(node).is_some())
        .filter_map(|node| match node {
            NodeId::ActionGroup { agent, name } => Some(format!("{}/{}", agent, name)),
            _ => None,
        })
        .collect();
    if !deferred.is_empty() {
        outputs.insert(
            NEXT_STEPS_OUTPUT.to_string(),
            format!("attach action groups manually: {}", deferred.join(", ")),
        );
    }

    Ok(outputs)
}

/// Environment with resource references replaced by handle attributes.
fn resolve_env(function: &FunctionDef, topology: &Topology) -> Result<BTreeMap<String, String>, ApplyError> {
    let mut env = BTreeMap::new();
    for (name, value) in &function.env {
        let resolved = match value {
            EnvValue::Literal(literal) => literal.clone(),
            EnvValue::Reference { resource, attr } => {
                let node = NodeId::resource(resource.clone());
                let handle = topology
                    .handle(&node)
                    .ok_or_else(|| ApplyError::MissingHandle(node.clone()))?;
                handle
                    .attr(attr)
                    .ok_or_else(|| ApplyError::MissingAttribute {
                        node: node.clone(),
                        attr: attr.clone(),
                    })?
                    .to_string()
            }
        };
        env.insert(name.clone(), resolved);
    }
    Ok(env)
}

fn provisioning<'a>(
    planned: &'a PlannedNode,
    action: &'static str,
) -> impl FnOnce(ProvisionError) -> ApplyError + 'a {
    move |source| ApplyError::Provisioning {
        step: planned.step,
        node: planned.node.clone(),
        action: action.to_string(),
        depends_on: planned.depends_on.clone(),
        source,
    }
}

fn undeclared(node: &NodeId) -> ApplyError {
    ValidationError::invalid_declaration(node.clone(), "node is planned but not declared").into()
}

fn report_audit(result: Result<(), AuditError>) {
    if let Err(e) = result {
        tracing::warn!(error = %e, "Failed to record audit event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::{CallKind, LocalProvisioner};
    use stackwire_audit::{DeployEventType, MemoryStorage};
    use stackwire_core::{
        AccessLevel, ActionGroupDef, AgentDef, HttpVerb, NodeStatus, OperationDef, OutputDef,
        ParameterDef, PrincipalId, ResourceDef, ResourceKind, StackConfig,
    };
    use stackwire_planner::{Planner, TierPlanner};

    /// R1, R2 <- F1, F2 <- A1 with one action group per function.
    fn stack() -> StackConfig {
        let mut stack = StackConfig::new("ads");
        stack.resources = vec![
            ResourceDef::new("R1", ResourceKind::Table),
            ResourceDef::new("R2", ResourceKind::ObjectStore),
        ];
        stack.functions = vec![
            FunctionDef::new("F1", "index.handler")
                .with_grant("R1", AccessLevel::ReadWrite)
                .with_env("TABLE", EnvValue::reference("R1", "name")),
            FunctionDef::new("F2", "index.handler")
                .with_grant("R1", AccessLevel::ReadOnly)
                .with_grant("R2", AccessLevel::ReadWrite),
        ];
        stack.agents = vec![
            AgentDef::new("A1", "anthropic.claude-3-sonnet")
                .with_action_group(
                    ActionGroupDef::new("g1", "F1").with_operation(
                        OperationDef::new("getMetrics", HttpVerb::Get, "/metrics")
                            .with_parameter(ParameterDef::required_query("campaignId")),
                    ),
                )
                .with_action_group(
                    ActionGroupDef::new("g2", "F2")
                        .with_operation(OperationDef::new("storeReport", HttpVerb::Post, "/reports")),
                ),
        ];
        stack.outputs = vec![OutputDef {
            name: "AgentId".into(),
            node: "agent:A1".into(),
            attr: "id".into(),
            description: None,
        }];
        stack
    }

    fn plan(stack: &StackConfig) -> ExecutionOrder {
        TierPlanner::new().plan(stack).unwrap()
    }

    fn deployer() -> Deployer<LocalProvisioner> {
        Deployer::new(LocalProvisioner::new("123456789012", "us-east-1"))
    }

    #[tokio::test]
    async fn test_full_apply_creates_everything_in_order() {
        let deployer = deployer();
        let order = plan(&stack());
        let topology = deployer.apply(&order).await.unwrap();

        assert!(topology.complete);
        assert_eq!(topology.nodes.len(), 7);
        assert_eq!(topology.principals.len(), 3);
        // F1 -> R1 rw, F2 -> R1 ro, F2 -> R2 rw, A1 -> F1, A1 -> F2
        assert_eq!(topology.grants.len(), 5);

        let calls = deployer.provisioner().calls();
        let first_function = calls
            .iter()
            .position(|c| c.kind == CallKind::CreateFunction)
            .unwrap();
        let last_resource = calls
            .iter()
            .rposition(|c| c.kind == CallKind::CreateResource)
            .unwrap();
        assert!(last_resource < first_function);
        assert_eq!(deployer.provisioner().call_count(CallKind::AttachActionGroup), 2);

        let agent_id = topology.handle(&NodeId::agent("A1")).unwrap().identifier.clone();
        assert_eq!(topology.outputs["AgentId"], agent_id);
        assert_eq!(topology.outputs["resource.R1.name"], "R1");
        assert!(!topology.outputs.contains_key(NEXT_STEPS_OUTPUT));
    }

    #[tokio::test]
    async fn test_function_env_resolves_resource_handles() {
        let deployer = deployer();
        let mut stack = stack();
        stack.resources[0].name = Some("ads-{region}-metrics".into());
        let topology = deployer.apply(&plan(&stack)).await.unwrap();

        let table = topology.handle(&NodeId::resource("R1")).unwrap();
        assert_eq!(table.identifier, "ads-us-east-1-metrics");
        assert_eq!(topology.outputs["resource.R1.name"], "ads-us-east-1-metrics");
    }

    #[tokio::test]
    async fn test_failure_at_step_three_keeps_prior_steps() {
        let deployer = deployer();
        let order = plan(&stack());
        deployer
            .provisioner()
            .fail_once(CallKind::CreateFunction, "F1");

        let failure = deployer.apply(&order).await.unwrap_err();
        match &failure.error {
            ApplyError::Provisioning { step, node, depends_on, .. } => {
                assert_eq!(*step, 3);
                assert_eq!(node, &NodeId::function("F1"));
                assert_eq!(depends_on, &vec![NodeId::resource("R1")]);
            }
            other => panic!("expected provisioning failure, got {:?}", other),
        }
        let partial = &failure.topology;
        assert!(!partial.complete);
        assert!(partial.is_applied(&NodeId::resource("R1")));
        assert!(partial.is_applied(&NodeId::resource("R2")));
        assert!(!partial.is_applied(&NodeId::function("F1")));
        assert!(!partial.is_applied(&NodeId::agent("A1")));
        // the principal was created before the function call failed
        assert!(partial.principal(&NodeId::function("F1")).is_some());

        let topology = deployer.apply(&order).await.unwrap();
        assert!(topology.complete);

        let backend = deployer.provisioner();
        assert_eq!(backend.call_count(CallKind::CreateResource), 2);
        assert_eq!(backend.call_count(CallKind::CreatePrincipal), 3);
        assert_eq!(backend.call_count(CallKind::CreateFunction), 3);
    }

    #[tokio::test]
    async fn test_reapply_makes_no_backend_calls() {
        let deployer = deployer();
        let order = plan(&stack());
        deployer.apply(&order).await.unwrap();
        let calls = deployer.provisioner().calls().len();

        let topology = deployer.apply(&order).await.unwrap();
        assert!(topology.complete);
        assert_eq!(deployer.provisioner().calls().len(), calls);
        assert_eq!(topology.grants.len(), 5);
    }

    #[tokio::test]
    async fn test_failed_grant_is_retried_alone() {
        let deployer = deployer();
        let order = plan(&stack());
        let grant = Grant::data(PrincipalId::for_function("F2"), "R2", AccessLevel::ReadWrite);
        deployer
            .provisioner()
            .fail_once(CallKind::Grant, grant.to_string());

        let failure = deployer.apply(&order).await.unwrap_err();
        assert!(failure.topology.is_applied(&NodeId::function("F2")));
        assert!(!failure.topology.grants.covers(&grant));

        deployer.apply(&order).await.unwrap();
        let grant_calls = deployer
            .provisioner()
            .calls()
            .into_iter()
            .filter(|c| c.kind == CallKind::Grant && c.target == grant.to_string())
            .count();
        assert_eq!(grant_calls, 2);
        assert_eq!(deployer.provisioner().call_count(CallKind::CreateFunction), 2);
    }

    #[tokio::test]
    async fn test_manual_attach_defers_groups() {
        let deployer = deployer();
        let mut stack = stack();
        stack.agents[0].attach_mode = AttachMode::Manual;
        let order = plan(&stack);

        let topology = deployer.apply(&order).await.unwrap();
        assert!(topology.complete);
        assert_eq!(deployer.provisioner().call_count(CallKind::AttachActionGroup), 0);

        let group = NodeId::action_group("A1", "g1");
        assert_eq!(topology.record(&group).unwrap().status, NodeStatus::Deferred);
        assert_eq!(
            topology.outputs[NEXT_STEPS_OUTPUT],
            "attach action groups manually: A1/g1, A1/g2"
        );

        // switching to automatic attaches the deferred groups
        stack.agents[0].attach_mode = AttachMode::Automatic;
        let topology = deployer.apply(&plan(&stack)).await.unwrap();
        assert!(topology.is_applied(&group));
        assert!(!topology.outputs.contains_key(NEXT_STEPS_OUTPUT));
        assert_eq!(deployer.provisioner().call_count(CallKind::AttachActionGroup), 2);
    }

    #[tokio::test]
    async fn test_abort_stops_before_next_step() {
        let deployer = deployer();
        let order = plan(&stack());
        let signal = deployer.abort_signal();
        signal.raise();

        let failure = deployer.apply(&order).await.unwrap_err();
        assert!(matches!(failure.error, ApplyError::Aborted { next_step: 1 }));
        assert!(deployer.provisioner().calls().is_empty());

        signal.reset();
        assert!(deployer.apply(&order).await.unwrap().complete);
    }

    #[tokio::test]
    async fn test_lock_held_fails_fast() {
        let lock = MemoryLock::new();
        let deployer = deployer().with_lock(Arc::new(lock.clone()));
        let _held = lock.acquire("ads").unwrap();

        let failure = deployer.apply(&plan(&stack())).await.unwrap_err();
        assert!(matches!(failure.error, ApplyError::Lock(_)));
        assert!(deployer.provisioner().calls().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_apply_matches_sequential() {
        let sequential = deployer();
        let concurrent = deployer().with_concurrency(4);
        let order = plan(&stack());

        let a = sequential.apply(&order).await.unwrap();
        let b = concurrent.apply(&order).await.unwrap();
        assert_eq!(a.grants, b.grants);
        assert_eq!(
            a.nodes.keys().collect::<Vec<_>>(),
            b.nodes.keys().collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_failure_in_concurrent_tier_halts_later_tiers() {
        let deployer = deployer().with_concurrency(2);
        let order = plan(&stack());
        deployer
            .provisioner()
            .fail_once(CallKind::CreateResource, "R1");

        let failure = deployer.apply(&order).await.unwrap_err();
        assert_eq!(failure.error.step(), Some(1));
        assert_eq!(deployer.provisioner().call_count(CallKind::CreateFunction), 0);
        assert_eq!(deployer.provisioner().call_count(CallKind::CreateAgent), 0);
    }

    #[tokio::test]
    async fn test_audit_trail_records_run() {
        let storage = Arc::new(MemoryStorage::new());
        let deployer = deployer().with_audit(Arc::new(AuditLogger::with_storage(storage.clone())));
        deployer.apply(&plan(&stack())).await.unwrap();

        let events = storage.events();
        assert_eq!(events.first().unwrap().event_type, DeployEventType::PlanComputed);
        assert_eq!(events.last().unwrap().event_type, DeployEventType::ApplyCompleted);
        let applied = events
            .iter()
            .filter(|e| e.event_type == DeployEventType::StepApplied)
            .count();
        assert_eq!(applied, 7);
        let grants = events
            .iter()
            .filter(|e| e.event_type == DeployEventType::GrantIssued)
            .count();
        assert_eq!(grants, 5);
    }

    #[tokio::test]
    async fn test_missing_output_attribute_fails_apply() {
        let deployer = deployer();
        let mut stack = stack();
        stack.outputs.push(OutputDef {
            name: "Broken".into(),
            node: "resource:R1".into(),
            attr: "domain".into(),
            description: None,
        });

        let failure = deployer.apply(&plan(&stack)).await.unwrap_err();
        assert!(matches!(failure.error, ApplyError::MissingAttribute { .. }));
        // every node was still applied
        assert_eq!(failure.topology.nodes.len(), 7);
    }

}
