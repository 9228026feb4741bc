//! The provisioning seam.
//!
//! [`Provisioner`] is the capability set the deployer drives: create a
//! resource, principal, function or agent, issue a grant, attach an action
//! group and report an output.

use async_trait::async_trait;
use std::collections::BTreeMap;

use stackwire_core::{
    ActionGroupDef, AgentDef, FunctionDef, Grant, NodeId, PrincipalId, ProvisionedHandle,
    ResourceDef,
};

/// Service that assumes function execution roles.
pub const FUNCTION_SERVICE: &str = "lambda.amazonaws.com";
/// Service that assumes agent roles.
pub const AGENT_SERVICE: &str = "bedrock.amazonaws.com";

/// Typed failure returned by a provisioning backend.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// The backend refused the request (bad input, conflict, quota).
    #[error("rejected: {0}")]
    Rejected(String),

    /// The backend could not be reached or timed out.
    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// A principal to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalSpec {
    pub principal: PrincipalId,
    /// Node that owns the principal.
    pub owner: NodeId,
    /// Service allowed to assume it.
    pub service: &'static str,
}

impl PrincipalSpec {
    /// Principal spec for a function or agent node.
    pub fn for_node(owner: &NodeId) -> Option<Self> {
        let service = match owner {
            NodeId::Function(_) => FUNCTION_SERVICE,
            NodeId::Agent(_) => AGENT_SERVICE,
            _ => return None,
        };
        Some(Self {
            principal: PrincipalId::for_node(owner)?,
            owner: owner.clone(),
            service,
        })
    }
}

/// Provisioning collaborator.
///
/// Every call either returns an opaque handle or a typed failure. Callers
/// guarantee ordering: a call is only made once every handle it takes exists.
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn create_resource(&self, resource: &ResourceDef) -> Result<ProvisionedHandle, ProvisionError>;

    async fn create_principal(&self, spec: &PrincipalSpec) -> Result<ProvisionedHandle, ProvisionError>;

    /// Create a function running as `role`, with environment references already resolved.
    async fn create_function(
        &self,
        function: &FunctionDef,
        role: &ProvisionedHandle,
        env: &BTreeMap<String, String>,
    ) -> Result<ProvisionedHandle, ProvisionError>;

    /// Apply `grant`. Must be idempotent on the backend side.
    async fn grant(
        &self,
        grant: &Grant,
        principal: &ProvisionedHandle,
        target: &ProvisionedHandle,
    ) -> Result<(), ProvisionError>;

    async fn create_agent(
        &self,
        agent: &AgentDef,
        role: &ProvisionedHandle,
    ) -> Result<ProvisionedHandle, ProvisionError>;

    /// Attach an action group; `schema` is the rendered OpenAPI document.
    async fn attach_action_group(
        &self,
        agent: &ProvisionedHandle,
        group: &ActionGroupDef,
        function: &ProvisionedHandle,
        schema: &serde_json::Value,
    ) -> Result<ProvisionedHandle, ProvisionError>;

    /// Report a named output binding.
    async fn output(&self, name: &str, value: &str) -> Result<(), ProvisionError>;
}
