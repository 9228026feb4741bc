//! In-process provisioning backend.
//!
//! `LocalProvisioner` simulates a cloud control plane: it fabricates
//! deterministic ARN-like handles, rejects duplicate creations the way a real
//! backend would, and records every call so runs can be inspected. Failures
//! can be injected per call to exercise partial applies.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use stackwire_core::{
    ActionGroupDef, AgentDef, FunctionDef, Grant, ProvisionedHandle, ResourceDef, ResourceKind,
};

use crate::provisioner::{PrincipalSpec, ProvisionError, Provisioner};

/// Kind of provisioning call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CallKind {
    CreateResource,
    CreatePrincipal,
    CreateFunction,
    Grant,
    CreateAgent,
    AttachActionGroup,
    Output,
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallKind::CreateResource => "create_resource",
            CallKind::CreatePrincipal => "create_principal",
            CallKind::CreateFunction => "create_function",
            CallKind::Grant => "grant",
            CallKind::CreateAgent => "create_agent",
            CallKind::AttachActionGroup => "attach_action_group",
            CallKind::Output => "output",
        };
        f.write_str(name)
    }
}

/// A recorded call: what was called, on what.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionCall {
    pub kind: CallKind,
    pub target: String,
}

#[derive(Debug, Default)]
struct LocalState {
    calls: Vec<ProvisionCall>,
    /// (kind, target) -> remaining injected failures
    failures: BTreeMap<(CallKind, String), usize>,
    created: BTreeSet<String>,
    grants: BTreeSet<(String, String, String)>,
    outputs: BTreeMap<String, String>,
    sequence: u64,
}

/// Simulated backend.
#[derive(Debug)]
pub struct LocalProvisioner {
    account: String,
    region: String,
    state: Mutex<LocalState>,
}

impl LocalProvisioner {
    pub fn new(account: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            region: region.into(),
            state: Mutex::new(LocalState::default()),
        }
    }

    /// Fail the next call of `kind` on `target`.
    pub fn fail_once(&self, kind: CallKind, target: impl Into<String>) {
        self.fail_times(kind, target, 1);
    }

    /// Fail the next `times` calls of `kind` on `target`.
    pub fn fail_times(&self, kind: CallKind, target: impl Into<String>, times: usize) {
        self.lock().failures.insert((kind, target.into()), times);
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<ProvisionCall> {
        self.lock().calls.clone()
    }

    /// Number of calls of `kind`.
    pub fn call_count(&self, kind: CallKind) -> usize {
        self.lock().calls.iter().filter(|c| c.kind == kind).count()
    }

    /// Applied grants as `(principal arn, target arn, permission)`.
    pub fn grants(&self) -> BTreeSet<(String, String, String)> {
        self.lock().grants.clone()
    }

    /// Reported outputs.
    pub fn outputs(&self) -> BTreeMap<String, String> {
        self.lock().outputs.clone()
    }

    fn lock(&self) -> MutexGuard<'_, LocalState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record the call and fire any injected failure.
    fn enter(&self, kind: CallKind, target: &str) -> Result<u64, ProvisionError> {
        let mut state = self.lock();
        state.calls.push(ProvisionCall {
            kind,
            target: target.to_string(),
        });
        let key = (kind, target.to_string());
        if let Some(remaining) = state.failures.get_mut(&key)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(ProvisionError::Unavailable(format!(
                "simulated failure of {} on '{}'",
                kind, target
            )));
        }
        state.sequence += 1;
        Ok(state.sequence)
    }

    fn claim(&self, identity: String) -> Result<(), ProvisionError> {
        if !self.lock().created.insert(identity.clone()) {
            return Err(ProvisionError::Rejected(format!("'{}' already exists", identity)));
        }
        Ok(())
    }

    fn expand(&self, template: &str) -> String {
        template
            .replace("{account}", &self.account)
            .replace("{region}", &self.region)
    }
}

#[async_trait]
impl Provisioner for LocalProvisioner {
    async fn create_resource(&self, resource: &ResourceDef) -> Result<ProvisionedHandle, ProvisionError> {
        let sequence = self.enter(CallKind::CreateResource, &resource.id)?;
        let name = self.expand(resource.physical_name());
        self.claim(format!("{}:{}", resource.kind, name))?;

        let handle = match resource.kind {
            ResourceKind::ObjectStore => ProvisionedHandle::new(&name, format!("arn:aws:s3:::{}", name))
                .with_attribute("domain", format!("{}.s3.amazonaws.com", name)),
            ResourceKind::Table => ProvisionedHandle::new(
                &name,
                format!("arn:aws:dynamodb:{}:{}:table/{}", self.region, self.account, name),
            ),
            ResourceKind::Secret => ProvisionedHandle::new(
                &name,
                format!(
                    "arn:aws:secretsmanager:{}:{}:secret:{}-{:06}",
                    self.region, self.account, name, sequence
                ),
            ),
        };
        Ok(handle)
    }

    async fn create_principal(&self, spec: &PrincipalSpec) -> Result<ProvisionedHandle, ProvisionError> {
        self.enter(CallKind::CreatePrincipal, spec.principal.as_str())?;
        let name = match spec.principal.as_str().split_once(':') {
            Some((kind, owner)) => format!("{}-{}", owner, kind),
            None => spec.principal.to_string(),
        };
        self.claim(format!("role:{}", name))?;
        Ok(ProvisionedHandle::new(
            &name,
            format!("arn:aws:iam::{}:role/{}", self.account, name),
        )
        .with_attribute("service", spec.service))
    }

    async fn create_function(
        &self,
        function: &FunctionDef,
        role: &ProvisionedHandle,
        env: &BTreeMap<String, String>,
    ) -> Result<ProvisionedHandle, ProvisionError> {
        self.enter(CallKind::CreateFunction, &function.id)?;
        if env.keys().any(|k| k.is_empty()) {
            return Err(ProvisionError::Rejected("empty environment variable name".into()));
        }
        self.claim(format!("function:{}", function.id))?;
        Ok(ProvisionedHandle::new(
            &function.id,
            format!("arn:aws:lambda:{}:{}:function:{}", self.region, self.account, function.id),
        )
        .with_attribute("role", &role.arn)
        .with_attribute("runtime", &function.runtime))
    }

    async fn grant(
        &self,
        grant: &Grant,
        principal: &ProvisionedHandle,
        target: &ProvisionedHandle,
    ) -> Result<(), ProvisionError> {
        self.enter(CallKind::Grant, &grant.to_string())?;
        self.lock().grants.insert((
            principal.arn.clone(),
            target.arn.clone(),
            grant.permission.to_string(),
        ));
        Ok(())
    }

    async fn create_agent(&self, agent: &AgentDef, role: &ProvisionedHandle) -> Result<ProvisionedHandle, ProvisionError> {
        let sequence = self.enter(CallKind::CreateAgent, &agent.id)?;
        self.claim(format!("agent:{}", agent.id))?;
        let agent_id = format!("AGT{:07}", sequence);
        Ok(ProvisionedHandle::new(
            &agent_id,
            format!("arn:aws:bedrock:{}:{}:agent/{}", self.region, self.account, agent_id),
        )
        .with_attribute("name", &agent.id)
        .with_attribute("role", &role.arn)
        .with_attribute("foundation_model", &agent.foundation_model))
    }

    async fn attach_action_group(
        &self,
        agent: &ProvisionedHandle,
        group: &ActionGroupDef,
        function: &ProvisionedHandle,
        schema: &serde_json::Value,
    ) -> Result<ProvisionedHandle, ProvisionError> {
        let target = format!("{}/{}", agent.identifier, group.name);
        let sequence = self.enter(CallKind::AttachActionGroup, &target)?;
        if schema.get("openapi").is_none() {
            return Err(ProvisionError::Rejected(format!(
                "action group '{}' has no OpenAPI document",
                group.name
            )));
        }
        self.claim(format!("action_group:{}", target))?;
        Ok(ProvisionedHandle::new(
            format!("AG{:08}", sequence),
            format!("{}/action-group/{}", agent.arn, group.name),
        )
        .with_attribute("executor", &function.arn))
    }

    async fn output(&self, name: &str, value: &str) -> Result<(), ProvisionError> {
        self.enter(CallKind::Output, name)?;
        self.lock().outputs.insert(name.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackwire_core::{AccessLevel, NodeId, PrincipalId};

    fn backend() -> LocalProvisioner {
        LocalProvisioner::new("123456789012", "us-east-1")
    }

    #[tokio::test]
    async fn test_resource_names_expand_placeholders() {
        let backend = backend();
        let mut bucket = ResourceDef::new("campaign-data", ResourceKind::ObjectStore);
        bucket.name = Some("ad-optimizer-data-{account}".into());

        let handle = backend.create_resource(&bucket).await.unwrap();
        assert_eq!(handle.identifier, "ad-optimizer-data-123456789012");
        assert_eq!(handle.arn, "arn:aws:s3:::ad-optimizer-data-123456789012");

        let table = backend
            .create_resource(&ResourceDef::new("metrics", ResourceKind::Table))
            .await
            .unwrap();
        assert_eq!(table.arn, "arn:aws:dynamodb:us-east-1:123456789012:table/metrics");
    }

    #[tokio::test]
    async fn test_duplicate_creation_is_rejected() {
        let backend = backend();
        let table = ResourceDef::new("metrics", ResourceKind::Table);
        backend.create_resource(&table).await.unwrap();
        let err = backend.create_resource(&table).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Rejected(_)));
        assert_eq!(backend.call_count(CallKind::CreateResource), 2);
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let backend = backend();
        backend.fail_once(CallKind::CreateFunction, "storage");
        let spec = PrincipalSpec::for_node(&NodeId::function("storage")).unwrap();
        let role = backend.create_principal(&spec).await.unwrap();
        assert_eq!(role.identifier, "storage-function-role");

        let function = FunctionDef::new("storage", "index.handler");
        let err = backend
            .create_function(&function, &role, &BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Unavailable(_)));

        let handle = backend
            .create_function(&function, &role, &BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(handle.attr("role"), Some(role.arn.as_str()));
    }

    #[tokio::test]
    async fn test_grants_are_recorded_by_arn() {
        let backend = backend();
        let principal = ProvisionedHandle::new("r", "arn:aws:iam::123456789012:role/r");
        let target = ProvisionedHandle::new("t", "arn:aws:dynamodb:us-east-1:123456789012:table/t");
        let grant = Grant::data(PrincipalId::for_function("f"), "t", AccessLevel::ReadOnly);

        backend.grant(&grant, &principal, &target).await.unwrap();
        backend.grant(&grant, &principal, &target).await.unwrap();
        assert_eq!(backend.grants().len(), 1);
        assert_eq!(backend.call_count(CallKind::Grant), 2);
    }
}
