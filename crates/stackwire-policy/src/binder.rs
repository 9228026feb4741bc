//! Least-privilege grant derivation.
//!
//! Grants are never declared. They come from exactly two places:
//!
//! 1. **Function data grants** - one per `(resource, level)` in the function's
//!    `required_grants`, from the function's execution role.
//! 2. **Agent invoke grants** - one per distinct action group target, from the
//!    agent's service role.
//!
//! A grant is only derived once its principal exists; a missing principal is an
//! error, never a skipped grant.

use std::collections::{BTreeMap, BTreeSet};

use stackwire_core::{
    AgentDef, FunctionRegistry, Grant, GrantLedger, NodeId, PrincipalId, ResourceCatalog,
    Topology, ValidationError,
};

/// Principals that have been created, keyed by owning node.
#[derive(Debug, Clone, Default)]
pub struct PrincipalDirectory {
    principals: BTreeMap<NodeId, PrincipalId>,
}

impl PrincipalDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Principals recorded in a (possibly partial) topology.
    pub fn from_topology(topology: &Topology) -> Self {
        let mut directory = Self::new();
        for node in topology.principals.keys() {
            directory.insert(node.clone());
        }
        directory
    }

    /// Mark the principal of `node` as created.
    pub fn insert(&mut self, node: NodeId) -> Option<&PrincipalId> {
        let principal = PrincipalId::for_node(&node)?;
        Some(&*self.principals.entry(node).or_insert(principal))
    }

    pub fn contains(&self, node: &NodeId) -> bool {
        self.principals.contains_key(node)
    }

    /// The principal of `node`, or `UnresolvedPrincipal`.
    pub fn resolve(&self, node: &NodeId) -> Result<&PrincipalId, ValidationError> {
        self.principals
            .get(node)
            .ok_or_else(|| ValidationError::unresolved_principal(node.clone()))
    }
}

/// Derives the grant set from the catalog and registry.
pub struct PermissionBinder<'a> {
    catalog: &'a ResourceCatalog,
    registry: &'a FunctionRegistry,
}

impl<'a> PermissionBinder<'a> {
    pub fn new(catalog: &'a ResourceCatalog, registry: &'a FunctionRegistry) -> Self {
        Self { catalog, registry }
    }

    /// Every grant the topology needs: function data grants then agent invoke grants.
    pub fn bind(
        &self,
        agents: &[AgentDef],
        principals: &PrincipalDirectory,
    ) -> Result<BTreeSet<Grant>, ValidationError> {
        let mut grants = BTreeSet::new();
        for function in self.registry.iter() {
            grants.extend(self.function_grants(&function.id, principals)?);
        }
        for agent in agents {
            grants.extend(self.agent_invoke_grants(agent, principals)?);
        }
        Ok(grants)
    }

    /// Data grants for one function, one per requested resource at its widest level.
    ///
    /// Fails on a missing principal even when nothing is requested.
    pub fn function_grants(
        &self,
        function_id: &str,
        principals: &PrincipalDirectory,
    ) -> Result<Vec<Grant>, ValidationError> {
        let principal = principals.resolve(&NodeId::function(function_id))?;
        let requested = self.registry.required_grants(function_id);
        let mut grants = Vec::with_capacity(requested.len());
        for (resource, level) in requested {
            if !self.catalog.contains(resource) {
                return Err(ValidationError::unknown_resource_reference(
                    function_id,
                    resource,
                ));
            }
            grants.push(Grant::data(principal.clone(), resource, level));
        }
        Ok(grants)
    }

    /// Invoke grants for one agent, one per distinct registered target function.
    pub fn agent_invoke_grants(
        &self,
        agent: &AgentDef,
        principals: &PrincipalDirectory,
    ) -> Result<Vec<Grant>, ValidationError> {
        let principal = principals.resolve(&NodeId::agent(agent.id.clone()))?;
        Ok(agent
            .target_functions()
            .into_iter()
            .filter(|target| self.registry.contains(target))
            .map(|target| Grant::invoke(principal.clone(), target))
            .collect())
    }
}

/// Grants from `desired` that `ledger` does not already cover, deduplicated.
pub fn pending_grants(
    desired: impl IntoIterator<Item = Grant>,
    ledger: &GrantLedger,
) -> Vec<Grant> {
    let mut seen = BTreeSet::new();
    desired
        .into_iter()
        .filter(|grant| !ledger.covers(grant))
        .filter(|grant| seen.insert(grant.clone()))
        .collect()
}
