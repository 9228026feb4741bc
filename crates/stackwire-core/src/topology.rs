//! Plan nodes, grants and the realized topology.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::config::AccessLevel;

/// Planning tier. Every node depends only on nodes of lower tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Resource,
    Function,
    Agent,
    ActionGroup,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Resource, Tier::Function, Tier::Agent, Tier::ActionGroup];
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Resource => f.write_str("resources"),
            Tier::Function => f.write_str("functions"),
            Tier::Agent => f.write_str("agents"),
            Tier::ActionGroup => f.write_str("action groups"),
        }
    }
}

/// Identity of a plannable node.
///
/// Serialized as `kind:id` (e.g. `function:google-ads`,
/// `action_group:optimizer/storage-actions`) so it can key JSON maps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum NodeId {
    Resource(String),
    Function(String),
    Agent(String),
    ActionGroup { agent: String, name: String },
}

impl NodeId {
    pub fn resource(id: impl Into<String>) -> Self {
        NodeId::Resource(id.into())
    }

    pub fn function(id: impl Into<String>) -> Self {
        NodeId::Function(id.into())
    }

    pub fn agent(id: impl Into<String>) -> Self {
        NodeId::Agent(id.into())
    }

    pub fn action_group(agent: impl Into<String>, name: impl Into<String>) -> Self {
        NodeId::ActionGroup {
            agent: agent.into(),
            name: name.into(),
        }
    }

    pub fn tier(&self) -> Tier {
        match self {
            NodeId::Resource(_) => Tier::Resource,
            NodeId::Function(_) => Tier::Function,
            NodeId::Agent(_) => Tier::Agent,
            NodeId::ActionGroup { .. } => Tier::ActionGroup,
        }
    }

    /// Whether this node has its own runtime principal.
    pub fn has_principal(&self) -> bool {
        matches!(self, NodeId::Function(_) | NodeId::Agent(_))
    }

    fn kind_str(&self) -> &'static str {
        match self {
            NodeId::Resource(_) => "resource",
            NodeId::Function(_) => "function",
            NodeId::Agent(_) => "agent",
            NodeId::ActionGroup { .. } => "action_group",
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeId::Resource(id) | NodeId::Function(id) | NodeId::Agent(id) => {
                write!(f, "{}:{}", self.kind_str(), id)
            }
            NodeId::ActionGroup { agent, name } => {
                write!(f, "{}:{}/{}", self.kind_str(), agent, name)
            }
        }
    }
}

impl FromStr for NodeId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, rest) = s
            .split_once(':')
            .ok_or_else(|| format!("node reference '{}' must look like 'kind:id'", s))?;
        if rest.is_empty() {
            return Err(format!("node reference '{}' has an empty id", s));
        }
        match kind {
            "resource" => Ok(NodeId::resource(rest)),
            "function" => Ok(NodeId::function(rest)),
            "agent" => Ok(NodeId::agent(rest)),
            "action_group" => {
                let (agent, name) = rest.split_once('/').ok_or_else(|| {
                    format!("action group reference '{}' must look like 'action_group:agent/name'", s)
                })?;
                Ok(NodeId::action_group(agent, name))
            }
            other => Err(format!("unknown node kind '{}' in '{}'", other, s)),
        }
    }
}

impl From<NodeId> for String {
    fn from(node: NodeId) -> Self {
        node.to_string()
    }
}

impl TryFrom<String> for NodeId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Runtime identity that grants attach to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(String);

impl PrincipalId {
    /// Execution role of a function.
    pub fn for_function(function_id: &str) -> Self {
        Self(format!("function-role:{}", function_id))
    }

    /// Service role of an agent.
    pub fn for_agent(agent_id: &str) -> Self {
        Self(format!("agent-role:{}", agent_id))
    }

    /// Principal owned by `node`, if the node kind has one.
    pub fn for_node(node: &NodeId) -> Option<Self> {
        match node {
            NodeId::Function(id) => Some(Self::for_function(id)),
            NodeId::Agent(id) => Some(Self::for_agent(id)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a grant gives access to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum GrantTarget {
    Resource(String),
    Function(String),
}

impl GrantTarget {
    /// The node owning the target.
    pub fn node(&self) -> NodeId {
        match self {
            GrantTarget::Resource(id) => NodeId::resource(id.clone()),
            GrantTarget::Function(id) => NodeId::function(id.clone()),
        }
    }
}

impl fmt::Display for GrantTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrantTarget::Resource(id) => write!(f, "resource:{}", id),
            GrantTarget::Function(id) => write!(f, "function:{}", id),
        }
    }
}

/// Kind of permission a grant carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Data access on a resource.
    Data(AccessLevel),
    /// Permission to invoke a function.
    Invoke,
}

impl Permission {
    /// Whether holding `self` satisfies a request for `requested`.
    pub fn covers(&self, requested: &Permission) -> bool {
        match (self, requested) {
            (Permission::Data(held), Permission::Data(wanted)) => held.covers(*wanted),
            (Permission::Invoke, Permission::Invoke) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::Data(level) => write!(f, "{}", level),
            Permission::Invoke => f.write_str("invoke"),
        }
    }
}

/// A derived permission binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Grant {
    pub principal: PrincipalId,
    pub target: GrantTarget,
    pub permission: Permission,
}

impl Grant {
    /// Data grant from a principal to a resource.
    pub fn data(principal: PrincipalId, resource: impl Into<String>, level: AccessLevel) -> Self {
        Self {
            principal,
            target: GrantTarget::Resource(resource.into()),
            permission: Permission::Data(level),
        }
    }

    /// Invoke grant from a principal to a function.
    pub fn invoke(principal: PrincipalId, function: impl Into<String>) -> Self {
        Self {
            principal,
            target: GrantTarget::Function(function.into()),
            permission: Permission::Invoke,
        }
    }
}

impl fmt::Display for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} ({})", self.principal, self.target, self.permission)
    }
}

/// Grants that have been applied.
///
/// The ledger only grows: recording a narrower grant next to a wider one
/// keeps both, and [`GrantLedger::covers`] answers from the widest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GrantLedger {
    grants: BTreeSet<Grant>,
}

impl GrantLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an applied grant satisfies `grant`.
    pub fn covers(&self, grant: &Grant) -> bool {
        self.grants.iter().any(|held| {
            held.principal == grant.principal
                && held.target == grant.target
                && held.permission.covers(&grant.permission)
        })
    }

    /// Whether `principal` may invoke `function`.
    pub fn has_invoke(&self, principal: &PrincipalId, function: &str) -> bool {
        self.covers(&Grant::invoke(principal.clone(), function))
    }

    /// Record an applied grant. Returns false if it was already covered.
    pub fn record(&mut self, grant: Grant) -> bool {
        if self.covers(&grant) {
            return false;
        }
        self.grants.insert(grant)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Grant> {
        self.grants.iter()
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

/// Opaque identifiers returned by the provisioning backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedHandle {
    /// Physical identifier (bucket name, table name, function name, agent id).
    pub identifier: String,

    /// Globally unique resource name.
    pub arn: String,

    /// Any further attributes the backend reported.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl ProvisionedHandle {
    pub fn new(identifier: impl Into<String>, arn: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            arn: arn.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Look up an attribute. `name`, `id` and `identifier` all mean the identifier.
    pub fn attr(&self, name: &str) -> Option<&str> {
        match name {
            "name" | "id" | "identifier" => Some(&self.identifier),
            "arn" => Some(&self.arn),
            other => self.attributes.get(other).map(|s| s.as_str()),
        }
    }
}

/// Outcome of applying a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Created by the backend.
    Applied,
    /// Validated but intentionally left for an operator.
    Deferred,
}

/// Persisted record of an applied node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub node: NodeId,
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<ProvisionedHandle>,
    pub applied_at: DateTime<Utc>,
}

impl NodeRecord {
    pub fn applied(node: NodeId, handle: ProvisionedHandle) -> Self {
        Self {
            node,
            status: NodeStatus::Applied,
            handle: Some(handle),
            applied_at: Utc::now(),
        }
    }

    pub fn deferred(node: NodeId) -> Self {
        Self {
            node,
            status: NodeStatus::Deferred,
            handle: None,
            applied_at: Utc::now(),
        }
    }
}

/// The realized deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    /// Topology identifier (the stack name).
    pub name: String,

    /// Applied nodes.
    #[serde(default)]
    pub nodes: BTreeMap<NodeId, NodeRecord>,

    /// Created principals, keyed by owning node.
    #[serde(default)]
    pub principals: BTreeMap<NodeId, ProvisionedHandle>,

    /// Applied grants.
    #[serde(default)]
    pub grants: GrantLedger,

    /// Resolved output bindings.
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,

    /// Set once every planned node has been applied and outputs reported.
    #[serde(default)]
    pub complete: bool,

    pub updated_at: DateTime<Utc>,
}

impl Topology {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: BTreeMap::new(),
            principals: BTreeMap::new(),
            grants: GrantLedger::new(),
            outputs: BTreeMap::new(),
            complete: false,
            updated_at: Utc::now(),
        }
    }

    /// Whether `node` was created by the backend. Deferred nodes are not applied.
    pub fn is_applied(&self, node: &NodeId) -> bool {
        self.nodes
            .get(node)
            .is_some_and(|r| r.status == NodeStatus::Applied)
    }

    /// Nodes left for an operator, in node order.
    pub fn deferred(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes
            .values()
            .filter(|r| r.status == NodeStatus::Deferred)
            .map(|r| &r.node)
    }

    pub fn record(&self, node: &NodeId) -> Option<&NodeRecord> {
        self.nodes.get(node)
    }

    /// Backend handle of an applied node.
    pub fn handle(&self, node: &NodeId) -> Option<&ProvisionedHandle> {
        self.nodes.get(node).and_then(|r| r.handle.as_ref())
    }

    /// Principal created for `node`.
    pub fn principal(&self, node: &NodeId) -> Option<&ProvisionedHandle> {
        self.principals.get(node)
    }

    pub fn insert_record(&mut self, record: NodeRecord) {
        self.nodes.insert(record.node.clone(), record);
        self.touch();
    }

    pub fn insert_principal(&mut self, node: NodeId, handle: ProvisionedHandle) {
        self.principals.insert(node, handle);
        self.touch();
    }

    pub fn record_grant(&mut self, grant: Grant) -> bool {
        let added = self.grants.record(grant);
        if added {
            self.touch();
        }
        added
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
