use regex::Regex;
use std::sync::LazyLock;

// Declarations and stack file loading
pub mod config;

pub mod catalog;
pub mod error;
pub mod registry;
pub mod topology;

pub use catalog::{ResourceCatalog, ResourceHandle};
pub use config::{
    AccessLevel, ActionGroupDef, AgentDef, AttachMode, AuditConfig, ConfigError,
    DeploymentConfig, EnvValue, FunctionDef, GrantRequirement, HttpVerb, OperationDef,
    OutputDef, ParameterDef, ParameterLocation, ResourceDef, ResourceKind, StackConfig,
};
pub use error::{ValidationError, ValidationErrorKind};
pub use registry::{FunctionHandle, FunctionRegistry};
pub use topology::{
    Grant, GrantLedger, GrantTarget, NodeId, NodeRecord, NodeStatus, Permission, PrincipalId,
    ProvisionedHandle, Tier, Topology,
};

/// Longest accepted declaration id.
pub const MAX_ID_LEN: usize = 64;

static ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_-]*$").expect("id pattern compiles"));

/// Check a resource, function or agent id.
pub fn validate_id(id: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err("id must not be empty".to_string());
    }
    if id.len() > MAX_ID_LEN {
        return Err(format!("id is longer than {} characters", MAX_ID_LEN));
    }
    if !ID_PATTERN.is_match(id) {
        return Err(format!(
            "id '{}' must start with a letter and contain only letters, digits, '-' or '_'",
            id
        ));
    }
    Ok(())
}
