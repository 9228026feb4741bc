//! Callable function declarations.
//!
//! A function is an opaque handler with invocation limits and a declared set
//! of resource capabilities. `required_grants` is the only place data access
//! is requested; nothing else in the system grants a function access.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::ConfigError;

/// Data access level on a resource.
///
/// Ordered so that a wider level compares greater than a narrower one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    #[serde(alias = "read")]
    ReadOnly,
    #[serde(alias = "write")]
    ReadWrite,
}

impl AccessLevel {
    /// Whether holding `self` satisfies a request for `requested`.
    pub fn covers(&self, requested: AccessLevel) -> bool {
        *self >= requested
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::ReadOnly => "read_only",
            AccessLevel::ReadWrite => "read_write",
        }
    }
}

impl std::fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single `(resource, access)` requirement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GrantRequirement {
    pub resource: String,
    pub access: AccessLevel,
}

impl GrantRequirement {
    pub fn new(resource: impl Into<String>, access: AccessLevel) -> Self {
        Self {
            resource: resource.into(),
            access,
        }
    }
}

/// Environment variable value: a literal, or an attribute of a provisioned resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvValue {
    Literal(String),
    Reference {
        #[serde(rename = "ref")]
        resource: String,
        #[serde(default = "default_env_attr")]
        attr: String,
    },
}

impl EnvValue {
    /// Reference to `attr` of resource `resource`.
    pub fn reference(resource: impl Into<String>, attr: impl Into<String>) -> Self {
        EnvValue::Reference {
            resource: resource.into(),
            attr: attr.into(),
        }
    }

    /// The referenced resource id, if this is a reference.
    pub fn resource_ref(&self) -> Option<&str> {
        match self {
            EnvValue::Literal(_) => None,
            EnvValue::Reference { resource, .. } => Some(resource),
        }
    }
}

/// A declared function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    /// Unique identifier within the stack.
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Handler entry point inside the code bundle (e.g. "index.handler").
    pub handler: String,

    /// Runtime identifier passed through to the backend.
    #[serde(default = "default_runtime")]
    pub runtime: String,

    /// Location of the code bundle, relative to the stack file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<PathBuf>,

    /// Invocation timeout.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u32,

    /// Memory budget (MB).
    #[serde(default = "default_memory_units")]
    pub memory_units: u32,

    /// Environment passed to the handler.
    #[serde(default)]
    pub env: BTreeMap<String, EnvValue>,

    /// Resource capabilities this function needs.
    #[serde(default)]
    pub required_grants: Vec<GrantRequirement>,
}

impl FunctionDef {
    /// Create a function with default limits and no grants.
    pub fn new(id: impl Into<String>, handler: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: None,
            handler: handler.into(),
            runtime: default_runtime(),
            code: None,
            timeout_seconds: default_timeout_seconds(),
            memory_units: default_memory_units(),
            env: BTreeMap::new(),
            required_grants: Vec::new(),
        }
    }

    /// Add a required grant.
    pub fn with_grant(mut self, resource: impl Into<String>, access: AccessLevel) -> Self {
        self.required_grants
            .push(GrantRequirement::new(resource, access));
        self
    }

    /// Add an environment variable.
    pub fn with_env(mut self, name: impl Into<String>, value: EnvValue) -> Self {
        self.env.insert(name.into(), value);
        self
    }

    /// Load a function definition from a YAML, JSON or TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        super::parse_by_extension(path, &content)
    }

    /// Parse a function definition from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(ConfigError::from)
    }

    /// Requested grants merged per resource, keeping the widest level.
    pub fn effective_grants(&self) -> BTreeMap<&str, AccessLevel> {
        let mut merged: BTreeMap<&str, AccessLevel> = BTreeMap::new();
        for req in &self.required_grants {
            merged
                .entry(req.resource.as_str())
                .and_modify(|level| *level = (*level).max(req.access))
                .or_insert(req.access);
        }
        merged
    }

    /// Every resource id this function depends on, via grants or environment references.
    pub fn resource_references(&self) -> Vec<&str> {
        let mut refs: Vec<&str> = self
            .required_grants
            .iter()
            .map(|g| g.resource.as_str())
            .chain(self.env.values().filter_map(EnvValue::resource_ref))
            .collect();
        refs.sort_unstable();
        refs.dedup();
        refs
    }
}

fn default_runtime() -> String {
    "python3.12".to_string()
}

fn default_timeout_seconds() -> u32 {
    30
}

fn default_memory_units() -> u32 {
    128
}

fn default_env_attr() -> String {
    "name".to_string()
}
