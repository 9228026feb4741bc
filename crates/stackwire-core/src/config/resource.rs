//! Storage resource declarations.
//!
//! A resource is a provisioned stateful store. Everything under `config`
//! (versioning, lifecycle rules, keys, TTL attributes, secret templates) is
//! handed to the provisioning backend untouched.

use serde::{Deserialize, Serialize};

/// Kind of stateful store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Blob/object storage bucket.
    ObjectStore,
    /// Key-value metrics table.
    Table,
    /// Secret store entry.
    Secret,
}

impl ResourceKind {
    /// Short name used in identifiers and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::ObjectStore => "object_store",
            ResourceKind::Table => "table",
            ResourceKind::Secret => "secret",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A declared resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDef {
    /// Unique identifier within the stack.
    pub id: String,

    /// What kind of store this is.
    pub kind: ResourceKind,

    /// Physical name. `{account}` and `{region}` placeholders are expanded by
    /// the backend. Defaults to the id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Opaque backend configuration.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub config: serde_json::Value,
}

impl ResourceDef {
    /// Create a resource with no extra configuration.
    pub fn new(id: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            id: id.into(),
            kind,
            name: None,
            description: None,
            config: serde_json::Value::Null,
        }
    }

    /// Attach opaque backend configuration.
    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    /// Physical name before placeholder expansion.
    pub fn physical_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}
