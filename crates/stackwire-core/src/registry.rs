//! Function registry.
//!
//! Registration is where a function's resource needs are checked against the
//! catalog. A function can only be registered once every resource it names
//! (through `required_grants` or an environment reference) has been declared.

use std::collections::BTreeMap;

use crate::catalog::ResourceCatalog;
use crate::config::{AccessLevel, FunctionDef};
use crate::error::ValidationError;
use crate::topology::NodeId;
use crate::validate_id;

pub const TIMEOUT_RANGE: std::ops::RangeInclusive<u32> = 1..=900;
pub const MEMORY_RANGE: std::ops::RangeInclusive<u32> = 128..=10240;

/// Handle to a registered function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionHandle {
    id: String,
}

impl FunctionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn node(&self) -> NodeId {
        NodeId::function(self.id.clone())
    }
}

/// Registered functions, in registration order.
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    functions: BTreeMap<String, FunctionDef>,
    order: Vec<String>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function against `catalog`.
    pub fn register(
        &mut self,
        catalog: &ResourceCatalog,
        function: FunctionDef,
    ) -> Result<FunctionHandle, ValidationError> {
        let node = NodeId::function(function.id.clone());

        validate_id(&function.id)
            .map_err(|reason| ValidationError::invalid_declaration(node.clone(), reason))?;
        if self.functions.contains_key(&function.id) {
            return Err(ValidationError::duplicate_function(&function.id));
        }
        if function.handler.trim().is_empty() {
            return Err(ValidationError::invalid_declaration(
                node,
                "handler must not be empty",
            ));
        }
        if !TIMEOUT_RANGE.contains(&function.timeout_seconds) {
            return Err(ValidationError::invalid_declaration(
                node,
                format!(
                    "timeout_seconds {} is outside {}..={}",
                    function.timeout_seconds,
                    TIMEOUT_RANGE.start(),
                    TIMEOUT_RANGE.end()
                ),
            ));
        }
        if !MEMORY_RANGE.contains(&function.memory_units) {
            return Err(ValidationError::invalid_declaration(
                node,
                format!(
                    "memory_units {} is outside {}..={}",
                    function.memory_units,
                    MEMORY_RANGE.start(),
                    MEMORY_RANGE.end()
                ),
            ));
        }

        for resource in function.resource_references() {
            if !catalog.contains(resource) {
                return Err(ValidationError::unknown_resource_reference(
                    &function.id,
                    resource,
                ));
            }
        }

        let handle = FunctionHandle {
            id: function.id.clone(),
        };
        self.order.push(function.id.clone());
        self.functions.insert(function.id.clone(), function);
        Ok(handle)
    }

    pub fn get(&self, id: &str) -> Option<&FunctionDef> {
        self.functions.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.functions.contains_key(id)
    }

    /// Functions in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &FunctionDef> {
        self.order.iter().filter_map(|id| self.functions.get(id))
    }

    /// Merged data grants requested by `id`.
    pub fn required_grants(&self, id: &str) -> BTreeMap<&str, AccessLevel> {
        self.functions
            .get(id)
            .map(FunctionDef::effective_grants)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
