//! Resource catalog.

use std::collections::BTreeMap;

use crate::config::{ResourceDef, ResourceKind};
use crate::error::ValidationError;
use crate::topology::NodeId;
use crate::validate_id;

/// Handle to a declared resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceHandle {
    id: String,
    kind: ResourceKind,
}

impl ResourceHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn node(&self) -> NodeId {
        NodeId::resource(self.id.clone())
    }
}

/// Declared resources, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct ResourceCatalog {
    resources: BTreeMap<String, ResourceDef>,
    order: Vec<String>,
}

impl ResourceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a resource. Ids must be unique within the catalog.
    pub fn declare(&mut self, resource: ResourceDef) -> Result<ResourceHandle, ValidationError> {
        validate_id(&resource.id).map_err(|reason| {
            ValidationError::invalid_declaration(NodeId::resource(resource.id.clone()), reason)
        })?;
        if self.resources.contains_key(&resource.id) {
            return Err(ValidationError::duplicate_resource(&resource.id));
        }

        let handle = ResourceHandle {
            id: resource.id.clone(),
            kind: resource.kind,
        };
        self.order.push(resource.id.clone());
        self.resources.insert(resource.id.clone(), resource);
        Ok(handle)
    }

    pub fn get(&self, id: &str) -> Option<&ResourceDef> {
        self.resources.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.resources.contains_key(id)
    }

    /// Resources in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &ResourceDef> {
        self.order.iter().filter_map(|id| self.resources.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
