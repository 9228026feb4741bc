//! Validation errors raised while declaring and planning a topology.
//!
//! Validation errors are fatal: a plan is either complete and consistent or
//! not produced at all.

use std::fmt;

use crate::topology::NodeId;

/// Error type for declaration and planning failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The kind of validation error.
    pub kind: ValidationErrorKind,
    /// Human-readable error message.
    pub message: String,
    /// Offending node, when one can be named.
    pub node: Option<NodeId>,
}

impl ValidationError {
    /// Create a new validation error.
    pub fn new(kind: ValidationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            node: None,
        }
    }

    /// Attach the offending node.
    pub fn at(mut self, node: NodeId) -> Self {
        self.node = Some(node);
        self
    }

    // =========================================================================
    // DUPLICATE DECLARATIONS
    // =========================================================================

    pub fn duplicate_resource(id: &str) -> Self {
        Self::new(
            ValidationErrorKind::DuplicateResource,
            format!("Resource '{}' is declared more than once", id),
        )
        .at(NodeId::resource(id))
    }

    pub fn duplicate_function(id: &str) -> Self {
        Self::new(
            ValidationErrorKind::DuplicateFunction,
            format!("Function '{}' is registered more than once", id),
        )
        .at(NodeId::function(id))
    }

    pub fn duplicate_agent(id: &str) -> Self {
        Self::new(
            ValidationErrorKind::DuplicateAgent,
            format!("Agent '{}' is declared more than once", id),
        )
        .at(NodeId::agent(id))
    }

    /// Two action groups of one agent expose the same operation id.
    pub fn duplicate_operation_id(
        agent: &str,
        operation_id: &str,
        first_group: &str,
        second_group: &str,
    ) -> Self {
        let message = if first_group == second_group {
            format!(
                "Operation '{}' appears twice in action group '{}' of agent '{}'",
                operation_id, first_group, agent
            )
        } else {
            format!(
                "Operation '{}' of agent '{}' is exposed by both '{}' and '{}'",
                operation_id, agent, first_group, second_group
            )
        };
        Self::new(ValidationErrorKind::DuplicateOperationId, message)
            .at(NodeId::action_group(agent, second_group))
    }

    // =========================================================================
    // REFERENCES
    // =========================================================================

    /// A function names a resource that is not in the catalog.
    pub fn unknown_resource_reference(function: &str, resource: &str) -> Self {
        Self::new(
            ValidationErrorKind::UnknownResourceReference,
            format!(
                "Function '{}' references resource '{}' which has not been declared",
                function, resource
            ),
        )
        .at(NodeId::function(function))
    }

    /// A grant needs a principal that has not been created yet.
    pub fn unresolved_principal(node: NodeId) -> Self {
        Self::new(
            ValidationErrorKind::UnresolvedPrincipal,
            format!("Principal of '{}' has not been created", node),
        )
        .at(node)
    }

    /// An action group is attached before the agent may invoke its target.
    pub fn missing_invoke_permission(agent: &str, group: &str, function: &str) -> Self {
        Self::new(
            ValidationErrorKind::MissingInvokePermission,
            format!(
                "Agent '{}' cannot attach action group '{}': no invoke grant to function '{}'",
                agent, group, function
            ),
        )
        .at(NodeId::action_group(agent, group))
    }

    // =========================================================================
    // ORDERING AND SHAPE
    // =========================================================================

    /// A node depends on something that is not planned before it.
    pub fn dependency_cycle(node: NodeId, depends_on: &NodeId, reason: &str) -> Self {
        Self::new(
            ValidationErrorKind::DependencyCycle,
            format!("'{}' cannot be ordered after '{}': {}", node, depends_on, reason),
        )
        .at(node)
    }

    /// A declaration is malformed (bad id, out-of-range limit, bad schema).
    pub fn invalid_declaration(node: NodeId, reason: impl fmt::Display) -> Self {
        Self::new(
            ValidationErrorKind::InvalidDeclaration,
            format!("Invalid declaration '{}': {}", node, reason),
        )
        .at(node)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Categories of validation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationErrorKind {
    /// Two resources share an id.
    DuplicateResource,
    /// Two functions share an id.
    DuplicateFunction,
    /// Two agents share an id.
    DuplicateAgent,
    /// A function refers to an undeclared resource.
    UnknownResourceReference,
    /// Grant principal has not been created.
    UnresolvedPrincipal,
    /// Action group attached without an invoke grant.
    MissingInvokePermission,
    /// Operation id reused within one agent.
    DuplicateOperationId,
    /// Declaration violates tier order.
    DependencyCycle,
    /// Malformed declaration.
    InvalidDeclaration,
}

impl ValidationErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationErrorKind::DuplicateResource => "duplicate_resource",
            ValidationErrorKind::DuplicateFunction => "duplicate_function",
            ValidationErrorKind::DuplicateAgent => "duplicate_agent",
            ValidationErrorKind::UnknownResourceReference => "unknown_resource_reference",
            ValidationErrorKind::UnresolvedPrincipal => "unresolved_principal",
            ValidationErrorKind::MissingInvokePermission => "missing_invoke_permission",
            ValidationErrorKind::DuplicateOperationId => "duplicate_operation_id",
            ValidationErrorKind::DependencyCycle => "dependency_cycle",
            ValidationErrorKind::InvalidDeclaration => "invalid_declaration",
        }
    }
}

impl fmt::Display for ValidationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_operation_message_names_both_groups() {
        let err = ValidationError::duplicate_operation_id("a1", "getMetrics", "g1", "g2");
        assert_eq!(err.kind, ValidationErrorKind::DuplicateOperationId);
        assert!(err.message.contains("'g1'"));
        assert!(err.message.contains("'g2'"));
        assert_eq!(err.node, Some(NodeId::action_group("a1", "g2")));
    }

    #[test]
    fn test_dependency_cycle_names_both_nodes() {
        let err = ValidationError::dependency_cycle(
            NodeId::action_group("a1", "ag1"),
            &NodeId::function("missing"),
            "target function is not registered",
        );
        assert_eq!(
            err.to_string(),
            "'action_group:a1/ag1' cannot be ordered after 'function:missing': target function is not registered"
        );
    }
}
