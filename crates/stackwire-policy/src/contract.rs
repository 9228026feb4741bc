//! Action group contracts.
//!
//! Static validation (`validate_agent`) runs at plan time and covers shape:
//! target registration, operation id uniqueness, paths and schemas. The
//! stateful [`ActionGroupContract`] runs at apply time and additionally
//! requires the invoke grant to be in the ledger before a group is attached.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use stackwire_core::{
    ActionGroupDef, AgentDef, FunctionRegistry, GrantLedger, NodeId, ParameterLocation,
    PrincipalId, ValidationError, validate_id,
};

/// Result of a successful attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    Attached,
    /// The same group was attached before.
    AlreadyAttached,
}

/// Attached action groups of one agent.
#[derive(Debug, Clone)]
pub struct ActionGroupContract {
    agent_id: String,
    principal: PrincipalId,
    groups: BTreeMap<String, ActionGroupDef>,
    /// operation id -> owning group
    operations: BTreeMap<String, String>,
}

impl ActionGroupContract {
    pub fn new(agent_id: impl Into<String>) -> Self {
        let agent_id = agent_id.into();
        Self {
            principal: PrincipalId::for_agent(&agent_id),
            agent_id,
            groups: BTreeMap::new(),
            operations: BTreeMap::new(),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Attach `group` to the agent.
    ///
    /// Fails with `MissingInvokePermission` unless `ledger` holds an invoke
    /// grant from the agent's principal to the group's target, and with
    /// `DuplicateOperationId` if another attached group already exposes one
    /// of its operations.
    pub fn attach(
        &mut self,
        group: &ActionGroupDef,
        ledger: &GrantLedger,
    ) -> Result<AttachOutcome, ValidationError> {
        if !ledger.has_invoke(&self.principal, &group.target_function) {
            return Err(ValidationError::missing_invoke_permission(
                &self.agent_id,
                &group.name,
                &group.target_function,
            ));
        }

        if let Some(existing) = self.groups.get(&group.name) {
            if existing == group {
                return Ok(AttachOutcome::AlreadyAttached);
            }
            return Err(ValidationError::invalid_declaration(
                NodeId::action_group(self.agent_id.clone(), group.name.clone()),
                "a different action group with this name is already attached",
            ));
        }

        let mut seen = BTreeSet::new();
        for operation_id in group.operation_ids() {
            if let Some(owner) = self.operations.get(operation_id) {
                return Err(ValidationError::duplicate_operation_id(
                    &self.agent_id,
                    operation_id,
                    owner,
                    &group.name,
                ));
            }
            if !seen.insert(operation_id) {
                return Err(ValidationError::duplicate_operation_id(
                    &self.agent_id,
                    operation_id,
                    &group.name,
                    &group.name,
                ));
            }
        }

        for operation_id in group.operation_ids() {
            self.operations
                .insert(operation_id.to_string(), group.name.clone());
        }
        self.groups.insert(group.name.clone(), group.clone());

        tracing::debug!(
            agent = %self.agent_id,
            group = %group.name,
            target = %group.target_function,
            "Action group attached"
        );
        Ok(AttachOutcome::Attached)
    }

    pub fn is_attached(&self, group: &str) -> bool {
        self.groups.contains_key(group)
    }

    /// Group exposing `operation_id`.
    pub fn group_for_operation(&self, operation_id: &str) -> Option<&ActionGroupDef> {
        self.operations
            .get(operation_id)
            .and_then(|name| self.groups.get(name))
    }

    pub fn groups(&self) -> impl Iterator<Item = &ActionGroupDef> {
        self.groups.values()
    }
}

/// Validate every action group of `agent` against the registry.
///
/// A group targeting an unregistered function cannot be ordered after its
/// target and fails with `DependencyCycle`.
pub fn validate_agent(agent: &AgentDef, registry: &FunctionRegistry) -> Result<(), ValidationError> {
    let mut group_names = BTreeSet::new();
    let mut operations: BTreeMap<&str, &str> = BTreeMap::new();

    for group in &agent.action_groups {
        let node = NodeId::action_group(agent.id.clone(), group.name.clone());
        if !group_names.insert(group.name.as_str()) {
            return Err(ValidationError::invalid_declaration(
                node,
                "action group name is used twice by this agent",
            ));
        }
        if !registry.contains(&group.target_function) {
            return Err(ValidationError::dependency_cycle(
                node,
                &NodeId::function(group.target_function.clone()),
                "target function is not registered",
            ));
        }

        validate_group(&agent.id, group)?;

        for operation_id in group.operation_ids() {
            if let Some(first) = operations.insert(operation_id, group.name.as_str()) {
                return Err(ValidationError::duplicate_operation_id(
                    &agent.id,
                    operation_id,
                    first,
                    &group.name,
                ));
            }
        }
    }
    Ok(())
}

/// Structural checks on one action group.
pub fn validate_group(agent_id: &str, group: &ActionGroupDef) -> Result<(), ValidationError> {
    let node = NodeId::action_group(agent_id, group.name.clone());
    let invalid = |reason: String| ValidationError::invalid_declaration(node.clone(), reason);

    validate_id(&group.name).map_err(invalid)?;
    if group.operations.is_empty() {
        return Err(invalid("action group declares no operations".to_string()));
    }

    let mut routes = BTreeSet::new();
    for operation in &group.operations {
        let op = &operation.operation_id;
        if op.is_empty() || !op.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err(invalid(format!("operation id '{}' is not a valid identifier", op)));
        }
        if !operation.path.starts_with('/') {
            return Err(invalid(format!(
                "path '{}' of operation '{}' must start with '/'",
                operation.path, op
            )));
        }
        if !routes.insert((operation.verb, operation.path.as_str())) {
            return Err(invalid(format!(
                "{} {} is declared by more than one operation",
                operation.verb, operation.path
            )));
        }

        let mut names = BTreeSet::new();
        for parameter in &operation.parameters {
            if !names.insert(parameter.name.as_str()) {
                return Err(invalid(format!(
                    "parameter '{}' of operation '{}' is declared twice",
                    parameter.name, op
                )));
            }
            if parameter.location == ParameterLocation::Path {
                if !parameter.required {
                    return Err(invalid(format!(
                        "path parameter '{}' of operation '{}' must be required",
                        parameter.name, op
                    )));
                }
                if !operation.path.contains(&format!("{{{}}}", parameter.name)) {
                    return Err(invalid(format!(
                        "path parameter '{}' does not appear in '{}'",
                        parameter.name, operation.path
                    )));
                }
            }
            check_schema(&parameter.schema)
                .map_err(|e| invalid(format!("parameter '{}' of '{}': {}", parameter.name, op, e)))?;
        }

        if let Some(request_schema) = &operation.request_schema {
            check_schema(request_schema)
                .map_err(|e| invalid(format!("request schema of '{}': {}", op, e)))?;
        }
        check_schema(&operation.response_schema)
            .map_err(|e| invalid(format!("response schema of '{}': {}", op, e)))?;
    }
    Ok(())
}

/// Compile `schema` as JSON Schema.
pub fn check_schema(schema: &Value) -> Result<(), String> {
    if !schema.is_object() && !schema.is_boolean() {
        return Err("schema must be an object".to_string());
    }
    jsonschema::draft202012::options()
        .build(schema)
        .map(|_| ())
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stackwire_core::{
        AccessLevel, FunctionDef, Grant, HttpVerb, OperationDef, ResourceCatalog,
        ValidationErrorKind,
    };

    fn registry(functions: &[&str]) -> FunctionRegistry {
        let catalog = ResourceCatalog::new();
        let mut registry = FunctionRegistry::new();
        for id in functions {
            registry
                .register(&catalog, FunctionDef::new(*id, "index.handler"))
                .unwrap();
        }
        registry
    }

    fn group(name: &str, target: &str, ops: &[&str]) -> ActionGroupDef {
        let mut group = ActionGroupDef::new(name, target);
        for (i, op) in ops.iter().enumerate() {
            group = group.with_operation(OperationDef::new(*op, HttpVerb::Get, format!("/{}/{}", name, i)));
        }
        group
    }

    #[test]
    fn test_attach_requires_invoke_grant() {
        let ag1 = group("AG1", "F2", &["getThing"]);
        let mut contract = ActionGroupContract::new("A1");
        let mut ledger = GrantLedger::new();

        let err = contract.attach(&ag1, &ledger).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::MissingInvokePermission);
        assert!(!contract.is_attached("AG1"));

        ledger.record(Grant::invoke(PrincipalId::for_agent("A1"), "F2"));
        assert_eq!(contract.attach(&ag1, &ledger).unwrap(), AttachOutcome::Attached);
        assert_eq!(
            contract.attach(&ag1, &ledger).unwrap(),
            AttachOutcome::AlreadyAttached
        );
        assert_eq!(contract.group_for_operation("getThing").unwrap().name, "AG1");
    }

    #[test]
    fn test_invoke_grant_for_other_function_does_not_count() {
        let mut contract = ActionGroupContract::new("A1");
        let mut ledger = GrantLedger::new();
        ledger.record(Grant::invoke(PrincipalId::for_agent("A1"), "F1"));
        ledger.record(Grant::invoke(PrincipalId::for_agent("A2"), "F2"));
        ledger.record(Grant::data(PrincipalId::for_agent("A1"), "F2", AccessLevel::ReadWrite));

        let err = contract
            .attach(&group("AG1", "F2", &["op"]), &ledger)
            .unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::MissingInvokePermission);
    }

    #[test]
    fn test_attach_rejects_overlapping_operation_ids() {
        let mut contract = ActionGroupContract::new("A1");
        let mut ledger = GrantLedger::new();
        ledger.record(Grant::invoke(PrincipalId::for_agent("A1"), "F1"));
        ledger.record(Grant::invoke(PrincipalId::for_agent("A1"), "F2"));

        contract
            .attach(&group("g1", "F1", &["getMetrics", "adjustBid"]), &ledger)
            .unwrap();
        let err = contract
            .attach(&group("g2", "F2", &["getMetrics"]), &ledger)
            .unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::DuplicateOperationId);
        assert!(!contract.is_attached("g2"));

        contract
            .attach(&group("g3", "F2", &["getTrends"]), &ledger)
            .unwrap();
        assert_eq!(contract.groups().count(), 2);
    }

    #[test]
    fn test_validate_agent_disjoint_ids_succeed() {
        let agent = AgentDef::new("A1", "model")
            .with_action_group(group("g1", "F1", &["a", "b"]))
            .with_action_group(group("g2", "F2", &["c"]));
        validate_agent(&agent, &registry(&["F1", "F2"])).unwrap();
    }

    #[test]
    fn test_validate_agent_overlapping_ids_fail() {
        let agent = AgentDef::new("A1", "model")
            .with_action_group(group("g1", "F1", &["a", "b"]))
            .with_action_group(group("g2", "F2", &["b"]));
        let err = validate_agent(&agent, &registry(&["F1", "F2"])).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::DuplicateOperationId);
    }

    #[test]
    fn test_validate_agent_unregistered_target_is_ordering_error() {
        let agent = AgentDef::new("A1", "model").with_action_group(group("g1", "ghost", &["a"]));
        let err = validate_agent(&agent, &registry(&["F1"])).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::DependencyCycle);
    }

    #[test]
    fn test_validate_group_rejects_bad_path_and_schema() {
        let bad_path = ActionGroupDef::new("g", "F1")
            .with_operation(OperationDef::new("op", HttpVerb::Get, "campaigns"));
        assert_eq!(
            validate_group("A1", &bad_path).unwrap_err().kind,
            ValidationErrorKind::InvalidDeclaration
        );

        let bad_schema = ActionGroupDef::new("g", "F1").with_operation(
            OperationDef::new("op", HttpVerb::Post, "/x")
                .with_request_schema(json!({"type": "not-a-type"})),
        );
        let err = validate_group("A1", &bad_schema).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::InvalidDeclaration);
        assert!(err.message.contains("request schema"));

        let empty = ActionGroupDef::new("g", "F1");
        assert!(validate_group("A1", &empty).is_err());
    }

    #[test]
    fn test_check_schema_accepts_realistic_body() {
        let schema = json!({
            "type": "object",
            "required": ["totalBudget", "campaignIds"],
            "properties": {
                "totalBudget": { "type": "number" },
                "campaignIds": { "type": "array", "items": { "type": "string" } },
                "goal": { "type": "string", "enum": ["maximize_roas", "minimize_cpa"] }
            }
        });
        assert!(check_schema(&schema).is_ok());
        assert!(check_schema(&json!("string")).is_err());
    }
}
