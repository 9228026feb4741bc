//! Routing of agent action invocations to functions.
//!
//! The agent runtime calls an action group with an event carrying `apiPath`,
//! `httpMethod`, a flat parameter list and an optional JSON request body whose
//! properties arrive as strings. The router resolves that event to the target
//! function and operation, coerces parameter values by their declared schema
//! and validates the body against the operation's request schema.

use std::collections::BTreeMap;

use jsonschema::Validator;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use stackwire_core::{
    ActionGroupDef, AgentDef, HttpVerb, NodeId, OperationDef, ParameterLocation, ValidationError,
};

const JSON_CONTENT_TYPE: &str = "application/json";

/// Errors resolving an invocation.
#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    #[error("Unsupported HTTP method: {0}")]
    UnsupportedMethod(String),

    #[error("No operation matches {verb} {path}")]
    UnknownRoute { verb: HttpVerb, path: String },

    #[error("{verb} {path} matches operations in several action groups: {groups:?}")]
    AmbiguousRoute {
        verb: HttpVerb,
        path: String,
        groups: Vec<String>,
    },

    #[error("Operation '{operation}' requires parameter '{name}'")]
    MissingParameter { operation: String, name: String },

    #[error("Parameter '{name}' of operation '{operation}' is invalid: {reason}")]
    InvalidParameter {
        operation: String,
        name: String,
        reason: String,
    },

    #[error("Request body of operation '{operation}' is invalid: {reason}")]
    InvalidBody { operation: String, reason: String },
}

/// A single `{name, type, value}` entry as sent by the agent runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationParameter {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub value: String,
}

impl InvocationParameter {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: None,
            value: value.into(),
        }
    }

    pub fn typed(name: impl Into<String>, kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: Some(kind.into()),
            value: value.into(),
        }
    }
}

/// Body of one content type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaContent {
    /// Body fields, each with a stringified value.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<InvocationParameter>,

    /// Raw JSON body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestBody {
    #[serde(default)]
    pub content: BTreeMap<String, MediaContent>,
}

/// An incoming action group call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionInvocation {
    /// Action group name, when the runtime supplies it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_group: Option<String>,
    pub api_path: String,
    pub http_method: String,
    #[serde(default)]
    pub parameters: Vec<InvocationParameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_body: Option<RequestBody>,
}

impl ActionInvocation {
    pub fn new(http_method: impl Into<String>, api_path: impl Into<String>) -> Self {
        Self {
            action_group: None,
            api_path: api_path.into(),
            http_method: http_method.into(),
            parameters: Vec::new(),
            request_body: None,
        }
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.action_group = Some(group.into());
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.push(InvocationParameter::new(name, value));
        self
    }

    /// Attach a JSON body as a list of stringified properties.
    pub fn with_body_properties(mut self, properties: Vec<InvocationParameter>) -> Self {
        let mut body = RequestBody::default();
        body.content.insert(
            JSON_CONTENT_TYPE.to_string(),
            MediaContent {
                properties,
                body: None,
            },
        );
        self.request_body = Some(body);
        self
    }

    /// Attach a raw JSON body.
    pub fn with_json_body(mut self, body: &Value) -> Self {
        let mut request_body = RequestBody::default();
        request_body.content.insert(
            JSON_CONTENT_TYPE.to_string(),
            MediaContent {
                properties: Vec::new(),
                body: Some(body.to_string()),
            },
        );
        self.request_body = Some(request_body);
        self
    }

    fn json_content(&self) -> Option<&MediaContent> {
        self.request_body
            .as_ref()
            .and_then(|b| b.content.get(JSON_CONTENT_TYPE))
    }
}

/// An invocation resolved to its target.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedInvocation {
    pub action_group: String,
    pub function_id: String,
    pub operation_id: String,
    /// Query, path and header parameters, coerced by schema.
    pub parameters: Map<String, Value>,
    pub body: Option<Value>,
}

impl ResolvedInvocation {
    /// Parameters and body fields merged into one object. Parameters win on conflict.
    pub fn arguments(&self) -> Value {
        let mut merged = match &self.body {
            Some(Value::Object(fields)) => fields.clone(),
            _ => Map::new(),
        };
        for (name, value) in &self.parameters {
            merged.insert(name.clone(), value.clone());
        }
        Value::Object(merged)
    }
}

struct Route {
    group: String,
    function_id: String,
    operation: OperationDef,
    segments: Vec<Segment>,
    parameter_validators: BTreeMap<String, Validator>,
    body_validator: Option<Validator>,
}

enum Segment {
    Literal(String),
    Capture(String),
}

impl Route {
    fn compile(agent_id: &str, group: &ActionGroupDef, operation: &OperationDef) -> Result<Self, ValidationError> {
        let node = NodeId::action_group(agent_id, group.name.clone());
        let compile = |schema: &Value, what: String| {
            jsonschema::draft202012::options()
                .build(schema)
                .map_err(|e| ValidationError::invalid_declaration(node.clone(), format!("{}: {}", what, e)))
        };

        let mut parameter_validators = BTreeMap::new();
        for parameter in &operation.parameters {
            let validator = compile(
                &parameter.schema,
                format!("parameter '{}' of '{}'", parameter.name, operation.operation_id),
            )?;
            parameter_validators.insert(parameter.name.clone(), validator);
        }
        let body_validator = operation
            .request_schema
            .as_ref()
            .map(|schema| compile(schema, format!("request schema of '{}'", operation.operation_id)))
            .transpose()?;

        Ok(Self {
            group: group.name.clone(),
            function_id: group.target_function.clone(),
            operation: operation.clone(),
            segments: parse_segments(&operation.path),
            parameter_validators,
            body_validator,
        })
    }

    /// Match `path`, returning captured path parameters.
    fn matches(&self, path: &str) -> Option<BTreeMap<String, String>> {
        let parts: Vec<&str> = path.trim_matches('/').split('/').filter(|p| !p.is_empty()).collect();
        if parts.len() != self.segments.len() {
            return None;
        }
        let mut captures = BTreeMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(literal) if literal == part => {}
                Segment::Literal(_) => return None,
                Segment::Capture(name) => {
                    captures.insert(name.clone(), part.to_string());
                }
            }
        }
        Some(captures)
    }

    /// Literal segments; more means a more specific route.
    fn specificity(&self) -> usize {
        self.segments
            .iter()
            .filter(|segment| matches!(segment, Segment::Literal(_)))
            .count()
    }
}

fn parse_segments(path: &str) -> Vec<Segment> {
    path.trim_matches('/')
        .split('/')
        .filter(|p| !p.is_empty())
        .map(|part| match part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
            Some(name) => Segment::Capture(name.to_string()),
            None => Segment::Literal(part.to_string()),
        })
        .collect()
}

/// Resolves invocations for one agent's action groups.
pub struct InvocationRouter {
    agent_id: String,
    routes: Vec<Route>,
}

impl InvocationRouter {
    /// Build a router over every action group declared by `agent`.
    pub fn for_agent(agent: &AgentDef) -> Result<Self, ValidationError> {
        Self::for_groups(&agent.id, agent.action_groups.iter())
    }

    /// Build a router over a subset of groups (e.g. the attached ones).
    pub fn for_groups<'a>(
        agent_id: &str,
        groups: impl IntoIterator<Item = &'a ActionGroupDef>,
    ) -> Result<Self, ValidationError> {
        let mut routes = Vec::new();
        for group in groups {
            for operation in &group.operations {
                routes.push(Route::compile(agent_id, group, operation)?);
            }
        }
        Ok(Self {
            agent_id: agent_id.to_string(),
            routes,
        })
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Resolve `invocation` to its function and operation.
    pub fn resolve(&self, invocation: &ActionInvocation) -> Result<ResolvedInvocation, InvocationError> {
        let verb = HttpVerb::from_method(&invocation.http_method)
            .ok_or_else(|| InvocationError::UnsupportedMethod(invocation.http_method.clone()))?;

        let mut candidates: Vec<(&Route, BTreeMap<String, String>)> = self
            .routes
            .iter()
            .filter(|route| route.operation.verb == verb)
            .filter(|route| {
                invocation
                    .action_group
                    .as_deref()
                    .is_none_or(|group| group == route.group)
            })
            .filter_map(|route| route.matches(&invocation.api_path).map(|c| (route, c)))
            .collect();
        // `/campaigns/active` wins over `/campaigns/{campaignId}`
        if let Some(best) = candidates.iter().map(|(route, _)| route.specificity()).max() {
            candidates.retain(|(route, _)| route.specificity() == best);
        }

        let (route, captures) = match candidates.len() {
            0 => {
                return Err(InvocationError::UnknownRoute {
                    verb,
                    path: invocation.api_path.clone(),
                });
            }
            1 => candidates.remove(0),
            _ => {
                return Err(InvocationError::AmbiguousRoute {
                    verb,
                    path: invocation.api_path.clone(),
                    groups: candidates.iter().map(|(r, _)| r.group.clone()).collect(),
                });
            }
        };

        let parameters = resolve_parameters(route, invocation, &captures)?;
        let body = resolve_body(route, invocation)?;

        tracing::debug!(
            agent = %self.agent_id,
            group = %route.group,
            operation = %route.operation.operation_id,
            function = %route.function_id,
            "Invocation resolved"
        );

        Ok(ResolvedInvocation {
            action_group: route.group.clone(),
            function_id: route.function_id.clone(),
            operation_id: route.operation.operation_id.clone(),
            parameters,
            body,
        })
    }
}

fn resolve_parameters(
    route: &Route,
    invocation: &ActionInvocation,
    captures: &BTreeMap<String, String>,
) -> Result<Map<String, Value>, InvocationError> {
    let operation = &route.operation;
    let mut resolved = Map::new();

    for parameter in &operation.parameters {
        let raw = match parameter.location {
            ParameterLocation::Path => captures.get(&parameter.name).map(String::as_str),
            ParameterLocation::Query | ParameterLocation::Header => invocation
                .parameters
                .iter()
                .find(|p| p.name == parameter.name)
                .map(|p| p.value.as_str()),
        };

        let Some(raw) = raw else {
            if parameter.required {
                return Err(InvocationError::MissingParameter {
                    operation: operation.operation_id.clone(),
                    name: parameter.name.clone(),
                });
            }
            if let Some(default) = parameter.schema.get("default") {
                resolved.insert(parameter.name.clone(), default.clone());
            }
            continue;
        };

        let invalid = |reason: String| InvocationError::InvalidParameter {
            operation: operation.operation_id.clone(),
            name: parameter.name.clone(),
            reason,
        };
        let value = coerce(raw, schema_type(&parameter.schema)).map_err(invalid)?;
        if let Some(validator) = route.parameter_validators.get(&parameter.name)
            && let Err(err) = validator.validate(&value)
        {
            return Err(invalid(err.to_string()));
        }
        resolved.insert(parameter.name.clone(), value);
    }
    Ok(resolved)
}

fn resolve_body(route: &Route, invocation: &ActionInvocation) -> Result<Option<Value>, InvocationError> {
    let operation = &route.operation;
    let invalid = |reason: String| InvocationError::InvalidBody {
        operation: operation.operation_id.clone(),
        reason,
    };

    let body = match invocation.json_content() {
        None => None,
        Some(MediaContent { body: Some(raw), .. }) => {
            Some(serde_json::from_str::<Value>(raw).map_err(|e| invalid(e.to_string()))?)
        }
        Some(MediaContent { properties, .. }) => {
            let declared = operation
                .request_schema
                .as_ref()
                .and_then(|s| s.get("properties"));
            let mut fields = Map::new();
            for property in properties {
                let kind = property
                    .kind
                    .as_deref()
                    .or_else(|| declared.and_then(|d| d.get(&property.name)).and_then(schema_type));
                let value = coerce(&property.value, kind)
                    .map_err(|reason| invalid(format!("property '{}': {}", property.name, reason)))?;
                fields.insert(property.name.clone(), value);
            }
            Some(Value::Object(fields))
        }
    };

    match (&route.body_validator, &body) {
        (Some(_), None) => Err(invalid("request body is required".to_string())),
        (Some(validator), Some(body)) => {
            let errors: Vec<String> = validator.iter_errors(body).take(5).map(|e| e.to_string()).collect();
            if errors.is_empty() {
                Ok(Some(body.clone()))
            } else {
                Err(invalid(errors.join("; ")))
            }
        }
        (None, _) => Ok(body),
    }
}

fn schema_type(schema: &Value) -> Option<&str> {
    schema.get("type").and_then(Value::as_str)
}

/// Convert a stringified value to the JSON type named by `kind`.
fn coerce(raw: &str, kind: Option<&str>) -> Result<Value, String> {
    match kind {
        Some("integer") => raw
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| format!("'{}' is not an integer", raw)),
        Some("number") => raw
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| format!("'{}' is not a number", raw)),
        Some("boolean") => match raw.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(format!("'{}' is not a boolean", raw)),
        },
        Some("array") => match serde_json::from_str::<Value>(raw) {
            Ok(value @ Value::Array(_)) => Ok(value),
            // runtimes sometimes send "[a, b]" or "a,b"
            _ => Ok(Value::Array(
                raw.trim()
                    .trim_start_matches('[')
                    .trim_end_matches(']')
                    .split(',')
                    .map(|item| item.trim().trim_matches('"'))
                    .filter(|item| !item.is_empty())
                    .map(|item| Value::String(item.to_string()))
                    .collect(),
            )),
        },
        Some("object") => serde_json::from_str::<Value>(raw)
            .ok()
            .filter(Value::is_object)
            .ok_or_else(|| format!("'{}' is not a JSON object", raw)),
        _ => Ok(Value::String(raw.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stackwire_core::ParameterDef;

    fn agent() -> AgentDef {
        let analytics = ActionGroupDef::new("analytics-actions", "analytics")
            .with_operation(
                OperationDef::new("analyzePerformance", HttpVerb::Get, "/analyze-performance")
                    .with_parameter(ParameterDef::required_query("campaignId"))
                    .with_parameter(ParameterDef {
                        name: "days".into(),
                        location: ParameterLocation::Query,
                        required: false,
                        schema: json!({"type": "integer", "default": 7}),
                        description: None,
                    }),
            )
            .with_operation(OperationDef::new("getRecommendations", HttpVerb::Get, "/recommendations"));

        let budget = ActionGroupDef::new("budget-optimizer-actions", "budget-optimizer")
            .with_operation(
                OperationDef::new("optimizeBudget", HttpVerb::Post, "/optimize").with_request_schema(json!({
                    "type": "object",
                    "required": ["totalBudget", "campaignIds"],
                    "properties": {
                        "totalBudget": {"type": "number"},
                        "campaignIds": {"type": "array", "items": {"type": "string"}},
                        "goal": {"type": "string", "enum": ["maximize_roas", "minimize_cpa", "maximize_conversions"]}
                    }
                })),
            )
            .with_operation(OperationDef::new("getBudgetRecommendations", HttpVerb::Get, "/recommendations"));

        let storage = ActionGroupDef::new("storage-actions", "storage").with_operation(
            OperationDef::new("getInsight", HttpVerb::Get, "/insights/{key}").with_parameter(ParameterDef {
                name: "key".into(),
                location: ParameterLocation::Path,
                required: true,
                schema: json!({"type": "string"}),
                description: None,
            }),
        );

        AgentDef::new("optimizer", "model")
            .with_action_group(analytics)
            .with_action_group(budget)
            .with_action_group(storage)
    }

    #[test]
    fn test_resolve_query_parameters_with_default() {
        let router = InvocationRouter::for_agent(&agent()).unwrap();
        let resolved = router
            .resolve(&ActionInvocation::new("GET", "/analyze-performance").with_parameter("campaignId", "c-1"))
            .unwrap();

        assert_eq!(resolved.function_id, "analytics");
        assert_eq!(resolved.operation_id, "analyzePerformance");
        assert_eq!(resolved.parameters["campaignId"], json!("c-1"));
        assert_eq!(resolved.parameters["days"], json!(7));
    }

    #[test]
    fn test_integer_parameter_is_coerced_and_checked() {
        let router = InvocationRouter::for_agent(&agent()).unwrap();
        let resolved = router
            .resolve(
                &ActionInvocation::new("get", "/analyze-performance")
                    .with_parameter("campaignId", "c-1")
                    .with_parameter("days", "30"),
            )
            .unwrap();
        assert_eq!(resolved.parameters["days"], json!(30));

        let err = router
            .resolve(
                &ActionInvocation::new("GET", "/analyze-performance")
                    .with_parameter("campaignId", "c-1")
                    .with_parameter("days", "a week"),
            )
            .unwrap_err();
        assert!(matches!(err, InvocationError::InvalidParameter { .. }));
    }

    #[test]
    fn test_missing_required_parameter() {
        let router = InvocationRouter::for_agent(&agent()).unwrap();
        let err = router
            .resolve(&ActionInvocation::new("GET", "/analyze-performance"))
            .unwrap_err();
        match err {
            InvocationError::MissingParameter { name, .. } => assert_eq!(name, "campaignId"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_shared_path_needs_action_group() {
        let router = InvocationRouter::for_agent(&agent()).unwrap();
        let err = router
            .resolve(&ActionInvocation::new("GET", "/recommendations"))
            .unwrap_err();
        assert!(matches!(err, InvocationError::AmbiguousRoute { .. }));

        let resolved = router
            .resolve(&ActionInvocation::new("GET", "/recommendations").in_group("budget-optimizer-actions"))
            .unwrap();
        assert_eq!(resolved.operation_id, "getBudgetRecommendations");
    }

    #[test]
    fn test_body_properties_are_typed_and_validated() {
        let router = InvocationRouter::for_agent(&agent()).unwrap();
        let resolved = router
            .resolve(&ActionInvocation::new("POST", "/optimize").with_body_properties(vec![
                InvocationParameter::typed("totalBudget", "number", "1500.5"),
                InvocationParameter::new("campaignIds", "[c-1, c-2]"),
                InvocationParameter::new("goal", "minimize_cpa"),
            ]))
            .unwrap();
        assert_eq!(resolved.function_id, "budget-optimizer");
        let body = resolved.body.as_ref().unwrap();
        assert_eq!(body["totalBudget"], json!(1500.5));
        assert_eq!(body["campaignIds"], json!(["c-1", "c-2"]));
        assert_eq!(resolved.arguments()["goal"], json!("minimize_cpa"));

        let err = router
            .resolve(&ActionInvocation::new("POST", "/optimize").with_json_body(&json!({
                "totalBudget": 100,
                "campaignIds": ["c-1"],
                "goal": "spend_everything"
            })))
            .unwrap_err();
        assert!(matches!(err, InvocationError::InvalidBody { .. }));

        let err = router
            .resolve(&ActionInvocation::new("POST", "/optimize"))
            .unwrap_err();
        assert!(matches!(err, InvocationError::InvalidBody { .. }));
    }

    #[test]
    fn test_path_parameter_capture() {
        let router = InvocationRouter::for_agent(&agent()).unwrap();
        let resolved = router
            .resolve(&ActionInvocation::new("GET", "/insights/weekly-report"))
            .unwrap();
        assert_eq!(resolved.parameters["key"], json!("weekly-report"));
        assert!(router.resolve(&ActionInvocation::new("GET", "/insights")).is_err());
    }

    #[test]
    fn test_literal_path_beats_template() {
        let ads = ActionGroupDef::new("ads", "google-ads")
            .with_operation(
                OperationDef::new("getCampaign", HttpVerb::Get, "/campaigns/{campaignId}").with_parameter(
                    ParameterDef {
                        name: "campaignId".into(),
                        location: ParameterLocation::Path,
                        required: true,
                        schema: json!({"type": "string"}),
                        description: None,
                    },
                ),
            )
            .with_operation(OperationDef::new("getActiveCampaigns", HttpVerb::Get, "/campaigns/active"));
        let router = InvocationRouter::for_agent(&AgentDef::new("optimizer", "model").with_action_group(ads)).unwrap();

        let active = router
            .resolve(&ActionInvocation::new("GET", "/campaigns/active").in_group("ads"))
            .unwrap();
        assert_eq!(active.operation_id, "getActiveCampaigns");

        let one = router
            .resolve(&ActionInvocation::new("GET", "/campaigns/c-7"))
            .unwrap();
        assert_eq!(one.operation_id, "getCampaign");
        assert_eq!(one.parameters["campaignId"], json!("c-7"));
    }

    #[test]
    fn test_unknown_route_and_method() {
        let router = InvocationRouter::for_agent(&agent()).unwrap();
        assert!(matches!(
            router.resolve(&ActionInvocation::new("DELETE", "/optimize")),
            Err(InvocationError::UnknownRoute { .. })
        ));
        assert!(matches!(
            router.resolve(&ActionInvocation::new("TRACE", "/optimize")),
            Err(InvocationError::UnsupportedMethod(_))
        ));
    }

    #[test]
    fn test_parse_runtime_event() {
        let event = json!({
            "actionGroup": "storage-actions",
            "apiPath": "/insights/abc",
            "httpMethod": "GET",
            "parameters": [],
            "requestBody": { "content": { "application/json": { "properties": [
                { "name": "note", "type": "string", "value": "x" }
            ] } } }
        });
        let invocation: ActionInvocation = serde_json::from_value(event).unwrap();
        assert_eq!(invocation.action_group.as_deref(), Some("storage-actions"));
        assert_eq!(invocation.json_content().unwrap().properties.len(), 1);
    }
}
