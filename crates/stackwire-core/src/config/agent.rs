//! Agent and action group declarations.
//!
//! An action group exposes the operations of one function to an agent. The
//! request/response schemas are structured pass-through data consumed by the
//! agent runtime at dispatch time.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::ConfigError;

/// HTTP verb of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpVerb {
    #[serde(alias = "GET")]
    Get,
    #[serde(alias = "POST")]
    Post,
    #[serde(alias = "PUT")]
    Put,
    #[serde(alias = "PATCH")]
    Patch,
    #[serde(alias = "DELETE")]
    Delete,
}

impl HttpVerb {
    /// Lowercase verb, as used for OpenAPI path item keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpVerb::Get => "get",
            HttpVerb::Post => "post",
            HttpVerb::Put => "put",
            HttpVerb::Patch => "patch",
            HttpVerb::Delete => "delete",
        }
    }

    /// Parse a method name case-insensitively.
    pub fn from_method(method: &str) -> Option<Self> {
        match method.to_ascii_lowercase().as_str() {
            "get" => Some(HttpVerb::Get),
            "post" => Some(HttpVerb::Post),
            "put" => Some(HttpVerb::Put),
            "patch" => Some(HttpVerb::Patch),
            "delete" => Some(HttpVerb::Delete),
            _ => None,
        }
    }
}

impl std::fmt::Display for HttpVerb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_str().to_ascii_uppercase())
    }
}

/// Where a parameter is carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterLocation {
    #[default]
    Query,
    Path,
    Header,
}

/// A named operation parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    pub name: String,

    #[serde(rename = "in", default)]
    pub location: ParameterLocation,

    #[serde(default)]
    pub required: bool,

    #[serde(default = "default_parameter_schema")]
    pub schema: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ParameterDef {
    /// A required string query parameter.
    pub fn required_query(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location: ParameterLocation::Query,
            required: true,
            schema: default_parameter_schema(),
            description: None,
        }
    }
}

/// One externally callable operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationDef {
    /// Unique across all action groups of the agent.
    pub operation_id: String,

    #[serde(alias = "http_verb")]
    pub verb: HttpVerb,

    /// Path, starting with `/`.
    pub path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub parameters: Vec<ParameterDef>,

    /// JSON body schema, if the operation takes a body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_schema: Option<serde_json::Value>,

    /// Schema of a successful response body.
    #[serde(default = "default_response_schema")]
    pub response_schema: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_description: Option<String>,
}

impl OperationDef {
    pub fn new(operation_id: impl Into<String>, verb: HttpVerb, path: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            verb,
            path: path.into(),
            summary: None,
            description: None,
            parameters: Vec::new(),
            request_schema: None,
            response_schema: default_response_schema(),
            response_description: None,
        }
    }

    pub fn with_parameter(mut self, parameter: ParameterDef) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_request_schema(mut self, schema: serde_json::Value) -> Self {
        self.request_schema = Some(schema);
        self
    }
}

/// A named set of operations served by one function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionGroupDef {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Function that executes the operations.
    pub target_function: String,

    #[serde(default)]
    pub operations: Vec<OperationDef>,
}

impl ActionGroupDef {
    pub fn new(name: impl Into<String>, target_function: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            target_function: target_function.into(),
            operations: Vec::new(),
        }
    }

    pub fn with_operation(mut self, operation: OperationDef) -> Self {
        self.operations.push(operation);
        self
    }

    /// Operation ids in declaration order.
    pub fn operation_ids(&self) -> impl Iterator<Item = &str> {
        self.operations.iter().map(|op| op.operation_id.as_str())
    }

    /// Load an action group from a YAML, JSON or TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        super::parse_by_extension(path, &content)
    }
}

/// How action groups reach the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachMode {
    /// Groups are attached during apply.
    #[default]
    Automatic,
    /// Groups are validated and planned but left for an operator to attach.
    Manual,
}

/// A declared agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDef {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Foundation model reference.
    pub foundation_model: String,

    /// System instruction text.
    #[serde(default)]
    pub instruction: String,

    #[serde(default = "default_idle_timeout_seconds")]
    pub idle_timeout_seconds: u32,

    #[serde(default)]
    pub attach_mode: AttachMode,

    #[serde(default)]
    pub action_groups: Vec<ActionGroupDef>,

    /// Directory of action group files, relative to the stack file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_groups_dir: Option<PathBuf>,

    /// Individual action group files.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub action_group_files: Vec<PathBuf>,
}

impl AgentDef {
    pub fn new(id: impl Into<String>, foundation_model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: None,
            foundation_model: foundation_model.into(),
            instruction: String::new(),
            idle_timeout_seconds: default_idle_timeout_seconds(),
            attach_mode: AttachMode::Automatic,
            action_groups: Vec::new(),
            action_groups_dir: None,
            action_group_files: Vec::new(),
        }
    }

    pub fn with_action_group(mut self, group: ActionGroupDef) -> Self {
        self.action_groups.push(group);
        self
    }

    /// Get an action group by name.
    pub fn action_group(&self, name: &str) -> Option<&ActionGroupDef> {
        self.action_groups.iter().find(|g| g.name == name)
    }

    /// Distinct target function ids, in first-seen order.
    pub fn target_functions(&self) -> Vec<&str> {
        let mut targets: Vec<&str> = Vec::new();
        for group in &self.action_groups {
            if !targets.contains(&group.target_function.as_str()) {
                targets.push(&group.target_function);
            }
        }
        targets
    }
}

fn default_parameter_schema() -> serde_json::Value {
    serde_json::json!({ "type": "string" })
}

fn default_response_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object" })
}

fn default_idle_timeout_seconds() -> u32 {
    1800
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_action_group() {
        let yaml = r#"
name: analytics-actions
target_function: analytics
operations:
  - operation_id: analyzePerformance
    verb: GET
    path: /analyze-performance
    parameters:
      - name: campaignId
        required: true
      - name: days
        schema: { type: integer, default: 7 }
  - operation_id: compareCampaigns
    verb: post
    path: /compare-campaigns
    request_schema:
      type: object
      properties:
        campaignIds: { type: array, items: { type: string } }
"#;
        let group: ActionGroupDef = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(group.operations.len(), 2);
        let analyze = &group.operations[0];
        assert_eq!(analyze.verb, HttpVerb::Get);
        assert_eq!(analyze.parameters[0].location, ParameterLocation::Query);
        assert!(analyze.parameters[0].required);
        assert_eq!(analyze.parameters[0].schema, json!({"type": "string"}));
        assert!(!analyze.parameters[1].required);
        assert_eq!(analyze.response_schema, json!({"type": "object"}));

        let compare = &group.operations[1];
        assert_eq!(compare.verb, HttpVerb::Post);
        assert_eq!(
            compare.request_schema.as_ref().unwrap()["properties"]["campaignIds"]["type"],
            json!("array")
        );
        assert_eq!(
            group.operation_ids().collect::<Vec<_>>(),
            vec!["analyzePerformance", "compareCampaigns"]
        );
    }

    #[test]
    fn test_agent_defaults() {
        let yaml = r#"
id: ad-optimizer
foundation_model: anthropic.claude-3-5-sonnet-20241022-v2:0
"#;
        let agent: AgentDef = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(agent.idle_timeout_seconds, 1800);
        assert_eq!(agent.attach_mode, AttachMode::Automatic);
        assert!(agent.action_groups.is_empty());
    }

    #[test]
    fn test_target_functions_are_distinct() {
        let agent = AgentDef::new("a", "model")
            .with_action_group(ActionGroupDef::new("g1", "f1"))
            .with_action_group(ActionGroupDef::new("g2", "f2"))
            .with_action_group(ActionGroupDef::new("g3", "f1"));
        assert_eq!(agent.target_functions(), vec!["f1", "f2"]);
    }

    #[test]
    fn test_http_verb_from_method() {
        assert_eq!(HttpVerb::from_method("POST"), Some(HttpVerb::Post));
        assert_eq!(HttpVerb::from_method("get"), Some(HttpVerb::Get));
        assert_eq!(HttpVerb::from_method("TRACE"), None);
        assert_eq!(HttpVerb::Patch.to_string(), "PATCH");
    }
}
