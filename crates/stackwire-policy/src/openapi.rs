//! OpenAPI 3.0 rendering of action groups.
//!
//! The rendered document is what the agent runtime consumes; it is the payload
//! handed to the backend when a group is attached.

use serde_json::{Map, Value, json};
use stackwire_core::{ActionGroupDef, OperationDef, ParameterDef, ParameterLocation};

pub const OPENAPI_VERSION: &str = "3.0.0";

/// Render `group` as an OpenAPI document.
pub fn render_openapi(group: &ActionGroupDef) -> Value {
    let mut info = Map::new();
    info.insert(
        "title".into(),
        Value::String(group.description.clone().unwrap_or_else(|| group.name.clone())),
    );
    info.insert("version".into(), Value::String("1.0.0".into()));

    let mut paths: Map<String, Value> = Map::new();
    for operation in &group.operations {
        let item = paths
            .entry(operation.path.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(item) = item {
            item.insert(operation.verb.as_str().to_string(), render_operation(operation));
        }
    }

    json!({
        "openapi": OPENAPI_VERSION,
        "info": info,
        "paths": paths,
    })
}

fn render_operation(operation: &OperationDef) -> Value {
    let mut rendered = Map::new();
    rendered.insert("operationId".into(), json!(operation.operation_id));
    rendered.insert(
        "summary".into(),
        json!(operation.summary.as_deref().unwrap_or(&operation.operation_id)),
    );
    if let Some(description) = &operation.description {
        rendered.insert("description".into(), json!(description));
    }
    if !operation.parameters.is_empty() {
        rendered.insert(
            "parameters".into(),
            Value::Array(operation.parameters.iter().map(render_parameter).collect()),
        );
    }
    if let Some(schema) = &operation.request_schema {
        rendered.insert(
            "requestBody".into(),
            json!({
                "required": true,
                "content": { "application/json": { "schema": schema } }
            }),
        );
    }
    rendered.insert(
        "responses".into(),
        json!({
            "200": {
                "description": operation
                    .response_description
                    .as_deref()
                    .unwrap_or("Successful response"),
                "content": { "application/json": { "schema": operation.response_schema } }
            }
        }),
    );
    Value::Object(rendered)
}

fn render_parameter(parameter: &ParameterDef) -> Value {
    let location = match parameter.location {
        ParameterLocation::Query => "query",
        ParameterLocation::Path => "path",
        ParameterLocation::Header => "header",
    };
    let mut rendered = Map::new();
    rendered.insert("name".into(), json!(parameter.name));
    rendered.insert("in".into(), json!(location));
    rendered.insert("required".into(), json!(parameter.required));
    rendered.insert("schema".into(), parameter.schema.clone());
    if let Some(description) = &parameter.description {
        rendered.insert("description".into(), json!(description));
    }
    Value::Object(rendered)
}
