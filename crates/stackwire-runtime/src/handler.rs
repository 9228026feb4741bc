//! Dispatch of action invocations to in-process handlers.
//!
//! A function's handler receives the resolved operation id and merged
//! arguments, and answers with a status code and JSON body. The result is
//! wrapped in the response envelope the agent runtime expects.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;

use stackwire_policy::{ActionInvocation, InvocationRouter};

/// Version tag of the response envelope.
pub const MESSAGE_VERSION: &str = "1.0";

/// Status code and JSON body returned by a handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerResponse {
    pub status_code: u16,
    pub body: Value,
}

impl HandlerResponse {
    pub fn ok(body: Value) -> Self {
        Self {
            status_code: 200,
            body,
        }
    }

    pub fn error(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            status_code,
            body: json!({ "error": message.into() }),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Code behind a function.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn invoke(&self, operation_id: &str, arguments: &Value) -> anyhow::Result<HandlerResponse>;
}

/// Handlers keyed by function id.
#[derive(Clone, Default)]
pub struct HandlerSet {
    handlers: BTreeMap<String, Arc<dyn Handler>>,
}

impl HandlerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, function_id: impl Into<String>, handler: Arc<dyn Handler>) -> &mut Self {
        self.handlers.insert(function_id.into(), handler);
        self
    }

    pub fn contains(&self, function_id: &str) -> bool {
        self.handlers.contains_key(function_id)
    }

    /// Route `invocation` and run the target function's handler.
    ///
    /// Routing failures answer 400, a function without a handler 404 and a
    /// handler error 500. Never fails.
    pub async fn dispatch(&self, router: &InvocationRouter, invocation: &ActionInvocation) -> HandlerResponse {
        let resolved = match router.resolve(invocation) {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::warn!(
                    agent = %router.agent_id(),
                    method = %invocation.http_method,
                    path = %invocation.api_path,
                    error = %e,
                    "Invocation rejected"
                );
                return HandlerResponse::error(400, e.to_string());
            }
        };

        let Some(handler) = self.handlers.get(&resolved.function_id) else {
            return HandlerResponse::error(
                404,
                format!("no handler registered for function '{}'", resolved.function_id),
            );
        };

        tracing::debug!(
            agent = %router.agent_id(),
            group = %resolved.action_group,
            function = %resolved.function_id,
            operation = %resolved.operation_id,
            "Dispatching invocation"
        );
        match handler
            .invoke(&resolved.operation_id, &resolved.arguments())
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(
                    function = %resolved.function_id,
                    operation = %resolved.operation_id,
                    error = %e,
                    "Handler failed"
                );
                HandlerResponse::error(500, e.to_string())
            }
        }
    }
}

impl std::fmt::Debug for HandlerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerSet")
            .field("functions", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Wrap a handler response in the agent runtime's response envelope.
pub fn envelope(invocation: &ActionInvocation, response: &HandlerResponse) -> Value {
    json!({
        "messageVersion": MESSAGE_VERSION,
        "response": {
            "actionGroup": invocation.action_group.clone().unwrap_or_default(),
            "apiPath": invocation.api_path,
            "httpMethod": invocation.http_method,
            "httpStatusCode": response.status_code,
            "responseBody": {
                "application/json": {
                    "body": response.body.to_string()
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackwire_core::{ActionGroupDef, AgentDef, HttpVerb, OperationDef, ParameterDef};

    struct Analytics;

    #[async_trait]
    impl Handler for Analytics {
        async fn invoke(&self, operation_id: &str, arguments: &Value) -> anyhow::Result<HandlerResponse> {
            match operation_id {
                "analyzePerformance" => Ok(HandlerResponse::ok(json!({
                    "campaignId": arguments["campaignId"],
                    "ctr": 0.042,
                }))),
                other => anyhow::bail!("unexpected operation {}", other),
            }
        }
    }

    fn router() -> InvocationRouter {
        let agent = AgentDef::new("ad-optimizer", "anthropic.claude-3-sonnet")
            .with_action_group(
                ActionGroupDef::new("analytics-actions", "analytics")
                    .with_operation(
                        OperationDef::new("analyzePerformance", HttpVerb::Get, "/analyze-performance")
                            .with_parameter(ParameterDef::required_query("campaignId")),
                    )
                    .with_operation(OperationDef::new("exportReport", HttpVerb::Post, "/export")),
            )
            .with_action_group(
                ActionGroupDef::new("storage-actions", "storage")
                    .with_operation(OperationDef::new("listReports", HttpVerb::Get, "/reports")),
            );
        InvocationRouter::for_agent(&agent).unwrap()
    }

    fn handlers() -> HandlerSet {
        let mut handlers = HandlerSet::new();
        handlers.register("analytics", Arc::new(Analytics));
        handlers
    }

    #[tokio::test]
    async fn test_dispatch_reaches_handler() {
        let invocation = ActionInvocation::new("GET", "/analyze-performance")
            .with_parameter("campaignId", "c-42");
        let response = handlers().dispatch(&router(), &invocation).await;

        assert!(response.is_success());
        assert_eq!(response.body["campaignId"], "c-42");
    }

    #[tokio::test]
    async fn test_dispatch_status_codes() {
        let handlers = handlers();
        let router = router();

        let missing = ActionInvocation::new("GET", "/analyze-performance");
        assert_eq!(handlers.dispatch(&router, &missing).await.status_code, 400);

        let no_handler = ActionInvocation::new("GET", "/reports");
        assert_eq!(handlers.dispatch(&router, &no_handler).await.status_code, 404);

        let failing = ActionInvocation::new("POST", "/export");
        let response = handlers.dispatch(&router, &failing).await;
        assert_eq!(response.status_code, 500);
        assert!(response.body["error"].as_str().unwrap().contains("exportReport"));
    }

    #[test]
    fn test_envelope_shape() {
        let invocation = ActionInvocation::new("GET", "/analyze-performance").in_group("analytics-actions");
        let wrapped = envelope(&invocation, &HandlerResponse::ok(json!({ "ctr": 0.5 })));

        assert_eq!(wrapped["messageVersion"], "1.0");
        assert_eq!(wrapped["response"]["actionGroup"], "analytics-actions");
        assert_eq!(wrapped["response"]["httpStatusCode"], 200);
        let body = wrapped["response"]["responseBody"]["application/json"]["body"]
            .as_str()
            .unwrap();
        assert_eq!(serde_json::from_str::<Value>(body).unwrap(), json!({ "ctr": 0.5 }));
    }
}
