//! End-to-end apply of the bundled ad-optimizer stack against the local backend.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;

use stackwire_core::{AccessLevel, Grant, NodeId, PrincipalId, StackConfig};
use stackwire_planner::{ExecutionOrder, Planner, TierPlanner};
use stackwire_policy::{ActionInvocation, InvocationRouter, render_openapi};
use stackwire_runtime::{
    ApplyError, CallKind, Deployer, FileStateStore, Handler, HandlerResponse, HandlerSet,
    LocalProvisioner, envelope,
};

fn stack_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../stacks/ad-optimizer/stack.yaml")
}

fn load() -> (StackConfig, ExecutionOrder) {
    let stack = StackConfig::load_with_context(stack_path()).unwrap();
    let order = TierPlanner::new().plan(&stack).unwrap();
    (stack, order)
}

fn deployer(stack: &StackConfig) -> Deployer<LocalProvisioner> {
    Deployer::new(LocalProvisioner::new(&stack.account, &stack.region)).with_concurrency(4)
}

#[test]
fn test_plan_orders_tiers() {
    let (_, order) = load();
    assert_eq!(order.len(), 14);

    let steps: Vec<String> = order.nodes.iter().map(|n| n.node.to_string()).collect();
    assert_eq!(&steps[..3], ["resource:campaign-data", "resource:metrics", "resource:api-keys"]);
    assert_eq!(steps[8], "agent:ad-optimizer");
    assert!(steps[9..].iter().all(|s| s.starts_with("action_group:ad-optimizer/")));
}

#[tokio::test]
async fn test_full_apply_reports_outputs() {
    let (stack, order) = load();
    let deployer = deployer(&stack);
    let topology = deployer.apply(&order).await.unwrap();

    assert!(topology.complete);
    assert_eq!(topology.nodes.len(), 14);
    // 12 data grants over five functions, 5 invoke grants for the agent
    assert_eq!(topology.grants.len(), 17);
    assert!(topology.grants.covers(&Grant::data(
        PrincipalId::for_function("google-ads"),
        "api-keys",
        AccessLevel::ReadOnly,
    )));
    assert!(!topology.grants.covers(&Grant::data(
        PrincipalId::for_function("analytics"),
        "metrics",
        AccessLevel::ReadWrite,
    )));

    let agent = topology.handle(&NodeId::agent("ad-optimizer")).unwrap();
    assert_eq!(topology.outputs["AgentId"], agent.identifier);
    assert_eq!(
        topology.outputs["CampaignDataBucketName"],
        "ad-optimizer-data-123456789012"
    );
    assert_eq!(topology.outputs["MetricsTableName"], "ad-optimizer-metrics");
    assert!(topology.outputs["APIKeysSecretArn"]
        .starts_with("arn:aws:secretsmanager:us-east-1:123456789012:secret:ad-optimizer/api-keys-"));

    let reported = deployer.provisioner().outputs();
    assert_eq!(reported["AgentId"], agent.identifier);
    assert_eq!(deployer.provisioner().call_count(CallKind::AttachActionGroup), 5);
}

#[tokio::test]
async fn test_partial_failure_resumes_from_saved_state() {
    let (stack, order) = load();
    let dir = tempfile::tempdir().unwrap();
    let state = Arc::new(FileStateStore::new(dir.path().join("ad-optimizer.state.json")));
    let deployer = deployer(&stack).with_state(state.clone());
    deployer
        .provisioner()
        .fail_once(CallKind::CreateFunction, "storage");

    let failure = deployer.apply(&order).await.unwrap_err();
    assert!(matches!(
        failure.error,
        ApplyError::Provisioning { step: 8, .. }
    ));
    assert!(failure.topology.is_applied(&NodeId::function("meta-ads")));
    assert!(!failure.topology.is_applied(&NodeId::agent("ad-optimizer")));

    let saved = FileStateStore::read(state.path()).unwrap();
    assert_eq!(saved, failure.topology);
    assert!(!saved.complete);

    let topology = deployer.apply(&order).await.unwrap();
    assert!(topology.complete);

    let backend = deployer.provisioner();
    assert_eq!(backend.call_count(CallKind::CreateResource), 3);
    assert_eq!(backend.call_count(CallKind::CreateFunction), 6);
    assert_eq!(backend.call_count(CallKind::CreatePrincipal), 6);
    assert_eq!(backend.call_count(CallKind::CreateAgent), 1);
}

struct Recorder;

#[async_trait]
impl Handler for Recorder {
    async fn invoke(&self, operation_id: &str, arguments: &Value) -> anyhow::Result<HandlerResponse> {
        Ok(HandlerResponse::ok(json!({
            "operation": operation_id,
            "arguments": arguments,
        })))
    }
}

#[tokio::test]
async fn test_invocations_route_to_their_group() {
    let (stack, _) = load();
    let agent = stack.agent("ad-optimizer").unwrap();
    let router = InvocationRouter::for_agent(agent).unwrap();

    let mut handlers = HandlerSet::new();
    for function in ["google-ads", "meta-ads", "analytics", "budget-optimizer", "storage"] {
        handlers.register(function, Arc::new(Recorder));
    }

    // /campaigns is served by both ad platforms
    let shared = ActionInvocation::new("GET", "/campaigns");
    assert_eq!(handlers.dispatch(&router, &shared).await.status_code, 400);

    let meta = ActionInvocation::new("GET", "/campaigns").in_group("meta-ads-actions");
    let response = handlers.dispatch(&router, &meta).await;
    assert_eq!(response.body["operation"], "getMetaCampaigns");

    let analyze = ActionInvocation::new("GET", "/analyze-performance")
        .in_group("analytics-actions")
        .with_parameter("campaignId", "c-1");
    let response = handlers.dispatch(&router, &analyze).await;
    assert_eq!(response.body["arguments"]["days"], 7);

    let store = ActionInvocation::new("POST", "/store")
        .with_json_body(&json!({ "key": "weekly", "data": "ctr up 4%" }));
    let response = handlers.dispatch(&router, &store).await;
    assert_eq!(response.body["operation"], "storeInsight");

    let wrapped = envelope(&store, &response);
    assert_eq!(wrapped["response"]["httpStatusCode"], 200);
}

#[test]
fn test_rendered_schema_matches_declaration() {
    let (stack, _) = load();
    let group = stack
        .agent("ad-optimizer")
        .and_then(|a| a.action_group("google-ads-actions"))
        .unwrap();
    let document = render_openapi(group);

    assert_eq!(document["openapi"], "3.0.0");
    let adjust = &document["paths"]["/adjust-bid"]["post"];
    assert_eq!(adjust["operationId"], "adjustGoogleBid");
    assert_eq!(
        adjust["requestBody"]["content"]["application/json"]["schema"]["required"],
        json!(["campaignId", "bidAdjustment"])
    );
}
