// HTTP API tests against the full router with a temporary SQLite database.

mod common;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use common::{test_router, CountingActions, ScriptedTransport, WorkflowBuilder};
use relayflow::api::{create_api_router, AppState};
use relayflow::runtime::actions::ActionInvoker;
use relayflow::runtime::engine::{CoordinatorSettings, ExecutionCoordinator};
use relayflow::runtime::executor::{ExecutorSettings, NodeExecutor};
use relayflow::runtime::idempotency::IdempotencyStore;
use relayflow::workflow::registry::{WorkflowRegistry, WorkflowStore};
use relayflow::workflow::storage::SqliteStore;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

struct TestApp {
    app: Router,
    storage: SqliteStore,
    actions: Arc<CountingActions>,
    transport: Arc<ScriptedTransport>,
    _dir: TempDir,
}

async fn test_app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let storage = SqliteStore::connect(dir.path().to_str().unwrap(), "test.db").await.unwrap();

    let registry = Arc::new(WorkflowRegistry::new());
    let actions = Arc::new(CountingActions::default());
    let transport = ScriptedTransport::replying("hello from the model");
    let router = test_router(Arc::clone(&transport));

    let executor = NodeExecutor::standard(
        Arc::clone(&router),
        Arc::clone(&actions) as Arc<dyn ActionInvoker>,
        ExecutorSettings::default(),
    );
    let workflows: Arc<dyn WorkflowStore> = registry.clone();
    let coordinator = Arc::new(ExecutionCoordinator::new(
        workflows,
        Arc::new(storage.clone()),
        Arc::new(executor),
        Arc::new(IdempotencyStore::new()),
        CoordinatorSettings::default(),
    ));

    let state = AppState {
        storage: storage.clone(),
        registry,
        coordinator,
        router,
        scheduler: None,
    };

    TestApp {
        app: create_api_router(state),
        storage,
        actions,
        transport,
        _dir: dir,
    }
}

impl TestApp {
    async fn send(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
            .unwrap();
        self.dispatch(request).await
    }

    async fn dispatch(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, body)
    }

    async fn create(&self, workflow: relayflow::WorkflowDefinition) -> (StatusCode, Value) {
        self.send("POST", "/api/workflows", Some(json!({ "workflow": workflow }))).await
    }

    /// Poll the execution endpoint until the run reaches a terminal status
    async fn wait_for(&self, execution_id: &str) -> Value {
        for _ in 0..500 {
            let (status, record) = self.send("GET", &format!("/api/executions/{}", execution_id), None).await;
            if status == StatusCode::OK && !matches!(record["status"].as_str(), Some("queued" | "running")) {
                return record;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("execution {} did not finish", execution_id);
    }
}

fn onboarding() -> relayflow::WorkflowDefinition {
    WorkflowBuilder::new("onboarding")
        .trigger("T")
        .action("Welcome")
        .ai("Draft", "Write a welcome note for {{payload.user}}")
        .connect("T", "Welcome")
        .connect("Welcome", "Draft")
        .webhook("T", "signup")
        .build()
}

#[tokio::test]
async fn health_check_responds_ok() {
    let app = test_app().await;
    let (status, body) = app.send("GET", "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn workflow_lifecycle_publishes_versions() {
    let app = test_app().await;

    let (status, body) = app.create(onboarding()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["version"], 1);

    let (status, _) = app.create(onboarding()).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let mut changed = onboarding();
    changed.name = "Onboarding v2".to_string();
    let (status, body) = app.send("PUT", "/api/workflows/onboarding", Some(json!({ "workflow": changed }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], 2);

    let (status, body) = app.send("GET", "/api/workflows/onboarding", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Onboarding v2");

    let (status, body) = app.send("GET", "/api/workflows/onboarding/versions/1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Test workflow: onboarding");

    let (status, body) = app.send("GET", "/api/workflows", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["workflows"][0]["latest_version"], 2);

    let (status, _) = app.send("DELETE", "/api/workflows/onboarding", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.send("GET", "/api/workflows/onboarding", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app.send("DELETE", "/api/workflows/onboarding", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_workflows_are_rejected_with_every_error() {
    let app = test_app().await;
    let cyclic = WorkflowBuilder::new("cyclic")
        .action("A")
        .action("B")
        .connect("A", "B")
        .connect("B", "A")
        .connect("B", "Ghost")
        .build();

    let (status, body) = app.create(cyclic).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let errors: Vec<String> = serde_json::from_value(body["errors"].clone()).unwrap();
    assert!(errors.iter().any(|e| e.contains("Ghost")));
    assert!(errors.iter().any(|e| e.contains("no trigger")));
    assert!(errors.iter().any(|e| e.contains("cycle")));
}

#[tokio::test]
async fn branch_cycles_are_rejected_at_publish() {
    let app = test_app().await;
    let looping = WorkflowBuilder::new("looping")
        .trigger("T")
        .condition("Check", "payload.retry", "equals", json!(true))
        .action("Again")
        .connect("T", "Check")
        .branch("Check", "Again", "true")
        .connect("Again", "Check")
        .build();

    let (status, body) = app.create(looping).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let errors: Vec<String> = serde_json::from_value(body["errors"].clone()).unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("cycle"));
    let (status, _) = app.send("GET", "/api/workflows/looping", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn workflow_with_webhook_and_schedule_triggers_runs_from_the_webhook_node() {
    let app = test_app().await;
    let two_entries = WorkflowBuilder::new("digest")
        .trigger("Hook")
        .trigger("Nightly")
        .action("FromHook")
        .action("FromSchedule")
        .connect("Hook", "FromHook")
        .connect("Nightly", "FromSchedule")
        .webhook("Hook", "incoming")
        .schedule("Nightly", "0 0 2 * * *")
        .build();

    let (status, body) = app.create(two_entries).await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);

    let (status, accepted) = app.send("POST", "/webhook/digest/incoming", Some(json!({"n": 1}))).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let record = app.wait_for(accepted["execution_id"].as_str().unwrap()).await;
    assert_eq!(record["status"], "success");
    assert_eq!(app.actions.calls("FromHook"), 1);
    assert_eq!(app.actions.calls("FromSchedule"), 0);
}

#[tokio::test]
async fn taken_version_number_is_a_conflict() {
    let app = test_app().await;
    app.create(onboarding()).await;

    // Another publisher already stored version 2 of the same workflow
    let mut raced = onboarding();
    raced.version = 2;
    assert!(app.storage.save_workflow_version(&raced).await.unwrap());

    let mut changed = onboarding();
    changed.name = "Onboarding v2".to_string();
    let (status, body) = app.send("PUT", "/api/workflows/onboarding", Some(json!({ "workflow": changed }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("concurrently"));

    // The registry still serves version 1
    let (status, body) = app.send("GET", "/api/workflows/onboarding", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], 1);
}

#[tokio::test]
async fn execute_is_idempotent_per_key() {
    let app = test_app().await;
    app.create(onboarding()).await;

    let request = json!({ "idempotency_key": "signup-42", "payload": {"user": "Ada"}, "wait": true });
    let (status, first) = app.send("POST", "/api/workflows/onboarding/execute", Some(request.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["status"], "success");
    assert_eq!(first["deduplicated"], false);
    assert_eq!(first["record"]["logs"].as_array().unwrap().len(), 3);

    let (status, second) = app.send("POST", "/api/workflows/onboarding/execute", Some(request)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["deduplicated"], true);
    assert_eq!(second["execution_id"], first["execution_id"]);
    assert_eq!(app.actions.calls("Welcome"), 1);
    assert_eq!(app.transport.request_count(), 1);

    let id = first["execution_id"].as_str().unwrap();
    let (status, record) = app.send("GET", &format!("/api/executions/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["status"], "success");
    assert_eq!(record["logs"][2]["output"]["content"], "hello from the model");

    let (status, _) = app.send("POST", &format!("/api/executions/{}/cancel", id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn unknown_workflows_and_executions_are_not_found() {
    let app = test_app().await;

    let (status, _) = app.send("POST", "/api/workflows/missing/execute", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let unknown = uuid::Uuid::new_v4();
    let (status, _) = app.send("GET", &format!("/api/executions/{}", unknown), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app.send("POST", &format!("/api/executions/{}/cancel", unknown), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn webhook_deliveries_are_deduplicated_by_header() {
    let app = test_app().await;
    app.create(onboarding()).await;

    let delivery = || {
        Request::builder()
            .method("POST")
            .uri("/webhook/onboarding/signup")
            .header("content-type", "application/json")
            .header("Idempotency-Key", "delivery-7")
            .body(Body::from(json!({"user": "Grace"}).to_string()))
            .unwrap()
    };

    let (status, first) = app.dispatch(delivery()).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(first["deduplicated"], false);

    let (status, second) = app.dispatch(delivery()).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(second["deduplicated"], true);
    assert_eq!(second["execution_id"], first["execution_id"]);

    let (status, _) = app.send("POST", "/webhook/onboarding/unknown-path", Some(json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn ai_request_routes_and_reports_exhaustion() {
    let app = test_app().await;

    let (status, body) = app
        .send("POST", "/api/ai/request", Some(json!({ "prompt": "Say hi", "requirements": {"speed_priority": true} })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["provider"], "groq");
    assert_eq!(body["content"], "hello from the model");

    let (status, _) = app.send("POST", "/api/ai/request", Some(json!({ "prompt": "  " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    app.transport.take_down("groq.test");
    app.transport.take_down("anthropic.test");
    let (status, body) = app.send("POST", "/api/ai/request", Some(json!({ "prompt": "Say hi" }))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].as_str().unwrap().contains("exhausted"));
}
