//! HTTP surface tests: both endpoints, token handling, envelope behavior.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use shale_engine::config::EngineConfig;
use shale_engine::executor::StoreExecutor;
use shale_engine::testing::InMemoryStore;
use shale_engine::CommandProcessor;
use shale_server::{build_router, TOKEN_HEADER};

fn app() -> Router {
    let store = InMemoryStore::with_namespaces(&["app"]);
    let mut config = EngineConfig::default();
    config.operations.ddl_delay = std::time::Duration::ZERO;
    let processor = Arc::new(CommandProcessor::new(
        config,
        Box::new(move |_tenant| Ok(Arc::clone(&store) as Arc<dyn StoreExecutor>)),
    ));
    build_router(processor)
}

async fn post(app: &Router, path: &str, token: Option<&str>, body: &str) -> (StatusCode, Value) {
    let mut request = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json");
    if let Some(token) = token {
        request = request.header(TOKEN_HEADER, token);
    }
    let response = app
        .clone()
        .oneshot(request.body(Body::from(body.to_owned())).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap();
    (status, value)
}

#[tokio::test]
async fn missing_token_is_unauthorized_with_http_200() {
    let app = app();
    let (status, body) =
        post(&app, "/v1/app", None, r#"{"findCollections": {}}"#).await;
    assert_eq!(status, StatusCode::OK);
    let error = &body["errors"][0];
    assert!(
        error["message"]
            .as_str()
            .unwrap()
            .starts_with("Role unauthorized for operation: Missing token"),
        "{error}"
    );
}

#[tokio::test]
async fn malformed_json_reports_parse_exception() {
    let app = app();
    let (status, body) = post(&app, "/v1/app", Some("token"), "{not json").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["errors"][0]["exceptionClass"], json!("JsonParseException"));
}

#[tokio::test]
async fn empty_body_reports_constraint_violation() {
    let app = app();
    let (status, body) = post(&app, "/v1/app", Some("token"), "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["errors"][0]["exceptionClass"], json!("ConstraintViolationException"));
}

#[tokio::test]
async fn create_insert_find_round_trip() {
    let app = app();

    let (_, created) = post(
        &app,
        "/v1/app",
        Some("token"),
        r#"{"createCollection": {"name": "docs"}}"#,
    )
    .await;
    assert_eq!(created["status"]["ok"], json!(1), "{created}");

    let (_, inserted) = post(
        &app,
        "/v1/app/docs",
        Some("token"),
        r#"{"insertOne": {"document": {"_id": "a", "kind": "note"}}}"#,
    )
    .await;
    assert_eq!(inserted["status"]["insertedIds"], json!(["a"]), "{inserted}");

    let (_, found) = post(
        &app,
        "/v1/app/docs",
        Some("token"),
        r#"{"findOne": {"filter": {"kind": "note"}}}"#,
    )
    .await;
    assert_eq!(found["data"]["docs"][0]["_id"], json!("a"), "{found}");
}

#[tokio::test]
async fn command_errors_keep_http_200() {
    let app = app();
    let (status, body) = post(
        &app,
        "/v1/app/docs",
        Some("token"),
        r#"{"findOne": {}}"#,
    )
    .await;
    // Collection does not exist, yet the transport still says 200.
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["errors"][0]["errorCode"], json!("COLLECTION_NOT_EXIST"));
}

#[tokio::test]
async fn unknown_command_reports_tag() {
    let app = app();
    let (_, body) = post(&app, "/v1/app", Some("token"), r#"{"brewTea": {}}"#).await;
    assert_eq!(
        body["errors"][0]["message"],
        json!("Could not resolve type id 'brewTea'")
    );
}
