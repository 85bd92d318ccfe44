//! HTTP control API tests
//!
//! Requests go through the router in-process via `tower::ServiceExt`.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use metro_routing::{RelayOptions, RoutingTable};
use metro_spool::SpoolConfig;
use metro_telemetry::StatsRegistry;
use tempfile::{tempdir, TempDir};
use tower::ServiceExt;

use super::*;

fn test_options() -> RelayOptions {
    RelayOptions {
        input_capacity: 16,
        reconnect_period: Duration::from_millis(100),
        spool: SpoolConfig {
            max_segment_bytes: 1024 * 1024,
            sync_every_records: 10,
            sync_interval: Duration::from_millis(50),
            put_queue_size: 8,
        },
    }
}

struct Harness {
    app: axum::Router,
    table: Arc<RoutingTable>,
    _dir: TempDir,
}

fn harness() -> Harness {
    let dir = tempdir().unwrap();
    let table = Arc::new(RoutingTable::new(
        dir.path(),
        test_options(),
        Arc::new(StatsRegistry::new()),
    ));
    Harness {
        app: router(Arc::clone(&table)),
        table,
        _dir: dir,
    }
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_of<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_list_empty() {
    let h = harness();
    let response = h.app.oneshot(get_request("/routes")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let routes: Vec<RouteEntry> = body_of(response).await;
    assert!(routes.is_empty());
}

#[tokio::test]
async fn test_add_then_list() {
    let h = harness();

    let response = h
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            "/routes",
            serde_json::json!({
                "key": "prod",
                "pattern": "\\.prod\\.",
                "addr": "127.0.0.9:2003",
                "spool": false,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = h.app.oneshot(get_request("/routes")).await.unwrap();
    let routes: Vec<RouteEntry> = body_of(response).await;
    assert_eq!(
        routes,
        vec![RouteEntry {
            key: "prod".to_string(),
            pattern: "\\.prod\\.".to_string(),
            addr: "127.0.0.9:2003".to_string(),
            spool: false,
        }]
    );

    h.table.shutdown_all().await;
}

#[tokio::test]
async fn test_add_defaults_pattern_and_spool() {
    let h = harness();

    let response = h
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            "/routes",
            serde_json::json!({"key": "all", "addr": "127.0.0.9:2003"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let snapshot = h.table.snapshot().await;
    assert_eq!(snapshot[0].pattern, "");
    assert!(!snapshot[0].spool);

    h.table.shutdown_all().await;
}

#[tokio::test]
async fn test_duplicate_add_conflicts() {
    let h = harness();
    let body = serde_json::json!({"key": "r", "addr": "127.0.0.9:2003"});

    let first = h
        .app
        .clone()
        .oneshot(json_request("POST", "/routes", body.clone()))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = h
        .app
        .clone()
        .oneshot(json_request("POST", "/routes", body))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);

    h.table.shutdown_all().await;
}

#[tokio::test]
async fn test_bad_pattern_is_rejected() {
    let h = harness();

    let response = h
        .app
        .oneshot(json_request(
            "POST",
            "/routes",
            serde_json::json!({"key": "bad", "pattern": "[", "addr": "127.0.0.9:2003"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_update_pattern() {
    let h = harness();
    h.table.add("r", "", "127.0.0.9:2003", false).await.unwrap();

    let response = h
        .app
        .oneshot(json_request(
            "POST",
            "/routes/r",
            serde_json::json!({"pattern": "^foo"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(h.table.snapshot().await[0].pattern, "^foo");

    h.table.shutdown_all().await;
}

#[tokio::test]
async fn test_update_unknown_is_not_found() {
    let h = harness();

    let response = h
        .app
        .oneshot(json_request(
            "POST",
            "/routes/ghost",
            serde_json::json!({"pattern": "^x"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_route() {
    let h = harness();
    h.table.add("r", "", "127.0.0.9:2003", false).await.unwrap();

    let response = h
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/routes/r")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(h.table.is_empty().await);

    let response = h
        .app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/routes/r")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
