//! HTTP server and routing integration tests
//!
//! Drives the full router with `tower::ServiceExt::oneshot` against an
//! in-memory record store. The classification endpoint is never
//! contacted by these routes.

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use markscan_common::events::EventBus;
use markscan_common::{InspectionRecord, ScanResult};
use markscan_iv::services::ClassifierClient;
use markscan_iv::{build_router, AppState};

/// Create test app state with an in-memory database
async fn test_app_state() -> AppState {
    let db_pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    markscan_iv::db::init_tables(&db_pool).await.unwrap();

    let event_bus = EventBus::new(100);
    let classifier = ClassifierClient::new("http://127.0.0.1:1").unwrap();
    let uploads_dir = std::env::temp_dir().join(format!("markscan-test-{}", Uuid::new_v4()));

    AppState::new(
        db_pool,
        event_bus,
        classifier,
        uploads_dir,
        Duration::ZERO,
    )
}

async fn seed_record(
    state: &AppState,
    vendor: &str,
    lot_id: &str,
    part_number: &str,
    result: ScanResult,
    confidence: f64,
) -> InspectionRecord {
    let record = InspectionRecord::new(
        vendor,
        lot_id,
        part_number,
        result,
        confidence,
        "System Auto",
        None,
    );
    markscan_iv::db::records::append_record(&state.db, &record)
        .await
        .unwrap();
    record
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_reports_module_identity() {
    let app = build_router(test_app_state().await);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["module"], "markscan-iv");
}

#[tokio::test]
async fn records_listing_starts_empty() {
    let app = build_router(test_app_state().await);

    let response = app
        .oneshot(Request::builder().uri("/records").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json, json!([]));
}

#[tokio::test]
async fn records_listing_returns_seeded_records() {
    let state = test_app_state().await;
    seed_record(&state, "Acme", "LOT-1", "PN-100", ScanResult::Pass, 0.95).await;
    seed_record(&state, "Acme", "LOT-1", "PN-100", ScanResult::Fail, 0.88).await;

    let app = build_router(state);
    let response = app
        .oneshot(Request::builder().uri("/records").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn flagged_queue_filters_to_failures() {
    let state = test_app_state().await;
    seed_record(&state, "Acme", "LOT-1", "PN-100", ScanResult::Pass, 0.95).await;
    let failed = seed_record(&state, "Acme", "LOT-2", "PN-200", ScanResult::Fail, 0.91).await;

    let app = build_router(state);
    let response = app
        .oneshot(
            Request::builder()
                .uri("/records/flagged")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let items = json.as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["id"], failed.id.to_string());
    assert_eq!(items[0]["result"], "fail");
}

#[tokio::test]
async fn flagged_queue_query_is_case_insensitive() {
    let state = test_app_state().await;
    seed_record(&state, "Acme", "LOT-1", "PN-100", ScanResult::Fail, 0.91).await;
    seed_record(&state, "Globex", "LOT-2", "PN-200", ScanResult::Fail, 0.85).await;

    let app = build_router(state);
    let response = app
        .oneshot(
            Request::builder()
                .uri("/records/flagged?q=aCmE")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let items = json.as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["vendor"], "Acme");
}

#[tokio::test]
async fn override_flips_failure_and_analytics_counts_it_as_pass() {
    let state = test_app_state().await;
    let failed = seed_record(&state, "Acme", "LOT-1", "PN-100", ScanResult::Fail, 0.90).await;

    let app = build_router(state);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/records/{}/override", failed.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["result"], "overridden");

    let response = app
        .oneshot(
            Request::builder()
                .uri("/analytics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["overall"]["total"], 1);
    assert_eq!(json["overall"]["passed"], 1);
    assert_eq!(json["overall"]["failed"], 0);
}

#[tokio::test]
async fn override_of_unknown_record_is_not_found() {
    let app = build_router(test_app_state().await);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/records/{}/override", Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn confirm_leaves_record_unchanged() {
    let state = test_app_state().await;
    let failed = seed_record(&state, "Acme", "LOT-1", "PN-100", ScanResult::Fail, 0.90).await;

    let app = build_router(state.clone());
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/records/{}/confirm", failed.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["result"], "fail");

    let stored = markscan_iv::db::records::get_record(&state.db, failed.id)
        .await
        .unwrap()
        .expect("record should still exist");
    assert_eq!(stored.result, ScanResult::Fail);
}

#[tokio::test]
async fn analytics_on_empty_store_reports_zeroes() {
    let app = build_router(test_app_state().await);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/analytics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["overall"]["total"], 0);
    assert_eq!(json["overall"]["pass_rate"], 0.0);
    assert_eq!(json["vendors"], json!([]));
    assert_eq!(json["top_lots"], json!([]));
}

#[tokio::test]
async fn cancel_of_unknown_session_is_not_found() {
    let app = build_router(test_app_state().await);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/scan/cancel/{}", Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn manual_commit_without_pending_verdict_is_rejected() {
    let app = build_router(test_app_state().await);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/scan/manual/commit")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"decision":"pass"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn batch_scan_rejects_empty_lot() {
    let app = build_router(test_app_state().await);

    let boundary = "X-MARKSCAN-TEST-BOUNDARY";
    let body = format!(
        "--{b}\r\ncontent-disposition: form-data; name=\"vendor\"\r\n\r\nAcme\r\n\
         --{b}\r\ncontent-disposition: form-data; name=\"lotId\"\r\n\r\nLOT-1\r\n\
         --{b}\r\ncontent-disposition: form-data; name=\"partNumber\"\r\n\r\nPN-100\r\n\
         --{b}--\r\n",
        b = boundary
    );

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/scan/lot")
                .header(
                    "content-type",
                    format!("multipart/form-data; boundary={}", boundary),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let app = build_router(test_app_state().await);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/no-such-route")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
