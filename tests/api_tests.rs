//! HTTP endpoint tests
//!
//! Drives the router directly with oneshot requests; no listener needed.

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use priced::api::{create_router, ApiState};
use priced::query::QueryService;
use priced::store::PriceStore;
use priced::supervisor::StatusHandle;
use priced::types::PricePoint;

fn test_router() -> Router {
    let store = Arc::new(PriceStore::new(Duration::from_secs(6 * 3600)));
    store.ingest(PricePoint::new("BTC", 50_000.0, 100, Some(1000)));
    store.ingest(PricePoint::new("BTC", 50_100.0, 110, Some(1001)));
    store.ingest(PricePoint::new("ETH", 3_000.0, 105, None));

    let query = QueryService::new(store, ["BTC".to_string(), "ETH".to_string()]);
    create_router(ApiState {
        query,
        feed_status: StatusHandle::new(),
        source: "mock".to_string(),
    })
}

async fn get_json(router: Router, uri: &str) -> (StatusCode, Value) {
    let response = router
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn health_reports_symbols_and_feed_state() {
    let (status, body) = get_json(test_router(), "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["source"], "mock");
    assert_eq!(body["feed_connected"], false);
    assert_eq!(body["symbols"], serde_json::json!(["BTC", "ETH"]));
    assert!(body["timestamp"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn latest_returns_one_price_per_symbol_in_order() {
    let (status, body) = get_json(test_router(), "/latest").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["source"], "mock");
    let prices = body["prices"].as_array().unwrap();
    assert_eq!(prices.len(), 2);
    assert_eq!(prices[0]["symbol"], "BTC");
    assert_eq!(prices[0]["price"], 50_100.0);
    assert_eq!(prices[1]["symbol"], "ETH");
}

#[tokio::test]
async fn price_by_symbol_is_case_insensitive() {
    let (status, body) = get_json(test_router(), "/price/btc").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["symbol"], "BTC");
    assert_eq!(body["price"], 50_100.0);
    assert_eq!(body["timestamp"], 110);
    assert_eq!(body["round_id"], 1001);
    assert!(body.get("requested_timestamp").is_none());
}

#[tokio::test]
async fn price_at_timestamp_echoes_request() {
    let (status, body) = get_json(test_router(), "/price/BTC?timestamp=104&tolerance=10").await;

    assert_eq!(status, StatusCode::OK);
    // 104 is 4s from the point at 100 and 6s from the point at 110
    assert_eq!(body["timestamp"], 100);
    assert_eq!(body["price"], 50_000.0);
    assert_eq!(body["requested_timestamp"], 104);
}

#[tokio::test]
async fn unknown_symbol_is_a_bad_request() {
    let (status, body) = get_json(test_router(), "/price/DOGE").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Unsupported symbol: DOGE");
}

#[tokio::test]
async fn timestamp_outside_tolerance_is_not_found() {
    let (status, body) = get_json(test_router(), "/price/BTC?timestamp=99999&tolerance=10").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    let message = body["error"].as_str().unwrap();
    assert!(message.contains("BTC"), "unexpected message: {}", message);
    assert!(message.contains("99999"), "unexpected message: {}", message);
}

#[tokio::test]
async fn symbol_without_data_is_not_found() {
    let store = Arc::new(PriceStore::new(Duration::from_secs(6 * 3600)));
    let query = QueryService::new(store, ["BTC".to_string()]);
    let router = create_router(ApiState {
        query,
        feed_status: StatusHandle::new(),
        source: "mock".to_string(),
    });

    let (status, body) = get_json(router, "/price/BTC").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "No price data available for BTC");
}

#[tokio::test]
async fn malformed_timestamp_is_a_bad_request() {
    let (status, _) = get_json(test_router(), "/price/BTC?timestamp=notanumber").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn negative_tolerance_is_a_bad_request() {
    let (status, body) = get_json(test_router(), "/price/BTC?timestamp=104&tolerance=-5").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "tolerance must be non-negative");
}
