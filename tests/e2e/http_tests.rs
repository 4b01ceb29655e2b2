//! HTTP surface, driven in-process through the router.

use super::{TestHarness, MERCHANT};
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use cryptopay_settlement::api::router;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => request.body(Body::empty()),
    }
    .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn order_body(id: &str) -> Value {
    json!({
        "id": id,
        "user_id": "alice",
        "currency": "btc",
        "payment_address": MERCHANT,
        "items": [{
            "product_id": "widget",
            "quantity": 2,
            "unit_price_crypto": "0.005",
            "unit_price_fiat": "250",
        }],
    })
}

#[tokio::test]
async fn test_order_lifecycle_over_http() {
    let h = TestHarness::setup().await.unwrap();
    let app = router(h.service.clone());

    let (status, body) = call(&app, Method::PUT, "/inventory/widget", Some(json!({ "quantity": 5 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["quantity"], 5);

    let (status, body) = call(&app, Method::POST, "/orders", Some(order_body("web-1"))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["currency"], "BTC");

    h.chain.pay("ba01", dec!(0.01));
    let (status, body) = call(
        &app,
        Method::POST,
        "/orders/web-1/confirm",
        Some(json!({ "tx_reference": "ba01" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "confirmed");

    let (status, body) = call(&app, Method::GET, "/orders/web-1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "paid");
    assert_eq!(body["transaction_reference"], "ba01");

    let (_, body) = call(&app, Method::GET, "/orders/web-1/payment", None).await;
    assert_eq!(body["transaction_reference"], "ba01");
    assert_eq!(h.service.ledger().stock("widget"), 3);
}

#[tokio::test]
async fn test_duplicate_reference_error_body() {
    let h = TestHarness::setup().await.unwrap();
    let app = router(h.service.clone());
    h.service.ledger().set_stock("widget", 10);
    call(&app, Method::POST, "/orders", Some(order_body("web-1"))).await;
    call(&app, Method::POST, "/orders", Some(order_body("web-2"))).await;
    h.chain.pay("ba02", dec!(0.01));

    let confirm = Some(json!({ "tx_reference": "ba02" }));
    let (status, _) = call(&app, Method::POST, "/orders/web-1/confirm", confirm.clone()).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&app, Method::POST, "/orders/web-2/confirm", confirm).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "duplicate_transaction");
    assert_eq!(body["retryable"], false);
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("transaction already used"));
}

#[tokio::test]
async fn test_error_statuses() {
    let h = TestHarness::setup().await.unwrap();
    let app = router(h.service.clone());

    let (status, body) = call(&app, Method::GET, "/orders/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let (status, _) = call(&app, Method::POST, "/orders", Some(order_body("web-1"))).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, body) = call(&app, Method::POST, "/orders", Some(order_body("web-1"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "already_exists");

    // Unknown on chain: recorded, not retryable.
    let (status, body) = call(
        &app,
        Method::POST,
        "/orders/web-1/confirm",
        Some(json!({ "tx_reference": "ba03" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["retryable"], false);

    let (status, body) = call(&app, Method::POST, "/orders/web-1/ship", None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "invalid_transition");
}

#[tokio::test]
async fn test_health_and_alert_listing() {
    let h = TestHarness::setup().await.unwrap();
    let app = router(h.service.clone());

    let (status, body) = call(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["currencies"]
        .as_array()
        .unwrap()
        .iter()
        .any(|c| c == "BTC"));

    let (status, body) = call(
        &app,
        Method::PUT,
        "/users/alice",
        Some(json!({ "name": "Alice Example", "country": "US" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "alice");

    let (status, body) = call(&app, Method::GET, "/alerts?status=open", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn test_malformed_orders_are_rejected_without_crashing() {
    let h = TestHarness::setup().await.unwrap();
    let app = router(h.service.clone());

    let mut overflowing = order_body("web-big");
    overflowing["items"][0]["unit_price_crypto"] = json!("79228162514264337593543950335");
    let (status, body) = call(&app, Method::POST, "/orders", Some(overflowing)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_order");

    let mut empty_quantity = order_body("web-zero");
    empty_quantity["items"][0]["quantity"] = json!(0);
    let (status, _) = call(&app, Method::POST, "/orders", Some(empty_quantity)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut free = order_body("web-free");
    free["items"][0]["unit_price_crypto"] = json!("0");
    let (status, _) = call(&app, Method::POST, "/orders", Some(free)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut negative = order_body("web-neg");
    negative["items"][0]["unit_price_fiat"] = json!("-250");
    let (status, _) = call(&app, Method::POST, "/orders", Some(negative)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // The service is still up.
    let (status, _) = call(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(h.service.ledger().order("web-big").is_err());
}
