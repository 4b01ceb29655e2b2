//! HTTP interface.
//!
//! | method | path | action |
//! |---|---|---|
//! | `POST` | `/orders` | register an order |
//! | `GET` | `/orders/:order_id` | order |
//! | `POST` | `/orders/:order_id/confirm` | settle with `{ "tx_reference" }` |
//! | `GET` | `/orders/:order_id/payment` | confirmed or latest payment |
//! | `GET` | `/orders/:order_id/compliance` | decision, hold and alerts |
//! | `POST` | `/orders/:order_id/{processing,ship,deliver,cancel,refund}` | fulfillment |
//! | `PUT` | `/inventory/:product_id` | set stock |
//! | `PUT` | `/users/:user_id` | upsert profile |
//! | `POST` | `/admin/payments/:payment_id/verify` | re-verify |
//! | `GET` | `/alerts?status=&user_id=&order_id=` | list alerts |
//! | `POST` | `/alerts/:alert_id/{review,resolve,escalate,file}` | case handling |

use crate::compliance::AlertFilter;
use crate::error::Error;
use crate::model::{Alert, Order, Payment, UserProfile};
use crate::service::{ComplianceStatus, NewOrder, SettlementService};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::warn;

type ApiResult<T> = std::result::Result<Json<T>, Error>;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            warn!("Request failed: {self}");
        }
        let body = json!({
            "error": self.kind(),
            "message": self.to_string(),
            "retryable": self.is_retryable(),
        });
        (status, Json(body)).into_response()
    }
}

/// Build the router over `service`.
pub fn router(service: SettlementService) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/orders", post(create_order))
        .route("/orders/:order_id", get(get_order))
        .route("/orders/:order_id/confirm", post(confirm_payment))
        .route("/orders/:order_id/payment", get(payment_by_order))
        .route("/orders/:order_id/compliance", get(compliance_status))
        .route("/orders/:order_id/processing", post(mark_processing))
        .route("/orders/:order_id/ship", post(mark_shipped))
        .route("/orders/:order_id/deliver", post(mark_delivered))
        .route("/orders/:order_id/cancel", post(cancel_order))
        .route("/orders/:order_id/refund", post(refund_order))
        .route("/inventory/:product_id", put(set_stock))
        .route("/users/:user_id", put(upsert_user))
        .route("/admin/payments/:payment_id/verify", post(reverify_payment))
        .route("/alerts", get(list_alerts))
        .route("/alerts/:alert_id/review", post(review_alert))
        .route("/alerts/:alert_id/resolve", post(resolve_alert))
        .route("/alerts/:alert_id/escalate", post(escalate_alert))
        .route("/alerts/:alert_id/file", post(file_alert))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

async fn health(State(service): State<SettlementService>) -> impl IntoResponse {
    let stats = service.verifier().cache_stats();
    Json(json!({
        "status": "ok",
        "currencies": service.verifier().currencies(),
        "verification_cache": {
            "hits": stats.hits,
            "misses": stats.misses,
            "hit_rate": stats.hit_rate(),
        },
    }))
}

async fn create_order(
    State(service): State<SettlementService>,
    Json(new): Json<NewOrder>,
) -> Result<(StatusCode, Json<Order>), Error> {
    let order = service.register_order(new)?;
    Ok((StatusCode::CREATED, Json(order)))
}

async fn get_order(
    State(service): State<SettlementService>,
    Path(order_id): Path<String>,
) -> ApiResult<Order> {
    service.ledger().order(&order_id).map(Json)
}

#[derive(Debug, Deserialize)]
struct ConfirmRequest {
    tx_reference: String,
}

async fn confirm_payment(
    State(service): State<SettlementService>,
    Path(order_id): Path<String>,
    Json(request): Json<ConfirmRequest>,
) -> ApiResult<Payment> {
    service
        .confirm_payment(&order_id, &request.tx_reference)
        .await
        .map(Json)
}

async fn payment_by_order(
    State(service): State<SettlementService>,
    Path(order_id): Path<String>,
) -> ApiResult<Payment> {
    service.ledger().payment_by_order(&order_id).map(Json)
}

async fn compliance_status(
    State(service): State<SettlementService>,
    Path(order_id): Path<String>,
) -> ApiResult<ComplianceStatus> {
    service.compliance_status(&order_id).map(Json)
}

async fn mark_processing(
    State(service): State<SettlementService>,
    Path(order_id): Path<String>,
) -> ApiResult<Order> {
    service.ledger().mark_processing(&order_id).map(Json)
}

async fn mark_shipped(
    State(service): State<SettlementService>,
    Path(order_id): Path<String>,
) -> ApiResult<Order> {
    service.ledger().mark_shipped(&order_id).map(Json)
}

async fn mark_delivered(
    State(service): State<SettlementService>,
    Path(order_id): Path<String>,
) -> ApiResult<Order> {
    service.ledger().mark_delivered(&order_id).map(Json)
}

async fn cancel_order(
    State(service): State<SettlementService>,
    Path(order_id): Path<String>,
) -> ApiResult<Order> {
    service.ledger().cancel(&order_id).map(Json)
}

async fn refund_order(
    State(service): State<SettlementService>,
    Path(order_id): Path<String>,
) -> ApiResult<Order> {
    service.ledger().refund(&order_id).map(Json)
}

#[derive(Debug, Deserialize)]
struct StockRequest {
    quantity: u32,
}

#[derive(Debug, Serialize)]
struct StockLevel {
    product_id: String,
    quantity: u32,
}

async fn set_stock(
    State(service): State<SettlementService>,
    Path(product_id): Path<String>,
    Json(request): Json<StockRequest>,
) -> ApiResult<StockLevel> {
    service.ledger().set_stock(&product_id, request.quantity);
    Ok(Json(StockLevel {
        quantity: service.ledger().stock(&product_id),
        product_id,
    }))
}

#[derive(Debug, Deserialize)]
struct ProfileRequest {
    name: String,
    country: String,
    #[serde(default)]
    registered_at: Option<DateTime<Utc>>,
}

async fn upsert_user(
    State(service): State<SettlementService>,
    Path(user_id): Path<String>,
    Json(request): Json<ProfileRequest>,
) -> ApiResult<UserProfile> {
    let profile = UserProfile {
        id: user_id,
        name: request.name,
        country: request.country,
        registered_at: request.registered_at.unwrap_or_else(Utc::now),
    };
    service.upsert_user(profile.clone());
    Ok(Json(profile))
}

async fn reverify_payment(
    State(service): State<SettlementService>,
    Path(payment_id): Path<String>,
) -> ApiResult<Payment> {
    service.ledger().reverify_payment(&payment_id).await.map(Json)
}

async fn list_alerts(
    State(service): State<SettlementService>,
    Query(filter): Query<AlertFilter>,
) -> Json<Vec<Alert>> {
    Json(service.alerts().list(&filter))
}

#[derive(Debug, Deserialize)]
struct ResolutionRequest {
    resolved_by: String,
    #[serde(default)]
    note: String,
}

async fn review_alert(
    State(service): State<SettlementService>,
    Path(alert_id): Path<String>,
) -> ApiResult<Alert> {
    service.alerts().mark_under_review(&alert_id).map(Json)
}

async fn resolve_alert(
    State(service): State<SettlementService>,
    Path(alert_id): Path<String>,
    Json(request): Json<ResolutionRequest>,
) -> ApiResult<Alert> {
    service
        .resolve_alert(&alert_id, &request.resolved_by, &request.note)
        .map(Json)
}

async fn escalate_alert(
    State(service): State<SettlementService>,
    Path(alert_id): Path<String>,
) -> ApiResult<Alert> {
    service.alerts().escalate(&alert_id).map(Json)
}

async fn file_alert(
    State(service): State<SettlementService>,
    Path(alert_id): Path<String>,
    Json(request): Json<ResolutionRequest>,
) -> ApiResult<Alert> {
    service
        .file_alert(&alert_id, &request.resolved_by, &request.note)
        .map(Json)
}
