use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Serialize;
use uuid::Uuid;
use wayfare_core::IdempotencyKey;
use wayfare_order::{Booker, CancelOrder, Order, PayOrder, Payment, PlaceOrder, Refund};
use wayfare_shared::Masked;

use crate::error::AppError;
use crate::state::AppState;

pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/orders", get(list_orders).post(place_order))
        .route("/v1/orders/{id}", get(get_order))
        .route("/v1/orders/{id}/pay", post(pay_order))
        .route("/v1/orders/{id}/cancel", post(cancel_order))
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub order: Order,
    pub payment: Payment,
    /// Handed to the client SDK when the card still needs confirming
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<Masked<String>>,
}

#[derive(Debug, Serialize)]
pub struct CancellationResponse {
    pub order: Order,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund: Option<Refund>,
}

/// Mutating order routes refuse to run without a client-chosen key
fn idempotency_key(headers: &HeaderMap) -> Result<IdempotencyKey, AppError> {
    let raw = headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::BadRequest("Idempotency-Key header is required".to_string()))?;
    IdempotencyKey::parse(raw)
        .map_err(|_| AppError::BadRequest("Idempotency-Key header is not a valid key".to_string()))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /v1/orders
/// Hold an offer. Replaying the same key returns the stored order.
pub async fn place_order(
    State(state): State<AppState>,
    Extension(booker): Extension<Booker>,
    headers: HeaderMap,
    Json(req): Json<PlaceOrder>,
) -> Result<(StatusCode, Json<Order>), AppError> {
    let key = idempotency_key(&headers)?;
    let order = state.booking.place_order(&booker, req, &key).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /v1/orders
pub async fn list_orders(
    State(state): State<AppState>,
    Extension(booker): Extension<Booker>,
) -> Result<Json<Vec<Order>>, AppError> {
    Ok(Json(state.booking.list_orders(&booker.user_id).await?))
}

/// GET /v1/orders/{id}
pub async fn get_order(
    State(state): State<AppState>,
    Extension(booker): Extension<Booker>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.booking.get_order(&booker.user_id, order_id).await?))
}

/// POST /v1/orders/{id}/pay
/// Charge the customer, then settle with the content provider
pub async fn pay_order(
    State(state): State<AppState>,
    Extension(booker): Extension<Booker>,
    Path(order_id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<PayOrder>,
) -> Result<Json<PaymentResponse>, AppError> {
    let key = idempotency_key(&headers)?;
    let outcome = state.booking.pay_order(&booker, order_id, req, &key).await?;
    Ok(Json(PaymentResponse {
        order: outcome.order,
        payment: outcome.payment,
        client_secret: outcome.client_secret,
    }))
}

/// POST /v1/orders/{id}/cancel
/// Cancel a confirmed order, optionally asking for a refund
pub async fn cancel_order(
    State(state): State<AppState>,
    Extension(booker): Extension<Booker>,
    Path(order_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<CancelOrder>,
) -> Result<Json<CancellationResponse>, AppError> {
    let key = idempotency_key(&headers)?;
    let outcome = state
        .cancellation
        .cancel_order(&booker.user_id, order_id, request, &key)
        .await?;
    Ok(Json(CancellationResponse {
        order: outcome.order,
        refund: outcome.refund,
    }))
}
