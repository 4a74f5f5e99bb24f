use axum::{
    extract::State,
    routing::post,
    Extension, Json, Router,
};
use serde::Deserialize;
use wayfare_core::payment::{Customer, HostedSession};
use wayfare_order::Booker;

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/billing/checkout", post(create_checkout))
        .route("/v1/billing/portal", post(create_portal))
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub success_url: String,
    pub cancel_url: String,
    /// Falls back to the configured subscription price
    #[serde(default)]
    pub price_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PortalRequest {
    pub return_url: String,
}

async fn customer_for(state: &AppState, booker: &Booker) -> Result<Customer, AppError> {
    let email = booker
        .email
        .as_deref()
        .ok_or_else(|| AppError::BadRequest("token carries no email".to_string()))?;
    let name = booker.name.as_deref();

    // Creation is keyed by email upstream, so retrying cannot duplicate the customer
    let customer = state
        .retry
        .retry("get_or_create_customer", || {
            state.processor.get_or_create_customer(email, name)
        })
        .await?;
    Ok(customer)
}

fn require_url(field: &str, value: &str) -> Result<(), AppError> {
    let value = value.trim();
    if value.starts_with("https://") || value.starts_with("http://") {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!("{} must be an absolute URL", field)))
    }
}

/// POST /v1/billing/checkout
/// Hosted subscription checkout for the caller
pub async fn create_checkout(
    State(state): State<AppState>,
    Extension(booker): Extension<Booker>,
    Json(req): Json<CheckoutRequest>,
) -> Result<Json<HostedSession>, AppError> {
    require_url("success_url", &req.success_url)?;
    require_url("cancel_url", &req.cancel_url)?;

    let price = req
        .price_id
        .or_else(|| state.subscription_price_id.clone())
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("price_id is required".to_string()))?;

    // 1. Resolve the processor customer
    let customer = customer_for(&state, &booker).await?;

    // 2. Open the session
    let session = state
        .processor
        .create_checkout_session(&customer.id, &price, &req.success_url, &req.cancel_url)
        .await?;

    tracing::info!("Checkout session {} opened for user {}", session.id, booker.user_id);
    Ok(Json(session))
}

/// POST /v1/billing/portal
pub async fn create_portal(
    State(state): State<AppState>,
    Extension(booker): Extension<Booker>,
    Json(req): Json<PortalRequest>,
) -> Result<Json<HostedSession>, AppError> {
    require_url("return_url", &req.return_url)?;

    let customer = customer_for(&state, &booker).await?;
    let session = state
        .processor
        .create_billing_portal_session(&customer.id, &req.return_url)
        .await?;
    Ok(Json(session))
}
