use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use serde::Serialize;
use wayfare_order::webhooks::{WebhookOutcome, WebhookProvider};

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/webhooks/content-provider", post(content_provider_webhook))
        .route("/webhooks/payment-processor", post(payment_processor_webhook))
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub status: WebhookOutcome,
}

/// POST /webhooks/content-provider
pub async fn content_provider_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    receive(&state, WebhookProvider::Content, &headers, &body).await
}

/// POST /webhooks/payment-processor
pub async fn payment_processor_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    receive(&state, WebhookProvider::Payment, &headers, &body).await
}

/// The raw body is verified as received; it is only parsed once the signature checks out.
async fn receive(
    state: &AppState,
    provider: WebhookProvider,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Json<WebhookAck>, AppError> {
    let signature = headers
        .get(state.signature_header.as_str())
        .and_then(|v| v.to_str().ok());

    let status = state.webhooks.ingest(provider, signature, body).await?;
    tracing::info!("Webhook from {} handled: {:?}", provider, status);
    Ok(Json(WebhookAck { status }))
}
