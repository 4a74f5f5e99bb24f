use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Extension, Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;
use wayfare_order::{Booker, LoyaltyAccount};

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/loyalty-accounts", get(list_accounts).post(create_account))
        .route(
            "/v1/loyalty-accounts/{id}",
            get(get_account).put(update_account).delete(delete_account),
        )
}

#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub airline_iata_code: String,
    pub account_number: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateAccountRequest {
    pub account_number: String,
}

/// GET /v1/loyalty-accounts
pub async fn list_accounts(
    State(state): State<AppState>,
    Extension(booker): Extension<Booker>,
) -> Result<Json<Vec<LoyaltyAccount>>, AppError> {
    Ok(Json(state.loyalty.list(&booker.user_id).await?))
}

/// POST /v1/loyalty-accounts
/// One account per airline; a second one for the same airline is a conflict
pub async fn create_account(
    State(state): State<AppState>,
    Extension(booker): Extension<Booker>,
    Json(req): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<LoyaltyAccount>), AppError> {
    let account = state
        .loyalty
        .create(&booker.user_id, &req.airline_iata_code, &req.account_number)
        .await?;
    Ok((StatusCode::CREATED, Json(account)))
}

/// GET /v1/loyalty-accounts/{id}
pub async fn get_account(
    State(state): State<AppState>,
    Extension(booker): Extension<Booker>,
    Path(id): Path<Uuid>,
) -> Result<Json<LoyaltyAccount>, AppError> {
    Ok(Json(state.loyalty.get(&booker.user_id, id).await?))
}

/// PUT /v1/loyalty-accounts/{id}
pub async fn update_account(
    State(state): State<AppState>,
    Extension(booker): Extension<Booker>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateAccountRequest>,
) -> Result<Json<LoyaltyAccount>, AppError> {
    let account = state
        .loyalty
        .update(&booker.user_id, id, &req.account_number)
        .await?;
    Ok(Json(account))
}

/// DELETE /v1/loyalty-accounts/{id}
pub async fn delete_account(
    State(state): State<AppState>,
    Extension(booker): Extension<Booker>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.loyalty.delete(&booker.user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
