use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use wayfare_core::SearchCriteria;
use wayfare_offer::{LoyaltyProgramme, Offer, Place, SeatMap};

use crate::error::AppError;
use crate::state::AppState;

const MIN_PLACE_QUERY: usize = 2;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/offers/search", post(search_offers))
        .route("/v1/offers/{id}", get(get_offer))
        .route("/v1/offers/{id}/seat-map", get(get_seat_map))
        .route("/v1/places", get(suggest_places))
        .route("/v1/loyalty-programmes", get(list_loyalty_programmes))
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub offer_request_id: String,
    pub offers: Vec<Offer>,
}

#[derive(Debug, Deserialize)]
pub struct PlacesQuery {
    #[serde(default)]
    pub query: String,
}

#[derive(Debug, Deserialize)]
pub struct ProgrammesQuery {
    #[serde(default)]
    pub owner_airline_id: Option<String>,
}

/// POST /v1/offers/search
/// Search offers, drop the ones about to expire and decorate the rest
pub async fn search_offers(
    State(state): State<AppState>,
    Json(criteria): Json<SearchCriteria>,
) -> Result<Json<SearchResponse>, AppError> {
    // 1. Validate before anything goes upstream
    let criteria = criteria.normalized()?;

    // 2. Search, retrying transient failures
    let request = state
        .retry
        .retry("search_offers", || state.content.search_offers(&criteria))
        .await?;

    // 3. Expiry filter, then enrichment
    let total = request.offers.len();
    let live = state.expiry.retain_live(request.offers, chrono::Utc::now());
    if live.len() < total {
        tracing::debug!("Dropped {} offers close to expiry", total - live.len());
    }
    let offers = state.enrichment.enrich(live).await;

    tracing::info!(
        "Search {}->{} returned {} offers",
        criteria.origin,
        criteria.destination,
        offers.len()
    );

    Ok(Json(SearchResponse {
        offer_request_id: request.id,
        offers,
    }))
}

/// GET /v1/offers/{id}
/// Latest price for one offer; 410 once it can no longer be booked
pub async fn get_offer(
    State(state): State<AppState>,
    Path(offer_id): Path<String>,
) -> Result<Json<Offer>, AppError> {
    let offer = state
        .retry
        .retry("get_offer", || state.content.get_offer(&offer_id))
        .await?;

    state.expiry.ensure_bookable(&offer, chrono::Utc::now())?;

    let mut enriched = state.enrichment.enrich(vec![offer]).await;
    enriched
        .pop()
        .map(Json)
        .ok_or_else(|| anyhow::anyhow!("enrichment dropped offer {}", offer_id).into())
}

/// GET /v1/offers/{id}/seat-map
pub async fn get_seat_map(
    State(state): State<AppState>,
    Path(offer_id): Path<String>,
) -> Result<Json<Vec<SeatMap>>, AppError> {
    let maps = state
        .retry
        .retry("get_seat_map", || state.content.get_seat_map(&offer_id))
        .await?;
    Ok(Json(maps))
}

/// GET /v1/places?query=
/// Airport and city suggestions for search boxes
pub async fn suggest_places(
    State(state): State<AppState>,
    Query(params): Query<PlacesQuery>,
) -> Result<Json<Vec<Place>>, AppError> {
    let query = params.query.trim();
    if query.chars().count() < MIN_PLACE_QUERY {
        return Err(AppError::BadRequest(format!(
            "query must be at least {} characters",
            MIN_PLACE_QUERY
        )));
    }

    let places = state
        .retry
        .retry("suggest_places", || state.content.suggest_places(query))
        .await?;
    Ok(Json(places))
}

/// GET /v1/loyalty-programmes
pub async fn list_loyalty_programmes(
    State(state): State<AppState>,
    Query(params): Query<ProgrammesQuery>,
) -> Result<Json<Vec<LoyaltyProgramme>>, AppError> {
    let owner = params.owner_airline_id.as_deref();
    let programmes = state
        .retry
        .retry("list_loyalty_programmes", || {
            state.content.list_loyalty_programmes(owner)
        })
        .await?;
    Ok(Json(programmes))
}
