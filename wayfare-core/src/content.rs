use crate::idempotency::IdempotencyKey;
use crate::search::SearchCriteria;
use crate::CoreResult;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use wayfare_offer::{LoyaltyProgramme, Offer, OfferRequest, Place, SeatMap};
use wayfare_shared::{Masked, Money};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoyaltyProgrammeAccount {
    pub airline_iata_code: String,
    pub account_number: Masked<String>,
}

/// Traveler details submitted with an order. `id` is the offer passenger id being filled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Passenger {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub given_name: Masked<String>,
    pub family_name: Masked<String>,
    pub born_on: NaiveDate,
    #[serde(default)]
    pub gender: Option<String>,
    pub email: Masked<String>,
    pub phone_number: Masked<String>,
    #[serde(default)]
    pub loyalty_programme_accounts: Vec<LoyaltyProgrammeAccount>,
}

/// Instant payment attached to an order. Empty for hold orders.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PaymentInstruction {
    pub payment_type: String,
    pub amount: Money,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CreateOrderRequest {
    pub selected_offers: Vec<String>,
    pub passengers: Vec<Passenger>,
    pub payments: Vec<PaymentInstruction>,
}

impl CreateOrderRequest {
    pub fn hold(selected_offers: Vec<String>, passengers: Vec<Passenger>) -> Self {
        Self {
            selected_offers,
            passengers,
            payments: vec![],
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderOrderState {
    AwaitingPayment,
    Confirmed,
    Cancelled,
}

/// Order as the content provider reports it. `raw` is the verbatim response body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderOrder {
    pub id: String,
    pub booking_reference: Option<String>,
    pub state: ProviderOrderState,
    pub total: Money,
    pub raw: Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SettlementState {
    Pending,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderPayment {
    pub id: String,
    pub state: SettlementState,
    pub amount: Money,
    pub raw: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderRefund {
    pub id: String,
    pub order_id: String,
    /// `None` when the provider did not quote a refund (cancellation without money back)
    pub amount: Option<Money>,
    pub state: SettlementState,
    pub raw: Value,
}

/// Flight content provider: search, order, payment and refund operations.
///
/// Every mutating call takes the caller's idempotency key and sends it upstream unchanged.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    async fn search_offers(&self, criteria: &SearchCriteria) -> CoreResult<OfferRequest>;

    async fn get_offer(&self, offer_id: &str) -> CoreResult<Offer>;

    async fn create_order(
        &self,
        request: &CreateOrderRequest,
        key: &IdempotencyKey,
    ) -> CoreResult<ProviderOrder>;

    async fn get_order(&self, provider_order_id: &str) -> CoreResult<ProviderOrder>;

    /// Pay for a hold order from the account balance.
    async fn create_payment(
        &self,
        provider_order_id: &str,
        amount: &Money,
        key: &IdempotencyKey,
    ) -> CoreResult<ProviderPayment>;

    /// Cancel an order, optionally asking for the money back.
    async fn create_refund(
        &self,
        provider_order_id: &str,
        request_refund: bool,
        key: &IdempotencyKey,
    ) -> CoreResult<ProviderRefund>;

    async fn list_loyalty_programmes(
        &self,
        owner_airline_id: Option<&str>,
    ) -> CoreResult<Vec<LoyaltyProgramme>>;

    async fn get_seat_map(&self, offer_id: &str) -> CoreResult<Vec<SeatMap>>;

    async fn suggest_places(&self, query: &str) -> CoreResult<Vec<Place>>;
}
