use crate::http::{build_client, decode_error, status_error, transport_error, ErrorList};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::header::ACCEPT;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use wayfare_core::content::{
    ContentProvider, CreateOrderRequest, ProviderOrder, ProviderOrderState, ProviderPayment,
    ProviderRefund, SettlementState,
};
use wayfare_core::{CoreError, CoreResult, IdempotencyKey, SearchCriteria};
use wayfare_offer::{
    Aircraft, CabinClass, Carrier, CarrierDirectory, LookupError, LoyaltyProgramme, Offer,
    OfferPassenger, OfferRequest, Place, Seat, SeatMap, SeatMapCabin, Segment, Slice,
};
use wayfare_shared::{Currency, Masked, Money};

const UPSTREAM: &str = "content provider";
const VERSION_HEADER: &str = "Api-Version";
const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// REST gateway to the flight content provider.
///
/// Responses arrive as `{"data": ...}`; failures as `{"errors": [...]}`. Wire types stay in
/// this module and are converted to domain types (decimal strings to `Money`) on the way in.
#[derive(Clone)]
pub struct ContentGateway {
    client: Client,
    base_url: String,
    access_token: Masked<String>,
    api_version: String,
}

impl ContentGateway {
    pub fn new(
        base_url: impl Into<String>,
        access_token: impl Into<String>,
        api_version: impl Into<String>,
        timeout: Duration,
    ) -> CoreResult<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: Masked::new(access_token.into()),
            api_version: api_version.into(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(self.access_token.expose())
            .header(VERSION_HEADER, &self.api_version)
            .header(ACCEPT, "application/json")
    }

    /// Send and decode `data` as `T`, keeping the raw `data` value alongside.
    async fn send<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> CoreResult<(T, Value)> {
        let response = request
            .send()
            .await
            .map_err(|e| transport_error(UPSTREAM, e))?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(UPSTREAM, e))?;

        if status.is_success() {
            return decode_data(operation, &body);
        }

        let errors: ErrorList = serde_json::from_slice(&body).unwrap_or_default();
        let codes = errors.codes();

        // Already completed under this key: the original resource comes back in `data`
        if status == StatusCode::CONFLICT && codes.iter().any(|c| c == "duplicate_request") {
            if let Ok(decoded) = decode_data(operation, &body) {
                tracing::info!("{} replayed by {}", operation, UPSTREAM);
                return Ok(decoded);
            }
        }

        tracing::debug!("{} failed with {} {:?}", operation, status, codes);
        Err(status_error(UPSTREAM, status, &headers, &codes, &errors.message()))
    }
}

fn decode_data<T: DeserializeOwned>(operation: &str, body: &[u8]) -> CoreResult<(T, Value)> {
    #[derive(Deserialize)]
    struct Envelope {
        #[serde(default)]
        data: Value,
    }

    let envelope: Envelope =
        serde_json::from_slice(body).map_err(|e| decode_error(UPSTREAM, operation, e))?;
    if envelope.data.is_null() {
        return Err(decode_error(UPSTREAM, operation, "missing data"));
    }
    let typed = T::deserialize(&envelope.data).map_err(|e| decode_error(UPSTREAM, operation, e))?;
    Ok((typed, envelope.data))
}

fn money(amount: &str, currency: &str) -> CoreResult<Money> {
    Ok(Money::from_decimal_str(amount, Currency::parse(currency)?)?)
}

#[async_trait]
impl ContentProvider for ContentGateway {
    async fn search_offers(&self, criteria: &SearchCriteria) -> CoreResult<OfferRequest> {
        // Validated before any network I/O
        let criteria = criteria.clone().normalized()?;

        let mut data = json!({
            "slices": criteria.slices(),
            "passengers": criteria.passengers,
        });
        if let Some(cabin_class) = criteria.cabin_class {
            data["cabin_class"] = json!(cabin_class);
        }
        if let Some(max_connections) = criteria.max_connections {
            data["max_connections"] = json!(max_connections);
        }

        let request = self
            .request(Method::POST, "/air/offer_requests")
            .query(&[("return_offers", "true")])
            .json(&json!({ "data": data }));
        let (wire, _): (WireOfferRequest, Value) = self.send("search_offers", request).await?;

        let mut offers = Vec::with_capacity(wire.offers.len());
        for offer in wire.offers {
            let id = offer.id.clone();
            match offer.into_offer() {
                Ok(offer) => offers.push(offer),
                Err(e) => tracing::warn!("Skipping offer {}: {}", id, e),
            }
        }
        if let Some(currency) = &criteria.currency {
            offers.retain(|o| &o.total.currency == currency);
        }

        tracing::info!(
            "Search {} -> {} on {} returned {} offers",
            criteria.origin,
            criteria.destination,
            criteria.departure_date,
            offers.len()
        );
        Ok(OfferRequest { id: wire.id, offers })
    }

    async fn get_offer(&self, offer_id: &str) -> CoreResult<Offer> {
        let request = self.request(Method::GET, &format!("/air/offers/{}", offer_id));
        let (wire, _): (WireOffer, Value) = self.send("get_offer", request).await?;
        wire.into_offer()
    }

    async fn create_order(
        &self,
        request: &CreateOrderRequest,
        key: &IdempotencyKey,
    ) -> CoreResult<ProviderOrder> {
        let order_type = if request.payments.is_empty() { "hold" } else { "instant" };
        let payments: Vec<Value> = request
            .payments
            .iter()
            .map(|p| {
                json!({
                    "type": p.payment_type,
                    "amount": p.amount.to_decimal_string(),
                    "currency": p.amount.currency,
                })
            })
            .collect();
        let body = json!({
            "data": {
                "type": order_type,
                "selected_offers": request.selected_offers,
                "passengers": request.passengers,
                "payments": payments,
            }
        });

        let http = self
            .request(Method::POST, "/air/orders")
            .header(IDEMPOTENCY_HEADER, key.as_str())
            .json(&body);
        let (wire, raw): (WireOrder, Value) = self.send("create_order", http).await?;
        let order = wire.into_provider_order(raw)?;
        tracing::info!("Provider order {} created ({:?})", order.id, order.state);
        Ok(order)
    }

    async fn get_order(&self, provider_order_id: &str) -> CoreResult<ProviderOrder> {
        let request = self.request(Method::GET, &format!("/air/orders/{}", provider_order_id));
        let (wire, raw): (WireOrder, Value) = self.send("get_order", request).await?;
        wire.into_provider_order(raw)
    }

    async fn create_payment(
        &self,
        provider_order_id: &str,
        amount: &Money,
        key: &IdempotencyKey,
    ) -> CoreResult<ProviderPayment> {
        let body = json!({
            "data": {
                "order_id": provider_order_id,
                "payment": {
                    "type": "balance",
                    "amount": amount.to_decimal_string(),
                    "currency": amount.currency,
                }
            }
        });
        let request = self
            .request(Method::POST, "/air/payments")
            .header(IDEMPOTENCY_HEADER, key.as_str())
            .json(&body);
        let (wire, raw): (WirePayment, Value) = self.send("create_payment", request).await?;

        let state = match wire.status.as_deref() {
            Some("failed") => SettlementState::Failed,
            Some("pending") => SettlementState::Pending,
            _ => SettlementState::Succeeded,
        };
        Ok(ProviderPayment {
            id: wire.id,
            state,
            amount: money(&wire.amount, &wire.currency)?,
            raw,
        })
    }

    async fn create_refund(
        &self,
        provider_order_id: &str,
        request_refund: bool,
        key: &IdempotencyKey,
    ) -> CoreResult<ProviderRefund> {
        // 1. Quote
        let quote = self
            .request(Method::POST, "/air/order_cancellations")
            .header(IDEMPOTENCY_HEADER, key.as_str())
            .json(&json!({ "data": { "order_id": provider_order_id } }));
        let (quoted, _): (WireCancellation, Value) = self.send("create_cancellation", quote).await?;

        // 2. Confirm under a key derived from the caller's
        let confirm_key = IdempotencyKey::derived("cancellation-confirm", key.as_str());
        let confirm = self
            .request(
                Method::POST,
                &format!("/air/order_cancellations/{}/actions/confirm", quoted.id),
            )
            .header(IDEMPOTENCY_HEADER, confirm_key.as_str());
        let (confirmed, raw): (WireCancellation, Value) =
            self.send("confirm_cancellation", confirm).await?;

        let amount = match (request_refund, &confirmed.refund_amount, &confirmed.refund_currency) {
            (true, Some(amount), Some(currency)) => Some(money(amount, currency)?),
            _ => None,
        };
        // Balance refunds land immediately; card and voucher refunds report back later
        let state = match (&confirmed.confirmed_at, confirmed.refund_to.as_deref()) {
            (None, _) => SettlementState::Pending,
            (Some(_), _) if !request_refund => SettlementState::Succeeded,
            (Some(_), Some("balance")) => SettlementState::Succeeded,
            (Some(_), _) => SettlementState::Pending,
        };

        tracing::info!(
            "Cancellation {} confirmed for order {} (refund requested: {})",
            confirmed.id,
            provider_order_id,
            request_refund
        );
        Ok(ProviderRefund {
            id: confirmed.id,
            order_id: confirmed.order_id,
            amount,
            state,
            raw,
        })
    }

    async fn list_loyalty_programmes(
        &self,
        owner_airline_id: Option<&str>,
    ) -> CoreResult<Vec<LoyaltyProgramme>> {
        let mut request = self.request(Method::GET, "/air/loyalty_programmes");
        if let Some(owner) = owner_airline_id {
            request = request.query(&[("owner_airline_id", owner)]);
        }
        let (programmes, _): (Vec<LoyaltyProgramme>, Value) =
            self.send("list_loyalty_programmes", request).await?;
        Ok(programmes)
    }

    async fn get_seat_map(&self, offer_id: &str) -> CoreResult<Vec<SeatMap>> {
        let request = self
            .request(Method::GET, "/air/seat_maps")
            .query(&[("offer_id", offer_id)]);
        let (maps, _): (Vec<WireSeatMap>, Value) = self.send("get_seat_map", request).await?;
        maps.into_iter().map(WireSeatMap::into_seat_map).collect()
    }

    async fn suggest_places(&self, query: &str) -> CoreResult<Vec<Place>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(CoreError::Validation("query is required".to_string()));
        }
        let request = self
            .request(Method::GET, "/places/suggestions")
            .query(&[("query", query)]);
        let (places, _): (Vec<WirePlace>, Value) = self.send("suggest_places", request).await?;
        Ok(places.into_iter().map(WirePlace::into_place).collect())
    }
}

#[async_trait]
impl CarrierDirectory for ContentGateway {
    async fn airline(&self, id: &str) -> Result<Carrier, LookupError> {
        let request = self.request(Method::GET, &format!("/air/airlines/{}", id));
        self.send::<Carrier>("get_airline", request)
            .await
            .map(|(carrier, _)| carrier)
            .map_err(lookup_error)
    }

    async fn aircraft(&self, id: &str) -> Result<Aircraft, LookupError> {
        let request = self.request(Method::GET, &format!("/air/aircraft/{}", id));
        self.send::<Aircraft>("get_aircraft", request)
            .await
            .map(|(aircraft, _)| aircraft)
            .map_err(lookup_error)
    }
}

fn lookup_error(e: CoreError) -> LookupError {
    match e {
        CoreError::NotFound(m) => LookupError::NotFound(m),
        other => LookupError::Failed(other.to_string()),
    }
}

// Wire types

#[derive(Deserialize)]
struct PlaceRef {
    #[serde(default)]
    iata_code: Option<String>,
    #[serde(default)]
    id: Option<String>,
}

impl PlaceRef {
    fn code(self) -> String {
        self.iata_code.or(self.id).unwrap_or_default()
    }
}

#[derive(Deserialize)]
struct WireSegment {
    id: String,
    origin: PlaceRef,
    destination: PlaceRef,
    departing_at: NaiveDateTime,
    arriving_at: NaiveDateTime,
    marketing_carrier: Carrier,
    operating_carrier: Carrier,
    #[serde(default)]
    marketing_carrier_flight_number: Option<String>,
    #[serde(default)]
    aircraft: Option<Aircraft>,
    #[serde(default)]
    duration: Option<String>,
}

#[derive(Deserialize)]
struct WireSlice {
    #[serde(default)]
    id: Option<String>,
    origin: PlaceRef,
    destination: PlaceRef,
    #[serde(default)]
    duration: Option<String>,
    #[serde(default)]
    segments: Vec<WireSegment>,
}

#[derive(Deserialize)]
struct WireOffer {
    id: String,
    total_amount: String,
    total_currency: String,
    owner: Carrier,
    #[serde(default)]
    slices: Vec<WireSlice>,
    #[serde(default)]
    passengers: Vec<OfferPassenger>,
    expires_at: DateTime<Utc>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

impl WireOffer {
    fn into_offer(self) -> CoreResult<Offer> {
        let slices = self
            .slices
            .into_iter()
            .map(|s| Slice {
                id: s.id,
                origin: s.origin.code(),
                destination: s.destination.code(),
                duration: s.duration,
                segments: s
                    .segments
                    .into_iter()
                    .map(|seg| Segment {
                        id: seg.id,
                        origin: seg.origin.code(),
                        destination: seg.destination.code(),
                        departing_at: seg.departing_at,
                        arriving_at: seg.arriving_at,
                        marketing_carrier: seg.marketing_carrier,
                        operating_carrier: seg.operating_carrier,
                        marketing_carrier_flight_number: seg.marketing_carrier_flight_number,
                        aircraft: seg.aircraft,
                        duration: seg.duration,
                    })
                    .collect(),
            })
            .collect();

        Ok(Offer {
            total: money(&self.total_amount, &self.total_currency)?,
            id: self.id,
            owner: self.owner,
            slices,
            passengers: self.passengers,
            expires_at: self.expires_at,
            created_at: self.created_at,
        })
    }
}

#[derive(Deserialize)]
struct WireOfferRequest {
    id: String,
    #[serde(default)]
    offers: Vec<WireOffer>,
}

#[derive(Deserialize)]
struct WirePaymentStatus {
    #[serde(default)]
    awaiting_payment: bool,
}

#[derive(Deserialize)]
struct WireOrder {
    id: String,
    #[serde(default)]
    booking_reference: Option<String>,
    total_amount: String,
    total_currency: String,
    #[serde(default)]
    cancelled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    payment_status: Option<WirePaymentStatus>,
}

impl WireOrder {
    fn into_provider_order(self, raw: Value) -> CoreResult<ProviderOrder> {
        let state = if self.cancelled_at.is_some() {
            ProviderOrderState::Cancelled
        } else if self.payment_status.map_or(false, |p| p.awaiting_payment) {
            ProviderOrderState::AwaitingPayment
        } else {
            ProviderOrderState::Confirmed
        };
        Ok(ProviderOrder {
            total: money(&self.total_amount, &self.total_currency)?,
            id: self.id,
            booking_reference: self.booking_reference,
            state,
            raw,
        })
    }
}

#[derive(Deserialize)]
struct WirePayment {
    id: String,
    amount: String,
    currency: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Deserialize)]
struct WireCancellation {
    id: String,
    order_id: String,
    #[serde(default)]
    refund_amount: Option<String>,
    #[serde(default)]
    refund_currency: Option<String>,
    #[serde(default)]
    refund_to: Option<String>,
    #[serde(default)]
    confirmed_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct WireService {
    total_amount: String,
    total_currency: String,
}

#[derive(Deserialize)]
struct WireElement {
    #[serde(rename = "type")]
    element_type: String,
    #[serde(default)]
    designator: Option<String>,
    #[serde(default)]
    available_services: Vec<WireService>,
    #[serde(default)]
    disclosures: Vec<String>,
}

#[derive(Deserialize)]
struct WireSection {
    #[serde(default)]
    elements: Vec<WireElement>,
}

#[derive(Deserialize)]
struct WireRow {
    #[serde(default)]
    sections: Vec<WireSection>,
}

#[derive(Deserialize)]
struct WireCabin {
    #[serde(default)]
    cabin_class: Option<CabinClass>,
    #[serde(default)]
    deck: u8,
    #[serde(default)]
    rows: Vec<WireRow>,
}

#[derive(Deserialize)]
struct WireSeatMap {
    id: String,
    segment_id: String,
    #[serde(default)]
    slice_id: Option<String>,
    #[serde(default)]
    cabins: Vec<WireCabin>,
}

impl WireSeatMap {
    /// Rows flattened to their seats; aisles, exits and facilities are dropped.
    fn into_seat_map(self) -> CoreResult<SeatMap> {
        let mut cabins = Vec::with_capacity(self.cabins.len());
        for cabin in self.cabins {
            let mut rows = Vec::with_capacity(cabin.rows.len());
            for row in cabin.rows {
                let mut seats = Vec::new();
                for element in row.sections.into_iter().flat_map(|s| s.elements) {
                    if element.element_type != "seat" {
                        continue;
                    }
                    let Some(designator) = element.designator else {
                        continue;
                    };
                    let price = match element.available_services.first() {
                        Some(s) => Some(money(&s.total_amount, &s.total_currency)?),
                        None => None,
                    };
                    seats.push(Seat {
                        designator,
                        available: !element.available_services.is_empty(),
                        price,
                        disclosures: element.disclosures,
                    });
                }
                rows.push(seats);
            }
            cabins.push(SeatMapCabin {
                cabin_class: cabin.cabin_class,
                deck: cabin.deck,
                rows,
            });
        }
        Ok(SeatMap {
            id: self.id,
            segment_id: self.segment_id,
            slice_id: self.slice_id,
            cabins,
        })
    }
}

#[derive(Deserialize)]
struct WirePlace {
    id: String,
    #[serde(rename = "type")]
    place_type: String,
    #[serde(default)]
    iata_code: Option<String>,
    name: String,
    #[serde(default)]
    city_name: Option<String>,
    #[serde(default)]
    iata_country_code: Option<String>,
}

impl WirePlace {
    fn into_place(self) -> Place {
        Place {
            id: self.id,
            place_type: self.place_type,
            iata_code: self.iata_code,
            name: self.name,
            city_name: self.city_name,
            iata_country_code: self.iata_country_code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use wayfare_core::content::Passenger;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn gateway(server: &MockServer) -> ContentGateway {
        ContentGateway::new(server.uri(), "test_token", "v2", Duration::from_secs(2)).unwrap()
    }

    fn offer_json(id: &str) -> Value {
        json!({
            "id": id,
            "total_amount": "123.45",
            "total_currency": "EUR",
            "owner": { "id": "arl_ib", "iata_code": "IB", "name": "Iberia" },
            "expires_at": "2099-01-01T12:00:00Z",
            "passengers": [{ "id": "pas_1", "type": "adult" }],
            "slices": [{
                "origin": { "iata_code": "MAD" },
                "destination": { "iata_code": "LHR" },
                "segments": [{
                    "id": "seg_1",
                    "origin": { "iata_code": "MAD" },
                    "destination": { "iata_code": "LHR" },
                    "departing_at": "2099-01-10T08:00:00",
                    "arriving_at": "2099-01-10T09:30:00",
                    "marketing_carrier": { "id": "arl_ib" },
                    "operating_carrier": { "id": "arl_ib" },
                    "aircraft": { "id": "arc_320" }
                }]
            }]
        })
    }

    fn order_json(awaiting_payment: bool) -> Value {
        json!({
            "id": "ord_1",
            "booking_reference": "RZPNX8",
            "total_amount": "123.45",
            "total_currency": "EUR",
            "payment_status": { "awaiting_payment": awaiting_payment }
        })
    }

    fn key(raw: &str) -> IdempotencyKey {
        IdempotencyKey::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_search_sends_auth_and_decodes_offers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/air/offer_requests"))
            .and(query_param("return_offers", "true"))
            .and(header("authorization", "Bearer test_token"))
            .and(header(VERSION_HEADER, "v2"))
            .and(body_partial_json(json!({
                "data": { "passengers": [{ "type": "adult" }] }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "data": { "id": "orq_1", "offers": [offer_json("off_1")] }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let criteria = SearchCriteria::one_way("mad", "lhr", NaiveDate::from_ymd_opt(2099, 1, 10).unwrap());
        let result = gateway(&server).await.search_offers(&criteria).await.unwrap();

        assert_eq!(result.id, "orq_1");
        let offer = &result.offers[0];
        assert_eq!(offer.total.amount_minor, 12345);
        assert_eq!(offer.total.currency.as_str(), "EUR");
        assert_eq!(offer.slices[0].origin, "MAD");
        assert_eq!(offer.segments().count(), 1);
    }

    #[tokio::test]
    async fn test_search_validation_happens_before_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let criteria = SearchCriteria::one_way("", "LHR", NaiveDate::from_ymd_opt(2099, 1, 10).unwrap());
        let result = gateway(&server).await.search_offers(&criteria).await;
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn test_provider_error_codes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/air/offers/off_expired"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({
                "errors": [{ "code": "offer_expired", "message": "This offer has expired" }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/air/offers/off_gone"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "errors": [{ "code": "not_found", "message": "Not found" }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/air/offers/off_busy"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "3"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/air/offers/off_down"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let gateway = gateway(&server).await;
        assert!(matches!(gateway.get_offer("off_expired").await, Err(CoreError::Expired(_))));
        assert!(matches!(gateway.get_offer("off_gone").await, Err(CoreError::NotFound(_))));
        assert_eq!(
            gateway.get_offer("off_busy").await,
            Err(CoreError::RateLimited {
                retry_after: Some(Duration::from_secs(3))
            })
        );
        assert!(matches!(
            gateway.get_offer("off_down").await,
            Err(CoreError::ProviderUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_create_order_sends_idempotency_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/air/orders"))
            .and(header(IDEMPOTENCY_HEADER, "k1"))
            .and(body_partial_json(json!({ "data": { "type": "hold", "selected_offers": ["off_1"] } })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "data": order_json(true) })))
            .expect(1)
            .mount(&server)
            .await;

        let passenger = Passenger {
            id: "pas_1".to_string(),
            title: None,
            given_name: Masked::new("Ada".to_string()),
            family_name: Masked::new("Lovelace".to_string()),
            born_on: NaiveDate::from_ymd_opt(1990, 12, 10).unwrap(),
            gender: None,
            email: Masked::new("ada@example.com".to_string()),
            phone_number: Masked::new("+442080160508".to_string()),
            loyalty_programme_accounts: vec![],
        };
        let request = CreateOrderRequest::hold(vec!["off_1".to_string()], vec![passenger]);
        let order = gateway(&server).await.create_order(&request, &key("k1")).await.unwrap();

        assert_eq!(order.id, "ord_1");
        assert_eq!(order.state, ProviderOrderState::AwaitingPayment);
        assert_eq!(order.booking_reference.as_deref(), Some("RZPNX8"));
        assert_eq!(order.raw["id"], "ord_1");
    }

    #[tokio::test]
    async fn test_duplicate_request_with_original_is_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/air/payments"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "errors": [{ "code": "duplicate_request", "message": "Already processed" }],
                "data": { "id": "pay_1", "amount": "123.45", "currency": "EUR" }
            })))
            .mount(&server)
            .await;

        let amount = Money::new(12345, Currency::parse("EUR").unwrap());
        let payment = gateway(&server)
            .await
            .create_payment("ord_1", &amount, &key("k2"))
            .await
            .unwrap();
        assert_eq!(payment.id, "pay_1");
        assert_eq!(payment.state, SettlementState::Succeeded);
    }

    #[tokio::test]
    async fn test_key_in_use_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/air/payments"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "errors": [{ "code": "idempotency_key_in_use", "message": "In progress" }]
            })))
            .mount(&server)
            .await;

        let amount = Money::new(12345, Currency::parse("EUR").unwrap());
        let result = gateway(&server).await.create_payment("ord_1", &amount, &key("k2")).await;
        assert!(result.unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn test_refund_quotes_then_confirms() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/air/order_cancellations"))
            .and(header(IDEMPOTENCY_HEADER, "c1"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "data": { "id": "ore_1", "order_id": "ord_1", "refund_amount": "100.00", "refund_currency": "EUR", "refund_to": "original_form_of_payment" }
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/air/order_cancellations/ore_1/actions/confirm"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {
                    "id": "ore_1", "order_id": "ord_1", "refund_amount": "100.00", "refund_currency": "EUR",
                    "refund_to": "original_form_of_payment", "confirmed_at": "2099-01-01T00:00:00Z"
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let refund = gateway(&server).await.create_refund("ord_1", true, &key("c1")).await.unwrap();
        assert_eq!(refund.id, "ore_1");
        assert_eq!(refund.amount.unwrap().amount_minor, 10000);
        assert_eq!(refund.state, SettlementState::Pending);
    }

    #[tokio::test]
    async fn test_seat_map_keeps_only_seats() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/air/seat_maps"))
            .and(query_param("offer_id", "off_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{
                    "id": "sea_1",
                    "segment_id": "seg_1",
                    "cabins": [{
                        "cabin_class": "economy",
                        "deck": 0,
                        "rows": [{ "sections": [
                            { "elements": [
                                { "type": "seat", "designator": "1A", "available_services": [{ "total_amount": "12.00", "total_currency": "EUR" }] },
                                { "type": "seat", "designator": "1B", "available_services": [] }
                            ]},
                            { "elements": [{ "type": "lavatory" }] }
                        ]}]
                    }]
                }]
            })))
            .mount(&server)
            .await;

        let maps = gateway(&server).await.get_seat_map("off_1").await.unwrap();
        let row = &maps[0].cabins[0].rows[0];
        assert_eq!(row.len(), 2);
        assert!(row[0].available);
        assert_eq!(row[0].price.as_ref().unwrap().amount_minor, 1200);
        assert!(!row[1].available);
    }

    #[tokio::test]
    async fn test_directory_lookups() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/air/airlines/arl_ib"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "id": "arl_ib", "iata_code": "IB", "name": "Iberia" }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/air/aircraft/arc_x"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let gateway = gateway(&server).await;
        let carrier = gateway.airline("arl_ib").await.unwrap();
        assert_eq!(carrier.name.as_deref(), Some("Iberia"));
        assert!(matches!(gateway.aircraft("arc_x").await, Err(LookupError::NotFound(_))));
    }
}
