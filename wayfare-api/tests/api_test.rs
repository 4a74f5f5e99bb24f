use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{Duration, NaiveDate, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use wayfare_api::middleware::CustomerClaims;
use wayfare_api::{app, AppState, Ports, Settings};
use wayfare_core::testing::{ScriptedContentProvider, ScriptedPaymentProcessor};
use wayfare_core::RetryPolicy;
use wayfare_offer::{
    Aircraft, Carrier, CarrierDirectory, EnrichmentConfig, LookupError, Offer, OfferPassenger,
    PassengerType, Slice,
};
use wayfare_order::webhooks::{DeferralPolicy, SignatureVerifier};
use wayfare_order::MemoryStore;
use wayfare_shared::{Currency, Masked, Money};

const JWT_SECRET: &str = "jwt-test-secret";
const WEBHOOK_SECRET: &str = "whsec_test";
const OFFER_ID: &str = "off_0001";

struct StaticDirectory;

#[async_trait]
impl CarrierDirectory for StaticDirectory {
    async fn airline(&self, id: &str) -> Result<Carrier, LookupError> {
        match id {
            "arl_ib" => Ok(Carrier {
                id: id.to_string(),
                iata_code: Some("IB".to_string()),
                name: Some("Iberia".to_string()),
                ..Carrier::default()
            }),
            _ => Err(LookupError::NotFound(id.to_string())),
        }
    }

    async fn aircraft(&self, id: &str) -> Result<Aircraft, LookupError> {
        Err(LookupError::NotFound(id.to_string()))
    }
}

fn offer_expiring_in(valid_for: Duration) -> Offer {
    Offer {
        id: OFFER_ID.to_string(),
        total: Money::new(23_450, Currency::parse("EUR").unwrap()),
        owner: Carrier::reference("arl_ib"),
        slices: vec![Slice {
            id: Some("sli_0001".to_string()),
            origin: "MAD".to_string(),
            destination: "LHR".to_string(),
            duration: Some("PT2H25M".to_string()),
            segments: vec![],
        }],
        passengers: vec![OfferPassenger {
            id: "pas_0001".to_string(),
            passenger_type: Some(PassengerType::Adult),
            age: None,
        }],
        expires_at: Utc::now() + valid_for,
        created_at: Some(Utc::now()),
    }
}

fn settings() -> Settings {
    Settings {
        jwt_secret: Masked::new(JWT_SECRET.to_string()),
        content_webhook_secret: Masked::new(WEBHOOK_SECRET.to_string()),
        payment_webhook_secret: Masked::new(WEBHOOK_SECRET.to_string()),
        signature_header: "X-Signature".to_string(),
        signature_tolerance_secs: 300,
        deferral: DeferralPolicy::default(),
        enrichment: EnrichmentConfig {
            max_in_flight: 4,
            lookup_timeout: std::time::Duration::from_millis(500),
        },
        retry: RetryPolicy::none(),
        expiry_grace: std::time::Duration::from_secs(30),
        rate_limit_per_minute: 100,
        cors_origins: vec![],
        subscription_price_id: Some("price_basic".to_string()),
    }
}

struct TestApp {
    router: Router,
    state: AppState,
    content: Arc<ScriptedContentProvider>,
    processor: Arc<ScriptedPaymentProcessor>,
    store: MemoryStore,
}

impl TestApp {
    fn new() -> Self {
        Self::with_offer(offer_expiring_in(Duration::minutes(30)))
    }

    fn with_offer(offer: Offer) -> Self {
        let store = MemoryStore::new();
        let content = Arc::new(ScriptedContentProvider::new().with_offer(offer));
        let processor = Arc::new(ScriptedPaymentProcessor::new());
        let ports = Ports::in_memory(
            content.clone(),
            Arc::new(StaticDirectory),
            processor.clone(),
            store.clone(),
        );
        let state = AppState::new(ports, settings(), None);

        Self {
            router: app(state.clone()),
            state,
            content,
            processor,
            store,
        }
    }

    async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }
}

fn token_for(user: &str, secret: &str) -> String {
    let claims = CustomerClaims {
        sub: user.to_string(),
        email: Some(format!("{}@example.com", user)),
        name: Some("Ada Lovelace".to_string()),
        exp: (Utc::now().timestamp() + 3600) as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
}

fn authed(method: Method, uri: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token_for("user_1", JWT_SECRET)))
        .header(header::CONTENT_TYPE, "application/json")
}

fn json_body(value: Value) -> Body {
    Body::from(serde_json::to_vec(&value).unwrap())
}

fn place_body() -> Value {
    json!({
        "offer_id": OFFER_ID,
        "passengers": [{
            "id": "pas_0001",
            "title": "ms",
            "given_name": "Ada",
            "family_name": "Lovelace",
            "born_on": "1990-12-10",
            "gender": "f",
            "email": "ada@example.com",
            "phone_number": "+442080160508"
        }]
    })
}

fn place_request(key: &str) -> Request<Body> {
    authed(Method::POST, "/v1/orders")
        .header("Idempotency-Key", key)
        .body(json_body(place_body()))
        .unwrap()
}

fn search_body(origin: &str, destination: &str) -> Value {
    let departure: NaiveDate = (Utc::now() + Duration::days(30)).date_naive();
    json!({
        "origin": origin,
        "destination": destination,
        "departure_date": departure,
        "passengers": [{ "type": "adult" }]
    })
}

fn signed_webhook(uri: &str, body: &Value) -> Request<Body> {
    let bytes = serde_json::to_vec(body).unwrap();
    let signature = SignatureVerifier::new(WEBHOOK_SECRET, 300)
        .sign(&bytes, Some(Utc::now().timestamp()))
        .unwrap();
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("X-Signature", signature)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(bytes))
        .unwrap()
}

#[tokio::test]
async fn test_health_is_public() {
    let t = TestApp::new();
    let (status, body) = t
        .send(Request::get("/health").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_customer_routes_require_valid_token() {
    let t = TestApp::new();

    let (status, body) = t
        .send(Request::get("/v1/orders").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["kind"], "unauthorized");

    let forged = Request::get("/v1/orders")
        .header(header::AUTHORIZATION, format!("Bearer {}", token_for("user_1", "not-the-secret")))
        .body(Body::empty())
        .unwrap();
    let (status, _) = t.send(forged).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_search_then_idempotent_order() {
    let t = TestApp::new();

    // Search MAD -> LHR
    let req = authed(Method::POST, "/v1/offers/search")
        .body(json_body(search_body("mad", "lhr")))
        .unwrap();
    let (status, body) = t.send(req).await;
    assert_eq!(status, StatusCode::OK);
    let offers = body["offers"].as_array().unwrap();
    assert_eq!(offers.len(), 1);
    assert_eq!(offers[0]["id"], OFFER_ID);
    assert_eq!(offers[0]["owner"]["name"], "Iberia");

    // Same key twice: one order
    let (first_status, first) = t.send(place_request("k1")).await;
    let (second_status, second) = t.send(place_request("k1")).await;
    assert_eq!(first_status, StatusCode::CREATED);
    assert_eq!(second_status, StatusCode::CREATED);
    assert_eq!(first["id"], second["id"]);
    assert_eq!(first["status"], "pending");
    assert_eq!(t.content.orders_created(), 1);
    assert_eq!(t.store.order_count().await, 1);

    // Listed for the owner only
    let (_, listed) = t
        .send(authed(Method::GET, "/v1/orders").body(Body::empty()).unwrap())
        .await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_search_validation_happens_before_upstream() {
    let t = TestApp::new();
    let req = authed(Method::POST, "/v1/offers/search")
        .body(json_body(search_body("MAD", "MAD")))
        .unwrap();
    let (status, body) = t.send(req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation");
    assert_eq!(t.content.calls_to("search_offers"), 0);
}

#[tokio::test]
async fn test_order_needs_idempotency_key() {
    let t = TestApp::new();
    let req = authed(Method::POST, "/v1/orders")
        .body(json_body(place_body()))
        .unwrap();
    let (status, _) = t.send(req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(t.content.calls_to("create_order"), 0);
}

#[tokio::test]
async fn test_offer_inside_expiry_grace_is_gone() {
    let t = TestApp::with_offer(offer_expiring_in(Duration::seconds(10)));

    let (status, body) = t
        .send(authed(Method::GET, "/v1/offers/off_0001").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["kind"], "expired");

    let (status, _) = t.send(place_request("k-expired")).await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(t.content.calls_to("create_order"), 0);
    assert_eq!(t.store.order_count().await, 0);

    let req = authed(Method::POST, "/v1/offers/search")
        .body(json_body(search_body("MAD", "LHR")))
        .unwrap();
    let (_, body) = t.send(req).await;
    assert!(body["offers"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_pay_confirms_order() {
    let t = TestApp::new();
    let (_, order) = t.send(place_request("k-pay")).await;
    let order_id = order["id"].as_str().unwrap();

    let req = authed(Method::POST, &format!("/v1/orders/{}/pay", order_id))
        .header("Idempotency-Key", "k-pay-1")
        .body(json_body(json!({ "amount": { "amount_minor": 23450, "currency": "EUR" } })))
        .unwrap();
    let (status, body) = t.send(req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["order"]["status"], "confirmed");
    assert_eq!(body["payment"]["status"], "succeeded");
    assert_eq!(t.processor.calls_to("create_payment_intent"), 1);
}

#[tokio::test]
async fn test_webhook_before_order_is_deferred_then_applied_once() {
    let t = TestApp::new();
    // The scripted provider numbers orders from ord_0001
    let event = json!({
        "id": "evt_early",
        "type": "order.updated",
        "data": { "object": { "id": "ord_0001", "status": "confirmed" } }
    });

    let (status, body) = t.send(signed_webhook("/webhooks/content-provider", &event)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "deferred");

    let (_, order) = t.send(place_request("k-race")).await;
    assert_eq!(order["provider_order_id"], "ord_0001");
    assert_eq!(order["status"], "pending");

    let run = t
        .state
        .webhooks
        .process_deferred(Utc::now() + Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(run.applied, 1);

    let uri = format!("/v1/orders/{}", order["id"].as_str().unwrap());
    let (_, fetched) = t
        .send(authed(Method::GET, &uri).body(Body::empty()).unwrap())
        .await;
    assert_eq!(fetched["status"], "confirmed");

    // Redelivery changes nothing
    let (status, body) = t.send(signed_webhook("/webhooks/content-provider", &event)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "duplicate");
    assert_eq!(t.store.event_count().await, 1);
}

#[tokio::test]
async fn test_webhook_signature_failures() {
    let t = TestApp::new();
    let event = json!({
        "id": "evt_1",
        "type": "payment_intent.succeeded",
        "data": { "object": { "id": "pi_1", "metadata": {} } }
    });
    let other = json!({ "id": "evt_1", "type": "payment_intent.succeeded" });

    // Signature computed over a different body
    let mut req = signed_webhook("/webhooks/payment-processor", &other);
    *req.body_mut() = Body::from(serde_json::to_vec(&event).unwrap());
    let (status, body) = t.send(req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["kind"], "signature_invalid");

    // No signature at all
    let unsigned = Request::post("/webhooks/payment-processor")
        .body(Body::from(serde_json::to_vec(&event).unwrap()))
        .unwrap();
    let (status, _) = t.send(unsigned).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    assert_eq!(t.store.event_count().await, 0);
}

#[tokio::test]
async fn test_signed_but_malformed_webhook_is_400() {
    let t = TestApp::new();
    let event = json!({ "type": "order.updated" });
    let (status, _) = t.send(signed_webhook("/webhooks/content-provider", &event)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(t.store.event_count().await, 0);
}

#[tokio::test]
async fn test_refund_on_pending_order_conflicts() {
    let t = TestApp::new();
    let (_, order) = t.send(place_request("k-refund")).await;
    let order_id = order["id"].as_str().unwrap();

    let req = authed(Method::POST, &format!("/v1/orders/{}/cancel", order_id))
        .header("Idempotency-Key", "k-refund-1")
        .body(json_body(json!({ "request_refund": true })))
        .unwrap();
    let (status, body) = t.send(req).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "conflict");
    assert_eq!(t.content.calls_to("create_refund"), 0);
}

#[tokio::test]
async fn test_loyalty_account_crud() {
    let t = TestApp::new();

    let create = authed(Method::POST, "/v1/loyalty-accounts")
        .body(json_body(json!({ "airline_iata_code": "ib", "account_number": "12345678" })))
        .unwrap();
    let (status, created) = t.send(create).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["airline_iata_code"], "IB");
    let uri = format!("/v1/loyalty-accounts/{}", created["id"].as_str().unwrap());

    let duplicate = authed(Method::POST, "/v1/loyalty-accounts")
        .body(json_body(json!({ "airline_iata_code": "IB", "account_number": "999" })))
        .unwrap();
    let (status, _) = t.send(duplicate).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let update = authed(Method::PUT, &uri)
        .body(json_body(json!({ "account_number": "87654321" })))
        .unwrap();
    let (status, updated) = t.send(update).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["account_number"], "87654321");

    // Invisible to other users
    let stranger = Request::get(uri.as_str())
        .header(header::AUTHORIZATION, format!("Bearer {}", token_for("user_2", JWT_SECRET)))
        .body(Body::empty())
        .unwrap();
    let (status, _) = t.send(stranger).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = t
        .send(authed(Method::DELETE, &uri).body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = t
        .send(authed(Method::GET, &uri).body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_checkout_uses_configured_price() {
    let t = TestApp::new();
    let req = authed(Method::POST, "/v1/billing/checkout")
        .body(json_body(json!({
            "success_url": "https://app.example.com/billing/done",
            "cancel_url": "https://app.example.com/billing"
        })))
        .unwrap();
    let (status, body) = t.send(req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "cs_cus_0001_price_basic");
    assert_eq!(t.processor.customers_created(), 1);
}
