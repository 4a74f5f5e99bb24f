//! Shared builders for the service tests in this crate.

use crate::booking::{Booker, BookingService, PayOrder, PaymentOutcome, PlaceOrder};
use crate::cancellation::CancellationService;
use crate::loyalty::LoyaltyService;
use crate::memory::MemoryStore;
use crate::models::Order;
use crate::webhooks::{SignatureVerifier, WebhookProcessor};
use chrono::{Duration, NaiveDate, Utc};
use std::sync::Arc;
use uuid::Uuid;
use wayfare_core::content::Passenger;
use wayfare_core::testing::{ScriptedContentProvider, ScriptedPaymentProcessor};
use wayfare_core::{CoreResult, IdempotencyKey, RetryPolicy};
use wayfare_offer::{Carrier, Offer, OfferPassenger, PassengerType};
use wayfare_shared::{Currency, Masked, Money};

pub const OFFER_ID: &str = "off_0001";
pub const WEBHOOK_SECRET: &str = "whsec_test";

pub fn offer_total() -> Money {
    Money::new(23_450, Currency::parse("EUR").unwrap())
}

pub fn offer_expiring_in(valid_for: Duration) -> Offer {
    Offer {
        id: OFFER_ID.to_string(),
        total: offer_total(),
        owner: Carrier::reference("arl_ib"),
        slices: vec![],
        passengers: vec![OfferPassenger {
            id: "pas_0001".to_string(),
            passenger_type: Some(PassengerType::Adult),
            age: None,
        }],
        expires_at: Utc::now() + valid_for,
        created_at: Some(Utc::now()),
    }
}

pub fn offer() -> Offer {
    offer_expiring_in(Duration::minutes(30))
}

pub fn passenger() -> Passenger {
    Passenger {
        id: "pas_0001".to_string(),
        title: Some("ms".to_string()),
        given_name: Masked::new("Ada".to_string()),
        family_name: Masked::new("Lovelace".to_string()),
        born_on: NaiveDate::from_ymd_opt(1990, 12, 10).unwrap(),
        gender: Some("f".to_string()),
        email: Masked::new("ada@example.com".to_string()),
        phone_number: Masked::new("+442080160508".to_string()),
        loyalty_programme_accounts: vec![],
    }
}

pub fn place_request() -> PlaceOrder {
    PlaceOrder {
        offer_id: OFFER_ID.to_string(),
        passengers: vec![passenger()],
        attach_loyalty_accounts: true,
    }
}

pub fn booker() -> Booker {
    Booker {
        user_id: "user_1".to_string(),
        email: Some("ada@example.com".to_string()),
        name: Some("Ada Lovelace".to_string()),
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_delay: std::time::Duration::from_millis(1),
        max_delay: std::time::Duration::from_millis(5),
        jitter: false,
    }
}

/// Every service wired over one memory store and the scripted providers
pub struct Harness {
    pub store: MemoryStore,
    pub content: Arc<ScriptedContentProvider>,
    pub processor: Arc<ScriptedPaymentProcessor>,
    pub loyalty: Arc<LoyaltyService>,
    pub booking: Arc<BookingService>,
    pub cancellation: Arc<CancellationService>,
    pub webhooks: WebhookProcessor,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_offer(offer())
    }

    pub fn with_offer(offer: Offer) -> Self {
        Self::with_content(ScriptedContentProvider::new().with_offer(offer))
    }

    pub fn with_content(content: ScriptedContentProvider) -> Self {
        let store = MemoryStore::new();
        let content = Arc::new(content);
        let processor = Arc::new(ScriptedPaymentProcessor::new());
        let loyalty = Arc::new(LoyaltyService::new(Arc::new(store.clone())));

        let booking = Arc::new(
            BookingService::new(
                content.clone(),
                processor.clone(),
                Arc::new(store.clone()),
                Arc::new(store.clone()),
            )
            .with_loyalty(loyalty.clone())
            .with_retry_policy(fast_retry()),
        );
        let cancellation = Arc::new(
            CancellationService::new(content.clone(), Arc::new(store.clone()), Arc::new(store.clone()))
                .with_retry_policy(fast_retry()),
        );
        let webhooks = WebhookProcessor::new(
            SignatureVerifier::new(WEBHOOK_SECRET, 300),
            SignatureVerifier::new(WEBHOOK_SECRET, 300),
            Arc::new(store.clone()),
            booking.clone(),
            cancellation.clone(),
        );

        Self {
            store,
            content,
            processor,
            loyalty,
            booking,
            cancellation,
            webhooks,
        }
    }

    pub async fn place(&self, key: &str) -> CoreResult<Order> {
        self.booking
            .place_order(&booker(), place_request(), &IdempotencyKey::parse(key)?)
            .await
    }

    pub async fn pay(&self, order_id: Uuid, key: &str) -> CoreResult<PaymentOutcome> {
        let request = PayOrder {
            amount: offer_total(),
            payment_method: None,
        };
        self.booking
            .pay_order(&booker(), order_id, request, &IdempotencyKey::parse(key)?)
            .await
    }
}
