use crate::booking::BookingService;
use crate::cancellation::CancellationService;
use crate::models::{ChangeActor, Payment, PaymentStatus};
use crate::repository::WebhookEventRepository;
use crate::webhooks::events::{
    Envelope, EventAction, IntentRef, WebhookEvent, WebhookProvider, WebhookStatus,
};
use crate::webhooks::signature::SignatureVerifier;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;
use wayfare_core::{CoreError, CoreResult};
use wayfare_shared::{Currency, Money};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    Applied,
    /// Already processed under the same provider event id
    Duplicate,
    /// The records it refers to do not exist yet; retried later
    Deferred,
    /// Gave up after the last deferred attempt
    Failed,
    Ignored,
}

/// Retry schedule for events that arrive before the records they refer to
#[derive(Debug, Clone)]
pub struct DeferralPolicy {
    pub max_attempts: i32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub batch_size: i64,
    /// A claim older than this is presumed abandoned and may be taken over
    pub claim_lease: Duration,
}

impl Default for DeferralPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_delay: Duration::seconds(5),
            max_delay: Duration::minutes(15),
            batch_size: 50,
            claim_lease: Duration::minutes(5),
        }
    }
}

impl DeferralPolicy {
    pub fn next_attempt_at(&self, attempts: i32, now: DateTime<Utc>) -> DateTime<Utc> {
        let factor = 2i32.saturating_pow(attempts.saturating_sub(1).clamp(0, 16) as u32);
        let delay = self.base_delay * factor;
        now + delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeferredRun {
    pub applied: usize,
    pub deferred: usize,
    pub failed: usize,
}

enum Applied {
    Done,
    Waiting(String),
}

/// Verifies, records and applies provider webhooks exactly once per provider event id.
pub struct WebhookProcessor {
    content_verifier: SignatureVerifier,
    payment_verifier: SignatureVerifier,
    events: Arc<dyn WebhookEventRepository>,
    booking: Arc<BookingService>,
    cancellation: Arc<CancellationService>,
    deferral: DeferralPolicy,
}

impl WebhookProcessor {
    pub fn new(
        content_verifier: SignatureVerifier,
        payment_verifier: SignatureVerifier,
        events: Arc<dyn WebhookEventRepository>,
        booking: Arc<BookingService>,
        cancellation: Arc<CancellationService>,
    ) -> Self {
        Self {
            content_verifier,
            payment_verifier,
            events,
            booking,
            cancellation,
            deferral: DeferralPolicy::default(),
        }
    }

    pub fn with_deferral_policy(mut self, deferral: DeferralPolicy) -> Self {
        self.deferral = deferral;
        self
    }

    /// Handle one delivery. Nothing is stored unless the signature checks out.
    pub async fn ingest(
        &self,
        provider: WebhookProvider,
        signature: Option<&str>,
        body: &[u8],
    ) -> CoreResult<WebhookOutcome> {
        let now = Utc::now();

        // 1. Signature over the raw bytes
        let verifier = match provider {
            WebhookProvider::Content => &self.content_verifier,
            WebhookProvider::Payment => &self.payment_verifier,
        };
        if let Err(e) = verifier.verify(signature, body, now) {
            tracing::warn!("Rejected {} webhook: {}", provider, e);
            return Err(CoreError::SignatureInvalid(e.to_string()));
        }

        // 2. Parse
        let value: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| CoreError::Validation(format!("webhook body is not JSON: {}", e)))?;
        let envelope: Envelope = serde_json::from_value(value.clone())
            .map_err(|e| CoreError::Validation(format!("webhook envelope: {}", e)))?;
        let action = EventAction::from_event(provider, &envelope).map_err(CoreError::Validation)?;

        if action == EventAction::Ignore {
            tracing::debug!("Ignoring {} event {} ({})", provider, envelope.id, envelope.event_type);
            return Ok(WebhookOutcome::Ignored);
        }

        // 3. Register under (provider, event id), then claim it for this delivery
        let candidate = WebhookEvent::verified(provider, &envelope, value, signature.unwrap_or_default());
        let stored = self.events.register_event(&candidate).await?.into_inner();
        let stale_before = now - self.deferral.claim_lease;
        let Some(event) = self.events.claim_event(stored.id, now, stale_before).await? else {
            tracing::info!(
                "Duplicate {} event {} ({})",
                provider,
                stored.event_id,
                stored.status.as_str()
            );
            return Ok(WebhookOutcome::Duplicate);
        };
        if stored.status == WebhookStatus::Failed {
            tracing::info!(
                "Redelivered {} event {} retried after an earlier give-up",
                provider,
                event.event_id
            );
        }

        // 4. Apply; on error the claim is released so the provider's redelivery retries it
        let applied = match self.apply(&event, &action).await {
            Ok(applied) => applied,
            Err(e) => {
                if let Err(release) = self.events.release_event(event.id).await {
                    tracing::error!("Could not release webhook event {}: {}", event.id, release);
                }
                return Err(e);
            }
        };
        self.finish(&event, applied, now).await
    }

    /// Retry deferred events whose time has come.
    pub async fn process_deferred(&self, now: DateTime<Utc>) -> CoreResult<DeferredRun> {
        let due = self
            .events
            .claim_due_events(now, now - self.deferral.claim_lease, self.deferral.batch_size)
            .await?;
        let mut run = DeferredRun::default();

        for event in due {
            let applied = match parse_stored(&event) {
                Ok(action) => match self.apply(&event, &action).await {
                    Ok(applied) => applied,
                    Err(e) => Applied::Waiting(e.to_string()),
                },
                Err(e) => {
                    tracing::error!("Stored event {} is unreadable: {}", event.id, e);
                    self.events.mark_failed(event.id, event.attempts + 1, &e).await?;
                    run.failed += 1;
                    continue;
                }
            };

            match self.finish(&event, applied, now).await? {
                WebhookOutcome::Applied => run.applied += 1,
                WebhookOutcome::Deferred => run.deferred += 1,
                WebhookOutcome::Failed => run.failed += 1,
                _ => {}
            }
        }

        if run != DeferredRun::default() {
            tracing::info!(
                "Deferred webhooks: {} applied, {} still waiting, {} failed",
                run.applied,
                run.deferred,
                run.failed
            );
        }
        Ok(run)
    }

    async fn finish(
        &self,
        event: &WebhookEvent,
        applied: Applied,
        now: DateTime<Utc>,
    ) -> CoreResult<WebhookOutcome> {
        match applied {
            Applied::Done => {
                self.events.mark_applied(event.id).await?;
                tracing::info!("Applied {} event {} ({})", event.provider, event.event_id, event.event_type);
                Ok(WebhookOutcome::Applied)
            }
            Applied::Waiting(reason) => {
                let attempts = event.attempts + 1;
                if attempts >= self.deferral.max_attempts {
                    tracing::error!(
                        "Giving up on {} event {} after {} attempts: {}",
                        event.provider,
                        event.event_id,
                        attempts,
                        reason
                    );
                    self.events.mark_failed(event.id, attempts, &reason).await?;
                    return Ok(WebhookOutcome::Failed);
                }
                let next = self.deferral.next_attempt_at(attempts, now);
                tracing::info!(
                    "Deferring {} event {} until {} ({})",
                    event.provider,
                    event.event_id,
                    next,
                    reason
                );
                self.events.mark_deferred(event.id, attempts, next, &reason).await?;
                Ok(WebhookOutcome::Deferred)
            }
        }
    }

    async fn apply(&self, event: &WebhookEvent, action: &EventAction) -> CoreResult<Applied> {
        let actor = ChangeActor::Webhook;
        let waiting_for_order = |id: &str| Applied::Waiting(format!("order {} not recorded yet", id));

        match action {
            EventAction::OrderConfirmed { provider_order_id } => {
                Ok(match self.booking.confirm_by_provider_id(provider_order_id, actor).await? {
                    Some(_) => Applied::Done,
                    None => waiting_for_order(provider_order_id),
                })
            }
            EventAction::OrderCancelled { provider_order_id } => {
                Ok(match self.booking.cancel_by_provider_id(provider_order_id, actor).await? {
                    Some(_) => Applied::Done,
                    None => waiting_for_order(provider_order_id),
                })
            }
            EventAction::RefundCompleted {
                provider_order_id,
                provider_refund_id,
            } => Ok(match self
                .cancellation
                .complete_refund(provider_order_id, provider_refund_id.as_deref(), actor)
                .await?
            {
                Some(_) => Applied::Done,
                None => waiting_for_order(provider_order_id),
            }),
            EventAction::PaymentCaptured(intent) => {
                let Some(payment) = self.find_payment(intent).await? else {
                    return Ok(waiting_for_payment(intent));
                };
                if payment.order_id.is_none() {
                    self.mark_standalone_succeeded(payment).await?;
                    return Ok(Applied::Done);
                }
                Ok(match self.booking.settle_captured_payment(payment, actor).await? {
                    Some(_) => Applied::Done,
                    None => waiting_for_payment(intent),
                })
            }
            EventAction::PaymentFailed { intent, reason } => {
                let Some(payment) = self.find_payment(intent).await? else {
                    return Ok(waiting_for_payment(intent));
                };
                self.booking.record_payment_failure(payment, reason, actor).await?;
                Ok(Applied::Done)
            }
            EventAction::ChargeRefunded { intent_id } => {
                let Some(payment) = self.booking.payments.find_payment_by_provider_id(intent_id).await?
                else {
                    return Ok(Applied::Waiting(format!("payment {} not recorded yet", intent_id)));
                };
                let Some(order_id) = payment.order_id else {
                    return Ok(Applied::Done);
                };
                let Some(order) = self.booking.orders.get_order(order_id).await? else {
                    return Ok(Applied::Waiting(format!("order {} not recorded yet", order_id)));
                };
                Ok(match self
                    .cancellation
                    .complete_refund(&order.provider_order_id, None, actor)
                    .await?
                {
                    Some(_) => Applied::Done,
                    None => waiting_for_order(&order.provider_order_id),
                })
            }
            EventAction::CheckoutCompleted {
                session_id,
                customer_id,
                amount_total,
                currency,
            } => {
                let now = Utc::now();
                let payment = Payment {
                    id: Uuid::new_v4(),
                    order_id: None,
                    customer_id: customer_id.clone(),
                    provider_payment_id: Some(session_id.clone()),
                    provider_settlement_id: None,
                    amount: Money::new(*amount_total, Currency::parse(currency)?),
                    status: PaymentStatus::Succeeded,
                    method: "subscription".to_string(),
                    idempotency_key: format!("webhook:{}:{}", event.provider, event.event_id),
                    request_fingerprint: String::new(),
                    raw: event.body.clone(),
                    created_at: now,
                    updated_at: now,
                };
                let stored = self.booking.payments.upsert_payment_by_provider_id(&payment).await?;
                tracing::info!("Checkout session {} recorded as payment {}", session_id, stored.id);
                Ok(Applied::Done)
            }
            EventAction::Ignore => Ok(Applied::Done),
        }
    }

    /// By processor id, falling back to the payment id we put in the intent metadata.
    async fn find_payment(&self, intent: &IntentRef) -> CoreResult<Option<Payment>> {
        let payments = &self.booking.payments;
        if let Some(payment) = payments.find_payment_by_provider_id(&intent.intent_id).await? {
            return Ok(Some(payment));
        }

        let Some(payment_id) = intent.payment_id else {
            return Ok(None);
        };
        let Some(mut payment) = payments.get_payment(payment_id).await? else {
            return Ok(None);
        };
        if intent.order_id.is_some() && payment.order_id != intent.order_id {
            tracing::warn!(
                "Intent {} metadata points at order {:?} but payment {} belongs to {:?}",
                intent.intent_id,
                intent.order_id,
                payment.id,
                payment.order_id
            );
            return Ok(None);
        }
        if payment.provider_payment_id.is_none() {
            payment.provider_payment_id = Some(intent.intent_id.clone());
            payments.update_payment(&payment).await?;
        }
        Ok(Some(payment))
    }

    async fn mark_standalone_succeeded(&self, mut payment: Payment) -> CoreResult<()> {
        if payment.status != PaymentStatus::Succeeded {
            payment.status = PaymentStatus::Succeeded;
            self.booking.payments.update_payment(&payment).await?;
        }
        Ok(())
    }
}

fn waiting_for_payment(intent: &IntentRef) -> Applied {
    Applied::Waiting(format!("payment for intent {} not recorded yet", intent.intent_id))
}

fn parse_stored(event: &WebhookEvent) -> Result<EventAction, String> {
    let envelope: Envelope = serde_json::from_value(event.body.clone()).map_err(|e| e.to_string())?;
    EventAction::from_event(event.provider, &envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{self, Harness, WEBHOOK_SECRET};
    use crate::models::{Order, OrderStatus};
    use crate::repository::{OrderRepository, PaymentRepository};
    use crate::webhooks::events::Envelope;
    use serde_json::json;
    use wayfare_core::content::{ContentProvider, CreateOrderRequest};
    use wayfare_core::payment::PaymentIntentStatus;
    use wayfare_core::IdempotencyKey;

    fn signed(body: &serde_json::Value) -> (Vec<u8>, String) {
        let bytes = serde_json::to_vec(body).unwrap();
        let header = SignatureVerifier::new(WEBHOOK_SECRET, 300)
            .sign(&bytes, Some(Utc::now().timestamp()))
            .unwrap();
        (bytes, header)
    }

    fn intent_succeeded(event_id: &str, intent_id: &str, order_id: Uuid, payment_id: Uuid) -> serde_json::Value {
        json!({
            "id": event_id,
            "type": "payment_intent.succeeded",
            "data": { "object": {
                "id": intent_id,
                "status": "succeeded",
                "metadata": { "order_id": order_id.to_string(), "payment_id": payment_id.to_string() }
            }}
        })
    }

    async fn deliver(h: &Harness, provider: WebhookProvider, body: &serde_json::Value) -> CoreResult<WebhookOutcome> {
        let (bytes, header) = signed(body);
        h.webhooks.ingest(provider, Some(&header), &bytes).await
    }

    /// Order and payment rows written straight to the store, as a crashed request would leave them
    async fn seed_pending_payment(h: &Harness, order_id: Uuid, payment_id: Uuid) {
        let provider_order = h
            .content
            .create_order(
                &CreateOrderRequest::hold(vec![fixtures::OFFER_ID.to_string()], vec![fixtures::passenger()]),
                &IdempotencyKey::parse("seed-order").unwrap(),
            )
            .await
            .unwrap();
        let now = Utc::now();
        let order = Order {
            id: order_id,
            provider_order_id: provider_order.id,
            booking_reference: provider_order.booking_reference,
            status: OrderStatus::Pending,
            total: provider_order.total.clone(),
            user_id: "user_1".to_string(),
            offer_ids: vec![fixtures::OFFER_ID.to_string()],
            passengers: vec![fixtures::passenger()],
            idempotency_key: "seed-order".to_string(),
            request_fingerprint: String::new(),
            raw: json!({}),
            created_at: now,
            updated_at: now,
        };
        h.store.insert_order(&order).await.unwrap();
        let payment = Payment {
            id: payment_id,
            order_id: Some(order_id),
            customer_id: None,
            provider_payment_id: None,
            provider_settlement_id: None,
            amount: provider_order.total,
            status: PaymentStatus::Pending,
            method: "card".to_string(),
            idempotency_key: "seed-payment".to_string(),
            request_fingerprint: String::new(),
            raw: json!({}),
            created_at: now,
            updated_at: now,
        };
        h.store.insert_payment(&payment).await.unwrap();
    }

    #[tokio::test]
    async fn test_bad_signature_is_rejected_and_not_stored() {
        let h = Harness::new();
        let body = intent_succeeded("evt_1", "pi_1", Uuid::new_v4(), Uuid::new_v4());
        let bytes = serde_json::to_vec(&body).unwrap();

        let result = h
            .webhooks
            .ingest(WebhookProvider::Payment, Some("t=1,v1=00"), &bytes)
            .await;

        assert!(matches!(result, Err(CoreError::SignatureInvalid(_))));
        assert_eq!(h.store.event_count().await, 0);
    }

    #[tokio::test]
    async fn test_webhook_before_order_is_deferred_then_applied_once() {
        let h = Harness::new();
        let order_id = Uuid::new_v4();
        let payment_id = Uuid::new_v4();
        let body = intent_succeeded("evt_1", "pi_early", order_id, payment_id);

        // Arrives before the order row exists
        assert_eq!(deliver(&h, WebhookProvider::Payment, &body).await.unwrap(), WebhookOutcome::Deferred);
        assert_eq!(h.store.event_count().await, 1);

        seed_pending_payment(&h, order_id, payment_id).await;

        let later = Utc::now() + Duration::hours(1);
        let run = h.webhooks.process_deferred(later).await.unwrap();
        assert_eq!(run.applied, 1);

        let order = h.store.get_order(order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Confirmed);
        let payment = h.store.get_payment(payment_id).await.unwrap().unwrap();
        assert_eq!(payment.provider_payment_id.as_deref(), Some("pi_early"));
        assert_eq!(payment.status, PaymentStatus::Succeeded);

        // Provider redelivers the same event
        assert_eq!(deliver(&h, WebhookProvider::Payment, &body).await.unwrap(), WebhookOutcome::Duplicate);
        assert_eq!(h.webhooks.process_deferred(later).await.unwrap(), DeferredRun::default());

        let confirmations = h
            .store
            .list_changes(order_id)
            .await
            .unwrap()
            .into_iter()
            .filter(|c| c.new_status == OrderStatus::Confirmed)
            .count();
        assert_eq!(confirmations, 1);
        assert_eq!(h.content.calls_to("create_payment"), 1);
    }

    #[tokio::test]
    async fn test_duplicate_delivery_applies_once() {
        let h = Harness::new();
        let order_id = Uuid::new_v4();
        let payment_id = Uuid::new_v4();
        seed_pending_payment(&h, order_id, payment_id).await;
        let body = intent_succeeded("evt_2", "pi_2", order_id, payment_id);

        assert_eq!(deliver(&h, WebhookProvider::Payment, &body).await.unwrap(), WebhookOutcome::Applied);
        assert_eq!(deliver(&h, WebhookProvider::Payment, &body).await.unwrap(), WebhookOutcome::Duplicate);
        assert_eq!(h.content.calls_to("create_payment"), 1);
    }

    #[tokio::test]
    async fn test_deferred_event_fails_after_max_attempts() {
        let h = Harness::new();
        let body = json!({
            "id": "evt_3",
            "type": "order.cancelled",
            "data": { "object": { "id": "ord_unknown" } }
        });
        assert_eq!(deliver(&h, WebhookProvider::Content, &body).await.unwrap(), WebhookOutcome::Deferred);

        let mut now = Utc::now();
        let mut failed = 0;
        for _ in 0..DeferralPolicy::default().max_attempts {
            now += Duration::hours(1);
            failed += h.webhooks.process_deferred(now).await.unwrap().failed;
        }
        assert_eq!(failed, 1);

        let event = crate::repository::WebhookEventRepository::find_event(&h.store, WebhookProvider::Content, "evt_3")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.status, WebhookStatus::Failed);
        assert_eq!(event.attempts, DeferralPolicy::default().max_attempts);
    }

    async fn confirmations(h: &Harness, order_id: Uuid) -> usize {
        h.store
            .list_changes(order_id)
            .await
            .unwrap()
            .into_iter()
            .filter(|c| c.new_status == OrderStatus::Confirmed)
            .count()
    }

    /// Stored and claimed the way an in-flight delivery leaves it
    async fn claimed_at(h: &Harness, body: &serde_json::Value, at: DateTime<Utc>) -> WebhookEvent {
        let envelope: Envelope = serde_json::from_value(body.clone()).unwrap();
        let event = WebhookEvent::verified(WebhookProvider::Payment, &envelope, body.clone(), "sig");
        let stored = h.store.register_event(&event).await.unwrap().into_inner();
        h.store.claim_event(stored.id, at, at).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_redelivery_after_give_up_is_applied() {
        let h = Harness::new();
        // The first order the scripted provider creates
        let body = json!({
            "id": "evt_8",
            "type": "order.cancelled",
            "data": { "object": { "id": "ord_0001" } }
        });
        assert_eq!(deliver(&h, WebhookProvider::Content, &body).await.unwrap(), WebhookOutcome::Deferred);

        let mut now = Utc::now();
        for _ in 0..DeferralPolicy::default().max_attempts {
            now += Duration::hours(1);
            h.webhooks.process_deferred(now).await.unwrap();
        }
        let given_up = h.store.find_event(WebhookProvider::Content, "evt_8").await.unwrap().unwrap();
        assert_eq!(given_up.status, WebhookStatus::Failed);

        let order = h.place("key-1").await.unwrap();
        assert_eq!(order.provider_order_id, "ord_0001");

        assert_eq!(deliver(&h, WebhookProvider::Content, &body).await.unwrap(), WebhookOutcome::Applied);
        let stored = h.store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Cancelled);

        let event = h.store.find_event(WebhookProvider::Content, "evt_8").await.unwrap().unwrap();
        assert_eq!(event.status, WebhookStatus::Applied);
        assert_eq!(event.attempts, 0);
        assert_eq!(deliver(&h, WebhookProvider::Content, &body).await.unwrap(), WebhookOutcome::Duplicate);
    }

    #[tokio::test]
    async fn test_redelivery_that_still_cannot_apply_is_deferred_again() {
        let h = Harness::new();
        let body = json!({
            "id": "evt_9",
            "type": "order.cancelled",
            "data": { "object": { "id": "ord_missing" } }
        });
        deliver(&h, WebhookProvider::Content, &body).await.unwrap();
        let mut now = Utc::now();
        for _ in 0..DeferralPolicy::default().max_attempts {
            now += Duration::hours(1);
            h.webhooks.process_deferred(now).await.unwrap();
        }

        assert_eq!(deliver(&h, WebhookProvider::Content, &body).await.unwrap(), WebhookOutcome::Deferred);
        let event = h.store.find_event(WebhookProvider::Content, "evt_9").await.unwrap().unwrap();
        assert_eq!(event.status, WebhookStatus::Deferred);
        assert_eq!(event.attempts, 1);
    }

    #[tokio::test]
    async fn test_concurrent_deliveries_apply_once() {
        let h = Harness::new();
        let order_id = Uuid::new_v4();
        let payment_id = Uuid::new_v4();
        seed_pending_payment(&h, order_id, payment_id).await;
        let body = intent_succeeded("evt_10", "pi_10", order_id, payment_id);

        let (a, b) = tokio::join!(
            deliver(&h, WebhookProvider::Payment, &body),
            deliver(&h, WebhookProvider::Payment, &body)
        );
        let mut outcomes = vec![a.unwrap(), b.unwrap()];
        outcomes.sort_by_key(|o| *o as u8);
        assert_eq!(outcomes, vec![WebhookOutcome::Applied, WebhookOutcome::Duplicate]);
        assert_eq!(h.content.calls_to("create_payment"), 1);
        assert_eq!(confirmations(&h, order_id).await, 1);
    }

    #[tokio::test]
    async fn test_event_claimed_elsewhere_is_left_alone_until_stale() {
        let h = Harness::new();
        let order_id = Uuid::new_v4();
        let payment_id = Uuid::new_v4();
        seed_pending_payment(&h, order_id, payment_id).await;

        let fresh = intent_succeeded("evt_11", "pi_11", order_id, payment_id);
        claimed_at(&h, &fresh, Utc::now()).await;
        assert_eq!(deliver(&h, WebhookProvider::Payment, &fresh).await.unwrap(), WebhookOutcome::Duplicate);
        assert_eq!(h.content.calls_to("create_payment"), 0);

        // A claim past its lease belongs to a delivery that never finished
        let abandoned = intent_succeeded("evt_12", "pi_11", order_id, payment_id);
        claimed_at(&h, &abandoned, Utc::now() - Duration::hours(1)).await;
        assert_eq!(deliver(&h, WebhookProvider::Payment, &abandoned).await.unwrap(), WebhookOutcome::Applied);
        let order = h.store.get_order(order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_concurrent_deferred_runs_claim_each_event_once() {
        let h = Harness::new();
        let order_id = Uuid::new_v4();
        let payment_id = Uuid::new_v4();
        let body = intent_succeeded("evt_13", "pi_13", order_id, payment_id);
        assert_eq!(deliver(&h, WebhookProvider::Payment, &body).await.unwrap(), WebhookOutcome::Deferred);
        seed_pending_payment(&h, order_id, payment_id).await;

        let later = Utc::now() + Duration::hours(1);
        let (a, b) = tokio::join!(h.webhooks.process_deferred(later), h.webhooks.process_deferred(later));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.applied + b.applied, 1);
        assert_eq!(a.deferred + b.deferred, 0);
        assert_eq!(h.content.calls_to("create_payment"), 1);
        assert_eq!(confirmations(&h, order_id).await, 1);
    }

    #[tokio::test]
    async fn test_synchronous_capture_and_webhook_converge() {
        let h = Harness::new();
        h.processor.set_next_status(PaymentIntentStatus::Processing);
        let order = h.place("key-1").await.unwrap();
        let outcome = h.pay(order.id, "pay-1").await.unwrap();
        let payment = outcome.payment;
        let intent_id = payment.provider_payment_id.clone().unwrap();
        let body = intent_succeeded("evt_14", &intent_id, order.id, payment.id);

        let (settled, delivered) = tokio::join!(
            h.booking.settle_captured_payment(payment.clone(), ChangeActor::Customer),
            deliver(&h, WebhookProvider::Payment, &body)
        );
        assert_eq!(settled.unwrap().unwrap().status, OrderStatus::Confirmed);
        assert_eq!(delivered.unwrap(), WebhookOutcome::Applied);

        assert_eq!(confirmations(&h, order.id).await, 1);
        let stored = h.store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Confirmed);
        let stored_payment = h.store.get_payment(payment.id).await.unwrap().unwrap();
        assert_eq!(stored_payment.status, PaymentStatus::Succeeded);
        assert_eq!(stored_payment.provider_settlement_id.as_deref(), Some("pay_ord_0001"));

        let keys: Vec<_> = h
            .content
            .calls()
            .into_iter()
            .filter(|c| c.operation == "create_payment")
            .map(|c| c.key)
            .collect();
        assert!(!keys.is_empty());
        assert!(keys.iter().all(|k| k.as_deref() == Some(payment.idempotency_key.as_str())));
    }

    #[tokio::test]
    async fn test_unhandled_types_are_ignored() {
        let h = Harness::new();
        let body = json!({ "id": "evt_4", "type": "customer.updated", "data": { "object": {} } });
        assert_eq!(deliver(&h, WebhookProvider::Payment, &body).await.unwrap(), WebhookOutcome::Ignored);
        assert_eq!(h.store.event_count().await, 0);
    }

    #[tokio::test]
    async fn test_payment_failed_event_fails_order() {
        let h = Harness::new();
        let order_id = Uuid::new_v4();
        let payment_id = Uuid::new_v4();
        seed_pending_payment(&h, order_id, payment_id).await;
        let body = json!({
            "id": "evt_5",
            "type": "payment_intent.payment_failed",
            "data": { "object": {
                "id": "pi_5",
                "metadata": { "order_id": order_id.to_string(), "payment_id": payment_id.to_string() },
                "last_payment_error": { "message": "Your card was declined." }
            }}
        });

        assert_eq!(deliver(&h, WebhookProvider::Payment, &body).await.unwrap(), WebhookOutcome::Applied);
        let order = h.store.get_order(order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Failed);
    }

    #[tokio::test]
    async fn test_provider_cancellation_and_checkout_events() {
        let h = Harness::new();
        let order = h.place("key-1").await.unwrap();
        let body = json!({
            "id": "evt_6",
            "type": "order.cancelled",
            "data": { "object": { "id": order.provider_order_id } }
        });
        assert_eq!(deliver(&h, WebhookProvider::Content, &body).await.unwrap(), WebhookOutcome::Applied);
        let stored = h.store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Cancelled);

        let checkout = json!({
            "id": "evt_7",
            "type": "checkout.session.completed",
            "data": { "object": { "id": "cs_1", "customer": "cus_1", "amount_total": 999, "currency": "eur" } }
        });
        assert_eq!(deliver(&h, WebhookProvider::Payment, &checkout).await.unwrap(), WebhookOutcome::Applied);
        let payment = h.store.find_payment_by_provider_id("cs_1").await.unwrap().unwrap();
        assert_eq!(payment.method, "subscription");
        assert_eq!(payment.amount.amount_minor, 999);
        assert!(payment.order_id.is_none());
    }

    #[test]
    fn test_deferral_backoff_is_capped() {
        let policy = DeferralPolicy::default();
        let now = Utc::now();
        assert_eq!(policy.next_attempt_at(1, now) - now, Duration::seconds(5));
        assert_eq!(policy.next_attempt_at(2, now) - now, Duration::seconds(10));
        assert_eq!(policy.next_attempt_at(20, now) - now, Duration::minutes(15));
    }
}
