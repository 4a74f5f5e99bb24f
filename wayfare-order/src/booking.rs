use crate::loyalty::LoyaltyService;
use crate::machine::BookingTrigger;
use crate::models::{ChangeActor, Order, OrderChange, OrderStatus, Payment, PaymentStatus, StatusChange};
use crate::passengers::validate_passengers;
use crate::repository::{
    advance_order, InsertOutcome, OrderRef, OrderRepository, PaymentRepository, TransitionOutcome,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;
use wayfare_core::content::{ContentProvider, CreateOrderRequest, Passenger, SettlementState};
use wayfare_core::payment::{CreatePaymentIntent, PaymentIntentStatus, PaymentProcessor};
use wayfare_core::{CoreError, CoreResult, IdempotencyKey, RequestFingerprint, RetryPolicy};
use wayfare_offer::ExpiryGuard;
use wayfare_shared::{Masked, Money};

/// The authenticated customer an operation runs for
#[derive(Debug, Clone)]
pub struct Booker {
    pub user_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
}

impl Booker {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: None,
            name: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub offer_id: String,
    pub passengers: Vec<Passenger>,
    /// Copy the user's saved loyalty accounts onto the lead passenger when it has none
    #[serde(default = "default_true")]
    pub attach_loyalty_accounts: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayOrder {
    pub amount: Money,
    #[serde(default)]
    pub payment_method: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PaymentOutcome {
    pub order: Order,
    pub payment: Payment,
    /// Present while the customer still has to act on the intent
    pub client_secret: Option<Masked<String>>,
}

/// Books offers as hold orders, charges the customer, then pays the provider.
///
/// Every upstream mutation carries the caller's idempotency key, and the local row is the
/// source of truth once written. A retried request with the same key and parameters returns
/// the stored result without repeating side effects.
pub struct BookingService {
    pub(crate) content: Arc<dyn ContentProvider>,
    pub(crate) processor: Arc<dyn PaymentProcessor>,
    pub(crate) orders: Arc<dyn OrderRepository>,
    pub(crate) payments: Arc<dyn PaymentRepository>,
    loyalty: Option<Arc<LoyaltyService>>,
    expiry: ExpiryGuard,
    pub(crate) retry: RetryPolicy,
}

impl BookingService {
    pub fn new(
        content: Arc<dyn ContentProvider>,
        processor: Arc<dyn PaymentProcessor>,
        orders: Arc<dyn OrderRepository>,
        payments: Arc<dyn PaymentRepository>,
    ) -> Self {
        Self {
            content,
            processor,
            orders,
            payments,
            loyalty: None,
            expiry: ExpiryGuard::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_loyalty(mut self, loyalty: Arc<LoyaltyService>) -> Self {
        self.loyalty = Some(loyalty);
        self
    }

    pub fn with_expiry_guard(mut self, expiry: ExpiryGuard) -> Self {
        self.expiry = expiry;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Create a hold order for an offer.
    pub async fn place_order(
        &self,
        booker: &Booker,
        request: PlaceOrder,
        key: &IdempotencyKey,
    ) -> CoreResult<Order> {
        let fingerprint = RequestFingerprint::of(&json!({
            "offer_id": request.offer_id,
            "passengers": request.passengers,
        }))?;

        // 1. Replay
        if let Some(existing) = self.orders.find_order_by_key(key.as_str()).await? {
            tracing::info!("Replaying order {} for key {}", existing.id, key);
            return replay_order(existing, &booker.user_id, &fingerprint);
        }

        // 2. Re-read the offer; expiry is judged now, not when it was listed
        let offer = self
            .retry
            .retry("get_offer", || self.content.get_offer(&request.offer_id))
            .await?;
        if let Err(e) = self.expiry.ensure_bookable(&offer, Utc::now()) {
            tracing::warn!("Rejecting order for offer {}: {}", offer.id, e);
            return Err(e.into());
        }

        // 3. Passengers
        validate_passengers(&request.passengers, &offer, Utc::now().date_naive())?;
        let mut passengers = request.passengers;
        if request.attach_loyalty_accounts {
            self.attach_loyalty_accounts(&booker.user_id, &mut passengers).await?;
        }

        // 4. Hold order upstream under the caller's key
        let provider_request = CreateOrderRequest::hold(vec![offer.id.clone()], passengers.clone());
        let provider_order = self
            .retry
            .retry("create_order", || self.content.create_order(&provider_request, key))
            .await?;

        if provider_order.total != offer.total {
            tracing::warn!(
                "Provider order {} total {} differs from offer total {}",
                provider_order.id,
                provider_order.total,
                offer.total
            );
        }

        // 5. Persist
        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4(),
            provider_order_id: provider_order.id.clone(),
            booking_reference: provider_order.booking_reference.clone(),
            status: OrderStatus::Pending,
            total: provider_order.total.clone(),
            user_id: booker.user_id.clone(),
            offer_ids: vec![offer.id.clone()],
            passengers,
            idempotency_key: key.to_string(),
            request_fingerprint: fingerprint.as_str().to_string(),
            raw: provider_order.raw.clone(),
            created_at: now,
            updated_at: now,
        };

        match self.orders.insert_order(&order).await? {
            InsertOutcome::Inserted(order) => {
                self.orders
                    .record_change(&OrderChange::created(&order, ChangeActor::Customer))
                    .await?;
                tracing::info!(
                    "Order {} placed (provider order {}, total {})",
                    order.id,
                    order.provider_order_id,
                    order.total
                );
                Ok(order)
            }
            // A concurrent request with the same key won the insert
            InsertOutcome::Existing(existing) => replay_order(existing, &booker.user_id, &fingerprint),
        }
    }

    pub async fn get_order(&self, user_id: &str, order_id: Uuid) -> CoreResult<Order> {
        match self.orders.get_order(order_id).await? {
            Some(order) if order.is_owned_by(user_id) => Ok(order),
            _ => Err(CoreError::NotFound(format!("order {}", order_id))),
        }
    }

    pub async fn list_orders(&self, user_id: &str) -> CoreResult<Vec<Order>> {
        self.orders.list_orders_for_user(user_id).await
    }

    /// Charge the customer for a pending order, then pay the provider once captured.
    pub async fn pay_order(
        &self,
        booker: &Booker,
        order_id: Uuid,
        request: PayOrder,
        key: &IdempotencyKey,
    ) -> CoreResult<PaymentOutcome> {
        // 1. Order and amount
        let order = self.get_order(&booker.user_id, order_id).await?;
        request.amount.ensure_same_currency(&order.total)?;
        if request.amount != order.total {
            return Err(CoreError::Validation(format!(
                "amount {} does not match order total {}",
                request.amount, order.total
            )));
        }

        let fingerprint = RequestFingerprint::of(&json!({
            "order_id": order.id,
            "amount": request.amount,
            "payment_method": request.payment_method,
        }))?;

        if order.status != OrderStatus::Pending {
            // Retrying a payment that already moved the order
            let previous = self
                .payments
                .list_payments_for_order(order.id)
                .await?
                .into_iter()
                .find(|p| p.idempotency_key == key.as_str());
            return match previous {
                Some(payment) if payment.request_fingerprint == fingerprint.as_str() => Ok(PaymentOutcome {
                    order,
                    payment,
                    client_secret: None,
                }),
                Some(_) => Err(key_reused()),
                None => Err(CoreError::Conflict(format!(
                    "order {} is {}, not awaiting payment",
                    order.id, order.status
                ))),
            };
        }

        // 2. Local payment row before any money moves
        let now = Utc::now();
        let candidate = Payment {
            id: Uuid::new_v4(),
            order_id: Some(order.id),
            customer_id: None,
            provider_payment_id: None,
            provider_settlement_id: None,
            amount: order.total.clone(),
            status: PaymentStatus::Pending,
            method: "card".to_string(),
            idempotency_key: key.to_string(),
            request_fingerprint: fingerprint.as_str().to_string(),
            raw: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        };
        let mut payment = match self.payments.insert_payment(&candidate).await? {
            InsertOutcome::Inserted(p) => p,
            InsertOutcome::Existing(p) => {
                if p.order_id != Some(order.id) || p.request_fingerprint != fingerprint.as_str() {
                    return Err(key_reused());
                }
                if p.status != PaymentStatus::Pending {
                    let order = self.get_order(&booker.user_id, order_id).await?;
                    return Ok(PaymentOutcome {
                        order,
                        payment: p,
                        client_secret: None,
                    });
                }
                p
            }
        };

        // 3. Customer
        let customer_id = match booker.email.as_deref() {
            Some(email) => Some(
                self.retry
                    .retry("get_or_create_customer", || {
                        self.processor.get_or_create_customer(email, booker.name.as_deref())
                    })
                    .await?
                    .id,
            ),
            None => None,
        };

        // 4. Payment intent
        let mut metadata = BTreeMap::new();
        metadata.insert("order_id".to_string(), order.id.to_string());
        metadata.insert("payment_id".to_string(), payment.id.to_string());
        let intent_request = CreatePaymentIntent {
            amount_minor: order.total.amount_minor,
            currency: order.total.currency.clone(),
            customer_id: customer_id.clone(),
            metadata,
            payment_method: request.payment_method.clone(),
        };
        let intent = match self
            .retry
            .retry("create_payment_intent", || {
                self.processor.create_payment_intent(&intent_request, key)
            })
            .await
        {
            Ok(intent) => intent,
            Err(e) if !e.is_retryable() => {
                // Nothing was charged; a new key is needed to try again
                payment.status = PaymentStatus::Failed;
                self.payments.update_payment(&payment).await?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        payment.provider_payment_id = Some(intent.id.clone());
        payment.customer_id = customer_id;
        payment.raw = intent.raw.clone();
        self.payments.update_payment(&payment).await?;

        // 5. Outcome
        let client_secret = intent.client_secret.clone();
        match intent.status {
            PaymentIntentStatus::Succeeded => {
                let order = self
                    .settle_captured_payment(payment.clone(), ChangeActor::Customer)
                    .await?
                    .ok_or_else(|| CoreError::Internal(format!("order {} vanished", order_id)))?;
                let payment = self.reload_payment(payment).await?;
                Ok(PaymentOutcome {
                    order,
                    payment,
                    client_secret: None,
                })
            }
            PaymentIntentStatus::Canceled => {
                self.rejected(payment, "payment intent canceled", ChangeActor::Customer).await
            }
            PaymentIntentStatus::RequiresPaymentMethod if request.payment_method.is_some() => {
                self.rejected(payment, "payment method declined", ChangeActor::Customer).await
            }
            status => {
                tracing::info!(
                    "Payment {} for order {} awaiting outcome ({:?})",
                    payment.id,
                    order.id,
                    status
                );
                Ok(PaymentOutcome {
                    order,
                    payment,
                    client_secret,
                })
            }
        }
    }

    /// Pay the provider for a captured card payment and confirm the order.
    ///
    /// Safe to call more than once for the same payment: the provider call reuses the payment's
    /// key and the status change is a compare-and-set. `None` when no local order matches yet.
    pub async fn settle_captured_payment(
        &self,
        mut payment: Payment,
        actor: ChangeActor,
    ) -> CoreResult<Option<Order>> {
        let Some(order_id) = payment.order_id else {
            return Err(CoreError::Internal(format!("payment {} has no order", payment.id)));
        };
        let Some(order) = self.orders.get_order(order_id).await? else {
            return Ok(None);
        };

        if order.status == OrderStatus::Confirmed {
            // The other confirmation path may have settled already; keep what it stored
            payment = self.reload_payment(payment).await?;
            if payment.status == PaymentStatus::Succeeded {
                return Ok(Some(order));
            }
        }
        if order.status != OrderStatus::Pending && order.status != OrderStatus::Confirmed {
            tracing::error!(
                "Payment {} captured for order {} in status {}; needs manual refund",
                payment.id,
                order.id,
                order.status
            );
        }

        if payment.provider_settlement_id.is_none() && order.status == OrderStatus::Pending {
            let key = IdempotencyKey::parse(&payment.idempotency_key)?;
            let settlement = self
                .retry
                .retry("create_payment", || {
                    self.content.create_payment(&order.provider_order_id, &order.total, &key)
                })
                .await?;
            if settlement.state == SettlementState::Failed {
                tracing::error!(
                    "Provider rejected settlement {} for order {}",
                    settlement.id,
                    order.id
                );
                return Err(CoreError::ProviderUnavailable(format!(
                    "settlement for order {} failed",
                    order.id
                )));
            }
            payment.provider_settlement_id = Some(settlement.id);
        }

        payment.status = PaymentStatus::Succeeded;
        self.payments.update_payment(&payment).await?;

        let change = StatusChange::new(actor, "payment captured");
        match advance_order(
            self.orders.as_ref(),
            OrderRef::Id(order.id),
            BookingTrigger::PaymentCaptured,
            &change,
        )
        .await?
        {
            TransitionOutcome::Applied(order) => {
                tracing::info!("Order {} confirmed by {}", order.id, actor.as_str());
                Ok(Some(order))
            }
            TransitionOutcome::Unchanged(order) => Ok(Some(order)),
            TransitionOutcome::Missing => Ok(None),
        }
    }

    /// Mark a payment failed and fail its order if it was still pending.
    pub async fn record_payment_failure(
        &self,
        mut payment: Payment,
        reason: &str,
        actor: ChangeActor,
    ) -> CoreResult<Option<Order>> {
        if payment.status == PaymentStatus::Succeeded {
            tracing::warn!("Ignoring failure for already captured payment {}", payment.id);
            return match payment.order_id {
                Some(id) => self.orders.get_order(id).await,
                None => Ok(None),
            };
        }
        payment.status = PaymentStatus::Failed;
        self.payments.update_payment(&payment).await?;

        let Some(order_id) = payment.order_id else {
            return Ok(None);
        };
        let change = StatusChange::new(actor, reason);
        match advance_order(
            self.orders.as_ref(),
            OrderRef::Id(order_id),
            BookingTrigger::PaymentRejected,
            &change,
        )
        .await?
        {
            TransitionOutcome::Applied(order) => {
                tracing::info!("Order {} failed: {}", order.id, reason);
                Ok(Some(order))
            }
            TransitionOutcome::Unchanged(order) => Ok(Some(order)),
            TransitionOutcome::Missing => Ok(None),
        }
    }

    /// Provider says the order is ticketed.
    pub async fn confirm_by_provider_id(
        &self,
        provider_order_id: &str,
        actor: ChangeActor,
    ) -> CoreResult<Option<Order>> {
        let change = StatusChange::new(actor, "provider confirmed order");
        self.advance_by_provider_id(provider_order_id, BookingTrigger::PaymentCaptured, &change)
            .await
    }

    /// Provider cancelled the order (hold lapsed or airline cancellation).
    pub async fn cancel_by_provider_id(
        &self,
        provider_order_id: &str,
        actor: ChangeActor,
    ) -> CoreResult<Option<Order>> {
        let change = StatusChange::new(actor, "provider cancelled order");
        self.advance_by_provider_id(provider_order_id, BookingTrigger::Cancelled, &change)
            .await
    }

    async fn advance_by_provider_id(
        &self,
        provider_order_id: &str,
        trigger: BookingTrigger,
        change: &StatusChange,
    ) -> CoreResult<Option<Order>> {
        match advance_order(
            self.orders.as_ref(),
            OrderRef::Provider(provider_order_id),
            trigger,
            change,
        )
        .await?
        {
            TransitionOutcome::Applied(order) => {
                tracing::info!(
                    "Order {} moved to {} ({})",
                    order.id,
                    order.status,
                    change.reason
                );
                Ok(Some(order))
            }
            TransitionOutcome::Unchanged(order) => {
                tracing::debug!(
                    "Order {} already {}; {:?} not applied",
                    order.id,
                    order.status,
                    trigger
                );
                Ok(Some(order))
            }
            TransitionOutcome::Missing => Ok(None),
        }
    }

    async fn rejected(
        &self,
        payment: Payment,
        reason: &str,
        actor: ChangeActor,
    ) -> CoreResult<PaymentOutcome> {
        let order_id = payment.order_id;
        let order = self.record_payment_failure(payment.clone(), reason, actor).await?;
        let order = order.ok_or_else(|| CoreError::Internal(format!("order {:?} vanished", order_id)))?;
        let payment = self.reload_payment(payment).await?;
        Ok(PaymentOutcome {
            order,
            payment,
            client_secret: None,
        })
    }

    async fn reload_payment(&self, payment: Payment) -> CoreResult<Payment> {
        Ok(self.payments.get_payment(payment.id).await?.unwrap_or(payment))
    }

    async fn attach_loyalty_accounts(&self, user_id: &str, passengers: &mut [Passenger]) -> CoreResult<()> {
        let Some(loyalty) = &self.loyalty else {
            return Ok(());
        };
        let Some(lead) = passengers.first_mut() else {
            return Ok(());
        };
        if lead.loyalty_programme_accounts.is_empty() {
            lead.loyalty_programme_accounts = loyalty.programme_accounts(user_id).await?;
        }
        Ok(())
    }
}

fn replay_order(existing: Order, user_id: &str, fingerprint: &RequestFingerprint) -> CoreResult<Order> {
    if !existing.is_owned_by(user_id) || existing.request_fingerprint != fingerprint.as_str() {
        return Err(key_reused());
    }
    Ok(existing)
}

fn key_reused() -> CoreError {
    CoreError::Conflict("idempotency key was already used with different parameters".to_string())
}
