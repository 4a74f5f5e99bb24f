use crate::machine::BookingTrigger;
use crate::models::{
    LoyaltyAccount, Order, OrderChange, OrderStatus, Payment, PaymentStatus, Refund, StatusChange,
};
use crate::webhooks::events::{WebhookEvent, WebhookProvider};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;
use wayfare_core::{CoreError, CoreResult};

/// Result of an insert guarded by a unique key
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome<T> {
    Inserted(T),
    /// A row with the same key already existed; this is the stored row
    Existing(T),
}

impl<T> InsertOutcome<T> {
    pub fn into_inner(self) -> T {
        match self {
            InsertOutcome::Inserted(v) | InsertOutcome::Existing(v) => v,
        }
    }

    pub fn is_inserted(&self) -> bool {
        matches!(self, InsertOutcome::Inserted(_))
    }
}

/// Result of a compare-and-set status update
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    Applied(Order),
    /// The row exists but its status was not in the expected set
    Unchanged(Order),
    Missing,
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Insert unless a row with the same idempotency key exists.
    async fn insert_order(&self, order: &Order) -> CoreResult<InsertOutcome<Order>>;

    async fn get_order(&self, id: Uuid) -> CoreResult<Option<Order>>;

    async fn find_order_by_key(&self, idempotency_key: &str) -> CoreResult<Option<Order>>;

    async fn find_order_by_provider_id(&self, provider_order_id: &str) -> CoreResult<Option<Order>>;

    async fn list_orders_for_user(&self, user_id: &str) -> CoreResult<Vec<Order>>;

    /// Move to `to` only if the current status is one of `from`, recording the audit row in the
    /// same write.
    async fn transition_status(
        &self,
        id: Uuid,
        from: &[OrderStatus],
        to: OrderStatus,
        change: &StatusChange,
    ) -> CoreResult<TransitionOutcome>;

    async fn transition_by_provider_id(
        &self,
        provider_order_id: &str,
        from: &[OrderStatus],
        to: OrderStatus,
        change: &StatusChange,
    ) -> CoreResult<TransitionOutcome>;

    /// Orders sitting in `status` since before `older_than`, oldest first.
    async fn list_stale_orders(
        &self,
        status: OrderStatus,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> CoreResult<Vec<Order>>;

    async fn record_change(&self, change: &OrderChange) -> CoreResult<()>;

    async fn list_changes(&self, order_id: Uuid) -> CoreResult<Vec<OrderChange>>;
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn insert_payment(&self, payment: &Payment) -> CoreResult<InsertOutcome<Payment>>;

    async fn get_payment(&self, id: Uuid) -> CoreResult<Option<Payment>>;

    async fn find_payment_by_provider_id(&self, provider_payment_id: &str) -> CoreResult<Option<Payment>>;

    async fn list_payments_for_order(&self, order_id: Uuid) -> CoreResult<Vec<Payment>>;

    /// Overwrite the mutable columns (provider ids, status, raw payload).
    async fn update_payment(&self, payment: &Payment) -> CoreResult<()>;

    /// Insert or update keyed by provider payment id.
    async fn upsert_payment_by_provider_id(&self, payment: &Payment) -> CoreResult<Payment>;
}

#[async_trait]
pub trait RefundRepository: Send + Sync {
    async fn insert_refund(&self, refund: &Refund) -> CoreResult<InsertOutcome<Refund>>;

    async fn find_refund_by_key(&self, idempotency_key: &str) -> CoreResult<Option<Refund>>;

    async fn find_refund_by_provider_id(&self, provider_refund_id: &str) -> CoreResult<Option<Refund>>;

    async fn list_refunds_for_order(&self, order_id: Uuid) -> CoreResult<Vec<Refund>>;

    async fn update_refund_status(
        &self,
        id: Uuid,
        status: PaymentStatus,
        raw: Option<&serde_json::Value>,
    ) -> CoreResult<()>;
}

#[async_trait]
pub trait WebhookEventRepository: Send + Sync {
    /// Register an event under `(provider, event_id)`; `Existing` carries the stored row.
    async fn register_event(&self, event: &WebhookEvent) -> CoreResult<InsertOutcome<WebhookEvent>>;

    async fn find_event(
        &self,
        provider: WebhookProvider,
        event_id: &str,
    ) -> CoreResult<Option<WebhookEvent>>;

    /// Move an event to `processing` for the caller. Claimable are `verified` rows, `failed`
    /// rows (attempts start over) and `processing` rows claimed before `stale_before`.
    /// `None` when someone else owns the event or it is already settled.
    async fn claim_event(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> CoreResult<Option<WebhookEvent>>;

    /// Hand a claimed event back as `verified` so a redelivery can retry it.
    async fn release_event(&self, id: Uuid) -> CoreResult<()>;

    async fn mark_applied(&self, id: Uuid) -> CoreResult<()>;

    async fn mark_deferred(
        &self,
        id: Uuid,
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> CoreResult<()>;

    async fn mark_failed(&self, id: Uuid, attempts: i32, error: &str) -> CoreResult<()>;

    /// Claim deferred events whose retry time has come, plus stale claims, oldest first.
    /// Rows claimed by a concurrent caller are skipped.
    async fn claim_due_events(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> CoreResult<Vec<WebhookEvent>>;
}

#[async_trait]
pub trait LoyaltyAccountRepository: Send + Sync {
    async fn list_accounts(&self, user_id: &str) -> CoreResult<Vec<LoyaltyAccount>>;

    async fn get_account(&self, user_id: &str, id: Uuid) -> CoreResult<Option<LoyaltyAccount>>;

    /// `Conflict` when the user already has an account with this airline.
    async fn create_account(&self, account: &LoyaltyAccount) -> CoreResult<LoyaltyAccount>;

    async fn update_account_number(
        &self,
        user_id: &str,
        id: Uuid,
        account_number: &str,
    ) -> CoreResult<Option<LoyaltyAccount>>;

    async fn delete_account(&self, user_id: &str, id: Uuid) -> CoreResult<bool>;
}

/// How to find the order a transition applies to
#[derive(Debug, Clone, Copy)]
pub enum OrderRef<'a> {
    Id(Uuid),
    Provider(&'a str),
}

/// Apply `trigger` as a compare-and-set: from every status the machine allows it, to its target.
pub async fn advance_order(
    orders: &dyn OrderRepository,
    target: OrderRef<'_>,
    trigger: BookingTrigger,
    change: &StatusChange,
) -> CoreResult<TransitionOutcome> {
    let from = OrderStatus::sources_for(trigger);
    let to = OrderStatus::target_of(trigger)
        .ok_or_else(|| CoreError::Internal(format!("{:?} does not apply to persisted orders", trigger)))?;

    match target {
        OrderRef::Id(id) => orders.transition_status(id, &from, to, change).await,
        OrderRef::Provider(provider_order_id) => {
            orders
                .transition_by_provider_id(provider_order_id, &from, to, change)
                .await
        }
    }
}
