use crate::models::{
    LoyaltyAccount, Order, OrderChange, OrderStatus, Payment, PaymentStatus, Refund, StatusChange,
};
use crate::repository::{
    InsertOutcome, LoyaltyAccountRepository, OrderRepository, PaymentRepository, RefundRepository,
    TransitionOutcome, WebhookEventRepository,
};
use crate::webhooks::events::{WebhookEvent, WebhookProvider, WebhookStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;
use wayfare_core::{CoreError, CoreResult};

/// In-memory store implementing every repository port.
///
/// Enforces the same unique keys as the PostgreSQL schema. Used for tests and for
/// `storage.backend = "memory"`; state is lost on restart.
#[derive(Clone, Default)]
pub struct MemoryStore {
    orders: Arc<RwLock<HashMap<Uuid, Order>>>,
    changes: Arc<RwLock<Vec<OrderChange>>>,
    payments: Arc<RwLock<HashMap<Uuid, Payment>>>,
    refunds: Arc<RwLock<HashMap<Uuid, Refund>>>,
    events: Arc<RwLock<HashMap<Uuid, WebhookEvent>>>,
    loyalty: Arc<RwLock<HashMap<Uuid, LoyaltyAccount>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn order_count(&self) -> usize {
        self.orders.read().await.len()
    }

    pub async fn event_count(&self) -> usize {
        self.events.read().await.len()
    }

    async fn transition_where<F>(
        &self,
        matches: F,
        from: &[OrderStatus],
        to: OrderStatus,
        change: &StatusChange,
    ) -> CoreResult<TransitionOutcome>
    where
        F: Fn(&Order) -> bool + Send,
    {
        let mut orders = self.orders.write().await;
        let Some(order) = orders.values_mut().find(|o| matches(o)) else {
            return Ok(TransitionOutcome::Missing);
        };
        if !from.contains(&order.status) {
            return Ok(TransitionOutcome::Unchanged(order.clone()));
        }

        let previous = order.status;
        order.status = to;
        order.updated_at = Utc::now();
        let updated = order.clone();
        drop(orders);

        self.changes
            .write()
            .await
            .push(OrderChange::transition(updated.id, previous, to, change));
        Ok(TransitionOutcome::Applied(updated))
    }
}

#[async_trait]
impl OrderRepository for MemoryStore {
    async fn insert_order(&self, order: &Order) -> CoreResult<InsertOutcome<Order>> {
        let mut orders = self.orders.write().await;
        if let Some(existing) = orders.values().find(|o| o.idempotency_key == order.idempotency_key) {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }
        if orders.values().any(|o| o.provider_order_id == order.provider_order_id) {
            return Err(CoreError::Conflict(format!(
                "provider order {} already recorded",
                order.provider_order_id
            )));
        }
        orders.insert(order.id, order.clone());
        Ok(InsertOutcome::Inserted(order.clone()))
    }

    async fn get_order(&self, id: Uuid) -> CoreResult<Option<Order>> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn find_order_by_key(&self, idempotency_key: &str) -> CoreResult<Option<Order>> {
        Ok(self
            .orders
            .read()
            .await
            .values()
            .find(|o| o.idempotency_key == idempotency_key)
            .cloned())
    }

    async fn find_order_by_provider_id(&self, provider_order_id: &str) -> CoreResult<Option<Order>> {
        Ok(self
            .orders
            .read()
            .await
            .values()
            .find(|o| o.provider_order_id == provider_order_id)
            .cloned())
    }

    async fn list_orders_for_user(&self, user_id: &str) -> CoreResult<Vec<Order>> {
        let mut orders: Vec<Order> = self
            .orders
            .read()
            .await
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: &[OrderStatus],
        to: OrderStatus,
        change: &StatusChange,
    ) -> CoreResult<TransitionOutcome> {
        self.transition_where(|o| o.id == id, from, to, change).await
    }

    async fn transition_by_provider_id(
        &self,
        provider_order_id: &str,
        from: &[OrderStatus],
        to: OrderStatus,
        change: &StatusChange,
    ) -> CoreResult<TransitionOutcome> {
        let provider_order_id = provider_order_id.to_string();
        self.transition_where(move |o| o.provider_order_id == provider_order_id, from, to, change)
            .await
    }

    async fn list_stale_orders(
        &self,
        status: OrderStatus,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> CoreResult<Vec<Order>> {
        let mut orders: Vec<Order> = self
            .orders
            .read()
            .await
            .values()
            .filter(|o| o.status == status && o.updated_at < older_than)
            .cloned()
            .collect();
        orders.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        orders.truncate(limit.max(0) as usize);
        Ok(orders)
    }

    async fn record_change(&self, change: &OrderChange) -> CoreResult<()> {
        self.changes.write().await.push(change.clone());
        Ok(())
    }

    async fn list_changes(&self, order_id: Uuid) -> CoreResult<Vec<OrderChange>> {
        Ok(self
            .changes
            .read()
            .await
            .iter()
            .filter(|c| c.order_id == order_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PaymentRepository for MemoryStore {
    async fn insert_payment(&self, payment: &Payment) -> CoreResult<InsertOutcome<Payment>> {
        let mut payments = self.payments.write().await;
        if let Some(existing) = payments
            .values()
            .find(|p| p.idempotency_key == payment.idempotency_key)
        {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }
        payments.insert(payment.id, payment.clone());
        Ok(InsertOutcome::Inserted(payment.clone()))
    }

    async fn get_payment(&self, id: Uuid) -> CoreResult<Option<Payment>> {
        Ok(self.payments.read().await.get(&id).cloned())
    }

    async fn find_payment_by_provider_id(&self, provider_payment_id: &str) -> CoreResult<Option<Payment>> {
        Ok(self
            .payments
            .read()
            .await
            .values()
            .find(|p| p.provider_payment_id.as_deref() == Some(provider_payment_id))
            .cloned())
    }

    async fn list_payments_for_order(&self, order_id: Uuid) -> CoreResult<Vec<Payment>> {
        let mut payments: Vec<Payment> = self
            .payments
            .read()
            .await
            .values()
            .filter(|p| p.order_id == Some(order_id))
            .cloned()
            .collect();
        payments.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(payments)
    }

    async fn update_payment(&self, payment: &Payment) -> CoreResult<()> {
        let mut payments = self.payments.write().await;
        let stored = payments
            .get_mut(&payment.id)
            .ok_or_else(|| CoreError::NotFound(format!("payment {}", payment.id)))?;
        stored.provider_payment_id = payment.provider_payment_id.clone();
        stored.provider_settlement_id = payment.provider_settlement_id.clone();
        stored.customer_id = payment.customer_id.clone();
        stored.status = payment.status;
        stored.raw = payment.raw.clone();
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn upsert_payment_by_provider_id(&self, payment: &Payment) -> CoreResult<Payment> {
        let mut payments = self.payments.write().await;
        if let Some(stored) = payments
            .values_mut()
            .find(|p| p.provider_payment_id.is_some() && p.provider_payment_id == payment.provider_payment_id)
        {
            stored.status = payment.status;
            stored.raw = payment.raw.clone();
            stored.updated_at = Utc::now();
            return Ok(stored.clone());
        }
        payments.insert(payment.id, payment.clone());
        Ok(payment.clone())
    }
}

#[async_trait]
impl RefundRepository for MemoryStore {
    async fn insert_refund(&self, refund: &Refund) -> CoreResult<InsertOutcome<Refund>> {
        let mut refunds = self.refunds.write().await;
        if let Some(existing) = refunds
            .values()
            .find(|r| r.idempotency_key == refund.idempotency_key)
        {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }
        if refunds
            .values()
            .any(|r| r.provider_refund_id == refund.provider_refund_id)
        {
            return Err(CoreError::Conflict(format!(
                "provider refund {} already recorded",
                refund.provider_refund_id
            )));
        }
        refunds.insert(refund.id, refund.clone());
        Ok(InsertOutcome::Inserted(refund.clone()))
    }

    async fn find_refund_by_key(&self, idempotency_key: &str) -> CoreResult<Option<Refund>> {
        Ok(self
            .refunds
            .read()
            .await
            .values()
            .find(|r| r.idempotency_key == idempotency_key)
            .cloned())
    }

    async fn find_refund_by_provider_id(&self, provider_refund_id: &str) -> CoreResult<Option<Refund>> {
        Ok(self
            .refunds
            .read()
            .await
            .values()
            .find(|r| r.provider_refund_id == provider_refund_id)
            .cloned())
    }

    async fn list_refunds_for_order(&self, order_id: Uuid) -> CoreResult<Vec<Refund>> {
        Ok(self
            .refunds
            .read()
            .await
            .values()
            .filter(|r| r.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn update_refund_status(
        &self,
        id: Uuid,
        status: PaymentStatus,
        raw: Option<&serde_json::Value>,
    ) -> CoreResult<()> {
        let mut refunds = self.refunds.write().await;
        let stored = refunds
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("refund {}", id)))?;
        stored.status = status;
        if let Some(raw) = raw {
            stored.raw = raw.clone();
        }
        stored.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl WebhookEventRepository for MemoryStore {
    async fn register_event(&self, event: &WebhookEvent) -> CoreResult<InsertOutcome<WebhookEvent>> {
        let mut events = self.events.write().await;
        if let Some(existing) = events
            .values()
            .find(|e| e.provider == event.provider && e.event_id == event.event_id)
        {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }
        events.insert(event.id, event.clone());
        Ok(InsertOutcome::Inserted(event.clone()))
    }

    async fn find_event(
        &self,
        provider: WebhookProvider,
        event_id: &str,
    ) -> CoreResult<Option<WebhookEvent>> {
        Ok(self
            .events
            .read()
            .await
            .values()
            .find(|e| e.provider == provider && e.event_id == event_id)
            .cloned())
    }

    async fn claim_event(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> CoreResult<Option<WebhookEvent>> {
        let mut events = self.events.write().await;
        let event = events
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("webhook event {}", id)))?;
        match event.status {
            WebhookStatus::Verified => {}
            WebhookStatus::Failed => event.attempts = 0,
            WebhookStatus::Processing if event.claimed_at.map_or(true, |at| at < stale_before) => {}
            _ => return Ok(None),
        }
        event.status = WebhookStatus::Processing;
        event.next_attempt_at = None;
        event.claimed_at = Some(now);
        Ok(Some(event.clone()))
    }

    async fn release_event(&self, id: Uuid) -> CoreResult<()> {
        let mut events = self.events.write().await;
        let event = events
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("webhook event {}", id)))?;
        if event.status == WebhookStatus::Processing {
            event.status = WebhookStatus::Verified;
            event.claimed_at = None;
        }
        Ok(())
    }

    async fn mark_applied(&self, id: Uuid) -> CoreResult<()> {
        let mut events = self.events.write().await;
        let event = events
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("webhook event {}", id)))?;
        event.status = WebhookStatus::Applied;
        event.next_attempt_at = None;
        event.processed_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_deferred(
        &self,
        id: Uuid,
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> CoreResult<()> {
        let mut events = self.events.write().await;
        let event = events
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("webhook event {}", id)))?;
        event.status = WebhookStatus::Deferred;
        event.attempts = attempts;
        event.next_attempt_at = Some(next_attempt_at);
        event.last_error = Some(error.to_string());
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, attempts: i32, error: &str) -> CoreResult<()> {
        let mut events = self.events.write().await;
        let event = events
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("webhook event {}", id)))?;
        event.status = WebhookStatus::Failed;
        event.attempts = attempts;
        event.next_attempt_at = None;
        event.last_error = Some(error.to_string());
        event.processed_at = Some(Utc::now());
        Ok(())
    }

    async fn claim_due_events(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> CoreResult<Vec<WebhookEvent>> {
        let mut events = self.events.write().await;
        let mut due: Vec<&mut WebhookEvent> = events
            .values_mut()
            .filter(|e| match e.status {
                WebhookStatus::Deferred => e.next_attempt_at.map_or(true, |at| at <= now),
                WebhookStatus::Processing => e.claimed_at.map_or(true, |at| at < stale_before),
                _ => false,
            })
            .collect();
        due.sort_by(|a, b| a.next_attempt_at.cmp(&b.next_attempt_at));
        due.truncate(limit.max(0) as usize);

        Ok(due
            .into_iter()
            .map(|event| {
                event.status = WebhookStatus::Processing;
                event.claimed_at = Some(now);
                event.clone()
            })
            .collect())
    }
}

#[async_trait]
impl LoyaltyAccountRepository for MemoryStore {
    async fn list_accounts(&self, user_id: &str) -> CoreResult<Vec<LoyaltyAccount>> {
        let mut accounts: Vec<LoyaltyAccount> = self
            .loyalty
            .read()
            .await
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        accounts.sort_by(|a, b| a.airline_iata_code.cmp(&b.airline_iata_code));
        Ok(accounts)
    }

    async fn get_account(&self, user_id: &str, id: Uuid) -> CoreResult<Option<LoyaltyAccount>> {
        Ok(self
            .loyalty
            .read()
            .await
            .get(&id)
            .filter(|a| a.user_id == user_id)
            .cloned())
    }

    async fn create_account(&self, account: &LoyaltyAccount) -> CoreResult<LoyaltyAccount> {
        let mut accounts = self.loyalty.write().await;
        if accounts
            .values()
            .any(|a| a.user_id == account.user_id && a.airline_iata_code == account.airline_iata_code)
        {
            return Err(CoreError::Conflict(format!(
                "loyalty account for {} already exists",
                account.airline_iata_code
            )));
        }
        accounts.insert(account.id, account.clone());
        Ok(account.clone())
    }

    async fn update_account_number(
        &self,
        user_id: &str,
        id: Uuid,
        account_number: &str,
    ) -> CoreResult<Option<LoyaltyAccount>> {
        let mut accounts = self.loyalty.write().await;
        let Some(account) = accounts.get_mut(&id).filter(|a| a.user_id == user_id) else {
            return Ok(None);
        };
        account.account_number = account_number.to_string().into();
        account.updated_at = Utc::now();
        Ok(Some(account.clone()))
    }

    async fn delete_account(&self, user_id: &str, id: Uuid) -> CoreResult<bool> {
        let mut accounts = self.loyalty.write().await;
        if accounts.get(&id).is_some_and(|a| a.user_id == user_id) {
            accounts.remove(&id);
            return Ok(true);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChangeActor;
    use serde_json::json;
    use wayfare_shared::{Currency, Money};

    fn order(key: &str, provider_id: &str) -> Order {
        let now = Utc::now();
        Order {
            id: Uuid::new_v4(),
            provider_order_id: provider_id.to_string(),
            booking_reference: None,
            status: OrderStatus::Pending,
            total: Money::new(10_000, Currency::parse("EUR").unwrap()),
            user_id: "user_1".to_string(),
            offer_ids: vec!["off_1".to_string()],
            passengers: vec![],
            idempotency_key: key.to_string(),
            request_fingerprint: "fp".to_string(),
            raw: json!({}),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_insert_is_unique_per_key() {
        let store = MemoryStore::new();
        let first = store.insert_order(&order("k1", "ord_1")).await.unwrap();
        let second = store.insert_order(&order("k1", "ord_1")).await.unwrap();

        assert!(first.is_inserted());
        assert!(!second.is_inserted());
        assert_eq!(first.into_inner().id, second.into_inner().id);
        assert_eq!(store.order_count().await, 1);
    }

    #[tokio::test]
    async fn test_compare_and_set_transition() {
        let store = MemoryStore::new();
        let o = store.insert_order(&order("k1", "ord_1")).await.unwrap().into_inner();
        let change = StatusChange::new(ChangeActor::Webhook, "payment captured");

        let first = store
            .transition_by_provider_id("ord_1", &[OrderStatus::Pending], OrderStatus::Confirmed, &change)
            .await
            .unwrap();
        let second = store
            .transition_by_provider_id("ord_1", &[OrderStatus::Pending], OrderStatus::Confirmed, &change)
            .await
            .unwrap();

        assert!(matches!(first, TransitionOutcome::Applied(_)));
        assert!(matches!(second, TransitionOutcome::Unchanged(ref o) if o.status == OrderStatus::Confirmed));
        assert_eq!(store.list_changes(o.id).await.unwrap().len(), 1);

        let missing = store
            .transition_by_provider_id("ord_x", &[OrderStatus::Pending], OrderStatus::Confirmed, &change)
            .await
            .unwrap();
        assert_eq!(missing, TransitionOutcome::Missing);
    }

    #[tokio::test]
    async fn test_loyalty_account_unique_per_airline() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let account = LoyaltyAccount {
            id: Uuid::new_v4(),
            user_id: "user_1".to_string(),
            airline_iata_code: "IB".to_string(),
            account_number: "12345678".to_string().into(),
            created_at: now,
            updated_at: now,
        };
        store.create_account(&account).await.unwrap();
        let dup = LoyaltyAccount {
            id: Uuid::new_v4(),
            ..account.clone()
        };
        assert!(matches!(store.create_account(&dup).await, Err(CoreError::Conflict(_))));

        // Other users cannot see or delete it
        assert!(store.get_account("user_2", account.id).await.unwrap().is_none());
        assert!(!store.delete_account("user_2", account.id).await.unwrap());
        assert!(store.delete_account("user_1", account.id).await.unwrap());
    }
}
