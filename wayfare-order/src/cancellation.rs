use crate::machine::BookingTrigger;
use crate::models::{ChangeActor, Order, OrderStatus, PaymentStatus, Refund, StatusChange};
use crate::repository::{
    advance_order, InsertOutcome, OrderRef, OrderRepository, RefundRepository, TransitionOutcome,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;
use wayfare_core::content::{ContentProvider, SettlementState};
use wayfare_core::{CoreError, CoreResult, IdempotencyKey, RequestFingerprint, RetryPolicy};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelOrder {
    #[serde(default)]
    pub request_refund: bool,
}

#[derive(Debug, Clone)]
pub struct CancellationOutcome {
    pub order: Order,
    pub refund: Option<Refund>,
}

/// Cancels confirmed orders at the provider, with or without money back.
pub struct CancellationService {
    content: Arc<dyn ContentProvider>,
    orders: Arc<dyn OrderRepository>,
    refunds: Arc<dyn RefundRepository>,
    retry: RetryPolicy,
}

impl CancellationService {
    pub fn new(
        content: Arc<dyn ContentProvider>,
        orders: Arc<dyn OrderRepository>,
        refunds: Arc<dyn RefundRepository>,
    ) -> Self {
        Self {
            content,
            orders,
            refunds,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn cancel_order(
        &self,
        user_id: &str,
        order_id: Uuid,
        request: CancelOrder,
        key: &IdempotencyKey,
    ) -> CoreResult<CancellationOutcome> {
        let order = match self.orders.get_order(order_id).await? {
            Some(order) if order.is_owned_by(user_id) => order,
            _ => return Err(CoreError::NotFound(format!("order {}", order_id))),
        };
        let fingerprint = RequestFingerprint::of(&json!({
            "order_id": order.id,
            "request_refund": request.request_refund,
        }))?;

        // 1. Replay of an earlier refund under this key
        if let Some(refund) = self.refunds.find_refund_by_key(key.as_str()).await? {
            if refund.order_id != order.id || refund.request_fingerprint != fingerprint.as_str() {
                return Err(CoreError::Conflict(
                    "idempotency key was already used with different parameters".to_string(),
                ));
            }
            return Ok(CancellationOutcome {
                order,
                refund: Some(refund),
            });
        }
        if !request.request_refund && order.status == OrderStatus::Cancelled {
            return Ok(CancellationOutcome { order, refund: None });
        }

        // 2. Only ticketed orders can be cancelled here; an unpaid hold just lapses
        let allowed = match order.status {
            OrderStatus::Confirmed => true,
            OrderStatus::RefundRequested => request.request_refund,
            _ => false,
        };
        if !allowed {
            return Err(CoreError::Conflict(format!(
                "order {} is {} and cannot be cancelled",
                order.id, order.status
            )));
        }

        // 3. Provider
        let provider_refund = self
            .retry
            .retry("create_refund", || {
                self.content
                    .create_refund(&order.provider_order_id, request.request_refund, key)
            })
            .await?;

        if !request.request_refund {
            let change = StatusChange::new(ChangeActor::Customer, "cancelled by customer");
            let order = self.settle_transition(&order, BookingTrigger::Cancelled, &change).await?;
            return Ok(CancellationOutcome { order, refund: None });
        }

        // 4. Refund row, then the order
        let now = Utc::now();
        let status = match provider_refund.state {
            SettlementState::Pending => PaymentStatus::Pending,
            SettlementState::Succeeded => PaymentStatus::Succeeded,
            SettlementState::Failed => PaymentStatus::Failed,
        };
        let candidate = Refund {
            id: Uuid::new_v4(),
            order_id: order.id,
            provider_refund_id: provider_refund.id.clone(),
            amount: provider_refund.amount.clone().unwrap_or_else(|| order.total.clone()),
            status,
            idempotency_key: key.to_string(),
            request_fingerprint: fingerprint.as_str().to_string(),
            raw: provider_refund.raw.clone(),
            created_at: now,
            updated_at: now,
        };
        let refund = match self.refunds.insert_refund(&candidate).await? {
            InsertOutcome::Inserted(r) | InsertOutcome::Existing(r) => r,
        };

        let order = match refund.status {
            PaymentStatus::Succeeded => {
                let change = StatusChange::new(ChangeActor::Customer, "refund completed");
                self.settle_transition(&order, BookingTrigger::RefundCompleted, &change).await?
            }
            PaymentStatus::Pending if order.status == OrderStatus::Confirmed => {
                let change = StatusChange::new(ChangeActor::Customer, "refund requested");
                self.settle_transition(&order, BookingTrigger::RefundRequested, &change).await?
            }
            PaymentStatus::Pending => order,
            PaymentStatus::Failed => {
                tracing::warn!("Provider refused refund {} for order {}", refund.provider_refund_id, order.id);
                order
            }
        };

        tracing::info!(
            "Refund {} ({}) recorded for order {}, now {}",
            refund.id,
            refund.status.as_str(),
            order.id,
            order.status
        );
        Ok(CancellationOutcome {
            order,
            refund: Some(refund),
        })
    }

    /// Provider reports the money is back. `None` when no local order matches yet.
    pub async fn complete_refund(
        &self,
        provider_order_id: &str,
        provider_refund_id: Option<&str>,
        actor: ChangeActor,
    ) -> CoreResult<Option<Order>> {
        let Some(order) = self.orders.find_order_by_provider_id(provider_order_id).await? else {
            return Ok(None);
        };

        let known: Vec<Refund> = match provider_refund_id {
            Some(id) => self.refunds.find_refund_by_provider_id(id).await?.into_iter().collect(),
            None => self.refunds.list_refunds_for_order(order.id).await?,
        };
        for refund in known.iter().filter(|r| r.status == PaymentStatus::Pending) {
            self.refunds
                .update_refund_status(refund.id, PaymentStatus::Succeeded, None)
                .await?;
        }

        let change = StatusChange::new(actor, "refund completed");
        match advance_order(
            self.orders.as_ref(),
            OrderRef::Id(order.id),
            BookingTrigger::RefundCompleted,
            &change,
        )
        .await?
        {
            TransitionOutcome::Applied(order) => {
                tracing::info!("Order {} refunded", order.id);
                Ok(Some(order))
            }
            TransitionOutcome::Unchanged(order) => Ok(Some(order)),
            TransitionOutcome::Missing => Ok(None),
        }
    }

    async fn settle_transition(
        &self,
        order: &Order,
        trigger: BookingTrigger,
        change: &StatusChange,
    ) -> CoreResult<Order> {
        match advance_order(self.orders.as_ref(), OrderRef::Id(order.id), trigger, change).await? {
            TransitionOutcome::Applied(o) | TransitionOutcome::Unchanged(o) => Ok(o),
            TransitionOutcome::Missing => Err(CoreError::NotFound(format!("order {}", order.id))),
        }
    }
}
