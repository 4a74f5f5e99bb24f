use crate::booking::BookingService;
use crate::models::{ChangeActor, Order, OrderStatus, PaymentStatus};
use chrono::{DateTime, Duration, Utc};
use wayfare_core::content::ProviderOrderState;
use wayfare_core::payment::PaymentIntentStatus;
use wayfare_core::CoreResult;

/// Which pending orders the reconciler looks at
#[derive(Debug, Clone)]
pub struct ReconcilePolicy {
    /// Untouched for at least this long
    pub stale_after: Duration,
    /// Older than this and the order is left for manual follow-up
    pub give_up_after: Duration,
    pub batch_size: i64,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            stale_after: Duration::minutes(10),
            give_up_after: Duration::hours(24),
            batch_size: 100,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub examined: usize,
    pub confirmed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub errors: usize,
}

enum Resolution {
    Confirmed,
    Failed,
    Cancelled,
    Unchanged,
}

impl BookingService {
    /// Settle pending orders whose webhook never arrived by asking the upstreams directly.
    pub async fn reconcile_pending(
        &self,
        now: DateTime<Utc>,
        policy: &ReconcilePolicy,
    ) -> CoreResult<ReconcileReport> {
        let stale = self
            .orders
            .list_stale_orders(OrderStatus::Pending, now - policy.stale_after, policy.batch_size)
            .await?;
        let mut report = ReconcileReport::default();

        for order in stale {
            if now - order.created_at > policy.give_up_after {
                tracing::debug!("Order {} pending since {}; left for manual follow-up", order.id, order.created_at);
                continue;
            }
            report.examined += 1;
            match self.reconcile_order(&order).await {
                Ok(Resolution::Confirmed) => report.confirmed += 1,
                Ok(Resolution::Failed) => report.failed += 1,
                Ok(Resolution::Cancelled) => report.cancelled += 1,
                Ok(Resolution::Unchanged) => {}
                Err(e) => {
                    tracing::warn!("Could not reconcile order {}: {}", order.id, e);
                    report.errors += 1;
                }
            }
        }

        if report.examined > 0 {
            tracing::info!(
                "Reconciled {} pending orders: {} confirmed, {} failed, {} cancelled, {} errors",
                report.examined,
                report.confirmed,
                report.failed,
                report.cancelled,
                report.errors
            );
        }
        Ok(report)
    }

    async fn reconcile_order(&self, order: &Order) -> CoreResult<Resolution> {
        let in_flight = self
            .payments
            .list_payments_for_order(order.id)
            .await?
            .into_iter()
            .find(|p| p.status == PaymentStatus::Pending && p.provider_payment_id.is_some());

        // 1. A charge is in flight: the processor knows how it ended
        if let Some(payment) = in_flight {
            let intent_id = payment.provider_payment_id.clone().unwrap_or_default();
            let intent = self
                .retry
                .retry("retrieve_payment_intent", || {
                    self.processor.retrieve_payment_intent(&intent_id)
                })
                .await?;
            return Ok(match intent.status {
                PaymentIntentStatus::Succeeded => {
                    self.settle_captured_payment(payment, ChangeActor::Reconciler).await?;
                    Resolution::Confirmed
                }
                PaymentIntentStatus::Canceled => {
                    self.record_payment_failure(payment, "payment intent canceled", ChangeActor::Reconciler)
                        .await?;
                    Resolution::Failed
                }
                _ => Resolution::Unchanged,
            });
        }

        // 2. Otherwise the content provider's view of the order
        let provider_order = self
            .retry
            .retry("get_order", || self.content.get_order(&order.provider_order_id))
            .await?;
        Ok(match provider_order.state {
            ProviderOrderState::Confirmed => {
                self.confirm_by_provider_id(&order.provider_order_id, ChangeActor::Reconciler)
                    .await?;
                Resolution::Confirmed
            }
            ProviderOrderState::Cancelled => {
                self.cancel_by_provider_id(&order.provider_order_id, ChangeActor::Reconciler)
                    .await?;
                Resolution::Cancelled
            }
            ProviderOrderState::AwaitingPayment => Resolution::Unchanged,
        })
    }
}
