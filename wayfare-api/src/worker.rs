use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info};
use wayfare_order::webhooks::WebhookProcessor;
use wayfare_order::{BookingService, ReconcilePolicy};

/// Re-applies webhooks that arrived before the records they refer to.
pub async fn start_webhook_retry_worker(webhooks: Arc<WebhookProcessor>, every: Duration) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("Webhook retry worker started, polling every {:?}", every);

    loop {
        ticker.tick().await;
        if let Err(e) = webhooks.process_deferred(chrono::Utc::now()).await {
            error!("Deferred webhook pass failed: {}", e);
        }
    }
}

/// Polls the upstreams for pending orders whose webhook never came.
pub async fn start_reconcile_worker(
    booking: Arc<BookingService>,
    policy: ReconcilePolicy,
    every: Duration,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("Reconciliation worker started, polling every {:?}", every);

    loop {
        ticker.tick().await;
        if let Err(e) = booking.reconcile_pending(chrono::Utc::now(), &policy).await {
            error!("Reconciliation pass failed: {}", e);
        }
    }
}
