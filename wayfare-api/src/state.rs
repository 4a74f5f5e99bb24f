use crate::middleware::resiliency::Resiliency;
use std::sync::Arc;
use std::time::Duration;
use wayfare_core::content::ContentProvider;
use wayfare_core::payment::PaymentProcessor;
use wayfare_core::RetryPolicy;
use wayfare_offer::{CarrierDirectory, EnrichmentConfig, EnrichmentPipeline, ExpiryGuard};
use wayfare_order::webhooks::{DeferralPolicy, SignatureVerifier, WebhookProcessor};
use wayfare_order::{
    BookingService, CancellationService, LoyaltyAccountRepository, LoyaltyService, MemoryStore,
    OrderRepository, PaymentRepository, RefundRepository, WebhookEventRepository,
};
use wayfare_shared::Masked;
use wayfare_store::{Config, RedisClient};

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: Masked<String>,
}

/// Upstream clients and repositories the services are built from.
pub struct Ports {
    pub content: Arc<dyn ContentProvider>,
    pub directory: Arc<dyn CarrierDirectory>,
    pub processor: Arc<dyn PaymentProcessor>,
    pub orders: Arc<dyn OrderRepository>,
    pub payments: Arc<dyn PaymentRepository>,
    pub refunds: Arc<dyn RefundRepository>,
    pub webhook_events: Arc<dyn WebhookEventRepository>,
    pub loyalty_accounts: Arc<dyn LoyaltyAccountRepository>,
}

impl Ports {
    /// Every repository backed by one in-process store
    pub fn in_memory(
        content: Arc<dyn ContentProvider>,
        directory: Arc<dyn CarrierDirectory>,
        processor: Arc<dyn PaymentProcessor>,
        store: MemoryStore,
    ) -> Self {
        Self {
            content,
            directory,
            processor,
            orders: Arc::new(store.clone()),
            payments: Arc::new(store.clone()),
            refunds: Arc::new(store.clone()),
            webhook_events: Arc::new(store.clone()),
            loyalty_accounts: Arc::new(store),
        }
    }
}

/// Tunables for the HTTP layer and the services behind it
#[derive(Clone)]
pub struct Settings {
    pub jwt_secret: Masked<String>,
    pub content_webhook_secret: Masked<String>,
    pub payment_webhook_secret: Masked<String>,
    pub signature_header: String,
    pub signature_tolerance_secs: i64,
    pub deferral: DeferralPolicy,
    pub enrichment: EnrichmentConfig,
    pub retry: RetryPolicy,
    pub expiry_grace: Duration,
    pub rate_limit_per_minute: i64,
    pub cors_origins: Vec<String>,
    pub subscription_price_id: Option<String>,
}

impl Settings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            jwt_secret: config.auth.jwt_secret.clone(),
            content_webhook_secret: config.webhooks.content_secret.clone(),
            payment_webhook_secret: config.webhooks.payment_secret.clone(),
            signature_header: config.webhooks.signature_header.clone(),
            signature_tolerance_secs: config.webhooks.tolerance_secs,
            deferral: config.webhooks.deferral_policy(config.workers.batch_size),
            enrichment: EnrichmentConfig::from(&config.enrichment),
            retry: config.retry.clone(),
            expiry_grace: config.content_provider.expiry_grace(),
            rate_limit_per_minute: config.redis.rate_limit_per_minute,
            cors_origins: config.server.cors_origins.clone(),
            subscription_price_id: config.payment_processor.subscription_price_id.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub content: Arc<dyn ContentProvider>,
    pub processor: Arc<dyn PaymentProcessor>,
    pub enrichment: Arc<EnrichmentPipeline>,
    pub expiry: ExpiryGuard,
    pub retry: RetryPolicy,
    pub booking: Arc<BookingService>,
    pub cancellation: Arc<CancellationService>,
    pub loyalty: Arc<LoyaltyService>,
    pub webhooks: Arc<WebhookProcessor>,
    /// `None` disables rate limiting
    pub redis: Option<Arc<RedisClient>>,
    pub rate_limit_per_minute: i64,
    pub auth: AuthConfig,
    pub signature_header: String,
    pub cors_origins: Vec<String>,
    pub subscription_price_id: Option<String>,
    pub resiliency: Arc<Resiliency>,
}

impl AppState {
    pub fn new(ports: Ports, settings: Settings, redis: Option<Arc<RedisClient>>) -> Self {
        let expiry = ExpiryGuard::new(
            chrono::Duration::from_std(settings.expiry_grace).expect("expiry grace out of range"),
        );
        let loyalty = Arc::new(LoyaltyService::new(ports.loyalty_accounts));

        let booking = Arc::new(
            BookingService::new(
                ports.content.clone(),
                ports.processor.clone(),
                ports.orders.clone(),
                ports.payments,
            )
            .with_loyalty(loyalty.clone())
            .with_expiry_guard(expiry.clone())
            .with_retry_policy(settings.retry.clone()),
        );

        let cancellation = Arc::new(
            CancellationService::new(ports.content.clone(), ports.orders, ports.refunds)
                .with_retry_policy(settings.retry.clone()),
        );

        let webhooks = Arc::new(
            WebhookProcessor::new(
                SignatureVerifier::new(
                    settings.content_webhook_secret.expose(),
                    settings.signature_tolerance_secs,
                ),
                SignatureVerifier::new(
                    settings.payment_webhook_secret.expose(),
                    settings.signature_tolerance_secs,
                ),
                ports.webhook_events,
                booking.clone(),
                cancellation.clone(),
            )
            .with_deferral_policy(settings.deferral),
        );

        Self {
            content: ports.content,
            processor: ports.processor,
            enrichment: Arc::new(EnrichmentPipeline::new(ports.directory, settings.enrichment)),
            expiry,
            retry: settings.retry,
            booking,
            cancellation,
            loyalty,
            webhooks,
            redis,
            rate_limit_per_minute: settings.rate_limit_per_minute,
            auth: AuthConfig {
                secret: settings.jwt_secret,
            },
            signature_header: settings.signature_header,
            cors_origins: settings.cors_origins,
            subscription_price_id: settings.subscription_price_id,
            resiliency: Arc::new(Resiliency::default()),
        }
    }
}
