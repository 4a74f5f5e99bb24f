use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wayfare_api::{app, worker, AppState, Ports, Settings};
use wayfare_infra::{ContentGateway, ProcessorGateway};
use wayfare_order::MemoryStore;
use wayfare_store::{
    Config, DbClient, RedisClient, StorageBackend, StoreLoyaltyRepository, StoreOrderRepository,
    StorePaymentRepository, StoreRefundRepository, StoreWebhookRepository,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wayfare_api=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Wayfare API on port {}", config.server.port);

    // Upstream gateways
    let content = Arc::new(
        ContentGateway::new(
            &config.content_provider.base_url,
            config.content_provider.access_token.expose(),
            &config.content_provider.api_version,
            config.content_provider.timeout(),
        )
        .context("Failed to build content provider client")?,
    );
    let processor = Arc::new(
        ProcessorGateway::new(
            &config.payment_processor.base_url,
            config.payment_processor.secret_key.expose(),
            config.payment_processor.timeout(),
        )
        .context("Failed to build payment processor client")?,
    );

    // Persistence
    let ports = match config.storage.backend {
        StorageBackend::Postgres => {
            let db = DbClient::new(config.database.url.expose(), config.database.max_connections)
                .await
                .context("Failed to connect to Postgres")?;
            db.migrate().await.context("Failed to run migrations")?;
            Ports {
                content: content.clone(),
                directory: content,
                processor,
                orders: Arc::new(StoreOrderRepository::new(db.pool.clone())),
                payments: Arc::new(StorePaymentRepository::new(db.pool.clone())),
                refunds: Arc::new(StoreRefundRepository::new(db.pool.clone())),
                webhook_events: Arc::new(StoreWebhookRepository::new(db.pool.clone())),
                loyalty_accounts: Arc::new(StoreLoyaltyRepository::new(db.pool.clone())),
            }
        }
        StorageBackend::Memory => {
            tracing::warn!("Using the in-memory store; data is lost on restart");
            Ports::in_memory(content.clone(), content, processor, MemoryStore::new())
        }
    };

    // Redis Connection
    let redis = RedisClient::new(&config.redis.url)
        .await
        .context("Failed to create Redis client")?;

    let state = AppState::new(ports, Settings::from_config(&config), Some(Arc::new(redis)));

    if config.workers.enabled {
        tokio::spawn(worker::start_webhook_retry_worker(
            state.webhooks.clone(),
            Duration::from_secs(config.workers.webhook_interval_secs.max(1)),
        ));
        tokio::spawn(worker::start_reconcile_worker(
            state.booking.clone(),
            config.workers.reconcile_policy(),
            Duration::from_secs(config.workers.reconcile_interval_secs.max(1)),
        ));
    }

    let app = app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
