use serde::Deserialize;
use std::env;
use std::time::Duration;
use wayfare_core::RetryPolicy;
use wayfare_offer::EnrichmentConfig;
use wayfare_order::webhooks::DeferralPolicy;
use wayfare_order::ReconcilePolicy;
use wayfare_shared::Masked;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub auth: AuthConfig,
    pub content_provider: ContentProviderConfig,
    pub payment_processor: PaymentProcessorConfig,
    pub webhooks: WebhookConfig,
    #[serde(default)]
    pub enrichment: EnrichmentSettings,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Empty means any origin
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: Masked<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
    /// Requests per client IP per minute
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: i64,
}

fn default_rate_limit() -> i64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: Masked<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContentProviderConfig {
    pub base_url: String,
    pub access_token: Masked<String>,
    pub api_version: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Offers closer than this to expiry are refused at order time
    #[serde(default = "default_expiry_grace_secs")]
    pub expiry_grace_secs: u64,
}

impl ContentProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn expiry_grace(&self) -> Duration {
        Duration::from_secs(self.expiry_grace_secs)
    }
}

fn default_timeout_ms() -> u64 {
    15_000
}

fn default_expiry_grace_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaymentProcessorConfig {
    pub base_url: String,
    pub secret_key: Masked<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Price used for subscription checkout
    #[serde(default)]
    pub subscription_price_id: Option<String>,
}

impl PaymentProcessorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebhookConfig {
    pub content_secret: Masked<String>,
    pub payment_secret: Masked<String>,
    #[serde(default = "default_signature_header")]
    pub signature_header: String,
    /// Accepted clock skew on the signed timestamp
    #[serde(default = "default_tolerance_secs")]
    pub tolerance_secs: i64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: i64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: i64,
    /// How long a delivery or worker may hold an event before another may take it over
    #[serde(default = "default_claim_lease_secs")]
    pub claim_lease_secs: i64,
}

impl WebhookConfig {
    pub fn deferral_policy(&self, batch_size: i64) -> DeferralPolicy {
        DeferralPolicy {
            max_attempts: self.max_attempts,
            base_delay: chrono::Duration::seconds(self.base_delay_secs),
            max_delay: chrono::Duration::seconds(self.max_delay_secs),
            batch_size,
            claim_lease: chrono::Duration::seconds(self.claim_lease_secs),
        }
    }
}

fn default_signature_header() -> String {
    "X-Signature".to_string()
}

fn default_tolerance_secs() -> i64 {
    300
}

fn default_max_attempts() -> i32 {
    8
}

fn default_base_delay_secs() -> i64 {
    5
}

fn default_max_delay_secs() -> i64 {
    900
}

fn default_claim_lease_secs() -> i64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct EnrichmentSettings {
    pub max_in_flight: usize,
    pub lookup_timeout_ms: u64,
}

impl Default for EnrichmentSettings {
    fn default() -> Self {
        Self {
            max_in_flight: 8,
            lookup_timeout_ms: 4_000,
        }
    }
}

impl From<&EnrichmentSettings> for EnrichmentConfig {
    fn from(settings: &EnrichmentSettings) -> Self {
        EnrichmentConfig {
            max_in_flight: settings.max_in_flight.max(1),
            lookup_timeout: Duration::from_millis(settings.lookup_timeout_ms),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    pub enabled: bool,
    pub webhook_interval_secs: u64,
    pub reconcile_interval_secs: u64,
    pub stale_after_secs: i64,
    pub give_up_after_secs: i64,
    pub batch_size: i64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            webhook_interval_secs: 10,
            reconcile_interval_secs: 60,
            stale_after_secs: 600,
            give_up_after_secs: 86_400,
            batch_size: 50,
        }
    }
}

impl WorkerConfig {
    pub fn reconcile_policy(&self) -> ReconcilePolicy {
        ReconcilePolicy {
            stale_after: chrono::Duration::seconds(self.stale_after_secs),
            give_up_after: chrono::Duration::seconds(self.give_up_after_secs),
            batch_size: self.batch_size,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Postgres,
    Memory,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Local overrides, never checked in
            .add_source(config::File::with_name("config/local").required(false))
            // Eg. `WAYFARE__DATABASE__URL=postgres://...`
            .add_source(config::Environment::with_prefix("WAYFARE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
