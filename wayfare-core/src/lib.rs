pub mod search;
pub mod idempotency;
pub mod retry;
pub mod content;
pub mod payment;

#[cfg(feature = "testing")]
pub mod testing;

use std::time::Duration;
use wayfare_offer::ExpiryError;
use wayfare_shared::MoneyError;

pub use idempotency::{IdempotencyKey, RequestFingerprint};
pub use retry::RetryPolicy;
pub use search::SearchCriteria;

/// Failure kinds shared by every layer between the HTTP surface and the upstream providers.
///
/// Upstream messages are kept for logs only; the API maps each kind to a stable client message.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Offer expired: {0}")]
    Expired(String),

    /// Our credentials were refused by an upstream. A configuration problem, not a client one.
    #[error("Upstream authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limited by upstream")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Upstream unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Signature verification failed: {0}")]
    SignatureInvalid(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Persistence failure: {0}")]
    Persistence(String),

    #[error("Internal service error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether repeating the call with the same idempotency key may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::ProviderUnavailable(_) | CoreError::RateLimited { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "validation",
            CoreError::NotFound(_) => "not_found",
            CoreError::Expired(_) => "expired",
            CoreError::Authentication(_) => "authentication",
            CoreError::RateLimited { .. } => "rate_limited",
            CoreError::ProviderUnavailable(_) => "provider_unavailable",
            CoreError::SignatureInvalid(_) => "signature_invalid",
            CoreError::Conflict(_) => "conflict",
            CoreError::Persistence(_) => "persistence",
            CoreError::Internal(_) => "internal",
        }
    }
}

impl From<ExpiryError> for CoreError {
    fn from(e: ExpiryError) -> Self {
        match e {
            ExpiryError::Expired(id) | ExpiryError::ExpiringTooSoon(id) => CoreError::Expired(id),
        }
    }
}

impl From<MoneyError> for CoreError {
    fn from(e: MoneyError) -> Self {
        CoreError::Validation(e.to_string())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
