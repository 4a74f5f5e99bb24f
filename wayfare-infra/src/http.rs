use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use wayfare_core::{CoreError, CoreResult};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Client shared by every call to one upstream. `timeout` bounds each whole request.
pub fn build_client(timeout: Duration) -> CoreResult<Client> {
    Client::builder()
        .use_rustls_tls()
        .connect_timeout(CONNECT_TIMEOUT.min(timeout))
        .timeout(timeout)
        .build()
        .map_err(|e| CoreError::Internal(format!("http client: {}", e)))
}

/// Transport failure before any status was received
pub fn transport_error(upstream: &str, e: reqwest::Error) -> CoreError {
    if e.is_timeout() {
        tracing::warn!("{} timed out: {}", upstream, e);
        CoreError::ProviderUnavailable(format!("{} timed out", upstream))
    } else {
        tracing::warn!("{} unreachable: {}", upstream, e);
        CoreError::ProviderUnavailable(format!("{} unreachable", upstream))
    }
}

/// Map a failed response onto the shared error kinds.
///
/// `codes` are the machine-readable error codes from the body, used where the status alone
/// is ambiguous.
pub fn status_error(
    upstream: &str,
    status: StatusCode,
    headers: &HeaderMap,
    codes: &[String],
    message: &str,
) -> CoreError {
    let has = |code: &str| codes.iter().any(|c| c == code);

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            tracing::error!("{} refused our credentials ({})", upstream, status);
            CoreError::Authentication(format!("{} returned {}", upstream, status))
        }
        StatusCode::TOO_MANY_REQUESTS => CoreError::RateLimited {
            retry_after: retry_after(headers),
        },
        _ if has("offer_expired") => CoreError::Expired(message.to_string()),
        StatusCode::NOT_FOUND => CoreError::NotFound(message.to_string()),
        _ if has("offer_no_longer_available") || has("not_found") => {
            CoreError::NotFound(message.to_string())
        }
        // Same key still being processed upstream
        StatusCode::CONFLICT => CoreError::ProviderUnavailable(format!("{}: {}", upstream, message)),
        s if s.is_server_error() => {
            tracing::warn!("{} returned {}: {}", upstream, s, message);
            CoreError::ProviderUnavailable(format!("{} returned {}", upstream, s))
        }
        _ => CoreError::Validation(message.to_string()),
    }
}

/// `Retry-After` as delta-seconds. HTTP-date values are ignored.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Body decoding failed on a 2xx response
pub fn decode_error(upstream: &str, what: &str, e: impl std::fmt::Display) -> CoreError {
    tracing::error!("{} sent an unreadable {}: {}", upstream, what, e);
    CoreError::Internal(format!("{}: unreadable {}", upstream, what))
}

/// `{"errors": [{"code": .., "message": ..}]}`
#[derive(Debug, Default, Deserialize)]
pub struct ErrorList {
    #[serde(default)]
    pub errors: Vec<ErrorEntry>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ErrorEntry {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, rename = "type")]
    pub error_type: Option<String>,
}

impl ErrorList {
    pub fn codes(&self) -> Vec<String> {
        self.errors.iter().filter_map(|e| e.code.clone()).collect()
    }

    pub fn message(&self) -> String {
        self.errors
            .iter()
            .filter_map(|e| e.message.as_deref())
            .collect::<Vec<_>>()
            .join("; ")
    }
}
