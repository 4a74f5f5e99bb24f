use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use wayfare_core::CoreError;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CircuitState {
    Closed,   // Normal operation
    Open,     // Failing fast
    HalfOpen, // One probe allowed through
}

pub struct CircuitBreaker {
    pub name: String,
    pub state: RwLock<CircuitState>,
    pub failure_count: AtomicUsize,
    pub failure_threshold: usize,
    pub reset_timeout: Duration,
    pub last_failure: RwLock<Option<Instant>>,
}

impl CircuitBreaker {
    pub fn new(name: &str, threshold: usize, timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicUsize::new(0),
            failure_threshold: threshold,
            reset_timeout: timeout,
            last_failure: RwLock::new(None),
        }
    }

    pub async fn check(&self) -> bool {
        let state = *self.state.read().await;
        if state == CircuitState::Closed {
            return true;
        }

        if state == CircuitState::Open {
            let last_fail = *self.last_failure.read().await;
            if let Some(instant) = last_fail {
                if instant.elapsed() > self.reset_timeout {
                    let mut s = self.state.write().await;
                    *s = CircuitState::HalfOpen;
                    tracing::info!("Circuit Breaker [{}] moving to Half-Open", self.name);
                    return true;
                }
            }
            return false;
        }

        true
    }

    pub async fn record_success(&self) {
        let mut state = self.state.write().await;
        if *state == CircuitState::HalfOpen {
            *state = CircuitState::Closed;
            self.failure_count.store(0, Ordering::SeqCst);
            tracing::info!("Circuit Breaker [{}] recovered to Closed", self.name);
        } else if *state == CircuitState::Closed {
            self.failure_count.store(0, Ordering::SeqCst);
        }
    }

    pub async fn record_failure(&self) {
        let count = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.state.write().await;

        if count >= self.failure_threshold || *state == CircuitState::HalfOpen {
            *state = CircuitState::Open;
            let mut last = self.last_failure.write().await;
            *last = Some(Instant::now());
            tracing::error!("Circuit Breaker [{}] TRIPPED to Open. Failures: {}", self.name, count);
        }
    }
}

/// One breaker per upstream
pub struct Resiliency {
    pub content_cb: CircuitBreaker,
    pub payment_cb: CircuitBreaker,
}

impl Default for Resiliency {
    fn default() -> Self {
        Self {
            content_cb: CircuitBreaker::new("content-provider", 5, Duration::from_secs(30)),
            payment_cb: CircuitBreaker::new("payment-processor", 5, Duration::from_secs(30)),
        }
    }
}

impl Resiliency {
    /// Breaker guarding the upstream a route mostly depends on
    fn for_path(&self, path: &str) -> Option<&CircuitBreaker> {
        if path.starts_with("/v1/billing") || (path.starts_with("/v1/orders/") && path.ends_with("/pay")) {
            Some(&self.payment_cb)
        } else if path.starts_with("/v1/offers")
            || path.starts_with("/v1/places")
            || path.starts_with("/v1/loyalty-programmes")
            || path.starts_with("/v1/orders")
        {
            Some(&self.content_cb)
        } else {
            None
        }
    }
}

pub async fn circuit_breaker_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let Some(cb) = state.resiliency.for_path(req.uri().path()) else {
        return next.run(req).await;
    };

    if !cb.check().await {
        return AppError::from(CoreError::ProviderUnavailable(format!(
            "circuit {} is open",
            cb.name
        )))
        .into_response();
    }

    let response = next.run(req).await;

    // Only upstream trouble counts; 500s are our own
    if matches!(response.status().as_u16(), 502..=504) {
        cb.record_failure().await;
    } else {
        cb.record_success().await;
    }

    response
}
