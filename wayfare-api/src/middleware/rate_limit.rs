use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use wayfare_core::CoreError;
use wayfare_store::redis_repo::rate_limit_key;

use crate::error::AppError;
use crate::state::AppState;

const WINDOW_SECONDS: i64 = 60;

/// Fixed-window limit per client IP. Fails open when Redis is unreachable.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let (Some(redis), Some(addr)) = (
        state.redis.as_ref(),
        req.extensions().get::<ConnectInfo<SocketAddr>>().map(|c| c.0),
    ) else {
        return next.run(req).await;
    };

    let key = rate_limit_key(
        &addr.ip().to_string(),
        WINDOW_SECONDS,
        chrono::Utc::now().timestamp(),
    );

    match redis
        .check_rate_limit(&key, state.rate_limit_per_minute, WINDOW_SECONDS)
        .await
    {
        Ok(true) => next.run(req).await,
        Ok(false) => {
            tracing::warn!("Rate limit exceeded for {}", addr.ip());
            AppError::from(CoreError::RateLimited {
                retry_after: Some(std::time::Duration::from_secs(WINDOW_SECONDS as u64)),
            })
            .into_response()
        }
        Err(e) => {
            tracing::warn!("Rate limiter unavailable, letting request through: {}", e);
            next.run(req).await
        }
    }
}
