use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use wayfare_core::CoreError;

#[derive(Debug)]
pub enum AppError {
    Core(CoreError),
    /// Missing or invalid bearer token
    AuthenticationError(String),
    /// Malformed request caught at the HTTP layer; the message is ours and safe to return
    BadRequest(String),
    Anyhow(anyhow::Error),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Core(e) => match e {
                CoreError::Validation(_) => StatusCode::BAD_REQUEST,
                CoreError::NotFound(_) => StatusCode::NOT_FOUND,
                CoreError::Expired(_) => StatusCode::GONE,
                CoreError::Authentication(_) => StatusCode::SERVICE_UNAVAILABLE,
                CoreError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
                CoreError::ProviderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                CoreError::SignatureInvalid(_) => StatusCode::UNAUTHORIZED,
                CoreError::Conflict(_) => StatusCode::CONFLICT,
                CoreError::Persistence(_) | CoreError::Internal(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            AppError::AuthenticationError(_) => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Anyhow(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            AppError::Core(e) => e.kind(),
            AppError::AuthenticationError(_) => "unauthorized",
            AppError::BadRequest(_) => "validation",
            AppError::Anyhow(_) => "internal",
        }
    }
}

/// Client-facing text per error kind. Upstream messages only go to the logs.
fn stable_message(e: &CoreError) -> &'static str {
    match e {
        CoreError::Validation(_) => "The request was rejected as invalid",
        CoreError::NotFound(_) => "The requested resource was not found",
        CoreError::Expired(_) => "The offer has expired, search again",
        CoreError::Authentication(_) => "Service temporarily unavailable",
        CoreError::RateLimited { .. } => "Too many requests, try again later",
        CoreError::ProviderUnavailable(_) => "Service temporarily unavailable",
        CoreError::SignatureInvalid(_) => "Signature verification failed",
        CoreError::Conflict(_) => "The request conflicts with the current state of the resource",
        CoreError::Persistence(_) | CoreError::Internal(_) => "Internal Server Error",
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.kind();

        let (error_message, retry_after) = match &self {
            AppError::Core(e) => {
                match e {
                    CoreError::Authentication(_) => {
                        tracing::error!("Upstream credentials rejected: {}", e)
                    }
                    CoreError::Persistence(_) | CoreError::Internal(_) => {
                        tracing::error!("Internal Server Error: {}", e)
                    }
                    CoreError::SignatureInvalid(_) => tracing::warn!("Rejected webhook: {}", e),
                    _ => tracing::debug!("Request failed: {}", e),
                }
                let retry_after = match e {
                    CoreError::RateLimited { retry_after } => *retry_after,
                    _ => None,
                };
                (stable_message(e).to_string(), retry_after)
            }
            AppError::AuthenticationError(msg) | AppError::BadRequest(msg) => (msg.clone(), None),
            AppError::Anyhow(err) => {
                tracing::error!("Internal Server Error: {}", err);
                ("Internal Server Error".to_string(), None)
            }
        };

        let body = Json(json!({
            "error": error_message,
            "kind": kind,
        }));

        let mut response = (status, body).into_response();
        if let Some(delay) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&delay.as_secs().max(1).to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        Self::Core(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Anyhow(err)
    }
}

impl From<wayfare_offer::ExpiryError> for AppError {
    fn from(err: wayfare_offer::ExpiryError) -> Self {
        Self::Core(err.into())
    }
}
