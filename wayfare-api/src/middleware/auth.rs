use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use wayfare_order::Booker;

use crate::error::AppError;
use crate::state::AppState;

// ============================================================================
// JWT Claims
// ============================================================================

/// Claims of an already-issued HS256 token. Login happens elsewhere.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CustomerClaims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub exp: usize,
}

impl From<CustomerClaims> for Booker {
    fn from(claims: CustomerClaims) -> Self {
        Booker {
            user_id: claims.sub,
            email: claims.email.filter(|e| !e.trim().is_empty()),
            name: claims.name.filter(|n| !n.trim().is_empty()),
        }
    }
}

// ============================================================================
// Customer Authentication Middleware
// ============================================================================

pub async fn customer_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    // 1. Extract token from Authorization header
    let token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::AuthenticationError("Missing bearer token".to_string()))?;

    // 2. Decode and validate JWT
    let claims = decode_claims(token, state.auth.secret.expose())?;

    if claims.sub.trim().is_empty() {
        return Err(AppError::AuthenticationError("Token has no subject".to_string()));
    }

    // 3. Inject the caller into request extensions
    req.extensions_mut().insert(Booker::from(claims));

    Ok(next.run(req).await)
}

fn decode_claims(token: &str, secret: &str) -> Result<CustomerClaims, AppError> {
    if secret.is_empty() {
        tracing::error!("JWT secret is not configured; rejecting request");
        return Err(AppError::AuthenticationError("Invalid token".to_string()));
    }

    decode::<CustomerClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map(|data| data.claims)
    .map_err(|e| {
        tracing::debug!("Rejected bearer token: {}", e);
        AppError::AuthenticationError("Invalid token".to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token(secret: &str, exp_offset: i64) -> String {
        let claims = CustomerClaims {
            sub: "user_1".to_string(),
            email: Some("ada@example.com".to_string()),
            name: None,
            exp: (chrono::Utc::now().timestamp() + exp_offset) as usize,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn test_valid_token_yields_booker() {
        let claims = decode_claims(&token("s3cret", 600), "s3cret").unwrap();
        let booker = Booker::from(claims);
        assert_eq!(booker.user_id, "user_1");
        assert_eq!(booker.email.as_deref(), Some("ada@example.com"));
        assert!(booker.name.is_none());
    }

    #[test]
    fn test_wrong_secret_and_expired_tokens_are_rejected() {
        assert!(decode_claims(&token("other", 600), "s3cret").is_err());
        assert!(decode_claims(&token("s3cret", -3600), "s3cret").is_err());
        assert!(decode_claims(&token("s3cret", 600), "").is_err());
    }
}
