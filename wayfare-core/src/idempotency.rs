use crate::{CoreError, CoreResult};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

const MAX_KEY_LEN: usize = 255;

/// Client-supplied key that makes a mutating call safe to repeat.
///
/// There is no constructor that invents a key: it is either parsed from the caller's request or
/// derived deterministically from stable input, so a retry always reproduces it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn parse(raw: &str) -> CoreResult<Self> {
        let key = raw.trim();
        if key.is_empty() {
            return Err(CoreError::Validation("idempotency key is empty".to_string()));
        }
        if key.len() > MAX_KEY_LEN {
            return Err(CoreError::Validation(format!(
                "idempotency key exceeds {} characters",
                MAX_KEY_LEN
            )));
        }
        if !key.chars().all(|c| c.is_ascii_graphic()) {
            return Err(CoreError::Validation(
                "idempotency key must be printable ASCII".to_string(),
            ));
        }
        Ok(Self(key.to_string()))
    }

    /// `scope:` followed by the SHA-256 of `material`. Same input, same key.
    pub fn derived(scope: &str, material: &str) -> Self {
        let digest = hex::encode(Sha256::digest(material.as_bytes()));
        Self(format!("{}:{}", scope, digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// SHA-256 over the canonical JSON of a request's parameters.
///
/// Stored next to the idempotency key so a reused key with different parameters is detected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RequestFingerprint(String);

impl RequestFingerprint {
    pub fn of<T: Serialize>(params: &T) -> CoreResult<Self> {
        let canonical = serde_json::to_value(params)
            .and_then(|v| serde_json::to_vec(&v))
            .map_err(|e| CoreError::Internal(format!("fingerprint encoding failed: {}", e)))?;
        Ok(Self(hex::encode(Sha256::digest(&canonical))))
    }

    pub fn from_stored(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
