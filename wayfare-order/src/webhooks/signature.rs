use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("Missing signature header")]
    Missing,

    #[error("Malformed signature header: {0}")]
    Malformed(String),

    #[error("Signature does not match payload")]
    Mismatch,

    #[error("Signature timestamp outside tolerance ({0}s)")]
    Stale(i64),

    #[error("Webhook secret not configured")]
    NoSecret,
}

/// HMAC-SHA256 verification of webhook deliveries.
///
/// Accepts either a bare hex digest of the body, or `t=<unix>,v1=<hex>` where the digest covers
/// `"{t}.{body}"` and `t` must be within `tolerance_secs` of now. Several `v1` entries are
/// allowed (secret rotation); any match passes.
#[derive(Clone)]
pub struct SignatureVerifier {
    /// Keyed MAC, cloned per check. `None` when no secret is configured.
    key: Option<HmacSha256>,
    tolerance_secs: i64,
}

impl SignatureVerifier {
    pub fn new(secret: impl AsRef<[u8]>, tolerance_secs: i64) -> Self {
        let secret = secret.as_ref();
        let key = if secret.is_empty() {
            None
        } else {
            HmacSha256::new_from_slice(secret).ok()
        };
        Self { key, tolerance_secs }
    }

    pub fn verify(
        &self,
        header: Option<&str>,
        body: &[u8],
        now: DateTime<Utc>,
    ) -> Result<(), SignatureError> {
        let key = self.key.as_ref().ok_or(SignatureError::NoSecret)?;
        let header = header.map(str::trim).filter(|h| !h.is_empty()).ok_or(SignatureError::Missing)?;

        if !header.contains('=') {
            let digest = decode_hex(header)?;
            return check(key, &[body], &digest);
        }

        let mut timestamp: Option<i64> = None;
        let mut candidates = Vec::new();
        for part in header.split(',') {
            let (k, v) = part
                .trim()
                .split_once('=')
                .ok_or_else(|| SignatureError::Malformed("expected key=value".to_string()))?;
            match k {
                "t" => {
                    timestamp = Some(
                        v.parse()
                            .map_err(|_| SignatureError::Malformed("bad timestamp".to_string()))?,
                    )
                }
                "v1" => candidates.push(decode_hex(v)?),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or_else(|| SignatureError::Malformed("missing t".to_string()))?;
        if candidates.is_empty() {
            return Err(SignatureError::Malformed("missing v1".to_string()));
        }

        let age = now.timestamp() - timestamp;
        if age.abs() > self.tolerance_secs {
            return Err(SignatureError::Stale(self.tolerance_secs));
        }

        let prefix = format!("{}.", timestamp);
        if candidates
            .iter()
            .any(|digest| check(key, &[prefix.as_bytes(), body], digest).is_ok())
        {
            Ok(())
        } else {
            Err(SignatureError::Mismatch)
        }
    }

    /// Produce a header value the way the sender does. `None` gives the bare digest form.
    pub fn sign(&self, body: &[u8], timestamp: Option<i64>) -> Result<String, SignatureError> {
        let key = self.key.as_ref().ok_or(SignatureError::NoSecret)?;
        Ok(match timestamp {
            Some(t) => {
                let prefix = format!("{}.", t);
                format!("t={},v1={}", t, hex::encode(digest(key, &[prefix.as_bytes(), body])))
            }
            None => hex::encode(digest(key, &[body])),
        })
    }
}

fn keyed(key: &HmacSha256, parts: &[&[u8]]) -> HmacSha256 {
    let mut mac = key.clone();
    for part in parts {
        mac.update(part);
    }
    mac
}

fn digest(key: &HmacSha256, parts: &[&[u8]]) -> Vec<u8> {
    keyed(key, parts).finalize().into_bytes().to_vec()
}

fn check(key: &HmacSha256, parts: &[&[u8]], expected: &[u8]) -> Result<(), SignatureError> {
    keyed(key, parts)
        .verify_slice(expected)
        .map_err(|_| SignatureError::Mismatch)
}

fn decode_hex(value: &str) -> Result<Vec<u8>, SignatureError> {
    hex::decode(value.trim()).map_err(|_| SignatureError::Malformed("digest is not hex".to_string()))
}
