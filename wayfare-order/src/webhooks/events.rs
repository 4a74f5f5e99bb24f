use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WebhookProvider {
    Content,
    Payment,
}

impl WebhookProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookProvider::Content => "content",
            WebhookProvider::Payment => "payment",
        }
    }
}

impl fmt::Display for WebhookProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WebhookProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "content" => Ok(WebhookProvider::Content),
            "payment" => Ok(WebhookProvider::Payment),
            other => Err(format!("unknown webhook provider: {}", other)),
        }
    }
}

/// Persisted processing state. Rejected deliveries are never stored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WebhookStatus {
    Verified,
    /// Claimed by a delivery or the deferred-event worker while it is applied
    Processing,
    Applied,
    Deferred,
    Failed,
}

impl WebhookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookStatus::Verified => "verified",
            WebhookStatus::Processing => "processing",
            WebhookStatus::Applied => "applied",
            WebhookStatus::Deferred => "deferred",
            WebhookStatus::Failed => "failed",
        }
    }
}

impl FromStr for WebhookStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "verified" => Ok(WebhookStatus::Verified),
            "processing" => Ok(WebhookStatus::Processing),
            "applied" => Ok(WebhookStatus::Applied),
            "deferred" => Ok(WebhookStatus::Deferred),
            "failed" => Ok(WebhookStatus::Failed),
            other => Err(format!("unknown webhook status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookEvent {
    pub id: Uuid,
    pub provider: WebhookProvider,
    pub event_id: String,
    pub event_type: String,
    pub body: Value,
    pub signature: String,
    pub status: WebhookStatus,
    pub attempts: i32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub claimed_at: Option<DateTime<Utc>>,
}

impl WebhookEvent {
    pub fn verified(provider: WebhookProvider, envelope: &Envelope, body: Value, signature: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider,
            event_id: envelope.id.clone(),
            event_type: envelope.event_type.clone(),
            body,
            signature: signature.to_string(),
            status: WebhookStatus::Verified,
            attempts: 0,
            next_attempt_at: None,
            last_error: None,
            received_at: Utc::now(),
            processed_at: None,
            claimed_at: None,
        }
    }
}

/// Outer shape shared by both providers: `{"id", "type", "data": {"object": {...}}}`
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: EnvelopeData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnvelopeData {
    #[serde(default)]
    pub object: Value,
}

/// State change an event asks for
#[derive(Debug, Clone, PartialEq)]
pub enum EventAction {
    OrderConfirmed {
        provider_order_id: String,
    },
    OrderCancelled {
        provider_order_id: String,
    },
    RefundCompleted {
        provider_order_id: String,
        provider_refund_id: Option<String>,
    },
    PaymentCaptured(IntentRef),
    PaymentFailed {
        intent: IntentRef,
        reason: String,
    },
    /// Keyed by payment intent
    ChargeRefunded {
        intent_id: String,
    },
    CheckoutCompleted {
        session_id: String,
        customer_id: Option<String>,
        amount_total: i64,
        currency: String,
    },
    /// Known type with nothing to do, or a type we do not handle
    Ignore,
}

/// Payment intent reference plus the local ids we put in its metadata
#[derive(Debug, Clone, PartialEq)]
pub struct IntentRef {
    pub intent_id: String,
    pub order_id: Option<Uuid>,
    pub payment_id: Option<Uuid>,
}

impl EventAction {
    /// Map a verified event onto an action. `Err` means the body is missing required fields.
    pub fn from_event(provider: WebhookProvider, envelope: &Envelope) -> Result<Self, String> {
        let object = &envelope.data.object;
        match (provider, envelope.event_type.as_str()) {
            (WebhookProvider::Content, "order.created" | "order.updated") => {
                let id = required_str(object, "id")?;
                if object.get("status").and_then(Value::as_str) == Some("confirmed") {
                    Ok(EventAction::OrderConfirmed { provider_order_id: id })
                } else {
                    Ok(EventAction::Ignore)
                }
            }
            (WebhookProvider::Content, "order.cancelled") => Ok(EventAction::OrderCancelled {
                provider_order_id: required_str(object, "id")?,
            }),
            (WebhookProvider::Content, "order_cancellation.confirmed" | "refund.succeeded") => {
                Ok(EventAction::RefundCompleted {
                    provider_order_id: required_str(object, "order_id")?,
                    provider_refund_id: optional_str(object, "id"),
                })
            }
            (WebhookProvider::Payment, "payment_intent.succeeded") => {
                Ok(EventAction::PaymentCaptured(intent_ref(object)?))
            }
            (WebhookProvider::Payment, "payment_intent.payment_failed") => {
                let reason = object
                    .pointer("/last_payment_error/message")
                    .and_then(Value::as_str)
                    .unwrap_or("payment failed")
                    .to_string();
                Ok(EventAction::PaymentFailed {
                    intent: intent_ref(object)?,
                    reason,
                })
            }
            (WebhookProvider::Payment, "charge.refunded") => Ok(EventAction::ChargeRefunded {
                intent_id: required_str(object, "payment_intent")?,
            }),
            (WebhookProvider::Payment, "checkout.session.completed") => {
                Ok(EventAction::CheckoutCompleted {
                    session_id: required_str(object, "id")?,
                    customer_id: optional_str(object, "customer"),
                    amount_total: object
                        .get("amount_total")
                        .and_then(Value::as_i64)
                        .ok_or_else(|| "missing amount_total".to_string())?,
                    currency: required_str(object, "currency")?,
                })
            }
            _ => Ok(EventAction::Ignore),
        }
    }
}

fn required_str(object: &Value, field: &str) -> Result<String, String> {
    optional_str(object, field).ok_or_else(|| format!("missing {}", field))
}

fn optional_str(object: &Value, field: &str) -> Option<String> {
    object
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn intent_ref(object: &Value) -> Result<IntentRef, String> {
    let metadata_id = |key: &str| {
        object
            .pointer(&format!("/metadata/{}", key))
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
    };
    Ok(IntentRef {
        intent_id: required_str(object, "id")?,
        order_id: metadata_id("order_id"),
        payment_id: metadata_id("payment_id"),
    })
}
