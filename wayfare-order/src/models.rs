use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use wayfare_core::content::Passenger;
use wayfare_shared::{Masked, Money};

/// Order status as persisted
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Cancelled,
    RefundRequested,
    Refunded,
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::RefundRequested => "refund_requested",
            OrderStatus::Refunded => "refunded",
            OrderStatus::Failed => "failed",
        }
    }

    /// No transition leaves these
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Cancelled | OrderStatus::Refunded | OrderStatus::Failed
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "confirmed" => Ok(OrderStatus::Confirmed),
            "cancelled" => Ok(OrderStatus::Cancelled),
            "refund_requested" => Ok(OrderStatus::RefundRequested),
            "refunded" => Ok(OrderStatus::Refunded),
            "failed" => Ok(OrderStatus::Failed),
            other => Err(format!("unknown order status: {}", other)),
        }
    }
}

/// A booking held or ticketed at the content provider.
///
/// One row per idempotency key. The persisted row is the source of truth once it exists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: Uuid,
    pub provider_order_id: String,
    pub booking_reference: Option<String>,
    pub status: OrderStatus,
    pub total: Money,
    pub user_id: String,
    pub offer_ids: Vec<String>,
    pub passengers: Vec<Passenger>,
    pub idempotency_key: String,
    #[serde(skip_serializing)]
    pub request_fingerprint: String,
    #[serde(skip_serializing)]
    pub raw: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "succeeded" => Ok(PaymentStatus::Succeeded),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(format!("unknown payment status: {}", other)),
        }
    }
}

/// Money movement for an order (card capture + provider settlement) or a standalone
/// subscription checkout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Option<Uuid>,
    pub customer_id: Option<String>,
    /// Processor payment-intent or checkout-session id
    pub provider_payment_id: Option<String>,
    /// Content provider payment id once the airline has been paid
    pub provider_settlement_id: Option<String>,
    pub amount: Money,
    pub status: PaymentStatus,
    pub method: String,
    pub idempotency_key: String,
    #[serde(skip_serializing)]
    pub request_fingerprint: String,
    #[serde(skip_serializing)]
    pub raw: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Same shape as `PaymentStatus`
pub type RefundStatus = PaymentStatus;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Refund {
    pub id: Uuid,
    pub order_id: Uuid,
    pub provider_refund_id: String,
    pub amount: Money,
    pub status: RefundStatus,
    pub idempotency_key: String,
    #[serde(skip_serializing)]
    pub request_fingerprint: String,
    #[serde(skip_serializing)]
    pub raw: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeActor {
    Customer,
    System,
    Webhook,
    Reconciler,
}

impl ChangeActor {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeActor::Customer => "CUSTOMER",
            ChangeActor::System => "SYSTEM",
            ChangeActor::Webhook => "WEBHOOK",
            ChangeActor::Reconciler => "RECONCILER",
        }
    }
}

impl FromStr for ChangeActor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CUSTOMER" => Ok(ChangeActor::Customer),
            "SYSTEM" => Ok(ChangeActor::System),
            "WEBHOOK" => Ok(ChangeActor::Webhook),
            "RECONCILER" => Ok(ChangeActor::Reconciler),
            other => Err(format!("unknown actor: {}", other)),
        }
    }
}

/// Who moved an order and why. Written to the audit trail with the transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub actor: ChangeActor,
    pub reason: String,
}

impl StatusChange {
    pub fn new(actor: ChangeActor, reason: impl Into<String>) -> Self {
        Self {
            actor,
            reason: reason.into(),
        }
    }
}

/// Append-only audit row
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderChange {
    pub id: Uuid,
    pub order_id: Uuid,
    pub change_type: String,
    pub previous_status: Option<OrderStatus>,
    pub new_status: OrderStatus,
    pub actor: ChangeActor,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl OrderChange {
    pub fn created(order: &Order, actor: ChangeActor) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id: order.id,
            change_type: "ORDER_CREATED".to_string(),
            previous_status: None,
            new_status: order.status,
            actor,
            reason: None,
            created_at: Utc::now(),
        }
    }

    pub fn transition(order_id: Uuid, from: OrderStatus, to: OrderStatus, change: &StatusChange) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            change_type: "STATUS_CHANGED".to_string(),
            previous_status: Some(from),
            new_status: to,
            actor: change.actor,
            reason: Some(change.reason.clone()),
            created_at: Utc::now(),
        }
    }
}

/// Frequent-flyer account saved by a user, one per airline
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoyaltyAccount {
    pub id: Uuid,
    pub user_id: String,
    pub airline_iata_code: String,
    pub account_number: Masked<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_text() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Confirmed,
            OrderStatus::Cancelled,
            OrderStatus::RefundRequested,
            OrderStatus::Refunded,
            OrderStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
        assert!("PAID".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(OrderStatus::Refunded.is_terminal());
        assert!(OrderStatus::Failed.is_terminal());
        assert!(!OrderStatus::Confirmed.is_terminal());
        assert!(!OrderStatus::RefundRequested.is_terminal());
    }
}
