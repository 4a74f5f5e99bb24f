use crate::idempotency::IdempotencyKey;
use crate::CoreResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use wayfare_shared::{Currency, Masked};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentIntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    RequiresCapture,
    Succeeded,
    Canceled,
    /// Anything the processor adds later
    #[serde(other)]
    Unknown,
}

impl PaymentIntentStatus {
    /// Money has been captured
    pub fn is_succeeded(&self) -> bool {
        matches!(self, PaymentIntentStatus::Succeeded)
    }

    /// Outcome will arrive later (webhook or polling)
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            PaymentIntentStatus::Processing
                | PaymentIntentStatus::RequiresAction
                | PaymentIntentStatus::RequiresConfirmation
                | PaymentIntentStatus::RequiresCapture
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentIntent {
    pub id: String,
    pub amount_minor: i64,
    pub currency: Currency,
    pub status: PaymentIntentStatus,
    pub customer_id: Option<String>,
    pub client_secret: Option<Masked<String>>,
    pub metadata: BTreeMap<String, String>,
    pub raw: Value,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CreatePaymentIntent {
    pub amount_minor: i64,
    pub currency: Currency,
    pub customer_id: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub payment_method: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Customer {
    pub id: String,
    pub email: Masked<String>,
}

/// Hosted checkout or billing-portal session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostedSession {
    pub id: String,
    pub url: String,
}

/// Card processor used to charge travelers and manage their billing.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Find the customer by email, creating it once if absent.
    async fn get_or_create_customer(&self, email: &str, name: Option<&str>) -> CoreResult<Customer>;

    async fn create_checkout_session(
        &self,
        customer_id: &str,
        price_ref: &str,
        success_url: &str,
        cancel_url: &str,
    ) -> CoreResult<HostedSession>;

    async fn create_billing_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> CoreResult<HostedSession>;

    async fn create_payment_intent(
        &self,
        request: &CreatePaymentIntent,
        key: &IdempotencyKey,
    ) -> CoreResult<PaymentIntent>;

    async fn retrieve_payment_intent(&self, intent_id: &str) -> CoreResult<PaymentIntent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_names() {
        let status: PaymentIntentStatus = serde_json::from_str("\"requires_action\"").unwrap();
        assert!(status.is_in_flight());
        let status: PaymentIntentStatus = serde_json::from_str("\"something_new\"").unwrap();
        assert_eq!(status, PaymentIntentStatus::Unknown);
        assert!(PaymentIntentStatus::Succeeded.is_succeeded());
    }
}
