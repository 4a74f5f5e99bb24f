use crate::http::{build_client, decode_error, status_error, transport_error};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use wayfare_core::payment::{
    CreatePaymentIntent, Customer, HostedSession, PaymentIntent, PaymentIntentStatus,
    PaymentProcessor,
};
use wayfare_core::{CoreError, CoreResult, IdempotencyKey};
use wayfare_shared::{Currency, Masked};

const UPSTREAM: &str = "payment processor";
const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Form-encoded REST gateway to the card processor.
#[derive(Clone)]
pub struct ProcessorGateway {
    client: Client,
    base_url: String,
    secret_key: Masked<String>,
}

impl ProcessorGateway {
    pub fn new(
        base_url: impl Into<String>,
        secret_key: impl Into<String>,
        timeout: Duration,
    ) -> CoreResult<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret_key: Masked::new(secret_key.into()),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(self.secret_key.expose())
    }

    async fn send<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> CoreResult<(T, Value)> {
        let response = request
            .send()
            .await
            .map_err(|e| transport_error(UPSTREAM, e))?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(UPSTREAM, e))?;

        if status.is_success() {
            let raw: Value =
                serde_json::from_slice(&body).map_err(|e| decode_error(UPSTREAM, operation, e))?;
            let typed = T::deserialize(&raw).map_err(|e| decode_error(UPSTREAM, operation, e))?;
            return Ok((typed, raw));
        }

        let failure: WireFailure = serde_json::from_slice(&body).unwrap_or_default();
        let error = failure.error;
        let codes: Vec<String> = error.code.into_iter().chain(error.decline_code).collect();
        tracing::debug!(
            "{} failed with {} ({:?}, {:?})",
            operation,
            status,
            error.error_type,
            codes
        );
        Err(status_error(
            UPSTREAM,
            status,
            &headers,
            &codes,
            error.message.as_deref().unwrap_or("request failed"),
        ))
    }
}

#[async_trait]
impl PaymentProcessor for ProcessorGateway {
    async fn get_or_create_customer(&self, email: &str, name: Option<&str>) -> CoreResult<Customer> {
        let email = email.trim().to_ascii_lowercase();
        if email.is_empty() {
            return Err(CoreError::Validation("email is required".to_string()));
        }

        // 1. Existing customer
        let lookup = self
            .request(Method::GET, "/v1/customers")
            .query(&[("email", email.as_str()), ("limit", "1")]);
        let (found, _): (WireList<WireCustomer>, Value) = self.send("list_customers", lookup).await?;
        if let Some(customer) = found.data.into_iter().next() {
            return Ok(customer.into_customer(&email));
        }

        // 2. Create once; a concurrent caller with the same email gets the same customer back
        let mut form = vec![("email", email.clone())];
        if let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) {
            form.push(("name", name.to_string()));
        }
        let key = IdempotencyKey::derived("customer", &email);
        let create = self
            .request(Method::POST, "/v1/customers")
            .header(IDEMPOTENCY_HEADER, key.as_str())
            .form(&form);
        let (created, _): (WireCustomer, Value) = self.send("create_customer", create).await?;
        tracing::info!("Processor customer {} created", created.id);
        Ok(created.into_customer(&email))
    }

    async fn create_checkout_session(
        &self,
        customer_id: &str,
        price_ref: &str,
        success_url: &str,
        cancel_url: &str,
    ) -> CoreResult<HostedSession> {
        let form = [
            ("mode", "subscription"),
            ("customer", customer_id),
            ("line_items[0][price]", price_ref),
            ("line_items[0][quantity]", "1"),
            ("success_url", success_url),
            ("cancel_url", cancel_url),
        ];
        let request = self.request(Method::POST, "/v1/checkout/sessions").form(&form);
        let (session, _): (WireSession, Value) = self.send("create_checkout_session", request).await?;
        session.into_hosted()
    }

    async fn create_billing_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> CoreResult<HostedSession> {
        let form = [("customer", customer_id), ("return_url", return_url)];
        let request = self
            .request(Method::POST, "/v1/billing_portal/sessions")
            .form(&form);
        let (session, _): (WireSession, Value) =
            self.send("create_billing_portal_session", request).await?;
        session.into_hosted()
    }

    async fn create_payment_intent(
        &self,
        request: &CreatePaymentIntent,
        key: &IdempotencyKey,
    ) -> CoreResult<PaymentIntent> {
        if request.amount_minor <= 0 {
            return Err(CoreError::Validation("amount must be positive".to_string()));
        }

        let mut form: Vec<(String, String)> = vec![
            ("amount".to_string(), request.amount_minor.to_string()),
            (
                "currency".to_string(),
                request.currency.as_str().to_ascii_lowercase(),
            ),
        ];
        if let Some(customer) = &request.customer_id {
            form.push(("customer".to_string(), customer.clone()));
        }
        for (k, v) in &request.metadata {
            form.push((format!("metadata[{}]", k), v.clone()));
        }
        match &request.payment_method {
            Some(method) => {
                form.push(("payment_method".to_string(), method.clone()));
                form.push(("confirm".to_string(), "true".to_string()));
            }
            None => form.push((
                "automatic_payment_methods[enabled]".to_string(),
                "true".to_string(),
            )),
        }

        let http = self
            .request(Method::POST, "/v1/payment_intents")
            .header(IDEMPOTENCY_HEADER, key.as_str())
            .form(&form);
        let (intent, raw): (WireIntent, Value) = self.send("create_payment_intent", http).await?;
        let intent = intent.into_intent(raw)?;
        tracing::info!("Payment intent {} is {:?}", intent.id, intent.status);
        Ok(intent)
    }

    async fn retrieve_payment_intent(&self, intent_id: &str) -> CoreResult<PaymentIntent> {
        let request = self.request(Method::GET, &format!("/v1/payment_intents/{}", intent_id));
        let (intent, raw): (WireIntent, Value) = self.send("retrieve_payment_intent", request).await?;
        intent.into_intent(raw)
    }
}

// Wire types

#[derive(Default, Deserialize)]
struct WireFailure {
    #[serde(default)]
    error: WireErrorBody,
}

#[derive(Default, Deserialize)]
struct WireErrorBody {
    #[serde(default, rename = "type")]
    error_type: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    decline_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct WireList<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Deserialize)]
struct WireCustomer {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

impl WireCustomer {
    fn into_customer(self, requested_email: &str) -> Customer {
        Customer {
            id: self.id,
            email: Masked::new(self.email.unwrap_or_else(|| requested_email.to_string())),
        }
    }
}

#[derive(Deserialize)]
struct WireSession {
    id: String,
    #[serde(default)]
    url: Option<String>,
}

impl WireSession {
    fn into_hosted(self) -> CoreResult<HostedSession> {
        match self.url {
            Some(url) => Ok(HostedSession { id: self.id, url }),
            None => Err(decode_error(UPSTREAM, "session", "missing url")),
        }
    }
}

#[derive(Deserialize)]
struct WireIntent {
    id: String,
    amount: i64,
    currency: String,
    status: PaymentIntentStatus,
    #[serde(default)]
    customer: Option<String>,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

impl WireIntent {
    fn into_intent(self, raw: Value) -> CoreResult<PaymentIntent> {
        Ok(PaymentIntent {
            currency: Currency::parse(&self.currency)?,
            id: self.id,
            amount_minor: self.amount,
            status: self.status,
            customer_id: self.customer,
            client_secret: self.client_secret.map(Masked::new),
            metadata: self.metadata,
            raw,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn gateway(server: &MockServer) -> ProcessorGateway {
        ProcessorGateway::new(server.uri(), "sk_test_123", Duration::from_secs(2)).unwrap()
    }

    fn intent_json(status: &str) -> Value {
        json!({
            "id": "pi_1",
            "amount": 23450,
            "currency": "eur",
            "status": status,
            "customer": "cus_1",
            "client_secret": "pi_1_secret_abc",
            "metadata": { "order_id": "o-1" }
        })
    }

    #[tokio::test]
    async fn test_existing_customer_is_reused() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/customers"))
            .and(query_param("email", "ada@example.com"))
            .and(header("authorization", "Bearer sk_test_123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{ "id": "cus_1", "email": "ada@example.com" }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/customers"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let customer = gateway(&server)
            .await
            .get_or_create_customer(" Ada@Example.com ", None)
            .await
            .unwrap();
        assert_eq!(customer.id, "cus_1");
    }

    #[tokio::test]
    async fn test_missing_customer_is_created_with_derived_key() {
        let server = MockServer::start().await;
        let expected_key = IdempotencyKey::derived("customer", "ada@example.com");
        Mock::given(method("GET"))
            .and(path("/v1/customers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/customers"))
            .and(header(IDEMPOTENCY_HEADER, expected_key.as_str()))
            .and(body_string_contains("name=Ada"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "cus_new", "email": "ada@example.com"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let customer = gateway(&server)
            .await
            .get_or_create_customer("ada@example.com", Some("Ada"))
            .await
            .unwrap();
        assert_eq!(customer.id, "cus_new");
    }

    #[tokio::test]
    async fn test_payment_intent_form_and_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payment_intents"))
            .and(header(IDEMPOTENCY_HEADER, "pay-1"))
            .and(body_string_contains("amount=23450"))
            .and(body_string_contains("currency=eur"))
            .and(body_string_contains("metadata%5Border_id%5D=o-1"))
            .and(body_string_contains("automatic_payment_methods%5Benabled%5D=true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(intent_json("requires_payment_method")))
            .expect(1)
            .mount(&server)
            .await;

        let request = CreatePaymentIntent {
            amount_minor: 23450,
            currency: Currency::parse("EUR").unwrap(),
            customer_id: Some("cus_1".to_string()),
            metadata: BTreeMap::from([("order_id".to_string(), "o-1".to_string())]),
            payment_method: None,
        };
        let key = IdempotencyKey::parse("pay-1").unwrap();
        let intent = gateway(&server)
            .await
            .create_payment_intent(&request, &key)
            .await
            .unwrap();

        assert_eq!(intent.status, PaymentIntentStatus::RequiresPaymentMethod);
        assert_eq!(intent.currency.as_str(), "EUR");
        assert_eq!(intent.client_secret.unwrap().expose(), "pi_1_secret_abc");
        assert_eq!(intent.raw["id"], "pi_1");
    }

    #[tokio::test]
    async fn test_card_declined_is_not_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payment_intents"))
            .respond_with(ResponseTemplate::new(402).set_body_json(json!({
                "error": { "type": "card_error", "code": "card_declined", "decline_code": "insufficient_funds", "message": "Your card was declined." }
            })))
            .mount(&server)
            .await;

        let request = CreatePaymentIntent {
            amount_minor: 100,
            currency: Currency::parse("EUR").unwrap(),
            customer_id: None,
            metadata: BTreeMap::new(),
            payment_method: Some("pm_card_visa".to_string()),
        };
        let key = IdempotencyKey::parse("pay-2").unwrap();
        let err = gateway(&server)
            .await
            .create_payment_intent(&request, &key)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_bad_secret_is_authentication_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/payment_intents/pi_1"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": { "type": "invalid_request_error", "message": "Invalid API Key provided" }
            })))
            .mount(&server)
            .await;

        let err = gateway(&server).await.retrieve_payment_intent("pi_1").await.unwrap_err();
        assert!(matches!(err, CoreError::Authentication(_)));
    }

    #[tokio::test]
    async fn test_checkout_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions"))
            .and(body_string_contains("mode=subscription"))
            .and(body_string_contains("line_items%5B0%5D%5Bprice%5D=price_basic"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "cs_1", "url": "https://checkout.example/cs_1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let session = gateway(&server)
            .await
            .create_checkout_session("cus_1", "price_basic", "https://app/ok", "https://app/cancel")
            .await
            .unwrap();
        assert_eq!(session.url, "https://checkout.example/cs_1");
    }
}
