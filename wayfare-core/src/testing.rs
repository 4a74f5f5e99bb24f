//! In-process provider doubles with scripted failures and call recording.

use crate::content::{
    ContentProvider, CreateOrderRequest, ProviderOrder, ProviderOrderState, ProviderPayment,
    ProviderRefund, SettlementState,
};
use crate::idempotency::IdempotencyKey;
use crate::payment::{
    CreatePaymentIntent, Customer, HostedSession, PaymentIntent, PaymentIntentStatus,
    PaymentProcessor,
};
use crate::search::SearchCriteria;
use crate::{CoreError, CoreResult};
use async_trait::async_trait;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use wayfare_offer::{LoyaltyProgramme, Offer, OfferRequest, Place, SeatMap};
use wayfare_shared::{Masked, Money};

/// Record of one call: operation name and the idempotency key it carried
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub operation: &'static str,
    pub key: Option<String>,
}

#[derive(Default)]
struct CallLog {
    calls: Mutex<Vec<RecordedCall>>,
    failures: Mutex<HashMap<&'static str, VecDeque<CoreError>>>,
}

impl CallLog {
    fn enter(&self, operation: &'static str, key: Option<&IdempotencyKey>) -> CoreResult<()> {
        self.calls.lock().unwrap().push(RecordedCall {
            operation,
            key: key.map(|k| k.as_str().to_string()),
        });
        match self.failures.lock().unwrap().get_mut(operation).and_then(|q| q.pop_front()) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn fail_next(&self, operation: &'static str, error: CoreError) {
        self.failures
            .lock()
            .unwrap()
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    fn count(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    fn all(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

/// Content provider double. Mutating calls are idempotent per key, like the real provider.
#[derive(Default)]
pub struct ScriptedContentProvider {
    log: CallLog,
    offers: Mutex<HashMap<String, Offer>>,
    orders: Mutex<HashMap<String, ProviderOrder>>,
    orders_by_key: Mutex<HashMap<String, String>>,
    payments_by_key: Mutex<HashMap<String, ProviderPayment>>,
    refunds_by_key: Mutex<HashMap<String, ProviderRefund>>,
    loyalty_programmes: Mutex<Vec<LoyaltyProgramme>>,
    places: Mutex<Vec<Place>>,
    refunds_settle_immediately: bool,
}

impl ScriptedContentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_offer(self, offer: Offer) -> Self {
        self.offers.lock().unwrap().insert(offer.id.clone(), offer);
        self
    }

    pub fn put_offer(&self, offer: Offer) {
        self.offers.lock().unwrap().insert(offer.id.clone(), offer);
    }

    /// Refunds complete in the create call instead of later
    pub fn settling_refunds_immediately(mut self) -> Self {
        self.refunds_settle_immediately = true;
        self
    }

    pub fn with_loyalty_programme(self, programme: LoyaltyProgramme) -> Self {
        self.loyalty_programmes.lock().unwrap().push(programme);
        self
    }

    pub fn with_place(self, place: Place) -> Self {
        self.places.lock().unwrap().push(place);
        self
    }

    pub fn fail_next(&self, operation: &'static str, error: CoreError) {
        self.log.fail_next(operation, error);
    }

    pub fn calls_to(&self, operation: &str) -> usize {
        self.log.count(operation)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.log.all()
    }

    /// Distinct provider orders created so far
    pub fn orders_created(&self) -> usize {
        self.orders.lock().unwrap().len()
    }
}

#[async_trait]
impl ContentProvider for ScriptedContentProvider {
    async fn search_offers(&self, criteria: &SearchCriteria) -> CoreResult<OfferRequest> {
        self.log.enter("search_offers", None)?;
        let offers = self
            .offers
            .lock()
            .unwrap()
            .values()
            .filter(|o| {
                o.slices.first().map_or(true, |s| {
                    s.origin == criteria.origin && s.destination == criteria.destination
                })
            })
            .cloned()
            .collect();
        Ok(OfferRequest {
            id: "orq_scripted".to_string(),
            offers,
        })
    }

    async fn get_offer(&self, offer_id: &str) -> CoreResult<Offer> {
        self.log.enter("get_offer", None)?;
        self.offers
            .lock()
            .unwrap()
            .get(offer_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("offer {}", offer_id)))
    }

    async fn create_order(
        &self,
        request: &CreateOrderRequest,
        key: &IdempotencyKey,
    ) -> CoreResult<ProviderOrder> {
        self.log.enter("create_order", Some(key))?;

        if let Some(existing) = self.orders_by_key.lock().unwrap().get(key.as_str()) {
            if let Some(order) = self.orders.lock().unwrap().get(existing) {
                return Ok(order.clone());
            }
        }

        let total = {
            let offers = self.offers.lock().unwrap();
            let first = request
                .selected_offers
                .first()
                .and_then(|id| offers.get(id))
                .ok_or_else(|| CoreError::NotFound("selected offer".to_string()))?;
            first.total.clone()
        };

        let n = self.orders.lock().unwrap().len() + 1;
        let order = ProviderOrder {
            id: format!("ord_{:04}", n),
            booking_reference: Some(format!("WF{:04}", n)),
            state: ProviderOrderState::AwaitingPayment,
            total,
            raw: json!({ "selected_offers": request.selected_offers }),
        };
        self.orders.lock().unwrap().insert(order.id.clone(), order.clone());
        self.orders_by_key
            .lock()
            .unwrap()
            .insert(key.as_str().to_string(), order.id.clone());
        Ok(order)
    }

    async fn get_order(&self, provider_order_id: &str) -> CoreResult<ProviderOrder> {
        self.log.enter("get_order", None)?;
        self.orders
            .lock()
            .unwrap()
            .get(provider_order_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("order {}", provider_order_id)))
    }

    async fn create_payment(
        &self,
        provider_order_id: &str,
        amount: &Money,
        key: &IdempotencyKey,
    ) -> CoreResult<ProviderPayment> {
        self.log.enter("create_payment", Some(key))?;

        if let Some(existing) = self.payments_by_key.lock().unwrap().get(key.as_str()) {
            return Ok(existing.clone());
        }

        let mut orders = self.orders.lock().unwrap();
        let order = orders
            .get_mut(provider_order_id)
            .ok_or_else(|| CoreError::NotFound(format!("order {}", provider_order_id)))?;
        order.state = ProviderOrderState::Confirmed;

        let payment = ProviderPayment {
            id: format!("pay_{}", provider_order_id),
            state: SettlementState::Succeeded,
            amount: amount.clone(),
            raw: json!({ "order_id": provider_order_id }),
        };
        self.payments_by_key
            .lock()
            .unwrap()
            .insert(key.as_str().to_string(), payment.clone());
        Ok(payment)
    }

    async fn create_refund(
        &self,
        provider_order_id: &str,
        request_refund: bool,
        key: &IdempotencyKey,
    ) -> CoreResult<ProviderRefund> {
        self.log.enter("create_refund", Some(key))?;

        if let Some(existing) = self.refunds_by_key.lock().unwrap().get(key.as_str()) {
            return Ok(existing.clone());
        }

        let mut orders = self.orders.lock().unwrap();
        let order = orders
            .get_mut(provider_order_id)
            .ok_or_else(|| CoreError::NotFound(format!("order {}", provider_order_id)))?;
        order.state = ProviderOrderState::Cancelled;

        let state = if self.refunds_settle_immediately {
            SettlementState::Succeeded
        } else {
            SettlementState::Pending
        };
        let refund = ProviderRefund {
            id: format!("ore_{}", provider_order_id),
            order_id: provider_order_id.to_string(),
            amount: request_refund.then(|| order.total.clone()),
            state,
            raw: json!({ "order_id": provider_order_id, "request_refund": request_refund }),
        };
        self.refunds_by_key
            .lock()
            .unwrap()
            .insert(key.as_str().to_string(), refund.clone());
        Ok(refund)
    }

    async fn list_loyalty_programmes(
        &self,
        owner_airline_id: Option<&str>,
    ) -> CoreResult<Vec<LoyaltyProgramme>> {
        self.log.enter("list_loyalty_programmes", None)?;
        Ok(self
            .loyalty_programmes
            .lock()
            .unwrap()
            .iter()
            .filter(|p| owner_airline_id.map_or(true, |id| p.owner_airline_id.as_deref() == Some(id)))
            .cloned()
            .collect())
    }

    async fn get_seat_map(&self, offer_id: &str) -> CoreResult<Vec<SeatMap>> {
        self.log.enter("get_seat_map", None)?;
        if !self.offers.lock().unwrap().contains_key(offer_id) {
            return Err(CoreError::NotFound(format!("offer {}", offer_id)));
        }
        Ok(vec![])
    }

    async fn suggest_places(&self, query: &str) -> CoreResult<Vec<Place>> {
        self.log.enter("suggest_places", None)?;
        let query = query.to_lowercase();
        Ok(self
            .places
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.name.to_lowercase().contains(&query))
            .cloned()
            .collect())
    }
}

/// Payment processor double. Intents are idempotent per key and end in `next_status`.
pub struct ScriptedPaymentProcessor {
    log: CallLog,
    customers: Mutex<HashMap<String, Customer>>,
    intents_by_key: Mutex<HashMap<String, PaymentIntent>>,
    next_status: Mutex<PaymentIntentStatus>,
}

impl Default for ScriptedPaymentProcessor {
    fn default() -> Self {
        Self {
            log: CallLog::default(),
            customers: Mutex::new(HashMap::new()),
            intents_by_key: Mutex::new(HashMap::new()),
            next_status: Mutex::new(PaymentIntentStatus::Succeeded),
        }
    }
}

impl ScriptedPaymentProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status given to intents created from now on
    pub fn set_next_status(&self, status: PaymentIntentStatus) {
        *self.next_status.lock().unwrap() = status;
    }

    /// Move an existing intent to a new status, as the processor would between polls
    pub fn settle_intent(&self, intent_id: &str, status: PaymentIntentStatus) {
        for intent in self.intents_by_key.lock().unwrap().values_mut() {
            if intent.id == intent_id {
                intent.status = status.clone();
            }
        }
    }

    pub fn fail_next(&self, operation: &'static str, error: CoreError) {
        self.log.fail_next(operation, error);
    }

    pub fn calls_to(&self, operation: &str) -> usize {
        self.log.count(operation)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.log.all()
    }

    pub fn customers_created(&self) -> usize {
        self.customers.lock().unwrap().len()
    }
}

#[async_trait]
impl PaymentProcessor for ScriptedPaymentProcessor {
    async fn get_or_create_customer(&self, email: &str, _name: Option<&str>) -> CoreResult<Customer> {
        self.log.enter("get_or_create_customer", None)?;
        let normalized = email.trim().to_lowercase();
        let mut customers = self.customers.lock().unwrap();
        let n = customers.len() + 1;
        Ok(customers
            .entry(normalized.clone())
            .or_insert_with(|| Customer {
                id: format!("cus_{:04}", n),
                email: Masked::new(normalized),
            })
            .clone())
    }

    async fn create_checkout_session(
        &self,
        customer_id: &str,
        price_ref: &str,
        _success_url: &str,
        _cancel_url: &str,
    ) -> CoreResult<HostedSession> {
        self.log.enter("create_checkout_session", None)?;
        Ok(HostedSession {
            id: format!("cs_{}_{}", customer_id, price_ref),
            url: format!("https://checkout.test/{}", customer_id),
        })
    }

    async fn create_billing_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> CoreResult<HostedSession> {
        self.log.enter("create_billing_portal_session", None)?;
        Ok(HostedSession {
            id: format!("bps_{}", customer_id),
            url: format!("https://billing.test/{}?return={}", customer_id, return_url),
        })
    }

    async fn create_payment_intent(
        &self,
        request: &CreatePaymentIntent,
        key: &IdempotencyKey,
    ) -> CoreResult<PaymentIntent> {
        self.log.enter("create_payment_intent", Some(key))?;
        let status = self.next_status.lock().unwrap().clone();
        let mut intents = self.intents_by_key.lock().unwrap();
        let n = intents.len() + 1;
        Ok(intents
            .entry(key.as_str().to_string())
            .or_insert_with(|| PaymentIntent {
                id: format!("pi_{:04}", n),
                amount_minor: request.amount_minor,
                currency: request.currency.clone(),
                status,
                customer_id: request.customer_id.clone(),
                client_secret: Some(Masked::new(format!("pi_{:04}_secret", n))),
                metadata: request.metadata.clone(),
                raw: json!({ "amount": request.amount_minor }),
            })
            .clone())
    }

    async fn retrieve_payment_intent(&self, intent_id: &str) -> CoreResult<PaymentIntent> {
        self.log.enter("retrieve_payment_intent", None)?;
        self.intents_by_key
            .lock()
            .unwrap()
            .values()
            .find(|i| i.id == intent_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("payment intent {}", intent_id)))
    }
}
