use crate::models::OrderStatus;
use serde::Serialize;

/// Where a booking stands, from the first search to the last refund.
///
/// Only the phases from `OrderPending` on are persisted (as `OrderStatus`); the earlier ones
/// live in the client session.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BookingPhase {
    SearchInitiated,
    OffersListed,
    OfferSelected,
    OrderPending,
    OrderConfirmed,
    RefundRequested,
    Refunded,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingTrigger {
    OffersReturned,
    OfferChosen,
    OrderPlaced,
    PaymentCaptured,
    PaymentRejected,
    RefundRequested,
    RefundCompleted,
    /// Cancelled without money back, by the customer or the provider
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid state transition from {from:?} on {trigger:?}")]
pub struct TransitionError {
    pub from: BookingPhase,
    pub trigger: BookingTrigger,
}

impl BookingPhase {
    /// The single transition table. Anything not listed is rejected.
    pub fn apply(self, trigger: BookingTrigger) -> Result<BookingPhase, TransitionError> {
        use BookingPhase as P;
        use BookingTrigger as T;

        let next = match (self, trigger) {
            (P::SearchInitiated, T::OffersReturned) => P::OffersListed,
            (P::OffersListed, T::OffersReturned) => P::OffersListed,
            (P::OffersListed, T::OfferChosen) => P::OfferSelected,
            (P::OfferSelected, T::OfferChosen) => P::OfferSelected,
            (P::OfferSelected, T::OrderPlaced) => P::OrderPending,
            (P::OrderPending, T::PaymentCaptured) => P::OrderConfirmed,
            (P::OrderPending, T::PaymentRejected) => P::Failed,
            // Hold lapsed or was withdrawn upstream
            (P::OrderPending, T::Cancelled) => P::Cancelled,
            (P::OrderConfirmed, T::RefundRequested) => P::RefundRequested,
            (P::OrderConfirmed, T::RefundCompleted) => P::Refunded,
            (P::OrderConfirmed, T::Cancelled) => P::Cancelled,
            (P::RefundRequested, T::RefundCompleted) => P::Refunded,
            (from, trigger) => return Err(TransitionError { from, trigger }),
        };
        Ok(next)
    }

    pub fn status(self) -> Option<OrderStatus> {
        match self {
            BookingPhase::OrderPending => Some(OrderStatus::Pending),
            BookingPhase::OrderConfirmed => Some(OrderStatus::Confirmed),
            BookingPhase::RefundRequested => Some(OrderStatus::RefundRequested),
            BookingPhase::Refunded => Some(OrderStatus::Refunded),
            BookingPhase::Cancelled => Some(OrderStatus::Cancelled),
            BookingPhase::Failed => Some(OrderStatus::Failed),
            _ => None,
        }
    }
}

impl From<OrderStatus> for BookingPhase {
    fn from(status: OrderStatus) -> Self {
        match status {
            OrderStatus::Pending => BookingPhase::OrderPending,
            OrderStatus::Confirmed => BookingPhase::OrderConfirmed,
            OrderStatus::RefundRequested => BookingPhase::RefundRequested,
            OrderStatus::Refunded => BookingPhase::Refunded,
            OrderStatus::Cancelled => BookingPhase::Cancelled,
            OrderStatus::Failed => BookingPhase::Failed,
        }
    }
}

impl OrderStatus {
    /// Status after `trigger`, or an error if the trigger is not allowed here.
    pub fn apply(self, trigger: BookingTrigger) -> Result<OrderStatus, TransitionError> {
        let next = BookingPhase::from(self).apply(trigger)?;
        next.status().ok_or(TransitionError {
            from: BookingPhase::from(self),
            trigger,
        })
    }

    /// Every persisted status from which `trigger` is allowed.
    ///
    /// Used as the `from` set of a compare-and-set update.
    pub fn sources_for(trigger: BookingTrigger) -> Vec<OrderStatus> {
        [
            OrderStatus::Pending,
            OrderStatus::Confirmed,
            OrderStatus::RefundRequested,
            OrderStatus::Refunded,
            OrderStatus::Cancelled,
            OrderStatus::Failed,
        ]
        .into_iter()
        .filter(|s| s.apply(trigger).is_ok())
        .collect()
    }

    /// Status every allowed source lands on for `trigger`.
    pub fn target_of(trigger: BookingTrigger) -> Option<OrderStatus> {
        Self::sources_for(trigger)
            .first()
            .and_then(|s| s.apply(trigger).ok())
    }
}
