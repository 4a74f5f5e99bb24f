pub mod models;
pub mod machine;
pub mod passengers;
pub mod repository;
pub mod memory;
pub mod loyalty;
pub mod booking;
pub mod cancellation;
pub mod reconcile;
pub mod webhooks;

#[cfg(test)]
mod fixtures;

pub use booking::{Booker, BookingService, PayOrder, PaymentOutcome, PlaceOrder};
pub use cancellation::{CancelOrder, CancellationOutcome, CancellationService};
pub use loyalty::LoyaltyService;
pub use machine::{BookingPhase, BookingTrigger, TransitionError};
pub use memory::MemoryStore;
pub use models::{
    ChangeActor, LoyaltyAccount, Order, OrderChange, OrderStatus, Payment, PaymentStatus, Refund,
    StatusChange,
};
pub use reconcile::{ReconcilePolicy, ReconcileReport};
pub use repository::{
    InsertOutcome, LoyaltyAccountRepository, OrderRepository, PaymentRepository, RefundRepository,
    TransitionOutcome, WebhookEventRepository,
};
