pub mod events;
pub mod processor;
pub mod signature;

pub use events::{EventAction, WebhookEvent, WebhookProvider, WebhookStatus};
pub use processor::{DeferralPolicy, DeferredRun, WebhookOutcome, WebhookProcessor};
pub use signature::{SignatureError, SignatureVerifier};
