pub mod http;
pub mod content;
pub mod payments;

pub use content::ContentGateway;
pub use payments::ProcessorGateway;
