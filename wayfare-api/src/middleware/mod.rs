pub mod auth;
pub mod rate_limit;
pub mod resiliency;

pub use auth::{customer_auth_middleware, CustomerClaims};
pub use rate_limit::rate_limit_middleware;
pub use resiliency::{circuit_breaker_middleware, CircuitBreaker, CircuitState, Resiliency};
