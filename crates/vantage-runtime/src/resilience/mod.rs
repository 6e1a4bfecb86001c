//! Failure-handling primitives: circuit breaking and bounded retry.

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitStateKind, CircuitStatus};
pub use retry::RetryPolicy;
