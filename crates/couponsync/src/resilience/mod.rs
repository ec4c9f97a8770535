//! Circuit breaker registry guarding the downstream dependencies.

mod breaker;

pub use breaker::{BreakerError, CircuitBreaker};
