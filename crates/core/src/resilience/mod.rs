//! Circuit breaker state machine.
//!
//! The state machine here is pure: it takes the current instant as an
//! argument and never sleeps or spawns. The service wraps one instance per
//! [`Dependency`] behind a lock and drives it around real calls.

mod config;
mod state;

pub use config::{BreakerConfig, Dependency};
pub use state::{Admission, BreakerStatus, CircuitBreakerState, CircuitState, Transition};
