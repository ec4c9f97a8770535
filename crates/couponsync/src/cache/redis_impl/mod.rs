//! Redis cache backend implementation.
//!
//! Provides a distributed cache and broker for multi-instance deployments.

mod cache;
mod error;
mod pubsub;

pub use cache::RedisCache;
pub use pubsub::RedisPubSub;
