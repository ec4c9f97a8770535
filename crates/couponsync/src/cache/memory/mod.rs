//! In-memory cache backend implementation.
//!
//! Provides an LRU cache with TTL support and a broadcast-channel broker
//! for single-instance deployments.

mod cache;
mod pubsub;

pub use cache::MemoryCache;
pub use pubsub::MemoryPubSub;
