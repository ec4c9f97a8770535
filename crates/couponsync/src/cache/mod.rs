//! Cache and broker backends.
//!
//! Concrete implementations of the traits defined in
//! `couponsync_core::cache`, selected at compile time via feature flags,
//! plus the [`CachePort`] that every caller goes through.
//!
//! # Feature Flags
//!
//! - `memory` (default): in-process LRU cache and broadcast-channel broker
//! - `redis`: Redis cache (`SCAN`-based pattern deletion) and Redis pub/sub
//!
//! These features are mutually exclusive - only one backend can be
//! enabled at a time.

// Compile-time checks for mutual exclusivity
#[cfg(all(feature = "memory", feature = "redis"))]
compile_error!(
    "Features 'memory' and 'redis' are mutually exclusive. \
    Enable only one cache backend at a time."
);

#[cfg(not(any(feature = "memory", feature = "redis")))]
compile_error!(
    "No cache backend selected. Enable 'memory' or 'redis' feature. \
    Example: cargo build -p couponsync --features memory"
);

mod port;

// The memory backend doubles as the test backend under either feature.
#[cfg(any(feature = "memory", test))]
pub mod memory;

#[cfg(feature = "redis")]
pub mod redis_impl;

pub use port::{CacheOpResult, CachePort, CachePortSettings, CacheStats};

#[cfg(any(feature = "memory", test))]
#[allow(unused_imports)]
pub use memory::{MemoryCache, MemoryPubSub};

#[cfg(feature = "redis")]
#[allow(unused_imports)]
pub use redis_impl::{RedisCache, RedisPubSub};
