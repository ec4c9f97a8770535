//! Primary datastore implementations.
//!
//! Implements `couponsync_core::storage::EntityRepository`. Only the
//! in-memory backend ships; the datastore is an external collaborator of
//! the coordinator and any document store with atomic per-document updates
//! can stand in for it.

pub mod inmemory;

pub use inmemory::InMemoryRepository;
