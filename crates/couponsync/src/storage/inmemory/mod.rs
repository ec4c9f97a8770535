//! In-memory storage backend.
//!
//! Stores every document in a single map wrapped in `Arc<RwLock<_>>`. Data
//! is not persisted and is lost when the repository is dropped.

mod repository;

pub use repository::InMemoryRepository;
