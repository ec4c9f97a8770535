//! Functional core for couponsync.
//!
//! Pure types, traits and functions shared by the coordinator service. Nothing
//! in this crate performs I/O on its own; backends implement the traits
//! declared here.

pub mod cache;
pub mod entity;
pub mod resilience;
pub mod revalidation;
pub mod storage;
