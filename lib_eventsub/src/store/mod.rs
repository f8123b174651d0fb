//! # Store Module
//!
//! Concrete [`SubscriptionStore`](crate::collaborators::SubscriptionStore) and
//! [`TokenSource`](crate::collaborators::TokenSource) implementations.
//!
//! ## Features
//! - **`postgres`**: enables [`postgres::PgStore`], backed by `deadpool-postgres`.
//!
//! [`memory::MemoryStore`] is always available.

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgStore;
