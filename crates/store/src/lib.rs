//! Persistence for the records owned by the order and payment services.
//!
//! Each repository trait has an in-memory implementation (tests, local
//! development) and a PostgreSQL implementation. Writes that must not race
//! with concurrent requests are expressed as compare-and-set operations so
//! no lock is ever held across a network call by the callers.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use store::{
    CompensationRepository, OrderRepository, OrderStatusChange, PaymentRepository, Store,
};
