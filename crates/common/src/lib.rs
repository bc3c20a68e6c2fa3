//! Identifier types shared by every service crate.

mod types;

pub use types::{CompensationId, OrderId, OrderItemId, PaymentId, UserId};
