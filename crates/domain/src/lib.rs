//! Domain layer for the order fulfillment services.
//!
//! This crate holds the records each service owns and the rules that guard
//! them:
//! - Order / OrderItem with the order state machine
//! - Payment attempts with their own state machine
//! - Pending stock compensations owed after a partial saga failure
//!
//! Nothing here performs I/O.

pub mod compensation;
pub mod error;
pub mod order;
pub mod payment;

pub use compensation::PendingCompensation;
pub use error::DomainError;
pub use order::{
    Money, Order, OrderItem, OrderPaymentStatus, OrderStatus, PricedLine, ProductId,
    ShippingAddress, StockDelta, generate_order_number,
};
pub use payment::{Payment, PaymentProvider, PaymentStatus};
