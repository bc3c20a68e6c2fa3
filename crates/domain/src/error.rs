//! Domain error types.

use thiserror::Error;

use crate::order::{OrderPaymentStatus, OrderStatus};
use crate::payment::PaymentStatus;

/// Errors raised by domain rules.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The order state machine does not allow the requested change.
    #[error("Invalid order transition: cannot move from {from} to {to}")]
    InvalidOrderTransition { from: OrderStatus, to: OrderStatus },

    /// The order's payment status may not be replaced.
    #[error("Invalid payment status change: cannot move from {from} to {to}")]
    InvalidPaymentStatusChange {
        from: OrderPaymentStatus,
        to: OrderPaymentStatus,
    },

    /// The payment attempt state machine does not allow the requested change.
    #[error("Invalid payment transition: cannot move from {from} to {to}")]
    InvalidPaymentTransition { from: PaymentStatus, to: PaymentStatus },

    /// Input failed validation.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A stored or transmitted enum value is not recognised.
    #[error("Unknown {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },
}
