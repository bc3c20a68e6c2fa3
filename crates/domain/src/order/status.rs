//! Order state machine.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// The fulfillment status of an order.
///
/// State transitions:
/// ```text
/// Pending ──┬──► Confirmed ──┬──► Processing ──┬──► Paid ──► Shipped ──► Delivered
///           │                │                 ├──► Shipped
///           │                ├──► Paid         └──► Failed
///           │                └──► Cancelled
///           ├──► Cancelled
///           └──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Order persisted, stock reserved, awaiting confirmation or payment.
    #[default]
    Pending,

    /// Order accepted for fulfillment.
    Confirmed,

    /// Order is being prepared.
    Processing,

    /// Payment captured.
    Paid,

    /// Handed to the carrier.
    Shipped,

    /// Received by the customer (terminal state).
    Delivered,

    /// Cancelled by the customer (terminal state).
    Cancelled,

    /// Could not be fulfilled (terminal state).
    Failed,
}

impl OrderStatus {
    /// Returns true if the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed | Cancelled | Failed)
                | (Confirmed, Processing | Paid | Cancelled)
                | (Processing, Paid | Shipped | Failed)
                | (Paid, Shipped)
                | (Shipped, Delivered)
        )
    }

    /// Returns true while a payment attempt may still settle the order.
    pub fn accepts_payment(&self) -> bool {
        matches!(
            self,
            OrderStatus::Pending | OrderStatus::Confirmed | OrderStatus::Processing
        )
    }

    /// Returns true if the customer may cancel the order in this state.
    pub fn can_cancel(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Confirmed)
    }

    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered | OrderStatus::Cancelled | OrderStatus::Failed
        )
    }

    /// Checks a partial update coming from a trusted internal caller.
    ///
    /// Trusted callers skip the full state machine, but a terminal status is
    /// never overwritten with a different one.
    pub fn check_trusted_update(&self, next: OrderStatus) -> Result<(), DomainError> {
        if self.is_terminal() && *self != next {
            return Err(DomainError::InvalidOrderTransition { from: *self, to: next });
        }
        Ok(())
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Processing => "processing",
            OrderStatus::Paid => "paid",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "confirmed" => Ok(OrderStatus::Confirmed),
            "processing" => Ok(OrderStatus::Processing),
            "paid" => Ok(OrderStatus::Paid),
            "shipped" => Ok(OrderStatus::Shipped),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" => Ok(OrderStatus::Cancelled),
            "failed" => Ok(OrderStatus::Failed),
            other => Err(DomainError::UnknownVariant {
                kind: "order status",
                value: other.to_string(),
            }),
        }
    }
}

/// The payment status of an order, as seen by the order service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderPaymentStatus {
    #[default]
    Pending,
    Paid,
    Failed,
    Refunded,
}

impl OrderPaymentStatus {
    /// Checks whether the order's payment status may be replaced by `next`.
    ///
    /// `Paid` never goes back to `Failed` or `Pending`, and `Refunded` is final.
    pub fn check_update(&self, next: OrderPaymentStatus) -> Result<(), DomainError> {
        use OrderPaymentStatus::*;
        let allowed = match (self, next) {
            (Refunded, next) => next == Refunded,
            (Paid, Failed | Pending) => false,
            _ => true,
        };
        if allowed {
            Ok(())
        } else {
            Err(DomainError::InvalidPaymentStatusChange { from: *self, to: next })
        }
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderPaymentStatus::Pending => "pending",
            OrderPaymentStatus::Paid => "paid",
            OrderPaymentStatus::Failed => "failed",
            OrderPaymentStatus::Refunded => "refunded",
        }
    }
}

impl std::fmt::Display for OrderPaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderPaymentStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderPaymentStatus::Pending),
            "paid" => Ok(OrderPaymentStatus::Paid),
            "failed" => Ok(OrderPaymentStatus::Failed),
            "refunded" => Ok(OrderPaymentStatus::Refunded),
            other => Err(DomainError::UnknownVariant {
                kind: "order payment status",
                value: other.to_string(),
            }),
        }
    }
}
