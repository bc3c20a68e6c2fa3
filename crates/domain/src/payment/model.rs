//! The payment attempt record.

use chrono::{DateTime, Utc};
use common::{OrderId, PaymentId, UserId};
use serde::{Deserialize, Serialize};

use super::{PaymentProvider, PaymentStatus};
use crate::error::DomainError;
use crate::order::Money;

/// One attempt to pay for an order.
///
/// Attempts are never deleted; a retry after failure creates a new row so the
/// history of what each gateway was asked and answered stays intact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub order_id: OrderId,
    pub user_id: UserId,
    pub provider: PaymentProvider,
    pub amount: Money,
    pub currency: String,
    pub status: PaymentStatus,
    /// Gateway receipt / charge id, known once the payment completes.
    pub transaction_id: Option<String>,
    /// Gateway correlation id used to match callbacks to this attempt.
    pub external_reference: Option<String>,
    pub phone_number: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Creates a new attempt in `Pending`.
    pub fn new_pending(
        order_id: OrderId,
        user_id: UserId,
        provider: PaymentProvider,
        amount: Money,
        currency: impl Into<String>,
        phone_number: Option<String>,
    ) -> Result<Self, DomainError> {
        if !amount.is_positive() {
            return Err(DomainError::Validation(format!(
                "payment amount must be positive, got {amount}"
            )));
        }
        let currency = currency.into().trim().to_ascii_uppercase();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(DomainError::Validation(format!(
                "currency must be a three-letter ISO code, got {currency:?}"
            )));
        }
        let now = Utc::now();
        Ok(Self {
            id: PaymentId::new(),
            order_id,
            user_id,
            provider,
            amount,
            currency,
            status: PaymentStatus::Pending,
            transaction_id: None,
            external_reference: None,
            phone_number,
            metadata: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Fails unless the attempt may move to `next`.
    pub fn check_transition(&self, next: PaymentStatus) -> Result<(), DomainError> {
        if self.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(DomainError::InvalidPaymentTransition {
                from: self.status,
                to: next,
            })
        }
    }
}
