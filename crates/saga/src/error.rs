//! Saga error types.

use domain::DomainError;
use store::StoreError;
use thiserror::Error;

use crate::providers::ProviderError;
use crate::services::{StockError, StockShortfall};

/// Errors surfaced by the orchestrator and the reconciler.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The request is malformed or violates a business rule.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The resource does not exist or belongs to another user.
    #[error("Not found: {0}")]
    NotFound(String),

    /// One or more products cannot cover the requested quantity.
    #[error("Insufficient stock for {} product(s)", .0.len())]
    InsufficientStock(Vec<StockShortfall>),

    /// The requested state change is not allowed from the current state.
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// A collaborating service could not be reached.
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The payment gateway refused the request or the callback failed verification.
    #[error("Provider rejected: {0}")]
    ProviderRejected(String),

    /// Store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Anything else that is not the caller's fault.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<DomainError> for SagaError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InvalidOrderTransition { .. }
            | DomainError::InvalidPaymentStatusChange { .. }
            | DomainError::InvalidPaymentTransition { .. } => {
                SagaError::InvalidTransition(err.to_string())
            }
            DomainError::Validation(msg) => SagaError::Validation(msg),
            DomainError::UnknownVariant { .. } => SagaError::Validation(err.to_string()),
        }
    }
}

impl From<StockError> for SagaError {
    fn from(err: StockError) -> Self {
        match err {
            StockError::Insufficient(shortfalls) => SagaError::InsufficientStock(shortfalls),
            StockError::Unavailable(msg) => SagaError::UpstreamUnavailable(msg),
            StockError::Rejected(msg) => SagaError::Internal(format!("stock service: {msg}")),
        }
    }
}

impl From<ProviderError> for SagaError {
    fn from(err: ProviderError) -> Self {
        SagaError::ProviderRejected(err.to_string())
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
