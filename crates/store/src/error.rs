use domain::{DomainError, PaymentProvider};
use thiserror::Error;

/// Errors that can occur when interacting with the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An order with the same order number already exists.
    #[error("Duplicate order number: {0}")]
    DuplicateOrderNumber(String),

    /// Another payment already carries this provider reference.
    #[error("Duplicate external reference {reference} for provider {provider}")]
    DuplicateExternalReference {
        provider: PaymentProvider,
        reference: String,
    },

    /// The store cannot serve requests right now.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A stored value violates a domain rule (corrupt or foreign data).
    #[error("Invalid stored data: {0}")]
    Domain(#[from] DomainError),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
