//! Stock compensations that could not be applied when they were first owed.

use chrono::{DateTime, Utc};
use common::{CompensationId, OrderId};
use serde::{Deserialize, Serialize};

use crate::order::StockDelta;

/// A persisted marker for stock the catalog still owes back (or still has to take).
///
/// Written when a compensating stock call keeps failing, and cleared by the
/// retry worker once the deltas are finally applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCompensation {
    pub id: CompensationId,
    pub order_id: OrderId,
    pub deltas: Vec<StockDelta>,
    pub reason: String,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PendingCompensation {
    pub fn new(
        order_id: OrderId,
        deltas: Vec<StockDelta>,
        reason: impl Into<String>,
        attempts: u32,
        last_error: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: CompensationId::new(),
            order_id,
            deltas,
            reason: reason.into(),
            attempts,
            last_error: Some(last_error.into()),
            resolved: false,
            created_at: now,
            updated_at: now,
        }
    }
}
