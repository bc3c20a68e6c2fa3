use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use common::{CompensationId, OrderId, PaymentId, UserId};
use domain::{Order, Payment, PaymentProvider, PaymentStatus, PendingCompensation};
use tokio::sync::RwLock;

use crate::{
    Result, StoreError,
    store::{CompensationRepository, OrderRepository, OrderStatusChange, PaymentRepository},
};

#[derive(Default)]
struct State {
    orders: HashMap<OrderId, Order>,
    payments: HashMap<PaymentId, Payment>,
    compensations: HashMap<CompensationId, PendingCompensation>,
}

/// In-memory store for tests and local development.
///
/// Mirrors the constraints of the PostgreSQL schema: unique order numbers,
/// unique `(provider, external_reference)` and conditional updates.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
    fail_on_insert_order: Arc<AtomicBool>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next order inserts fail as if the database were down.
    pub fn set_fail_on_insert_order(&self, fail: bool) {
        self.fail_on_insert_order.store(fail, Ordering::SeqCst);
    }

    /// Returns the number of stored orders.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    /// Returns the number of stored payment attempts.
    pub async fn payment_count(&self) -> usize {
        self.state.read().await.payments.len()
    }

    /// Returns every compensation, resolved or not.
    pub async fn all_compensations(&self) -> Vec<PendingCompensation> {
        let state = self.state.read().await;
        let mut all: Vec<_> = state.compensations.values().cloned().collect();
        all.sort_by_key(|c| c.created_at);
        all
    }

    /// Clears all data.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.orders.clear();
        state.payments.clear();
        state.compensations.clear();
    }
}

#[async_trait]
impl OrderRepository for InMemoryStore {
    async fn insert_order(&self, order: &Order) -> Result<()> {
        if self.fail_on_insert_order.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "order insert failed (simulated)".to_string(),
            ));
        }

        let mut state = self.state.write().await;
        if state
            .orders
            .values()
            .any(|existing| existing.order_number == order.order_number)
        {
            return Err(StoreError::DuplicateOrderNumber(order.order_number.clone()));
        }
        state.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(&id).cloned())
    }

    async fn list_orders_for_user(
        &self,
        user_id: UserId,
        offset: u64,
        limit: u64,
    ) -> Result<(Vec<Order>, u64)> {
        let state = self.state.read().await;
        let mut orders: Vec<&Order> = state
            .orders
            .values()
            .filter(|order| order.user_id == user_id)
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = orders.len() as u64;
        let page = orders
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn update_order_status(
        &self,
        id: OrderId,
        change: OrderStatusChange,
    ) -> Result<Option<Order>> {
        let mut state = self.state.write().await;
        let Some(order) = state.orders.get_mut(&id) else {
            return Ok(None);
        };
        if order.status != change.expected_status
            || order.payment_status != change.expected_payment_status
        {
            return Ok(None);
        }
        order.status = change.status;
        order.payment_status = change.payment_status;
        order.updated_at = Utc::now();
        Ok(Some(order.clone()))
    }
}

#[async_trait]
impl PaymentRepository for InMemoryStore {
    async fn insert_payment(&self, payment: &Payment) -> Result<()> {
        let mut state = self.state.write().await;
        ensure_reference_free(&state, payment)?;
        state.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>> {
        Ok(self.state.read().await.payments.get(&id).cloned())
    }

    async fn find_payment_by_reference(
        &self,
        provider: PaymentProvider,
        reference: &str,
    ) -> Result<Option<Payment>> {
        let state = self.state.read().await;
        Ok(state
            .payments
            .values()
            .find(|p| p.provider == provider && p.external_reference.as_deref() == Some(reference))
            .cloned())
    }

    async fn list_payments_for_order(&self, order_id: OrderId) -> Result<Vec<Payment>> {
        let state = self.state.read().await;
        let mut payments: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| p.order_id == order_id)
            .cloned()
            .collect();
        payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(payments)
    }

    async fn update_payment(&self, payment: &Payment, expected: PaymentStatus) -> Result<bool> {
        let mut state = self.state.write().await;
        ensure_reference_free(&state, payment)?;
        let Some(stored) = state.payments.get_mut(&payment.id) else {
            return Ok(false);
        };
        if stored.status != expected {
            return Ok(false);
        }
        stored.status = payment.status;
        stored.transaction_id = payment.transaction_id.clone();
        stored.external_reference = payment.external_reference.clone();
        stored.metadata = payment.metadata.clone();
        stored.error_message = payment.error_message.clone();
        stored.updated_at = Utc::now();
        Ok(true)
    }
}

fn ensure_reference_free(state: &State, payment: &Payment) -> Result<()> {
    let Some(reference) = payment.external_reference.as_deref() else {
        return Ok(());
    };
    let taken = state.payments.values().any(|other| {
        other.id != payment.id
            && other.provider == payment.provider
            && other.external_reference.as_deref() == Some(reference)
    });
    if taken {
        return Err(StoreError::DuplicateExternalReference {
            provider: payment.provider,
            reference: reference.to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl CompensationRepository for InMemoryStore {
    async fn record_compensation(&self, compensation: &PendingCompensation) -> Result<()> {
        self.state
            .write()
            .await
            .compensations
            .insert(compensation.id, compensation.clone());
        Ok(())
    }

    async fn list_unresolved_compensations(&self) -> Result<Vec<PendingCompensation>> {
        let state = self.state.read().await;
        let mut pending: Vec<_> = state
            .compensations
            .values()
            .filter(|c| !c.resolved)
            .cloned()
            .collect();
        pending.sort_by_key(|c| c.created_at);
        Ok(pending)
    }

    async fn update_compensation(&self, compensation: &PendingCompensation) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(stored) = state.compensations.get_mut(&compensation.id) {
            stored.attempts = compensation.attempts;
            stored.last_error = compensation.last_error.clone();
            stored.resolved = compensation.resolved;
            stored.updated_at = Utc::now();
        }
        Ok(())
    }
}
