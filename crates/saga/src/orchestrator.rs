//! Order orchestrator: creation, cancellation and status changes of orders,
//! with stock reserved and given back through the stock service.

use std::collections::BTreeMap;
use std::time::Instant;

use async_trait::async_trait;
use common::{OrderId, UserId};
use domain::{
    Order, OrderPaymentStatus, OrderStatus, PendingCompensation, PricedLine, ProductId,
    ShippingAddress, StockDelta, generate_order_number,
};
use serde::{Deserialize, Serialize};
use store::{OrderStatusChange, Store, StoreError};

use crate::error::{Result, SagaError};
use crate::retry::{Exhausted, RetryPolicy};
use crate::services::{
    OrderStatusUpdater, StockError, StockQuery, StockReservation, StockShortfall,
};

/// Order number collisions tolerated before giving up.
const MAX_ORDER_NUMBER_ATTEMPTS: u32 = 3;

/// Conditional status writes retried when another writer got there first.
const MAX_STATUS_UPDATE_ATTEMPTS: u32 = 3;

const MAX_PAGE_SIZE: u32 = 100;

/// One requested line of a new order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrderItem {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// A new order as submitted by a customer. Prices are never taken from here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub items: Vec<CreateOrderItem>,
    pub shipping_address: ShippingAddress,
    #[serde(default)]
    pub notes: Option<String>,
}

/// One page of a user's orders.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderPage {
    pub orders: Vec<Order>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u32,
}

/// Runs the order side of the fulfillment saga.
///
/// Stock is decremented with a conditional call before the order is
/// committed. If the commit fails, or the order is cancelled later, the
/// decrement is undone. An undo that keeps failing is persisted as a
/// [`PendingCompensation`] and picked up by
/// [`retry_pending_compensations`](Self::retry_pending_compensations).
#[derive(Debug, Clone)]
pub struct OrderOrchestrator<S, K> {
    store: S,
    stock: K,
    retry: RetryPolicy,
}

impl<S, K> OrderOrchestrator<S, K>
where
    S: Store,
    K: StockReservation,
{
    pub fn new(store: S, stock: K) -> Self {
        Self {
            store,
            stock,
            retry: RetryPolicy::default(),
        }
    }

    /// Replaces the retry policy used for compensating stock calls.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn stock(&self) -> &K {
        &self.stock
    }

    /// Places an order for `user_id`.
    ///
    /// Prices and names come from the stock service. The returned order is
    /// `pending` with payment status `pending`.
    #[tracing::instrument(skip(self, request), fields(items = request.items.len()))]
    pub async fn create_order(&self, user_id: UserId, request: CreateOrderRequest) -> Result<Order> {
        let started = Instant::now();
        let CreateOrderRequest {
            items,
            shipping_address,
            notes,
        } = request;

        let queries = merge_items(items)?;
        shipping_address.validate()?;

        // 1. Authoritative availability and prices
        let availability = self.stock.check_availability(&queries).await?;
        let mut shortfalls = Vec::new();
        let mut lines = Vec::with_capacity(queries.len());
        for query in &queries {
            let found = availability
                .iter()
                .find(|entry| entry.product_id == query.product_id);
            match found {
                Some(entry) if entry.available => lines.push(PricedLine {
                    product_id: query.product_id.clone(),
                    product_name: if entry.name.trim().is_empty() {
                        query.product_id.to_string()
                    } else {
                        entry.name.clone()
                    },
                    quantity: query.quantity,
                    unit_price: entry.price,
                }),
                other => shortfalls.push(StockShortfall {
                    product_id: query.product_id.clone(),
                    requested: i64::from(query.quantity),
                    available: other.map(|entry| entry.stock_remaining).unwrap_or(0),
                }),
            }
        }
        if !shortfalls.is_empty() {
            tracing::info!(shortfalls = shortfalls.len(), "order rejected: insufficient stock");
            return Err(SagaError::InsufficientStock(shortfalls));
        }

        let mut order = Order::place(
            user_id,
            generate_order_number(),
            lines,
            shipping_address,
            notes,
        )?;

        // 2. Conditional decrement; the stock service is the oversell guard
        let reserve: Vec<StockDelta> = order
            .restock_deltas()
            .iter()
            .map(StockDelta::inverse)
            .collect();
        if let Err(err) = self.stock.apply_delta(&reserve).await {
            match &err {
                StockError::Insufficient(_) => {
                    tracing::info!(
                        order_id = %order.id,
                        "order rejected: stock taken concurrently"
                    );
                }
                // A timeout may hide an applied decrement, so nothing is restored here.
                StockError::Unavailable(_) => {
                    metrics::counter!("stock_reservations_ambiguous_total").increment(1);
                    tracing::error!(
                        order_id = %order.id,
                        order_number = %order.order_number,
                        deltas = ?reserve,
                        error = %err,
                        "stock reservation outcome unknown, order not saved"
                    );
                }
                StockError::Rejected(_) => {
                    tracing::error!(
                        order_id = %order.id,
                        deltas = ?reserve,
                        error = %err,
                        "stock reservation rejected"
                    );
                }
            }
            return Err(err.into());
        }

        // 3. Local commit
        let mut attempt = 1;
        loop {
            match self.store.insert_order(&order).await {
                Ok(()) => break,
                Err(StoreError::DuplicateOrderNumber(number))
                    if attempt < MAX_ORDER_NUMBER_ATTEMPTS =>
                {
                    tracing::warn!(order_number = %number, attempt, "order number collision, regenerating");
                    order.order_number = generate_order_number();
                    attempt += 1;
                }
                Err(err) => {
                    tracing::error!(order_id = %order.id, error = %err, "order commit failed after stock was reserved");
                    self.compensate(order.id, order.restock_deltas(), "order commit failed")
                        .await?;
                    return Err(SagaError::Internal(format!("failed to save order: {err}")));
                }
            }
        }

        metrics::counter!("orders_created_total").increment(1);
        metrics::histogram!("order_create_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        tracing::info!(
            order_id = %order.id,
            order_number = %order.order_number,
            total_cents = order.total.cents(),
            "order created"
        );
        Ok(order)
    }

    /// Cancels a `pending` or `confirmed` order and gives its stock back.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_order(&self, order_id: OrderId, user_id: UserId) -> Result<Order> {
        let order = self.get_order(order_id, user_id).await?;
        if !order.status.can_cancel() {
            return Err(SagaError::InvalidTransition(format!(
                "cannot cancel order in status {}",
                order.status
            )));
        }

        // Only the writer that wins this change restores the stock.
        let change =
            OrderStatusChange::from_current(&order, OrderStatus::Cancelled, order.payment_status);
        let cancelled = self
            .store
            .update_order_status(order.id, change)
            .await?
            .ok_or_else(|| {
                SagaError::InvalidTransition("order was modified concurrently".to_string())
            })?;

        let restored = self
            .compensate(order.id, order.restock_deltas(), "order cancelled")
            .await?;

        metrics::counter!("orders_cancelled_total").increment(1);
        tracing::info!(order_id = %order.id, stock_restored = restored, "order cancelled");
        Ok(cancelled)
    }

    /// Trusted partial status update.
    ///
    /// Skips the full state machine, but never replaces a terminal order
    /// status with a different one and never downgrades a `paid` payment
    /// status.
    #[tracing::instrument(skip(self))]
    pub async fn update_status(
        &self,
        order_id: OrderId,
        status: Option<OrderStatus>,
        payment_status: Option<OrderPaymentStatus>,
    ) -> Result<Order> {
        if status.is_none() && payment_status.is_none() {
            return Err(SagaError::Validation(
                "status or payment_status is required".to_string(),
            ));
        }

        for attempt in 1..=MAX_STATUS_UPDATE_ATTEMPTS {
            let order = self
                .store
                .get_order(order_id)
                .await?
                .ok_or_else(|| SagaError::NotFound(format!("order {order_id}")))?;

            if let Some(next) = status {
                order.status.check_trusted_update(next)?;
            }
            if let Some(next) = payment_status {
                order.payment_status.check_update(next)?;
            }

            let next_status = status.unwrap_or(order.status);
            let next_payment_status = payment_status.unwrap_or(order.payment_status);
            if next_status == order.status && next_payment_status == order.payment_status {
                return Ok(order);
            }

            let change = OrderStatusChange::from_current(&order, next_status, next_payment_status);
            if let Some(updated) = self.store.update_order_status(order_id, change).await? {
                tracing::info!(
                    order_id = %order_id,
                    status = %updated.status,
                    payment_status = %updated.payment_status,
                    "order status updated"
                );
                return Ok(updated);
            }
            tracing::debug!(order_id = %order_id, attempt, "order changed underneath, re-reading");
        }

        Err(SagaError::Internal(format!(
            "order {order_id} kept changing during status update"
        )))
    }

    /// Returns one page of the user's orders, newest first.
    #[tracing::instrument(skip(self))]
    pub async fn list_orders(&self, user_id: UserId, page: u32, limit: u32) -> Result<OrderPage> {
        let page = page.max(1);
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let offset = u64::from(page - 1) * u64::from(limit);

        let (orders, total) = self
            .store
            .list_orders_for_user(user_id, offset, u64::from(limit))
            .await?;
        let total_pages = u32::try_from(total.div_ceil(u64::from(limit))).unwrap_or(u32::MAX);

        Ok(OrderPage {
            orders,
            total,
            page,
            limit,
            total_pages,
        })
    }

    /// Loads an order owned by `user_id`.
    pub async fn get_order(&self, order_id: OrderId, user_id: UserId) -> Result<Order> {
        self.store
            .get_order(order_id)
            .await?
            .filter(|order| order.user_id == user_id)
            .ok_or_else(|| SagaError::NotFound(format!("order {order_id}")))
    }

    /// Re-applies every unresolved compensation once.
    ///
    /// Returns how many were resolved.
    #[tracing::instrument(skip(self))]
    pub async fn retry_pending_compensations(&self) -> Result<usize> {
        let pending = self.store.list_unresolved_compensations().await?;
        let mut resolved = 0;

        for mut compensation in pending {
            let outcome = self.stock.apply_delta(&compensation.deltas).await;
            compensation.attempts += 1;
            compensation.updated_at = chrono::Utc::now();
            match outcome {
                Ok(()) => {
                    compensation.resolved = true;
                    compensation.last_error = None;
                    resolved += 1;
                    tracing::info!(
                        order_id = %compensation.order_id,
                        compensation_id = %compensation.id,
                        attempts = compensation.attempts,
                        "pending compensation applied"
                    );
                }
                Err(err) => {
                    tracing::warn!(
                        order_id = %compensation.order_id,
                        compensation_id = %compensation.id,
                        attempts = compensation.attempts,
                        error = %err,
                        "pending compensation still failing"
                    );
                    compensation.last_error = Some(err.to_string());
                }
            }
            self.store.update_compensation(&compensation).await?;
        }

        Ok(resolved)
    }

    /// Applies `deltas` with retry. Returns `false` when they could not be
    /// applied and a compensation marker was recorded instead.
    async fn compensate(
        &self,
        order_id: OrderId,
        deltas: Vec<StockDelta>,
        reason: &str,
    ) -> Result<bool> {
        let outcome = self
            .retry
            .run("stock restore", || self.stock.apply_delta(&deltas))
            .await;
        let Err(Exhausted { error, attempts }) = outcome else {
            return Ok(true);
        };

        tracing::error!(
            order_id = %order_id,
            deltas = ?deltas,
            attempts,
            error = %error,
            "stock restore failed, recording pending compensation"
        );
        let marker = PendingCompensation::new(order_id, deltas, reason, attempts, error.to_string());
        self.store.record_compensation(&marker).await.map_err(|err| {
            tracing::error!(
                order_id = %order_id,
                deltas = ?marker.deltas,
                error = %err,
                "failed to record pending compensation"
            );
            SagaError::Internal(format!(
                "stock for order {order_id} was not restored and could not be recorded: {err}"
            ))
        })?;
        metrics::counter!("stock_compensations_recorded_total").increment(1);
        Ok(false)
    }
}

#[async_trait]
impl<S, K> OrderStatusUpdater for OrderOrchestrator<S, K>
where
    S: Store,
    K: StockReservation,
{
    async fn update_status(
        &self,
        order_id: OrderId,
        status: Option<OrderStatus>,
        payment_status: Option<OrderPaymentStatus>,
    ) -> Result<()> {
        OrderOrchestrator::update_status(self, order_id, status, payment_status)
            .await
            .map(|_| ())
    }
}

/// Validates requested lines and merges repeated products, keeping first-seen order.
fn merge_items(items: Vec<CreateOrderItem>) -> Result<Vec<StockQuery>> {
    if items.is_empty() {
        return Err(SagaError::Validation(
            "order must contain at least one item".to_string(),
        ));
    }

    let mut positions: BTreeMap<ProductId, usize> = BTreeMap::new();
    let mut queries: Vec<StockQuery> = Vec::with_capacity(items.len());
    for item in items {
        if item.quantity == 0 {
            return Err(SagaError::Validation(format!(
                "quantity for {} must be at least 1",
                item.product_id
            )));
        }
        if item.product_id.as_str().trim().is_empty() {
            return Err(SagaError::Validation("product_id is required".to_string()));
        }
        match positions.get(&item.product_id) {
            Some(&index) => {
                let merged = queries[index].quantity.checked_add(item.quantity).ok_or_else(|| {
                    SagaError::Validation(format!("quantity for {} is too large", item.product_id))
                })?;
                queries[index].quantity = merged;
            }
            None => {
                positions.insert(item.product_id.clone(), queries.len());
                queries.push(StockQuery {
                    product_id: item.product_id,
                    quantity: item.quantity,
                });
            }
        }
    }
    Ok(queries)
}
