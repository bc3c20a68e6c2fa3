use async_trait::async_trait;
use common::{OrderId, PaymentId, UserId};
use domain::{
    Order, OrderPaymentStatus, OrderStatus, Payment, PaymentProvider, PaymentStatus,
    PendingCompensation,
};

use crate::Result;

/// A conditional status write on an order.
///
/// The write is applied only while the stored order still has the expected
/// status pair, so two concurrent writers cannot both win.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderStatusChange {
    pub expected_status: OrderStatus,
    pub expected_payment_status: OrderPaymentStatus,
    pub status: OrderStatus,
    pub payment_status: OrderPaymentStatus,
}

impl OrderStatusChange {
    /// Builds a change from the order as it was read.
    pub fn from_current(
        order: &Order,
        status: OrderStatus,
        payment_status: OrderPaymentStatus,
    ) -> Self {
        Self {
            expected_status: order.status,
            expected_payment_status: order.payment_status,
            status,
            payment_status,
        }
    }
}

/// Persistence for orders and their line items.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Inserts an order together with all of its items.
    ///
    /// Either the order and every item are stored or nothing is.
    /// Fails with `DuplicateOrderNumber` if the order number is taken.
    async fn insert_order(&self, order: &Order) -> Result<()>;

    /// Loads an order with its items.
    async fn get_order(&self, id: OrderId) -> Result<Option<Order>>;

    /// Returns one page of a user's orders, newest first, and the user's total
    /// order count.
    async fn list_orders_for_user(
        &self,
        user_id: UserId,
        offset: u64,
        limit: u64,
    ) -> Result<(Vec<Order>, u64)>;

    /// Applies a conditional status change.
    ///
    /// Returns the updated order, or `None` if the order is missing or no
    /// longer has the expected statuses.
    async fn update_order_status(
        &self,
        id: OrderId,
        change: OrderStatusChange,
    ) -> Result<Option<Order>>;
}

/// Persistence for payment attempts.
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Inserts a new payment attempt.
    async fn insert_payment(&self, payment: &Payment) -> Result<()>;

    /// Loads a payment attempt by id.
    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>>;

    /// Finds the attempt a gateway callback refers to.
    async fn find_payment_by_reference(
        &self,
        provider: PaymentProvider,
        reference: &str,
    ) -> Result<Option<Payment>>;

    /// Lists all attempts for an order, newest first.
    async fn list_payments_for_order(&self, order_id: OrderId) -> Result<Vec<Payment>>;

    /// Overwrites the mutable fields of an attempt if its stored status is
    /// still `expected`.
    ///
    /// Returns false when another writer got there first.
    async fn update_payment(&self, payment: &Payment, expected: PaymentStatus) -> Result<bool>;
}

/// Persistence for compensations that could not be applied in time.
#[async_trait]
pub trait CompensationRepository: Send + Sync {
    async fn record_compensation(&self, compensation: &PendingCompensation) -> Result<()>;

    /// Returns unresolved compensations, oldest first.
    async fn list_unresolved_compensations(&self) -> Result<Vec<PendingCompensation>>;

    /// Persists attempts, last error and the resolved flag.
    async fn update_compensation(&self, compensation: &PendingCompensation) -> Result<()>;
}

/// Everything the order and payment services need from persistence.
pub trait Store:
    OrderRepository + PaymentRepository + CompensationRepository + Clone + 'static
{
}

impl<T> Store for T where
    T: OrderRepository + PaymentRepository + CompensationRepository + Clone + 'static
{
}
