use std::collections::HashMap;

use async_trait::async_trait;
use common::{CompensationId, OrderId, OrderItemId, PaymentId, UserId};
use domain::{
    DomainError, Money, Order, OrderItem, Payment, PaymentProvider, PaymentStatus,
    PendingCompensation, ProductId, ShippingAddress, StockDelta,
};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Result, StoreError,
    store::{CompensationRepository, OrderRepository, OrderStatusChange, PaymentRepository},
};

const ORDER_COLUMNS: &str = "id, user_id, order_number, status, payment_status, total_cents, \
     shipping_address, notes, created_at, updated_at";

const ITEM_COLUMNS: &str =
    "id, order_id, product_id, product_name, quantity, unit_price_cents, subtotal_cents";

const PAYMENT_COLUMNS: &str = "id, order_id, user_id, provider, amount_cents, currency, status, \
     transaction_id, external_reference, phone_number, metadata, error_message, created_at, \
     updated_at";

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Checks that the database answers.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn row_to_item(row: &PgRow) -> Result<OrderItem> {
        Ok(OrderItem {
            id: OrderItemId::from_uuid(row.try_get::<Uuid, _>("id")?),
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
            product_name: row.try_get("product_name")?,
            quantity: from_db_count(row.try_get("quantity")?, "item quantity")?,
            unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
            subtotal: Money::from_cents(row.try_get("subtotal_cents")?),
        })
    }

    fn row_to_order(row: &PgRow, items: Vec<OrderItem>) -> Result<Order> {
        let address_json: serde_json::Value = row.try_get("shipping_address")?;
        let shipping_address: ShippingAddress = serde_json::from_value(address_json)?;

        Ok(Order {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
            order_number: row.try_get("order_number")?,
            status: row.try_get::<String, _>("status")?.parse()?,
            payment_status: row.try_get::<String, _>("payment_status")?.parse()?,
            total: Money::from_cents(row.try_get("total_cents")?),
            shipping_address,
            notes: row.try_get("notes")?,
            items,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_payment(row: &PgRow) -> Result<Payment> {
        Ok(Payment {
            id: PaymentId::from_uuid(row.try_get::<Uuid, _>("id")?),
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
            provider: row.try_get::<String, _>("provider")?.parse()?,
            amount: Money::from_cents(row.try_get("amount_cents")?),
            currency: row.try_get("currency")?,
            status: row.try_get::<String, _>("status")?.parse()?,
            transaction_id: row.try_get("transaction_id")?,
            external_reference: row.try_get("external_reference")?,
            phone_number: row.try_get("phone_number")?,
            metadata: row.try_get("metadata")?,
            error_message: row.try_get("error_message")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_compensation(row: &PgRow) -> Result<PendingCompensation> {
        let deltas_json: serde_json::Value = row.try_get("deltas")?;
        let deltas: Vec<StockDelta> = serde_json::from_value(deltas_json)?;

        Ok(PendingCompensation {
            id: CompensationId::from_uuid(row.try_get::<Uuid, _>("id")?),
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            deltas,
            reason: row.try_get("reason")?,
            attempts: from_db_count(row.try_get("attempts")?, "compensation attempts")?,
            last_error: row.try_get("last_error")?,
            resolved: row.try_get("resolved")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    /// Loads the items of several orders, grouped by order and kept in line order.
    async fn load_items(&self, order_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<OrderItem>>> {
        let rows = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM order_items WHERE order_id = ANY($1) \
             ORDER BY order_id, position ASC"
        ))
        .bind(order_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
        for row in &rows {
            let item = Self::row_to_item(row)?;
            grouped
                .entry(item.order_id.as_uuid())
                .or_default()
                .push(item);
        }
        Ok(grouped)
    }

    fn map_payment_error(payment: &Payment, e: sqlx::Error) -> StoreError {
        if let sqlx::Error::Database(ref db_err) = e
            && db_err.constraint() == Some("unique_provider_reference")
        {
            return StoreError::DuplicateExternalReference {
                provider: payment.provider,
                reference: payment.external_reference.clone().unwrap_or_default(),
            };
        }
        StoreError::Database(e)
    }
}

fn to_db_count(value: u32, what: &str) -> Result<i32> {
    i32::try_from(value)
        .map_err(|_| DomainError::Validation(format!("{what} {value} is out of range")).into())
}

fn from_db_count(value: i32, what: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| DomainError::Validation(format!("stored {what} {value} is negative")).into())
}

#[async_trait]
impl OrderRepository for PostgresStore {
    async fn insert_order(&self, order: &Order) -> Result<()> {
        let address_json = serde_json::to_value(&order.shipping_address)?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, order_number, status, payment_status, total_cents,
                                shipping_address, notes, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.user_id.as_uuid())
        .bind(&order.order_number)
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(order.total.cents())
        .bind(address_json)
        .bind(&order.notes)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("unique_order_number")
            {
                return StoreError::DuplicateOrderNumber(order.order_number.clone());
            }
            StoreError::Database(e)
        })?;

        for (position, item) in order.items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_items (id, order_id, position, product_id, product_name,
                                         quantity, unit_price_cents, subtotal_cents)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(item.id.as_uuid())
            .bind(order.id.as_uuid())
            .bind(to_db_count(position as u32, "item position")?)
            .bind(item.product_id.as_str())
            .bind(&item.product_name)
            .bind(to_db_count(item.quantity, "item quantity")?)
            .bind(item.unit_price.cents())
            .bind(item.subtotal.cents())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::debug!(order_id = %order.id, items = order.items.len(), "order stored");
        Ok(())
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        let row: Option<PgRow> =
            sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut items = self.load_items(&[id.as_uuid()]).await?;
        let order = Self::row_to_order(&row, items.remove(&id.as_uuid()).unwrap_or_default())?;
        Ok(Some(order))
    }

    async fn list_orders_for_user(
        &self,
        user_id: UserId,
        offset: u64,
        limit: u64,
    ) -> Result<(Vec<Order>, u64)> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3"
        ))
        .bind(user_id.as_uuid())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        let ids = rows
            .iter()
            .map(|row| row.try_get::<Uuid, _>("id"))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut items = self.load_items(&ids).await?;

        let orders = rows
            .iter()
            .zip(&ids)
            .map(|(row, id)| Self::row_to_order(row, items.remove(id).unwrap_or_default()))
            .collect::<Result<Vec<_>>>()?;

        Ok((orders, u64::try_from(total).unwrap_or(0)))
    }

    async fn update_order_status(
        &self,
        id: OrderId,
        change: OrderStatusChange,
    ) -> Result<Option<Order>> {
        let updated = sqlx::query(
            r#"
            UPDATE orders
            SET status = $1, payment_status = $2, updated_at = NOW()
            WHERE id = $3 AND status = $4 AND payment_status = $5
            "#,
        )
        .bind(change.status.as_str())
        .bind(change.payment_status.as_str())
        .bind(id.as_uuid())
        .bind(change.expected_status.as_str())
        .bind(change.expected_payment_status.as_str())
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_order(id).await
    }
}

#[async_trait]
impl PaymentRepository for PostgresStore {
    async fn insert_payment(&self, payment: &Payment) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO payments (id, order_id, user_id, provider, amount_cents, currency, status,
                                  transaction_id, external_reference, phone_number, metadata,
                                  error_message, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(payment.id.as_uuid())
        .bind(payment.order_id.as_uuid())
        .bind(payment.user_id.as_uuid())
        .bind(payment.provider.as_str())
        .bind(payment.amount.cents())
        .bind(&payment.currency)
        .bind(payment.status.as_str())
        .bind(&payment.transaction_id)
        .bind(&payment.external_reference)
        .bind(&payment.phone_number)
        .bind(&payment.metadata)
        .bind(&payment.error_message)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Self::map_payment_error(payment, e))?;

        Ok(())
    }

    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>> {
        let row: Option<PgRow> =
            sqlx::query(&format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1"))
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;

        row.as_ref().map(Self::row_to_payment).transpose()
    }

    async fn find_payment_by_reference(
        &self,
        provider: PaymentProvider,
        reference: &str,
    ) -> Result<Option<Payment>> {
        let row: Option<PgRow> = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE provider = $1 AND external_reference = $2"
        ))
        .bind(provider.as_str())
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_payment).transpose()
    }

    async fn list_payments_for_order(&self, order_id: OrderId) -> Result<Vec<Payment>> {
        let rows = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_id = $1 \
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_payment).collect()
    }

    async fn update_payment(&self, payment: &Payment, expected: PaymentStatus) -> Result<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE payments
            SET status = $1, transaction_id = $2, external_reference = $3, metadata = $4,
                error_message = $5, updated_at = NOW()
            WHERE id = $6 AND status = $7
            "#,
        )
        .bind(payment.status.as_str())
        .bind(&payment.transaction_id)
        .bind(&payment.external_reference)
        .bind(&payment.metadata)
        .bind(&payment.error_message)
        .bind(payment.id.as_uuid())
        .bind(expected.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| Self::map_payment_error(payment, e))?;

        Ok(updated.rows_affected() == 1)
    }
}

#[async_trait]
impl CompensationRepository for PostgresStore {
    async fn record_compensation(&self, compensation: &PendingCompensation) -> Result<()> {
        let deltas_json = serde_json::to_value(&compensation.deltas)?;

        sqlx::query(
            r#"
            INSERT INTO stock_compensations (id, order_id, deltas, reason, attempts, last_error,
                                             resolved, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(compensation.id.as_uuid())
        .bind(compensation.order_id.as_uuid())
        .bind(deltas_json)
        .bind(&compensation.reason)
        .bind(to_db_count(compensation.attempts, "compensation attempts")?)
        .bind(&compensation.last_error)
        .bind(compensation.resolved)
        .bind(compensation.created_at)
        .bind(compensation.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_unresolved_compensations(&self) -> Result<Vec<PendingCompensation>> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, deltas, reason, attempts, last_error, resolved, created_at, updated_at
            FROM stock_compensations
            WHERE NOT resolved
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_compensation).collect()
    }

    async fn update_compensation(&self, compensation: &PendingCompensation) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE stock_compensations
            SET attempts = $1, last_error = $2, resolved = $3, updated_at = NOW()
            WHERE id = $4
            "#,
        )
        .bind(to_db_count(compensation.attempts, "compensation attempts")?)
        .bind(&compensation.last_error)
        .bind(compensation.resolved)
        .bind(compensation.id.as_uuid())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
