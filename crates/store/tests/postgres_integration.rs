//! PostgreSQL integration tests
//!
//! These tests share one PostgreSQL container and truncate the tables before
//! each test, so they are serialized.
//!
//! ```bash
//! cargo test -p store --test postgres_integration
//! ```

use std::sync::Arc;

use common::{OrderId, UserId};
use domain::{
    Money, Order, OrderPaymentStatus, OrderStatus, Payment, PaymentProvider, PaymentStatus,
    PendingCompensation, PricedLine, ProductId, ShippingAddress, StockDelta,
};
use serial_test::serial;
use sqlx::PgPool;
use store::{
    CompensationRepository, OrderRepository, OrderStatusChange, PaymentRepository, PostgresStore,
    StoreError,
};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            for migration in [
                include_str!("../../../migrations/001_create_orders_tables.sql"),
                include_str!("../../../migrations/002_create_payments_table.sql"),
                include_str!("../../../migrations/003_create_stock_compensations_table.sql"),
            ] {
                sqlx::raw_sql(migration).execute(&temp_pool).await.unwrap();
            }
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_store() -> PostgresStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE order_items, orders, payments, stock_compensations")
        .execute(&pool)
        .await
        .unwrap();

    PostgresStore::new(pool)
}

fn address() -> ShippingAddress {
    ShippingAddress {
        line1: "Ngong Road 44".to_string(),
        line2: Some("Apartment 3".to_string()),
        city: "Nairobi".to_string(),
        region: None,
        postal_code: Some("00100".to_string()),
        country: "KE".to_string(),
        phone: Some("0712345678".to_string()),
    }
}

fn create_order(user_id: UserId, number: &str) -> Order {
    Order::place(
        user_id,
        number.to_string(),
        vec![
            PricedLine {
                product_id: ProductId::new("P-1"),
                product_name: "Kettle".to_string(),
                quantity: 2,
                unit_price: Money::from_cents(1999),
            },
            PricedLine {
                product_id: ProductId::new("P-2"),
                product_name: "Mug".to_string(),
                quantity: 1,
                unit_price: Money::from_cents(500),
            },
        ],
        address(),
        Some("leave at the gate".to_string()),
    )
    .unwrap()
}

fn create_payment(order: &Order) -> Payment {
    Payment::new_pending(
        order.id,
        order.user_id,
        PaymentProvider::Stripe,
        order.total,
        "usd",
        None,
    )
    .unwrap()
}

#[tokio::test]
#[serial]
async fn insert_and_load_order_with_items() {
    let store = get_test_store().await;
    let order = create_order(UserId::new(), "ORD-1-AAAAAAAAA");

    store.insert_order(&order).await.unwrap();

    let loaded = store.get_order(order.id).await.unwrap().unwrap();
    assert_eq!(loaded.order_number, order.order_number);
    assert_eq!(loaded.total.cents(), 4498);
    assert_eq!(loaded.shipping_address, order.shipping_address);
    assert_eq!(loaded.items.len(), 2);
    assert_eq!(loaded.items[0].product_name, "Kettle");
    assert_eq!(loaded.items[1].product_name, "Mug");
    assert_eq!(loaded.items[0].subtotal.cents(), 3998);
}

#[tokio::test]
#[serial]
async fn get_missing_order_returns_none() {
    let store = get_test_store().await;
    assert!(store.get_order(OrderId::new()).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn duplicate_order_number_is_reported() {
    let store = get_test_store().await;
    let user = UserId::new();
    store
        .insert_order(&create_order(user, "ORD-1-SAME"))
        .await
        .unwrap();

    let result = store.insert_order(&create_order(user, "ORD-1-SAME")).await;
    assert!(matches!(result, Err(StoreError::DuplicateOrderNumber(_))));

    let (orders, total) = store.list_orders_for_user(user, 0, 10).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(orders.len(), 1);
}

#[tokio::test]
#[serial]
async fn list_orders_is_paged_newest_first() {
    let store = get_test_store().await;
    let user = UserId::new();
    for i in 0..3 {
        let mut order = create_order(user, &format!("ORD-{i}"));
        order.created_at += chrono::Duration::seconds(i);
        store.insert_order(&order).await.unwrap();
    }

    let (page, total) = store.list_orders_for_user(user, 0, 2).await.unwrap();
    assert_eq!(total, 3);
    assert_eq!(page[0].order_number, "ORD-2");
    assert_eq!(page[1].order_number, "ORD-1");
    assert!(page.iter().all(|o| o.items.len() == 2));

    let (rest, _) = store.list_orders_for_user(user, 2, 2).await.unwrap();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].order_number, "ORD-0");
}

#[tokio::test]
#[serial]
async fn conditional_status_update() {
    let store = get_test_store().await;
    let order = create_order(UserId::new(), "ORD-CAS");
    store.insert_order(&order).await.unwrap();

    let change =
        OrderStatusChange::from_current(&order, OrderStatus::Confirmed, OrderPaymentStatus::Paid);
    let updated = store
        .update_order_status(order.id, change)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.status, OrderStatus::Confirmed);
    assert_eq!(updated.payment_status, OrderPaymentStatus::Paid);

    assert!(
        store
            .update_order_status(order.id, change)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
#[serial]
async fn payment_lookup_by_reference_and_compare_and_set() {
    let store = get_test_store().await;
    let order = create_order(UserId::new(), "ORD-PAY");
    let mut payment = create_payment(&order);
    store.insert_payment(&payment).await.unwrap();

    payment.status = PaymentStatus::Processing;
    payment.external_reference = Some("pi_123".to_string());
    payment.metadata = Some(serde_json::json!({"client_secret": "pi_123_secret"}));
    assert!(
        store
            .update_payment(&payment, PaymentStatus::Pending)
            .await
            .unwrap()
    );

    let found = store
        .find_payment_by_reference(PaymentProvider::Stripe, "pi_123")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, payment.id);
    assert_eq!(found.status, PaymentStatus::Processing);
    assert_eq!(found.currency, "USD");
    assert_eq!(found.metadata, payment.metadata);

    payment.status = PaymentStatus::Completed;
    payment.transaction_id = Some("ch_1".to_string());
    assert!(
        store
            .update_payment(&payment, PaymentStatus::Processing)
            .await
            .unwrap()
    );
    // A second writer holding the stale expectation loses.
    assert!(
        !store
            .update_payment(&payment, PaymentStatus::Processing)
            .await
            .unwrap()
    );

    let history = store.list_payments_for_order(order.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].transaction_id.as_deref(), Some("ch_1"));
}

#[tokio::test]
#[serial]
async fn duplicate_external_reference_is_reported() {
    let store = get_test_store().await;
    let order = create_order(UserId::new(), "ORD-REF");

    let mut first = create_payment(&order);
    first.external_reference = Some("pi_dup".to_string());
    store.insert_payment(&first).await.unwrap();

    let mut second = create_payment(&order);
    second.external_reference = Some("pi_dup".to_string());
    let result = store.insert_payment(&second).await;
    assert!(matches!(
        result,
        Err(StoreError::DuplicateExternalReference { .. })
    ));
}

#[tokio::test]
#[serial]
async fn compensation_round_trip() {
    let store = get_test_store().await;
    let mut compensation = PendingCompensation::new(
        OrderId::new(),
        vec![StockDelta::new("P-1", 2), StockDelta::new("P-2", 1)],
        "cancel restore",
        3,
        "stock service unavailable",
    );
    store.record_compensation(&compensation).await.unwrap();

    let pending = store.list_unresolved_compensations().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].deltas, compensation.deltas);
    assert_eq!(pending[0].attempts, 3);

    compensation.attempts = 4;
    compensation.resolved = true;
    store.update_compensation(&compensation).await.unwrap();
    assert!(store.list_unresolved_compensations().await.unwrap().is_empty());
}
