//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};

use api::AppState;
use api::auth::StaticTokenVerifier;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::UserId;
use domain::{Money, PaymentProvider};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::providers::stripe::sign_payload;
use saga::{InMemoryProvider, InMemoryStockService, ProviderRegistry, StripeAdapter, StripeConfig};
use serde_json::{Value, json};
use store::InMemoryStore;
use tower::ServiceExt;

const ALICE: &str = "alice-token";
const BOB: &str = "bob-token";
const INTERNAL: &str = "internal-secret";
const MPESA_CALLBACK_TOKEN: &str = "mpesa-callback-token";
const STRIPE_WEBHOOK_SECRET: &str = "whsec_test";

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

struct TestApp {
    app: axum::Router,
    stock: InMemoryStockService,
    mpesa: Arc<InMemoryProvider>,
}

async fn setup() -> TestApp {
    let stock = InMemoryStockService::new();
    stock
        .add_product("sku-widget", "Widget", Money::from_cents(1_250), 10)
        .await;
    stock
        .add_product("sku-gadget", "Gadget", Money::from_cents(4_000), 1)
        .await;

    let mpesa = Arc::new(InMemoryProvider::new(
        PaymentProvider::Mpesa,
        MPESA_CALLBACK_TOKEN,
    ));
    let stripe = Arc::new(InMemoryProvider::new(
        PaymentProvider::Stripe,
        STRIPE_WEBHOOK_SECRET,
    ));
    let providers = ProviderRegistry::new()
        .with(mpesa.clone())
        .with(stripe);

    let auth = StaticTokenVerifier::new()
        .with_token(ALICE, UserId::new(), "customer")
        .with_token(BOB, UserId::new(), "customer");

    let state = AppState::new(
        InMemoryStore::new(),
        Arc::new(stock.clone()),
        providers,
        Arc::new(auth),
    )
    .with_internal_token(Some(INTERNAL.to_string()));

    TestApp {
        app: api::create_app(Arc::new(state), get_metrics_handle()),
        stock,
        mpesa,
    }
}

fn request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &axum::Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(Value::Null)
    };
    (status, json)
}

fn order_body(product_id: &str, quantity: u32) -> Value {
    json!({
        "items": [{ "product_id": product_id, "quantity": quantity }],
        "shipping_address": {
            "line1": "12 Moi Avenue",
            "city": "Nairobi",
            "country": "KE"
        }
    })
}

async fn create_order(app: &axum::Router, token: &str, product_id: &str, quantity: u32) -> Value {
    let (status, json) = send(
        app,
        request("POST", "/orders", Some(token), Some(order_body(product_id, quantity))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "unexpected body: {json}");
    json
}

#[tokio::test]
async fn test_health_check() {
    let t = setup().await;

    let (status, json) = send(&t.app, request("GET", "/health", None, None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["payment_providers"], json!(["mpesa", "stripe"]));
}

#[tokio::test]
async fn test_create_order_prices_from_catalog() {
    let t = setup().await;

    let mut body = order_body("sku-widget", 2);
    // Client-supplied prices are ignored.
    body["items"][0]["unit_price"] = json!(1);
    let (status, json) = send(&t.app, request("POST", "/orders", Some(ALICE), Some(body))).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["status"], "pending");
    assert_eq!(json["payment_status"], "pending");
    assert_eq!(json["total"], 2_500);
    assert_eq!(json["items"][0]["product_name"], "Widget");
    assert_eq!(json["items"][0]["unit_price"], 1_250);
    assert!(json["order_number"].as_str().unwrap().starts_with("ORD-"));
    assert_eq!(t.stock.stock_of("sku-widget").await, Some(8));
}

#[tokio::test]
async fn test_create_order_requires_token() {
    let t = setup().await;

    let (status, json) = send(
        &t.app,
        request("POST", "/orders", None, Some(order_body("sku-widget", 1))),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["code"], "UNAUTHORIZED");

    let (status, _) = send(
        &t.app,
        request("POST", "/orders", Some("bogus"), Some(order_body("sku-widget", 1))),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_create_order_insufficient_stock() {
    let t = setup().await;

    let (status, json) = send(
        &t.app,
        request("POST", "/orders", Some(ALICE), Some(order_body("sku-gadget", 2))),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "INSUFFICIENT_STOCK");
    assert_eq!(json["details"][0]["product_id"], "sku-gadget");
    assert_eq!(t.stock.stock_of("sku-gadget").await, Some(1));
}

#[tokio::test]
async fn test_create_order_rejects_malformed_body() {
    let t = setup().await;

    let (status, json) = send(
        &t.app,
        request("POST", "/orders", Some(ALICE), Some(json!({ "items": "nope" }))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "BAD_REQUEST");

    let mut empty = order_body("sku-widget", 1);
    empty["items"] = json!([]);
    let (status, json) = send(&t.app, request("POST", "/orders", Some(ALICE), Some(empty))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_list_orders_is_scoped_to_caller() {
    let t = setup().await;
    create_order(&t.app, ALICE, "sku-widget", 1).await;
    create_order(&t.app, ALICE, "sku-widget", 1).await;
    create_order(&t.app, BOB, "sku-widget", 1).await;

    let (status, json) = send(&t.app, request("GET", "/orders?limit=1", Some(ALICE), None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 2);
    assert_eq!(json["limit"], 1);
    assert_eq!(json["total_pages"], 2);
    assert_eq!(json["orders"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_get_order_of_another_user_is_not_found() {
    let t = setup().await;
    let order = create_order(&t.app, ALICE, "sku-widget", 1).await;
    let uri = format!("/orders/{}", order["id"].as_str().unwrap());

    let (status, json) = send(&t.app, request("GET", &uri, Some(ALICE), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["id"], order["id"]);

    let (status, json) = send(&t.app, request("GET", &uri, Some(BOB), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NOT_FOUND");

    let (status, _) = send(&t.app, request("GET", "/orders/not-a-uuid", Some(ALICE), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cancel_order_restores_stock() {
    let t = setup().await;
    let order = create_order(&t.app, ALICE, "sku-widget", 3).await;
    assert_eq!(t.stock.stock_of("sku-widget").await, Some(7));
    let uri = format!("/orders/{}/cancel", order["id"].as_str().unwrap());

    let (status, json) = send(&t.app, request("PUT", &uri, Some(ALICE), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "cancelled");
    assert_eq!(t.stock.stock_of("sku-widget").await, Some(10));

    // A second cancel is refused and gives nothing back.
    let (status, json) = send(&t.app, request("PUT", &uri, Some(ALICE), None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "INVALID_TRANSITION");
    assert_eq!(t.stock.stock_of("sku-widget").await, Some(10));
}

#[tokio::test]
async fn test_mpesa_payment_and_callback_mark_order_paid() {
    let t = setup().await;
    let order = create_order(&t.app, ALICE, "sku-widget", 2).await;
    let order_id = order["id"].as_str().unwrap();

    let (status, json) = send(
        &t.app,
        request(
            "POST",
            "/payments/mpesa",
            Some(ALICE),
            Some(json!({
                "order_id": order_id,
                "phone_number": "0712345678",
                "amount_cents": 2_500
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "unexpected body: {json}");
    assert_eq!(json["payment"]["status"], "processing");
    assert_eq!(json["payment"]["currency"], "KES");
    let reference = json["payment"]["external_reference"].as_str().unwrap().to_string();
    assert_eq!(json["checkout_request_id"], format!("{reference}_secret"));
    assert_eq!(t.mpesa.requests().await.len(), 1);

    let callback = json!({ "reference": reference, "status": "succeeded", "transaction_id": "QK12" });
    let webhook = format!("/webhook/mpesa?token={MPESA_CALLBACK_TOKEN}");
    for _ in 0..2 {
        let (status, json) = send(&t.app, request("POST", &webhook, None, Some(callback.clone()))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["ResultCode"], 0);
    }

    let (_, json) = send(&t.app, request("GET", &format!("/orders/{order_id}"), Some(ALICE), None)).await;
    assert_eq!(json["status"], "paid");
    assert_eq!(json["payment_status"], "paid");

    let (status, json) = send(
        &t.app,
        request("GET", &format!("/payments/order/{order_id}"), Some(ALICE), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let payments = json.as_array().unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0]["status"], "completed");
    assert_eq!(payments[0]["transaction_id"], "QK12");

    let payment_uri = format!("/payments/{}", payments[0]["id"].as_str().unwrap());
    let (status, _) = send(&t.app, request("GET", &payment_uri, Some(ALICE), None)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&t.app, request("GET", &payment_uri, Some(BOB), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // A paid order takes no further payments.
    let (status, json) = send(
        &t.app,
        request(
            "POST",
            "/payments/stripe",
            Some(ALICE),
            Some(json!({ "order_id": order_id, "amount_cents": 2_500 })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "INVALID_TRANSITION");
}

#[tokio::test]
async fn test_payment_needs_own_order_and_exact_total() {
    let t = setup().await;
    let order = create_order(&t.app, ALICE, "sku-widget", 2).await;
    let pay = |amount: i64| {
        Some(json!({
            "order_id": order["id"],
            "phone_number": "0712345678",
            "amount_cents": amount
        }))
    };

    let foreign = request("POST", "/payments/mpesa", Some(BOB), pay(2_500));
    let (status, json) = send(&t.app, foreign).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NOT_FOUND");

    let short = request("POST", "/payments/mpesa", Some(ALICE), pay(1));
    let (status, json) = send(&t.app, short).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "VALIDATION_ERROR");
    assert!(t.mpesa.requests().await.is_empty());
}

#[tokio::test]
async fn test_mpesa_webhook_is_always_acknowledged() {
    let t = setup().await;

    let (status, json) = send(
        &t.app,
        request(
            "POST",
            "/webhook/mpesa?token=wrong",
            None,
            Some(json!({ "reference": "mpesa-000001", "status": "succeeded" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ResultDesc"], "Accepted");

    let (status, _) = send(
        &t.app,
        request("POST", "/webhook/mpesa", None, Some(json!({ "garbage": true }))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_mpesa_payment_refused_by_gateway() {
    let t = setup().await;
    let order = create_order(&t.app, ALICE, "sku-widget", 1).await;
    t.mpesa
        .set_fail_on_initiate(Some("invalid phone".to_string()))
        .await;

    let (status, json) = send(
        &t.app,
        request(
            "POST",
            "/payments/mpesa",
            Some(ALICE),
            Some(json!({
                "order_id": order["id"],
                "phone_number": "0712345678",
                "amount_cents": 1_250
            })),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "PROVIDER_REJECTED");
    assert!(json["details"].as_str().unwrap().contains("invalid phone"));
}

#[tokio::test]
async fn test_stripe_webhook_signature() {
    let t = setup().await;
    let order = create_order(&t.app, ALICE, "sku-widget", 1).await;

    let (status, json) = send(
        &t.app,
        request(
            "POST",
            "/payments/stripe",
            Some(ALICE),
            Some(json!({ "order_id": order["id"], "amount_cents": 1_250 })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["payment"]["currency"], "USD");
    let reference = json["payment"]["external_reference"].as_str().unwrap().to_string();
    let callback = json!({ "reference": reference, "status": "failed", "reason": "card_declined" });

    let bad = Request::builder()
        .method("POST")
        .uri("/webhook/stripe")
        .header("stripe-signature", "forged")
        .body(Body::from(callback.to_string()))
        .unwrap();
    let (status, json) = send(&t.app, bad).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Invalid signature");

    let good = Request::builder()
        .method("POST")
        .uri("/webhook/stripe")
        .header("stripe-signature", STRIPE_WEBHOOK_SECRET)
        .body(Body::from(callback.to_string()))
        .unwrap();
    let (status, json) = send(&t.app, good).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["received"], true);

    let (_, json) = send(
        &t.app,
        request("GET", &format!("/orders/{}", order["id"].as_str().unwrap()), Some(ALICE), None),
    )
    .await;
    assert_eq!(json["status"], "pending");
    assert_eq!(json["payment_status"], "failed");
}

#[tokio::test]
async fn test_signed_but_unreadable_stripe_webhook_is_acknowledged() {
    let stripe = StripeAdapter::new(StripeConfig {
        secret_key: "sk_test".to_string(),
        webhook_secret: Some(STRIPE_WEBHOOK_SECRET.to_string()),
        api_base: None,
    })
    .unwrap();
    let state = AppState::new(
        InMemoryStore::new(),
        Arc::new(InMemoryStockService::new()),
        ProviderRegistry::new().with(Arc::new(stripe)),
        Arc::new(StaticTokenVerifier::new()),
    );
    let app = api::create_app(Arc::new(state), get_metrics_handle());

    let webhook = |body: &'static str, signature: String| {
        Request::builder()
            .method("POST")
            .uri("/webhook/stripe")
            .header("stripe-signature", signature)
            .body(Body::from(body))
            .unwrap()
    };
    let now = chrono::Utc::now().timestamp();

    for body in [
        r#"{"type":"payment_intent.succeeded","data":{}}"#,
        r#"{"type":"payment_intent.succeeded","data":{"object":{}}}"#,
        "not json",
    ] {
        let signature = sign_payload(body.as_bytes(), STRIPE_WEBHOOK_SECRET, now).unwrap();
        let (status, json) = send(&app, webhook(body, signature)).await;
        assert_eq!(status, StatusCode::OK, "body: {body}");
        assert_eq!(json["received"], true);
    }

    let body = r#"{"type":"payment_intent.succeeded","data":{}}"#;
    let forged = sign_payload(body.as_bytes(), "whsec_other", now).unwrap();
    let (status, _) = send(&app, webhook(body, forged)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_internal_routes_require_token() {
    let t = setup().await;
    let body = json!({ "items": [{ "product_id": "sku-widget", "quantity": 1 }] });

    let (status, _) = send(
        &t.app,
        request("POST", "/internal/check-stock", None, Some(body.clone())),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let forged = Request::builder()
        .method("POST")
        .uri("/internal/check-stock")
        .header("content-type", "application/json")
        .header("x-internal-token", "nope")
        .body(Body::from(body.to_string()))
        .unwrap();
    let (status, _) = send(&t.app, forged).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let trusted = Request::builder()
        .method("POST")
        .uri("/internal/check-stock")
        .header("content-type", "application/json")
        .header("x-internal-token", INTERNAL)
        .body(Body::from(body.to_string()))
        .unwrap();
    let (status, json) = send(&t.app, trusted).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["available"], true);
    assert_eq!(json["items"][0]["price_cents"], 1_250);
}

#[tokio::test]
async fn test_internal_update_stock_and_status() {
    let t = setup().await;
    let order = create_order(&t.app, ALICE, "sku-widget", 1).await;

    let internal = |uri: &str, body: Value| {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .header("x-internal-token", INTERNAL)
            .body(Body::from(body.to_string()))
            .unwrap()
    };

    let (status, json) = send(
        &t.app,
        internal(
            "/internal/update-stock",
            json!({ "updates": [{ "product_id": "sku-widget", "quantity": 5 }] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(t.stock.stock_of("sku-widget").await, Some(14));

    let (status, json) = send(
        &t.app,
        internal(
            "/internal/update-stock",
            json!({ "updates": [{ "product_id": "sku-gadget", "quantity": -5 }] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "INSUFFICIENT_STOCK");

    let (status, json) = send(
        &t.app,
        internal(
            "/internal/update-status",
            json!({ "order_id": order["id"], "status": "shipped" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["order"]["status"], "shipped");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let t = setup().await;
    create_order(&t.app, ALICE, "sku-widget", 1).await;

    let response = t
        .app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("orders_created_total"));
}
