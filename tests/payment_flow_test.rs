mod common;

use axum::http::{Method, StatusCode};
use common::{body_json, TestApp, TEST_KEY_SECRET, TEST_WEBHOOK_SECRET};
use rust_decimal_macros::dec;
use sea_orm::EntityTrait;
use serde_json::json;
use storefront_api::entities::{order, payment, product};
use storefront_api::gateway::hmac_signature;
use uuid::Uuid;

async fn initiate_payment(app: &TestApp) -> (serde_json::Value, product::Model) {
    let product = app.seed_product("Widget", dec!(150.00), 10).await;
    let address = app.seed_address(app.user_id).await;

    let response = app
        .request_authenticated(
            Method::POST,
            "/api/v1/cart/items",
            Some(json!({ "product_id": product.id, "quantity": 2 })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .request_authenticated(
            Method::POST,
            "/api/v1/payments/initiate",
            Some(json!({ "address_id": address.id })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    (body_json(response).await, product)
}

fn checkout_signature(provider_order_id: &str, provider_payment_id: &str) -> String {
    hmac_signature(
        TEST_KEY_SECRET,
        &format!("{provider_order_id}|{provider_payment_id}"),
    )
}

fn webhook_signature(body: &[u8]) -> String {
    use hmac::{Hmac, Mac};
    let mut mac = Hmac::<sha2::Sha256>::new_from_slice(TEST_WEBHOOK_SECRET.as_bytes()).unwrap();
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

#[tokio::test]
async fn initiate_reserves_stock_and_keeps_cart() {
    let app = TestApp::new().await;
    let (initiated, product) = initiate_payment(&app).await;

    assert_eq!(initiated["amount_minor"], 30_000);
    assert_eq!(initiated["currency"], "INR");
    assert!(initiated["provider_order_id"]
        .as_str()
        .unwrap()
        .starts_with("order_test_"));

    let after = product::Entity::find_by_id(product.id)
        .one(app.state.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.stock, 8);

    // The cart survives until the payment is confirmed.
    let response = app
        .request_authenticated(Method::GET, "/api/v1/cart", None)
        .await;
    let cart = body_json(response).await;
    assert_eq!(cart["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn confirm_marks_order_paid_and_clears_cart() {
    let app = TestApp::new().await;
    let (initiated, _) = initiate_payment(&app).await;
    let provider_order_id = initiated["provider_order_id"].as_str().unwrap();

    let response = app
        .request_authenticated(
            Method::POST,
            "/api/v1/payments/confirm",
            Some(json!({
                "provider_order_id": provider_order_id,
                "provider_payment_id": "pay_123",
                "signature": checkout_signature(provider_order_id, "pay_123"),
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let paid = body_json(response).await;
    assert_eq!(paid["status"], "paid");
    assert_eq!(paid["provider_payment_id"], "pay_123");

    let order_id: Uuid = initiated["order_id"].as_str().unwrap().parse().unwrap();
    let order = order::Entity::find_by_id(order_id)
        .one(app.state.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.payment_status, order::PaymentStatus::Paid);
    assert_eq!(order.status, order::OrderStatus::Processing);

    let response = app
        .request_authenticated(Method::GET, "/api/v1/cart", None)
        .await;
    let cart = body_json(response).await;
    assert!(cart["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn confirm_is_idempotent() {
    let app = TestApp::new().await;
    let (initiated, product) = initiate_payment(&app).await;
    let provider_order_id = initiated["provider_order_id"].as_str().unwrap();
    let confirmation = json!({
        "provider_order_id": provider_order_id,
        "provider_payment_id": "pay_123",
        "signature": checkout_signature(provider_order_id, "pay_123"),
    });

    for _ in 0..2 {
        let response = app
            .request_authenticated(
                Method::POST,
                "/api/v1/payments/confirm",
                Some(confirmation.clone()),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let paid = body_json(response).await;
        assert_eq!(paid["status"], "paid");
    }

    // Stock was reserved exactly once.
    let after = product::Entity::find_by_id(product.id)
        .one(app.state.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.stock, 8);
}

#[tokio::test]
async fn confirm_with_tampered_signature_is_rejected() {
    let app = TestApp::new().await;
    let (initiated, _) = initiate_payment(&app).await;
    let provider_order_id = initiated["provider_order_id"].as_str().unwrap();

    let mut signature = checkout_signature(provider_order_id, "pay_123");
    let flipped = if signature.ends_with('0') { '1' } else { '0' };
    signature.pop();
    signature.push(flipped);

    let response = app
        .request_authenticated(
            Method::POST,
            "/api/v1/payments/confirm",
            Some(json!({
                "provider_order_id": provider_order_id,
                "provider_payment_id": "pay_123",
                "signature": signature,
            })),
        )
        .await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert_eq!(body["kind"], "invalid_signature");
}

#[tokio::test]
async fn initiate_with_zero_total_is_rejected() {
    let app = TestApp::new().await;
    let product = app.seed_product("Cheap", dec!(10.00), 10).await;
    let address = app.seed_address(app.user_id).await;
    app.seed_coupon(
        "FREE",
        storefront_api::entities::coupon::CouponKind::Fixed,
        dec!(100),
        None,
        None,
        None,
        None,
    )
    .await;

    app.request_authenticated(
        Method::POST,
        "/api/v1/cart/items",
        Some(json!({ "product_id": product.id, "quantity": 1 })),
    )
    .await;
    app.request_authenticated(
        Method::POST,
        "/api/v1/cart/coupon",
        Some(json!({ "code": "FREE" })),
    )
    .await;

    let response = app
        .request_authenticated(
            Method::POST,
            "/api/v1/payments/initiate",
            Some(json!({ "address_id": address.id })),
        )
        .await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert_eq!(body["kind"], "invalid_total");
}

#[tokio::test]
async fn webhook_with_bad_signature_is_rejected() {
    let app = TestApp::new().await;

    let body = serde_json::to_vec(&json!({
        "event": "payment.captured",
        "payload": { "payment": { "entity": {
            "id": "pay_123", "order_id": "order_test_0", "status": "captured"
        }}}
    }))
    .unwrap();

    let response = app
        .request_raw(
            Method::POST,
            "/api/v1/webhooks/razorpay",
            body,
            &[("x-razorpay-signature", "deadbeef")],
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn captured_webhook_marks_order_paid() {
    let app = TestApp::new().await;
    let (initiated, _) = initiate_payment(&app).await;
    let provider_order_id = initiated["provider_order_id"].as_str().unwrap();

    let body = serde_json::to_vec(&json!({
        "event": "payment.captured",
        "payload": { "payment": { "entity": {
            "id": "pay_webhook", "order_id": provider_order_id, "status": "captured"
        }}}
    }))
    .unwrap();
    let signature = webhook_signature(&body);

    let response = app
        .request_raw(
            Method::POST,
            "/api/v1/webhooks/razorpay",
            body,
            &[("x-razorpay-signature", &signature)],
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let order_id: Uuid = initiated["order_id"].as_str().unwrap().parse().unwrap();
    let order = order::Entity::find_by_id(order_id)
        .one(app.state.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.payment_status, order::PaymentStatus::Paid);

    let payment_id: Uuid = initiated["payment_id"].as_str().unwrap().parse().unwrap();
    let stored = payment::Entity::find_by_id(payment_id)
        .one(app.state.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, payment::PaymentState::Paid);
    assert!(stored.payload.is_some());
}

#[tokio::test]
async fn failed_webhook_cancels_order_and_restores_stock() {
    let app = TestApp::new().await;
    let (initiated, product) = initiate_payment(&app).await;
    let provider_order_id = initiated["provider_order_id"].as_str().unwrap();

    let body = serde_json::to_vec(&json!({
        "event": "payment.failed",
        "payload": { "payment": { "entity": {
            "id": "pay_failed", "order_id": provider_order_id, "status": "failed"
        }}}
    }))
    .unwrap();
    let signature = webhook_signature(&body);

    let response = app
        .request_raw(
            Method::POST,
            "/api/v1/webhooks/razorpay",
            body,
            &[("x-razorpay-signature", &signature)],
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let order_id: Uuid = initiated["order_id"].as_str().unwrap().parse().unwrap();
    let order = order::Entity::find_by_id(order_id)
        .one(app.state.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, order::OrderStatus::Cancelled);
    assert_eq!(order.payment_status, order::PaymentStatus::Unpaid);

    let after = product::Entity::find_by_id(product.id)
        .one(app.state.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.stock, 10);
}

#[tokio::test]
async fn webhook_for_unknown_payment_is_acknowledged() {
    let app = TestApp::new().await;

    let body = serde_json::to_vec(&json!({
        "event": "payment.captured",
        "payload": { "payment": { "entity": {
            "id": "pay_x", "order_id": "order_never_seen", "status": "captured"
        }}}
    }))
    .unwrap();
    let signature = webhook_signature(&body);

    let response = app
        .request_raw(
            Method::POST,
            "/api/v1/webhooks/razorpay",
            body,
            &[("x-razorpay-signature", &signature)],
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn capture_after_cancellation_is_not_applied() {
    let app = TestApp::new().await;
    let (initiated, product) = initiate_payment(&app).await;
    let provider_order_id = initiated["provider_order_id"].as_str().unwrap();

    let body = serde_json::to_vec(&json!({
        "event": "payment.failed",
        "payload": { "payment": { "entity": {
            "id": "pay_failed", "order_id": provider_order_id, "status": "failed"
        }}}
    }))
    .unwrap();
    let signature = webhook_signature(&body);
    let response = app
        .request_raw(
            Method::POST,
            "/api/v1/webhooks/razorpay",
            body,
            &[("x-razorpay-signature", &signature)],
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    // A capture racing in after the cancellation is acknowledged but
    // must not mark the dead order paid.
    let body = serde_json::to_vec(&json!({
        "event": "payment.captured",
        "payload": { "payment": { "entity": {
            "id": "pay_late", "order_id": provider_order_id, "status": "captured"
        }}}
    }))
    .unwrap();
    let signature = webhook_signature(&body);
    let response = app
        .request_raw(
            Method::POST,
            "/api/v1/webhooks/razorpay",
            body,
            &[("x-razorpay-signature", &signature)],
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let order_id: Uuid = initiated["order_id"].as_str().unwrap().parse().unwrap();
    let order = order::Entity::find_by_id(order_id)
        .one(app.state.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, order::OrderStatus::Cancelled);
    assert_eq!(order.payment_status, order::PaymentStatus::Unpaid);

    let after = product::Entity::find_by_id(product.id)
        .one(app.state.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.stock, 10);
}

#[tokio::test]
async fn late_failure_does_not_undo_a_capture() {
    let app = TestApp::new().await;
    let (initiated, product) = initiate_payment(&app).await;
    let provider_order_id = initiated["provider_order_id"].as_str().unwrap();

    let response = app
        .request_authenticated(
            Method::POST,
            "/api/v1/payments/confirm",
            Some(json!({
                "provider_order_id": provider_order_id,
                "provider_payment_id": "pay_123",
                "signature": checkout_signature(provider_order_id, "pay_123"),
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = serde_json::to_vec(&json!({
        "event": "payment.failed",
        "payload": { "payment": { "entity": {
            "id": "pay_123", "order_id": provider_order_id, "status": "failed"
        }}}
    }))
    .unwrap();
    let signature = webhook_signature(&body);
    let response = app
        .request_raw(
            Method::POST,
            "/api/v1/webhooks/razorpay",
            body,
            &[("x-razorpay-signature", &signature)],
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let order_id: Uuid = initiated["order_id"].as_str().unwrap().parse().unwrap();
    let order = order::Entity::find_by_id(order_id)
        .one(app.state.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.payment_status, order::PaymentStatus::Paid);
    assert_eq!(order.status, order::OrderStatus::Processing);

    let after = product::Entity::find_by_id(product.id)
        .one(app.state.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.stock, 8);
}
