mod common;

use axum::http::{Method, StatusCode};
use common::{body_json, money, TestApp};
use rust_decimal_macros::dec;
use sea_orm::EntityTrait;
use serde_json::json;
use storefront_api::entities::{coupon::CouponKind, product};
use uuid::Uuid;

#[tokio::test]
async fn checkout_with_empty_cart_is_rejected() {
    let app = TestApp::new().await;
    let address = app.seed_address(app.user_id).await;

    let response = app
        .request_authenticated(
            Method::POST,
            "/api/v1/checkout",
            Some(json!({ "address_id": address.id })),
        )
        .await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert_eq!(body["kind"], "empty_cart");
}

#[tokio::test]
async fn checkout_creates_order_reserves_stock_and_clears_cart() {
    let app = TestApp::new().await;
    let widget = app.seed_product("Widget", dec!(100.00), 10).await;
    let gadget = app.seed_product("Gadget", dec!(25.50), 5).await;
    let address = app.seed_address(app.user_id).await;
    app.seed_coupon("SAVE10", CouponKind::Percent, dec!(10), None, None, None, None)
        .await;

    for (product_id, quantity) in [(widget.id, 2), (gadget.id, 1)] {
        let response = app
            .request_authenticated(
                Method::POST,
                "/api/v1/cart/items",
                Some(json!({ "product_id": product_id, "quantity": quantity })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .request_authenticated(
            Method::POST,
            "/api/v1/cart/coupon",
            Some(json!({ "code": "SAVE10" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let cart = body_json(response).await;
    assert_eq!(money(&cart["totals"]["subtotal"]), dec!(225.50));
    assert_eq!(money(&cart["totals"]["discount"]), dec!(22.55));
    assert_eq!(money(&cart["totals"]["total"]), dec!(202.95));

    let response = app
        .request_authenticated(
            Method::POST,
            "/api/v1/checkout",
            Some(json!({ "address_id": address.id })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let order = body_json(response).await;
    assert_eq!(order["status"], "pending");
    assert_eq!(order["payment_status"], "unpaid");
    assert_eq!(money(&order["total"]), dec!(202.95));
    assert_eq!(order["items"].as_array().unwrap().len(), 2);

    let widget_after = product::Entity::find_by_id(widget.id)
        .one(app.state.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(widget_after.stock, 8);

    let response = app
        .request_authenticated(Method::GET, "/api/v1/cart", None)
        .await;
    let cart = body_json(response).await;
    assert!(cart["items"].as_array().unwrap().is_empty());
    assert!(cart["coupon_code"].is_null());
}

#[tokio::test]
async fn checkout_fails_when_stock_is_insufficient() {
    let app = TestApp::new().await;
    let product = app.seed_product("Scarce", dec!(10.00), 1).await;
    let address = app.seed_address(app.user_id).await;

    let response = app
        .request_authenticated(
            Method::POST,
            "/api/v1/cart/items",
            Some(json!({ "product_id": product.id, "quantity": 3 })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .request_authenticated(
            Method::POST,
            "/api/v1/checkout",
            Some(json!({ "address_id": address.id })),
        )
        .await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert_eq!(body["kind"], "insufficient_stock");

    // Nothing was reserved for the failed attempt.
    let after = product::Entity::find_by_id(product.id)
        .one(app.state.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.stock, 1);
}

#[tokio::test]
async fn stock_failure_mid_checkout_rolls_back_earlier_lines() {
    let app = TestApp::new().await;
    let plentiful = app.seed_product("Aplenty", dec!(10.00), 10).await;
    let scarce = app.seed_product("Scarce", dec!(10.00), 1).await;
    let address = app.seed_address(app.user_id).await;

    for (product_id, quantity) in [(plentiful.id, 2), (scarce.id, 3)] {
        let response = app
            .request_authenticated(
                Method::POST,
                "/api/v1/cart/items",
                Some(json!({ "product_id": product_id, "quantity": quantity })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .request_authenticated(
            Method::POST,
            "/api/v1/checkout",
            Some(json!({ "address_id": address.id })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert_eq!(body["kind"], "insufficient_stock");

    // The first line's decrement and the order row were rolled back.
    let plentiful_after = product::Entity::find_by_id(plentiful.id)
        .one(app.state.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(plentiful_after.stock, 10);

    let response = app
        .request_authenticated(Method::GET, "/api/v1/orders", None)
        .await;
    let orders = body_json(response).await;
    assert!(orders.as_array().unwrap().is_empty());

    // The cart still holds both lines for another attempt.
    let response = app
        .request_authenticated(Method::GET, "/api/v1/cart", None)
        .await;
    let cart = body_json(response).await;
    assert_eq!(cart["items"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn cart_lines_keep_their_price_snapshot() {
    let app = TestApp::new().await;
    let product = app.seed_product("Drifting", dec!(40.00), 10).await;
    let product_id = product.id;

    let response = app
        .request_authenticated(
            Method::POST,
            "/api/v1/cart/items",
            Some(json!({ "product_id": product_id, "quantity": 1 })),
        )
        .await;
    let cart = body_json(response).await;
    let item_id = cart["items"][0]["id"].as_str().unwrap().to_string();

    // Catalog price changes after the line was added.
    let mut active: product::ActiveModel = product.into();
    active.price = sea_orm::Set(dec!(60.00));
    sea_orm::ActiveModelTrait::update(active, app.state.db.as_ref())
        .await
        .unwrap();

    // Quantity updates keep the stored snapshot.
    let response = app
        .request_authenticated(
            Method::PUT,
            &format!("/api/v1/cart/items/{item_id}"),
            Some(json!({ "quantity": 2 })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let cart = body_json(response).await;
    assert_eq!(money(&cart["totals"]["subtotal"]), dec!(80.00));

    // Re-adding the product refreshes the snapshot to the new price.
    let response = app
        .request_authenticated(
            Method::POST,
            "/api/v1/cart/items",
            Some(json!({ "product_id": product_id, "quantity": 1 })),
        )
        .await;
    let cart = body_json(response).await;
    assert_eq!(cart["items"][0]["quantity"], 3);
    assert_eq!(money(&cart["totals"]["subtotal"]), dec!(180.00));
}

#[tokio::test]
async fn cart_items_of_other_users_are_forbidden() {
    let app = TestApp::new().await;
    let product = app.seed_product("Private", dec!(5.00), 10).await;

    let response = app
        .request_authenticated(
            Method::POST,
            "/api/v1/cart/items",
            Some(json!({ "product_id": product.id, "quantity": 1 })),
        )
        .await;
    let cart = body_json(response).await;
    let item_id = cart["items"][0]["id"].as_str().unwrap().to_string();

    let stranger = app.token_for(Uuid::new_v4());
    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/cart/items/{item_id}"),
            Some(json!({ "quantity": 5 })),
            Some(&stranger),
        )
        .await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["kind"], "forbidden");
}

#[tokio::test]
async fn expired_coupon_cannot_be_applied() {
    let app = TestApp::new().await;
    let product = app.seed_product("Anything", dec!(50.00), 10).await;
    let yesterday = chrono::Utc::now() - chrono::Duration::days(1);
    app.seed_coupon(
        "EXPIRED",
        CouponKind::Fixed,
        dec!(5),
        None,
        None,
        None,
        Some(yesterday),
    )
    .await;

    app.request_authenticated(
        Method::POST,
        "/api/v1/cart/items",
        Some(json!({ "product_id": product.id, "quantity": 1 })),
    )
    .await;

    let response = app
        .request_authenticated(
            Method::POST,
            "/api/v1/cart/coupon",
            Some(json!({ "code": "EXPIRED" })),
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["kind"], "invalid_operation");
}

#[tokio::test]
async fn requests_without_token_are_unauthorized() {
    let app = TestApp::new().await;

    let response = app.request(Method::GET, "/api/v1/cart", None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
