use std::time::Duration;

use assert_matches::assert_matches;
use serde_json::json;
use storefront_api::errors::ServiceError;
use storefront_api::gateway::{PaymentGateway, RazorpayGateway};
use wiremock::matchers::{body_partial_json, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn gateway_for(server: &MockServer) -> RazorpayGateway {
    RazorpayGateway::new(
        server.uri(),
        "rzp_test_key_id",
        "rzp_test_key_secret",
        Duration::from_secs(2),
    )
}

#[tokio::test]
async fn create_order_posts_amount_and_parses_response() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/orders"))
        .and(header_exists("authorization"))
        .and(body_partial_json(json!({
            "amount": 20295,
            "currency": "INR"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "order_abc123",
            "amount": 20295,
            "currency": "INR",
            "status": "created"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    let order = gateway
        .create_order(20_295, "INR", "local-receipt-1")
        .await
        .expect("gateway order created");

    assert_eq!(order.id, "order_abc123");
    assert_eq!(order.amount, 20_295);
    assert_eq!(order.currency, "INR");
}

#[tokio::test]
async fn gateway_rejection_surfaces_as_gateway_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/orders"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": { "code": "BAD_REQUEST_ERROR", "description": "key invalid" }
        })))
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    let err = gateway
        .create_order(10_000, "INR", "local-receipt-2")
        .await
        .expect_err("rejection should not produce an order");

    assert_matches!(err, ServiceError::GatewayError(_));
}

#[tokio::test]
async fn malformed_gateway_response_surfaces_as_gateway_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    let err = gateway
        .create_order(10_000, "INR", "local-receipt-3")
        .await
        .expect_err("malformed body should not produce an order");

    assert_matches!(err, ServiceError::GatewayError(_));
}
