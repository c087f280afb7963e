use axum::{
    extract::{Json, State},
    routing::post,
    Router,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::errors::ServiceError;
use crate::handlers::common::{created_response, success_response};
use crate::services::payments::PaymentConfirmation;
use crate::AppState;

/// Creates the router for payment endpoints
pub fn payments_routes() -> Router<AppState> {
    Router::new()
        .route("/initiate", post(initiate_payment))
        .route("/confirm", post(confirm_payment))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct InitiatePaymentRequest {
    pub address_id: Uuid,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ConfirmPaymentRequest {
    pub provider_order_id: String,
    pub provider_payment_id: String,
    pub signature: String,
}

/// Start a gateway payment for the current cart
#[utoipa::path(
    post,
    path = "/api/v1/payments/initiate",
    request_body = InitiatePaymentRequest,
    responses(
        (status = 201, description = "Payment session created", body = crate::services::payments::InitiatedPayment),
        (status = 422, description = "Empty cart or zero total", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn initiate_payment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<InitiatePaymentRequest>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let initiated = state
        .services
        .payments
        .initiate(user.0, payload.address_id)
        .await?;

    Ok(created_response(initiated))
}

/// Confirm a gateway payment with the checkout signature
#[utoipa::path(
    post,
    path = "/api/v1/payments/confirm",
    request_body = ConfirmPaymentRequest,
    responses(
        (status = 200, description = "Payment captured", body = crate::entities::payment::Model),
        (status = 422, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown gateway order", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn confirm_payment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<ConfirmPaymentRequest>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let confirmation = PaymentConfirmation {
        provider_order_id: payload.provider_order_id,
        provider_payment_id: payload.provider_payment_id,
        signature: payload.signature,
    };

    let payment = state.services.payments.confirm(user.0, confirmation).await?;
    Ok(success_response(payment))
}
