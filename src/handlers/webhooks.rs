use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Router,
};
use serde_json::json;

use crate::errors::ServiceError;
use crate::AppState;

const SIGNATURE_HEADER: &str = "x-razorpay-signature";

/// Creates the router for gateway webhook endpoints. These are called
/// by the payment provider, not by clients, so there is no bearer
/// auth; authenticity comes from the body signature.
pub fn webhooks_routes() -> Router<AppState> {
    Router::new().route("/razorpay", post(razorpay_webhook))
}

/// Receive a Razorpay webhook
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/razorpay",
    request_body = String,
    responses(
        (status = 200, description = "Webhook processed"),
        (status = 400, description = "Missing or invalid signature", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn razorpay_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ServiceError::BadRequest("missing signature header".into()))?;

    match state.services.payments.handle_webhook(&body, signature).await {
        Ok(()) => Ok((StatusCode::OK, axum::Json(json!({ "received": true })))),
        // The provider expects 400 for signature failures, not 422.
        Err(ServiceError::InvalidSignature) => Err(ServiceError::BadRequest(
            "invalid webhook signature".into(),
        )),
        Err(e) => Err(e),
    }
}
