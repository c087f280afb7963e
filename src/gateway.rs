use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use tracing::{instrument, warn};

use crate::errors::ServiceError;

type HmacSha256 = Hmac<Sha256>;

/// Order created on the payment gateway before money moves. The
/// client-side checkout widget is pointed at `id`.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayOrder {
    pub id: String,
    pub amount: i64,
    pub currency: String,
}

/// Remote payment gateway seam. The production implementation talks to
/// Razorpay over HTTPS; tests substitute a stub.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates a gateway-side order for `amount_minor` in the smallest
    /// currency unit (paise for INR).
    async fn create_order(
        &self,
        amount_minor: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayOrder, ServiceError>;
}

/// Razorpay REST client. Authenticates with HTTP basic auth using the
/// API key pair.
#[derive(Debug, Clone)]
pub struct RazorpayGateway {
    client: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
}

#[derive(Debug, Serialize)]
struct CreateOrderRequest<'a> {
    amount: i64,
    currency: &'a str,
    receipt: &'a str,
}

impl RazorpayGateway {
    pub fn new(
        base_url: impl Into<String>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
            key_id: key_id.into(),
            key_secret: key_secret.into(),
        }
    }
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    #[instrument(skip(self), fields(amount_minor, currency))]
    async fn create_order(
        &self,
        amount_minor: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayOrder, ServiceError> {
        let url = format!("{}/orders", self.base_url.trim_end_matches('/'));
        let body = CreateOrderRequest {
            amount: amount_minor,
            currency,
            receipt,
        };

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::GatewayError(format!("order creation failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(%status, "gateway rejected order creation: {}", text);
            return Err(ServiceError::GatewayError(format!(
                "gateway returned {status}"
            )));
        }

        response
            .json::<GatewayOrder>()
            .await
            .map_err(|e| ServiceError::GatewayError(format!("malformed gateway response: {e}")))
    }
}

/// HMAC-SHA256 of `message` under `secret`, hex-encoded lowercase.
/// Razorpay signs both checkout confirmations and webhooks this way.
pub fn hmac_signature(secret: &str, message: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies a checkout confirmation signature. The signed message is
/// the gateway order id and payment id joined by a pipe.
pub fn verify_checkout_signature(
    key_secret: &str,
    provider_order_id: &str,
    provider_payment_id: &str,
    signature: &str,
) -> bool {
    let expected = hmac_signature(
        key_secret,
        &format!("{provider_order_id}|{provider_payment_id}"),
    );
    constant_time_eq(expected.as_bytes(), signature.as_bytes())
}

/// Verifies a webhook signature over the raw request body.
pub fn verify_webhook_signature(webhook_secret: &str, raw_body: &[u8], signature: &str) -> bool {
    let mut mac =
        HmacSha256::new_from_slice(webhook_secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(raw_body);
    let expected = hex::encode(mac.finalize().into_bytes());
    constant_time_eq(expected.as_bytes(), signature.as_bytes())
}

/// Constant-time byte comparison to avoid leaking signature prefixes
/// through timing.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
