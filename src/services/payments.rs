use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    QueryFilter, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::entities::order::{OrderStatus, PaymentStatus};
use crate::entities::payment::PaymentState;
use crate::entities::{address, cart, cart_item, coupon, order, payment};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::gateway::{verify_checkout_signature, verify_webhook_signature, PaymentGateway};
use crate::services::carts::{clear_cart, find_or_create_cart};
use crate::services::checkout::{reserve_stock_and_create_items, restore_stock};
use crate::services::pricing::{self, PricedLine};

const PROVIDER: &str = "razorpay";

/// Data the client needs to open the gateway's checkout widget.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct InitiatedPayment {
    pub payment_id: Uuid,
    pub order_id: Uuid,
    pub provider_order_id: String,
    /// Amount in the smallest currency unit (paise for INR)
    pub amount_minor: i64,
    pub currency: String,
    /// Public API key id for the client-side widget
    pub key_id: String,
}

/// Checkout confirmation posted by the client after the gateway widget
/// reports success.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PaymentConfirmation {
    pub provider_order_id: String,
    pub provider_payment_id: String,
    pub signature: String,
}

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    event: String,
    #[serde(default)]
    payload: WebhookPayload,
}

#[derive(Debug, Default, Deserialize)]
struct WebhookPayload {
    payment: Option<WebhookEntityWrapper>,
}

#[derive(Debug, Deserialize)]
struct WebhookEntityWrapper {
    entity: WebhookPaymentEntity,
}

#[derive(Debug, Deserialize)]
struct WebhookPaymentEntity {
    id: String,
    order_id: String,
    #[allow(dead_code)]
    status: Option<String>,
}

/// Service for gateway-backed payments: initiating sessions, verifying
/// client confirmations, and reconciling asynchronous webhooks. The
/// confirmation and webhook paths share one locked transition so a
/// payment can only be captured once.
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    gateway: Arc<dyn PaymentGateway>,
    key_id: String,
    key_secret: String,
    webhook_secret: String,
    currency: String,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        config: &AppConfig,
    ) -> Self {
        Self {
            db,
            event_sender,
            gateway,
            key_id: config.razorpay_key_id.clone(),
            key_secret: config.razorpay_key_secret.clone(),
            webhook_secret: config.razorpay_webhook_secret.clone(),
            currency: config.currency.clone(),
        }
    }

    /// Starts a gateway payment for the user's cart. The gateway order
    /// is created before anything is written locally, so a gateway
    /// failure leaves no orphaned order. On success the local order is
    /// created with stock reserved, and the cart is kept until the
    /// payment is confirmed.
    #[instrument(skip(self))]
    pub async fn initiate(
        &self,
        user_id: Uuid,
        address_id: Uuid,
    ) -> Result<InitiatedPayment, ServiceError> {
        let cart = find_or_create_cart(self.db.as_ref(), user_id).await?;
        let items = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .all(self.db.as_ref())
            .await?;
        if items.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        let address = address::Entity::find_by_id(address_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("address {address_id}")))?;
        if address.user_id != user_id {
            return Err(ServiceError::Forbidden(
                "address belongs to another user".into(),
            ));
        }

        let applied_coupon = match cart.coupon_id {
            Some(id) => coupon::Entity::find_by_id(id).one(self.db.as_ref()).await?,
            None => None,
        };

        let lines: Vec<PricedLine> = items
            .iter()
            .map(|i| PricedLine {
                quantity: i.quantity,
                unit_price: i.unit_price,
            })
            .collect();
        let totals = pricing::compute_totals(&lines, applied_coupon.as_ref(), Utc::now());
        if totals.total <= Decimal::ZERO {
            return Err(ServiceError::InvalidTotal);
        }

        let amount_minor = (totals.total * Decimal::from(100))
            .round()
            .to_i64()
            .ok_or_else(|| ServiceError::InternalError("amount out of range".into()))?;

        let order_id = Uuid::new_v4();
        let gateway_order = self
            .gateway
            .create_order(amount_minor, &self.currency, &order_id.to_string())
            .await?;

        let txn = self.db.begin().await?;

        let now = Utc::now();
        let new_order = order::ActiveModel {
            id: Set(order_id),
            user_id: Set(user_id),
            address_id: Set(address_id),
            subtotal: Set(totals.subtotal),
            discount: Set(totals.discount),
            total: Set(totals.total),
            status: Set(OrderStatus::Pending),
            payment_status: Set(PaymentStatus::Unpaid),
            coupon_id: Set(cart.coupon_id),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        reserve_stock_and_create_items(&txn, new_order.id, &items).await?;

        let payment = payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(new_order.id),
            user_id: Set(user_id),
            provider: Set(PROVIDER.to_string()),
            provider_order_id: Set(gateway_order.id.clone()),
            provider_payment_id: Set(None),
            provider_signature: Set(None),
            amount: Set(totals.total),
            currency: Set(self.currency.clone()),
            status: Set(PaymentState::Created),
            payload: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::PaymentInitiated {
                payment_id: payment.id,
                order_id: new_order.id,
                provider_order_id: gateway_order.id.clone(),
            })
            .await;

        info!(
            order_id = %new_order.id,
            provider_order_id = %gateway_order.id,
            amount_minor,
            "payment initiated"
        );

        Ok(InitiatedPayment {
            payment_id: payment.id,
            order_id: new_order.id,
            provider_order_id: gateway_order.id,
            amount_minor,
            currency: self.currency.clone(),
            key_id: self.key_id.clone(),
        })
    }

    /// Verifies the client-side checkout confirmation and marks the
    /// order paid. Safe to call more than once for the same payment.
    #[instrument(skip(self, confirmation))]
    pub async fn confirm(
        &self,
        user_id: Uuid,
        confirmation: PaymentConfirmation,
    ) -> Result<payment::Model, ServiceError> {
        if !verify_checkout_signature(
            &self.key_secret,
            &confirmation.provider_order_id,
            &confirmation.provider_payment_id,
            &confirmation.signature,
        ) {
            return Err(ServiceError::InvalidSignature);
        }

        let payment = self
            .payment_by_provider_order(&confirmation.provider_order_id)
            .await?;
        if payment.user_id != user_id {
            return Err(ServiceError::Forbidden(
                "payment belongs to another user".into(),
            ));
        }

        let txn = self.db.begin().await?;
        let outcome = capture_payment(
            &txn,
            payment,
            Some(confirmation.provider_payment_id),
            Some(confirmation.signature),
            None,
        )
        .await?;
        txn.commit().await?;

        match outcome {
            Captured::Transitioned(paid) => {
                self.event_sender
                    .send_or_log(Event::PaymentCaptured {
                        payment_id: paid.id,
                        order_id: paid.order_id,
                    })
                    .await;
                info!(order_id = %paid.order_id, "payment confirmed");
                Ok(paid)
            }
            Captured::AlreadyPaid(paid) => Ok(paid),
            Captured::OrderCancelled => Err(ServiceError::InvalidOperation(
                "order was cancelled before the payment could be captured".into(),
            )),
        }
    }

    /// Reconciles a gateway webhook. The signature covers the raw body
    /// bytes. Events for unknown payments are acknowledged so the
    /// gateway stops retrying them.
    #[instrument(skip(self, raw_body, signature))]
    pub async fn handle_webhook(
        &self,
        raw_body: &[u8],
        signature: &str,
    ) -> Result<(), ServiceError> {
        if !verify_webhook_signature(&self.webhook_secret, raw_body, signature) {
            return Err(ServiceError::InvalidSignature);
        }

        let envelope: WebhookEnvelope = serde_json::from_slice(raw_body)
            .map_err(|e| ServiceError::BadRequest(format!("malformed webhook body: {e}")))?;

        let Some(entity) = envelope.payload.payment.map(|p| p.entity) else {
            tracing::debug!(event = %envelope.event, "webhook without payment entity ignored");
            return Ok(());
        };

        let payment = match self.payment_by_provider_order(&entity.order_id).await {
            Ok(p) => p,
            Err(ServiceError::PaymentNotFound(_)) => {
                warn!(provider_order_id = %entity.order_id, "webhook for unknown payment ignored");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let payload: serde_json::Value = serde_json::from_slice(raw_body)
            .map_err(|e| ServiceError::BadRequest(format!("malformed webhook body: {e}")))?;

        match envelope.event.as_str() {
            "payment.captured" | "order.paid" => {
                let txn = self.db.begin().await?;
                let outcome =
                    capture_payment(&txn, payment, Some(entity.id), None, Some(payload)).await?;
                txn.commit().await?;

                if let Captured::Transitioned(ref paid) = outcome {
                    self.event_sender
                        .send_or_log(Event::PaymentCaptured {
                            payment_id: paid.id,
                            order_id: paid.order_id,
                        })
                        .await;
                    info!(order_id = %paid.order_id, "payment captured via webhook");
                }
            }
            "payment.failed" => {
                let txn = self.db.begin().await?;
                let failed = self.mark_failed(&txn, payment, payload).await?;
                txn.commit().await?;

                if let Some(failed) = failed {
                    self.event_sender
                        .send_or_log(Event::PaymentFailed {
                            payment_id: failed.id,
                            order_id: failed.order_id,
                        })
                        .await;
                    info!(order_id = %failed.order_id, "payment failed, order cancelled");
                }
            }
            other => {
                tracing::debug!(event = %other, "unhandled webhook event");
            }
        }

        Ok(())
    }

    async fn payment_by_provider_order(
        &self,
        provider_order_id: &str,
    ) -> Result<payment::Model, ServiceError> {
        payment::Entity::find()
            .filter(payment::Column::ProviderOrderId.eq(provider_order_id))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::PaymentNotFound(provider_order_id.to_string()))
    }

    /// Marks a payment failed, cancels its order, and returns reserved
    /// stock. A payment that already reached a terminal state is left
    /// alone; a late failure never undoes a capture.
    async fn mark_failed(
        &self,
        txn: &DatabaseTransaction,
        payment: payment::Model,
        payload: serde_json::Value,
    ) -> Result<Option<payment::Model>, ServiceError> {
        let order = lock_order(txn, payment.order_id).await?;

        if payment.status != PaymentState::Created || order.payment_status == PaymentStatus::Paid {
            return Ok(None);
        }

        let order_id = order.id;
        if order.status.can_transition_to(OrderStatus::Cancelled) {
            restore_stock(txn, order_id).await?;
            let mut active: order::ActiveModel = order.into();
            active.status = Set(OrderStatus::Cancelled);
            active.updated_at = Set(Utc::now());
            active.update(txn).await?;
        }

        let mut active: payment::ActiveModel = payment.into();
        active.status = Set(PaymentState::Failed);
        active.payload = Set(Some(payload));
        active.updated_at = Set(Utc::now());
        let failed = active.update(txn).await?;
        Ok(Some(failed))
    }
}

/// Result of the capture transition.
enum Captured {
    /// The payment moved from created to paid in this call.
    Transitioned(payment::Model),
    /// The payment was already paid; nothing changed.
    AlreadyPaid(payment::Model),
    /// The order was cancelled before the capture arrived; its stock is
    /// already released, so the capture is not applied and the payment
    /// is left for manual reconciliation.
    OrderCancelled,
}

/// The single capture transition shared by the confirmation and
/// webhook paths. Locks the order row first so concurrent deliveries
/// of the same capture serialize, then checks the payment state under
/// the lock. Marks the payment and order paid and empties the buyer's
/// cart.
async fn capture_payment(
    txn: &DatabaseTransaction,
    payment: payment::Model,
    provider_payment_id: Option<String>,
    provider_signature: Option<String>,
    payload: Option<serde_json::Value>,
) -> Result<Captured, ServiceError> {
    let order = lock_order(txn, payment.order_id).await?;

    let payment = payment::Entity::find_by_id(payment.id)
        .one(txn)
        .await?
        .ok_or_else(|| ServiceError::PaymentNotFound(payment.provider_order_id.clone()))?;

    if payment.status == PaymentState::Paid {
        return Ok(Captured::AlreadyPaid(payment));
    }
    if order.status == OrderStatus::Cancelled {
        warn!(
            order_id = %order.id,
            payment_id = %payment.id,
            "capture for a cancelled order not applied"
        );
        return Ok(Captured::OrderCancelled);
    }
    if payment.status == PaymentState::Failed {
        return Err(ServiceError::InvalidOperation(
            "payment already marked failed".into(),
        ));
    }

    let user_id = order.user_id;
    let order_status = order.status;

    let mut active_order: order::ActiveModel = order.into();
    active_order.payment_status = Set(PaymentStatus::Paid);
    if order_status == OrderStatus::Pending {
        active_order.status = Set(OrderStatus::Processing);
    }
    active_order.updated_at = Set(Utc::now());
    active_order.update(txn).await?;

    let mut active: payment::ActiveModel = payment.into();
    active.status = Set(PaymentState::Paid);
    if let Some(id) = provider_payment_id {
        active.provider_payment_id = Set(Some(id));
    }
    if let Some(sig) = provider_signature {
        active.provider_signature = Set(Some(sig));
    }
    if let Some(body) = payload {
        active.payload = Set(Some(body));
    }
    active.updated_at = Set(Utc::now());
    let paid = active.update(txn).await?;

    if let Some(cart) = cart::Entity::find()
        .filter(cart::Column::UserId.eq(user_id))
        .one(txn)
        .await?
    {
        clear_cart(txn, &cart).await?;
    }

    Ok(Captured::Transitioned(paid))
}

/// Locks the order row for the remainder of the transaction.
async fn lock_order(
    txn: &DatabaseTransaction,
    order_id: Uuid,
) -> Result<order::Model, ServiceError> {
    order::Entity::find_by_id(order_id)
        .lock_exclusive()
        .one(txn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("order {order_id}")))
}
