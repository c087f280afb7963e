use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Domain events emitted after state changes commit. Consumers run out
/// of band; emitting an event never fails the originating request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    CartItemAdded {
        cart_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    },
    CartItemRemoved {
        cart_id: Uuid,
        product_id: Uuid,
    },
    CartCleared {
        cart_id: Uuid,
    },
    CouponApplied {
        cart_id: Uuid,
        coupon_id: Uuid,
    },
    OrderCreated {
        order_id: Uuid,
        user_id: Uuid,
        total: Decimal,
    },
    OrderStatusChanged {
        order_id: Uuid,
        status: String,
    },
    OrderCancelled {
        order_id: Uuid,
    },
    PaymentInitiated {
        payment_id: Uuid,
        order_id: Uuid,
        provider_order_id: String,
    },
    PaymentCaptured {
        payment_id: Uuid,
        order_id: Uuid,
    },
    PaymentFailed {
        payment_id: Uuid,
        order_id: Uuid,
    },
}

/// Sending half of the event channel, shared by all services.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(tx: mpsc::Sender<Event>) -> Self {
        Self { tx }
    }

    pub async fn send(&self, event: Event) -> Result<(), mpsc::error::SendError<Event>> {
        self.tx.send(event).await
    }

    /// Sends an event, logging instead of failing when the consumer is
    /// gone. Used on commit paths where the write already succeeded.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.tx.send(event).await {
            error!("failed to publish event: {}", e.0.describe());
        }
    }
}

impl Event {
    fn describe(&self) -> &'static str {
        match self {
            Event::CartItemAdded { .. } => "cart_item_added",
            Event::CartItemRemoved { .. } => "cart_item_removed",
            Event::CartCleared { .. } => "cart_cleared",
            Event::CouponApplied { .. } => "coupon_applied",
            Event::OrderCreated { .. } => "order_created",
            Event::OrderStatusChanged { .. } => "order_status_changed",
            Event::OrderCancelled { .. } => "order_cancelled",
            Event::PaymentInitiated { .. } => "payment_initiated",
            Event::PaymentCaptured { .. } => "payment_captured",
            Event::PaymentFailed { .. } => "payment_failed",
        }
    }
}

/// Creates the event channel with a bounded buffer.
pub fn event_channel(buffer: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(buffer);
    (EventSender::new(tx), rx)
}

/// Drains the event channel, logging each event. Runs until every
/// sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Event processor started");
    while let Some(event) = rx.recv().await {
        match serde_json::to_string(&event) {
            Ok(json) => debug!(event = event.describe(), payload = %json, "event processed"),
            Err(e) => error!("failed to serialize event: {}", e),
        }
    }
    info!("Event processor stopped");
}
