use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::order::{OrderStatus, PaymentStatus};
use crate::entities::{order, order_item, product};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::checkout::restore_stock;

/// One order line joined with its product name.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderItemView {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

/// Full order detail as returned to clients.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderView {
    pub id: Uuid,
    pub user_id: Uuid,
    pub address_id: Uuid,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub items: Vec<OrderItemView>,
    pub created_at: chrono::DateTime<Utc>,
}

/// Service for reading orders and driving their fulfilment status.
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Lists the user's orders, newest first.
    #[instrument(skip(self))]
    pub async fn list(&self, user_id: Uuid) -> Result<Vec<order::Model>, ServiceError> {
        let orders = order::Entity::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .all(self.db.as_ref())
            .await?;
        Ok(orders)
    }

    /// Fetches one order with its lines. Orders belonging to another
    /// user are rejected as forbidden.
    #[instrument(skip(self))]
    pub async fn get(&self, user_id: Uuid, order_id: Uuid) -> Result<OrderView, ServiceError> {
        let order = order::Entity::find_by_id(order_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {order_id}")))?;

        if order.user_id != user_id {
            return Err(ServiceError::Forbidden("order belongs to another user".into()));
        }

        build_order_view(self.db.as_ref(), order).await
    }

    /// Moves an order to a new fulfilment status. Transitions only
    /// move forward; cancellation is allowed from any non-terminal
    /// status and returns reserved stock to the catalog.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let order = order::Entity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {order_id}")))?;

        if !order.status.can_transition_to(new_status) {
            return Err(ServiceError::InvalidOperation(format!(
                "cannot move order from {:?} to {:?}",
                order.status, new_status
            )));
        }

        if new_status == OrderStatus::Cancelled {
            restore_stock(&txn, order.id).await?;
        }

        let mut active: order::ActiveModel = order.into();
        active.status = Set(new_status);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&txn).await?;

        txn.commit().await?;

        let event = if new_status == OrderStatus::Cancelled {
            Event::OrderCancelled { order_id }
        } else {
            Event::OrderStatusChanged {
                order_id,
                status: format!("{new_status:?}").to_lowercase(),
            }
        };
        self.event_sender.send_or_log(event).await;

        info!(%order_id, status = ?new_status, "order status updated");
        Ok(updated)
    }
}

/// Loads order lines and assembles the client-facing view.
pub(crate) async fn build_order_view<C: ConnectionTrait>(
    conn: &C,
    order: order::Model,
) -> Result<OrderView, ServiceError> {
    let items = order_item::Entity::find()
        .filter(order_item::Column::OrderId.eq(order.id))
        .find_also_related(product::Entity)
        .all(conn)
        .await?;

    let mut views = Vec::with_capacity(items.len());
    for (item, product) in items {
        let product =
            product.ok_or_else(|| ServiceError::InternalError("orphaned order line".into()))?;
        views.push(OrderItemView {
            id: item.id,
            product_id: item.product_id,
            product_name: product.name,
            quantity: item.quantity,
            unit_price: item.unit_price,
            line_total: item.line_total,
        });
    }

    Ok(OrderView {
        id: order.id,
        user_id: order.user_id,
        address_id: order.address_id,
        subtotal: order.subtotal,
        discount: order.discount,
        total: order.total,
        status: order.status,
        payment_status: order.payment_status,
        items: views,
        created_at: order.created_at,
    })
}
