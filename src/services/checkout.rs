use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QuerySelect, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::entities::order::{OrderStatus, PaymentStatus};
use crate::entities::{address, cart_item, coupon, order, order_item, product};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::carts::{clear_cart, find_or_create_cart};
use crate::services::orders::{build_order_view, OrderView};
use crate::services::pricing::{self, PricedLine};

/// Service for converting a cart into an order paid on delivery.
/// Gateway-backed checkouts go through the payment service instead,
/// which shares the reservation logic below.
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl CheckoutService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Places an order from the user's cart in one transaction: totals
    /// are computed from stored snapshots, stock is reserved per line
    /// under row locks, and the cart is emptied on success.
    #[instrument(skip(self))]
    pub async fn place_order(
        &self,
        user_id: Uuid,
        address_id: Uuid,
    ) -> Result<OrderView, ServiceError> {
        let txn = self.db.begin().await?;

        let cart = find_or_create_cart(&txn, user_id).await?;
        let items = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .all(&txn)
            .await?;
        if items.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        let address = address::Entity::find_by_id(address_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("address {address_id}")))?;
        if address.user_id != user_id {
            return Err(ServiceError::Forbidden(
                "address belongs to another user".into(),
            ));
        }

        let coupon = match cart.coupon_id {
            Some(id) => coupon::Entity::find_by_id(id).one(&txn).await?,
            None => None,
        };

        let lines: Vec<PricedLine> = items
            .iter()
            .map(|i| PricedLine {
                quantity: i.quantity,
                unit_price: i.unit_price,
            })
            .collect();
        let totals = pricing::compute_totals(&lines, coupon.as_ref(), Utc::now());

        let now = Utc::now();
        let new_order = order::ActiveModel {
            id: Set(Uuid::new_v4()),
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
        clear_cart(&txn, &cart).await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderCreated {
                order_id: new_order.id,
                user_id,
                total: new_order.total,
            })
            .await;

        info!(order_id = %new_order.id, total = %new_order.total, "order placed");
        build_order_view(self.db.as_ref(), new_order).await
    }
}

/// Reserves stock for each cart line and writes the matching order
/// items. Each product row is locked before the stock check so two
/// concurrent orders cannot both take the last unit.
pub(crate) async fn reserve_stock_and_create_items<C: ConnectionTrait>(
    txn: &C,
    order_id: Uuid,
    items: &[cart_item::Model],
) -> Result<(), ServiceError> {
    for item in items {
        let product = product::Entity::find_by_id(item.product_id)
            .lock_exclusive()
            .one(txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("product {}", item.product_id)))?;

        if product.stock < item.quantity {
            return Err(ServiceError::InsufficientStock(product.name));
        }

        let remaining = product.stock - item.quantity;
        let name = product.name.clone();
        let mut active: product::ActiveModel = product.into();
        active.stock = Set(remaining);
        active.updated_at = Set(Utc::now());
        active.update(txn).await?;

        let line_total =
            (rust_decimal::Decimal::from(item.quantity) * item.unit_price).round_dp(2);
        order_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            product_id: Set(item.product_id),
            quantity: Set(item.quantity),
            unit_price: Set(item.unit_price),
            line_total: Set(line_total),
            created_at: Set(Utc::now()),
        }
        .insert(txn)
        .await?;

        tracing::debug!(product = %name, reserved = item.quantity, remaining, "stock reserved");
    }
    Ok(())
}

/// Returns reserved stock to the catalog for every item on an order.
/// Used when a payment attempt is reported failed or an order is
/// cancelled before shipment.
pub(crate) async fn restore_stock<C: ConnectionTrait>(
    txn: &C,
    order_id: Uuid,
) -> Result<(), ServiceError> {
    let items = order_item::Entity::find()
        .filter(order_item::Column::OrderId.eq(order_id))
        .all(txn)
        .await?;

    for item in items {
        let product = product::Entity::find_by_id(item.product_id)
            .lock_exclusive()
            .one(txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("product {}", item.product_id)))?;

        let restored = product.stock + item.quantity;
        let mut active: product::ActiveModel = product.into();
        active.stock = Set(restored);
        active.updated_at = Set(Utc::now());
        active.update(txn).await?;
    }
    Ok(())
}
