use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, ModelTrait,
    QueryFilter, Set, TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::{cart, cart_item, coupon, product};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::pricing::{self, PricedLine, Totals};

/// One cart line joined with its product, priced from the stored
/// unit-price snapshot.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CartItemView {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

/// Full cart as returned to clients: lines, applied coupon, and the
/// totals a checkout would charge right now.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CartView {
    pub id: Uuid,
    pub items: Vec<CartItemView>,
    pub coupon_code: Option<String>,
    pub totals: Totals,
}

/// Service for cart operations. Each user has at most one cart,
/// created lazily on first access.
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Returns the user's cart, creating an empty one if none exists.
    #[instrument(skip(self))]
    pub async fn get_cart(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        let cart = find_or_create_cart(self.db.as_ref(), user_id).await?;
        self.build_view(&cart).await
    }

    /// Adds a product to the cart. If the product is already present
    /// its quantity is incremented and the unit-price snapshot is
    /// refreshed to the current catalog price.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartView, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::ValidationError(
                "quantity must be at least 1".into(),
            ));
        }

        let txn = self.db.begin().await?;

        let product = product::Entity::find_by_id(product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("product {product_id}")))?;
        if !product.active {
            return Err(ServiceError::InvalidOperation(format!(
                "product {} is not available",
                product.name
            )));
        }

        let cart = find_or_create_cart(&txn, user_id).await?;

        let existing = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .one(&txn)
            .await?;

        match existing {
            Some(item) => {
                let new_quantity = item.quantity + quantity;
                let mut active: cart_item::ActiveModel = item.into();
                active.quantity = Set(new_quantity);
                active.unit_price = Set(product.price);
                active.updated_at = Set(Utc::now());
                active.update(&txn).await?;
            }
            None => {
                let now = Utc::now();
                cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart.id),
                    product_id: Set(product_id),
                    quantity: Set(quantity),
                    unit_price: Set(product.price),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&txn)
                .await?;
            }
        }

        touch_cart(&txn, &cart).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemAdded {
                cart_id: cart.id,
                product_id,
                quantity,
            })
            .await;

        info!(cart_id = %cart.id, %product_id, quantity, "item added to cart");
        self.build_view(&cart).await
    }

    /// Changes the quantity of an existing line. The unit-price
    /// snapshot is kept as is.
    #[instrument(skip(self))]
    pub async fn update_item(
        &self,
        user_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<CartView, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::ValidationError(
                "quantity must be at least 1".into(),
            ));
        }

        let (item, cart) = self.owned_item(user_id, item_id).await?;

        let mut active: cart_item::ActiveModel = item.into();
        active.quantity = Set(quantity);
        active.updated_at = Set(Utc::now());
        active.update(self.db.as_ref()).await?;

        self.build_view(&cart).await
    }

    /// Removes a line from the cart.
    #[instrument(skip(self))]
    pub async fn remove_item(&self, user_id: Uuid, item_id: Uuid) -> Result<CartView, ServiceError> {
        let (item, cart) = self.owned_item(user_id, item_id).await?;
        let product_id = item.product_id;

        item.delete(self.db.as_ref()).await?;

        self.event_sender
            .send_or_log(Event::CartItemRemoved {
                cart_id: cart.id,
                product_id,
            })
            .await;

        self.build_view(&cart).await
    }

    /// Empties the cart and detaches any applied coupon.
    #[instrument(skip(self))]
    pub async fn clear(&self, user_id: Uuid) -> Result<(), ServiceError> {
        let cart = find_or_create_cart(self.db.as_ref(), user_id).await?;
        clear_cart(self.db.as_ref(), &cart).await?;

        self.event_sender
            .send_or_log(Event::CartCleared { cart_id: cart.id })
            .await;

        info!(cart_id = %cart.id, "cart cleared");
        Ok(())
    }

    /// Applies a coupon by code. The coupon must be active, inside its
    /// validity window, and the cart subtotal must meet its minimum.
    #[instrument(skip(self))]
    pub async fn apply_coupon(&self, user_id: Uuid, code: &str) -> Result<CartView, ServiceError> {
        let code = code.trim();
        let coupon = coupon::Entity::find()
            .filter(coupon::Column::Code.eq(code))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("coupon {code}")))?;

        let cart = find_or_create_cart(self.db.as_ref(), user_id).await?;
        let lines = self.priced_lines(&cart).await?;
        let subtotal: Decimal = lines
            .iter()
            .map(|l| Decimal::from(l.quantity) * l.unit_price)
            .sum();

        if !pricing::is_applicable(&coupon, subtotal, Utc::now()) {
            return Err(ServiceError::InvalidOperation(format!(
                "coupon {} is not applicable to this cart",
                coupon.code
            )));
        }

        let mut active: cart::ActiveModel = cart.clone().into();
        active.coupon_id = Set(Some(coupon.id));
        active.updated_at = Set(Utc::now());
        active.update(self.db.as_ref()).await?;

        self.event_sender
            .send_or_log(Event::CouponApplied {
                cart_id: cart.id,
                coupon_id: coupon.id,
            })
            .await;

        info!(cart_id = %cart.id, code = %coupon.code, "coupon applied");
        self.build_view(&cart).await
    }

    /// Detaches the applied coupon, if any.
    #[instrument(skip(self))]
    pub async fn remove_coupon(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        let cart = find_or_create_cart(self.db.as_ref(), user_id).await?;

        if cart.coupon_id.is_some() {
            let mut active: cart::ActiveModel = cart.clone().into();
            active.coupon_id = Set(None);
            active.updated_at = Set(Utc::now());
            active.update(self.db.as_ref()).await?;
        }

        self.build_view(&cart).await
    }

    /// Looks up a cart line and verifies the caller owns its cart.
    /// Ownership failures are reported as forbidden, not as missing.
    async fn owned_item(
        &self,
        user_id: Uuid,
        item_id: Uuid,
    ) -> Result<(cart_item::Model, cart::Model), ServiceError> {
        let item = cart_item::Entity::find_by_id(item_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("cart item {item_id}")))?;

        let cart = cart::Entity::find_by_id(item.cart_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("cart {}", item.cart_id)))?;

        if cart.user_id != user_id {
            return Err(ServiceError::Forbidden(
                "cart item belongs to another user".into(),
            ));
        }

        Ok((item, cart))
    }

    async fn priced_lines(&self, cart: &cart::Model) -> Result<Vec<PricedLine>, ServiceError> {
        let items = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .all(self.db.as_ref())
            .await?;
        Ok(items
            .iter()
            .map(|i| PricedLine {
                quantity: i.quantity,
                unit_price: i.unit_price,
            })
            .collect())
    }

    async fn build_view(&self, cart: &cart::Model) -> Result<CartView, ServiceError> {
        // Re-read the cart row so coupon changes made in this call are
        // reflected in the view.
        let cart = cart::Entity::find_by_id(cart.id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("cart {}", cart.id)))?;

        let items = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .find_also_related(product::Entity)
            .all(self.db.as_ref())
            .await?;

        let mut views = Vec::with_capacity(items.len());
        let mut lines = Vec::with_capacity(items.len());
        for (item, product) in items {
            let product =
                product.ok_or_else(|| ServiceError::InternalError("orphaned cart line".into()))?;
            lines.push(PricedLine {
                quantity: item.quantity,
                unit_price: item.unit_price,
            });
            views.push(CartItemView {
                id: item.id,
                product_id: item.product_id,
                product_name: product.name,
                quantity: item.quantity,
                unit_price: item.unit_price,
                line_total: (Decimal::from(item.quantity) * item.unit_price).round_dp(2),
            });
        }

        let coupon = match cart.coupon_id {
            Some(id) => coupon::Entity::find_by_id(id).one(self.db.as_ref()).await?,
            None => None,
        };

        let totals = pricing::compute_totals(&lines, coupon.as_ref(), Utc::now());

        Ok(CartView {
            id: cart.id,
            items: views,
            coupon_code: coupon.map(|c| c.code),
            totals,
        })
    }
}

/// Finds the user's cart or creates an empty one.
pub(crate) async fn find_or_create_cart<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> Result<cart::Model, ServiceError> {
    if let Some(cart) = cart::Entity::find()
        .filter(cart::Column::UserId.eq(user_id))
        .one(conn)
        .await?
    {
        return Ok(cart);
    }

    let now = Utc::now();
    let cart = cart::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        coupon_id: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(conn)
    .await?;
    Ok(cart)
}

/// Deletes all lines and detaches the coupon. Used after a successful
/// checkout or payment capture as well as by the explicit clear call.
pub(crate) async fn clear_cart<C: ConnectionTrait>(
    conn: &C,
    cart: &cart::Model,
) -> Result<(), ServiceError> {
    cart_item::Entity::delete_many()
        .filter(cart_item::Column::CartId.eq(cart.id))
        .exec(conn)
        .await?;

    let mut active: cart::ActiveModel = cart.clone().into();
    active.coupon_id = Set(None);
    active.updated_at = Set(Utc::now());
    active.update(conn).await?;
    Ok(())
}

async fn touch_cart<C: ConnectionTrait>(conn: &C, cart: &cart::Model) -> Result<(), ServiceError> {
    let mut active: cart::ActiveModel = cart.clone().into();
    active.updated_at = Set(Utc::now());
    active.update(conn).await?;
    Ok(())
}
