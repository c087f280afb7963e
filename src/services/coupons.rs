use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, ModelTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::coupon::{self, CouponKind};
use crate::errors::ServiceError;
use crate::services::pricing;

/// Input for creating a coupon.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewCoupon {
    pub code: String,
    pub kind: CouponKind,
    pub value: Decimal,
    pub min_subtotal: Option<Decimal>,
    pub max_discount: Option<Decimal>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// Result of checking a coupon against a prospective subtotal.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CouponValidation {
    pub valid: bool,
    pub code: String,
    pub kind: CouponKind,
    pub value: Decimal,
    /// Discount the coupon would grant on the given subtotal
    pub discount: Decimal,
}

/// Service for coupon management and validation.
pub struct CouponService {
    db: Arc<DatabaseConnection>,
}

impl CouponService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self, input), fields(code = %input.code))]
    pub async fn create(&self, input: NewCoupon) -> Result<coupon::Model, ServiceError> {
        let code = input.code.trim().to_uppercase();
        if code.is_empty() {
            return Err(ServiceError::ValidationError("coupon code is required".into()));
        }
        if input.value <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "coupon value must be positive".into(),
            ));
        }
        if input.kind == CouponKind::Percent && input.value > Decimal::from(100) {
            return Err(ServiceError::ValidationError(
                "percent coupons cannot exceed 100".into(),
            ));
        }
        if let (Some(starts), Some(ends)) = (input.starts_at, input.ends_at) {
            if ends < starts {
                return Err(ServiceError::ValidationError(
                    "validity window ends before it starts".into(),
                ));
            }
        }

        if coupon::Entity::find()
            .filter(coupon::Column::Code.eq(code.clone()))
            .one(self.db.as_ref())
            .await?
            .is_some()
        {
            return Err(ServiceError::InvalidOperation(format!(
                "coupon {code} already exists"
            )));
        }

        let now = Utc::now();
        let created = coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code),
            kind: Set(input.kind),
            value: Set(input.value),
            min_subtotal: Set(input.min_subtotal),
            max_discount: Set(input.max_discount),
            starts_at: Set(input.starts_at),
            ends_at: Set(input.ends_at),
            active: Set(input.active),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.db.as_ref())
        .await?;

        info!(code = %created.code, "coupon created");
        Ok(created)
    }

    #[instrument(skip(self))]
    pub async fn list(&self) -> Result<Vec<coupon::Model>, ServiceError> {
        let coupons = coupon::Entity::find()
            .order_by_asc(coupon::Column::Code)
            .all(self.db.as_ref())
            .await?;
        Ok(coupons)
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: Uuid) -> Result<coupon::Model, ServiceError> {
        coupon::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("coupon {id}")))
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> Result<(), ServiceError> {
        let coupon = self.get(id).await?;
        coupon.delete(self.db.as_ref()).await?;
        info!(%id, "coupon deleted");
        Ok(())
    }

    /// Checks whether a coupon can be applied to a cart with the given
    /// subtotal right now, and how much it would take off.
    #[instrument(skip(self))]
    pub async fn validate(
        &self,
        code: &str,
        subtotal: Decimal,
    ) -> Result<CouponValidation, ServiceError> {
        let code = code.trim();
        let coupon = coupon::Entity::find()
            .filter(coupon::Column::Code.eq(code))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("coupon {code}")))?;

        let valid = pricing::is_applicable(&coupon, subtotal, Utc::now());
        let discount = if valid {
            let line = pricing::PricedLine {
                quantity: 1,
                unit_price: subtotal,
            };
            pricing::compute_totals(&[line], Some(&coupon), Utc::now()).discount
        } else {
            Decimal::ZERO
        };

        Ok(CouponValidation {
            valid,
            code: coupon.code,
            kind: coupon.kind,
            value: coupon.value,
            discount,
        })
    }
}
