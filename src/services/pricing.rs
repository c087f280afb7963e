use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;

use crate::entities::coupon::{self, CouponKind};

/// One cart or order line as seen by the pricing routines. Quantities
/// and unit prices are taken from stored snapshots, not live catalog
/// prices.
#[derive(Debug, Clone, Copy)]
pub struct PricedLine {
    pub quantity: i32,
    pub unit_price: Decimal,
}

/// Monetary summary of a cart or order, rounded to two decimal places.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct Totals {
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
}

impl Totals {
    pub fn zero() -> Self {
        Self {
            subtotal: Decimal::ZERO,
            discount: Decimal::ZERO,
            total: Decimal::ZERO,
        }
    }
}

/// Whether a coupon may be applied to a cart with the given subtotal
/// at the given instant. All bounds are inclusive.
pub fn is_applicable(coupon: &coupon::Model, subtotal: Decimal, now: DateTime<Utc>) -> bool {
    if !coupon.active {
        return false;
    }
    if let Some(starts_at) = coupon.starts_at {
        if now < starts_at {
            return false;
        }
    }
    if let Some(ends_at) = coupon.ends_at {
        if now > ends_at {
            return false;
        }
    }
    if let Some(min_subtotal) = coupon.min_subtotal {
        if subtotal < min_subtotal {
            return false;
        }
    }
    true
}

/// Discount amount a coupon grants on `subtotal`, before rounding.
/// Clamped to `[0, subtotal]` and capped by `max_discount` when set.
fn discount_for(coupon: &coupon::Model, subtotal: Decimal) -> Decimal {
    let raw = match coupon.kind {
        CouponKind::Percent => subtotal * coupon.value / Decimal::from(100),
        CouponKind::Fixed => coupon.value,
    };
    let capped = match coupon.max_discount {
        Some(cap) => raw.min(cap),
        None => raw,
    };
    capped.max(Decimal::ZERO).min(subtotal)
}

/// Computes the subtotal, discount, and total for a set of lines. An
/// inapplicable coupon contributes zero discount rather than failing;
/// callers that must reject it validate separately.
pub fn compute_totals(
    lines: &[PricedLine],
    coupon: Option<&coupon::Model>,
    now: DateTime<Utc>,
) -> Totals {
    let subtotal: Decimal = lines
        .iter()
        .map(|line| Decimal::from(line.quantity) * line.unit_price)
        .sum();

    let discount = match coupon {
        Some(c) if is_applicable(c, subtotal, now) => discount_for(c, subtotal),
        _ => Decimal::ZERO,
    };

    let subtotal = subtotal.round_dp(2);
    let discount = discount.round_dp(2);
    let total = (subtotal - discount).max(Decimal::ZERO);

    Totals {
        subtotal,
        discount,
        total,
    }
}
