use axum::{
    extract::{Json, Path, State},
    routing::{delete, get, post},
    Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{AdminUser, AuthenticatedUser};
use crate::errors::ServiceError;
use crate::handlers::common::{created_response, no_content_response, success_response};
use crate::services::coupons::NewCoupon;
use crate::AppState;

/// Creates the router for coupon endpoints
pub fn coupons_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_coupon))
        .route("/", get(list_coupons))
        .route("/validate", post(validate_coupon))
        .route("/:id", get(get_coupon))
        .route("/:id", delete(delete_coupon))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ValidateCouponRequest {
    pub code: String,
    /// Subtotal to check minimums and compute the discount against
    #[serde(default)]
    pub subtotal: Decimal,
}

/// Create a coupon, staff only
#[utoipa::path(
    post,
    path = "/api/v1/coupons",
    request_body = NewCoupon,
    responses(
        (status = 201, description = "Coupon created", body = crate::entities::coupon::Model),
        (status = 400, description = "Invalid coupon definition", body = crate::errors::ErrorResponse),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse)
    ),
    tag = "Coupons"
)]
pub async fn create_coupon(
    State(state): State<AppState>,
    _admin: AdminUser,
    Json(payload): Json<NewCoupon>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let coupon = state.services.coupons.create(payload).await?;
    Ok(created_response(coupon))
}

/// List coupons
#[utoipa::path(
    get,
    path = "/api/v1/coupons",
    responses(
        (status = 200, description = "All coupons")
    ),
    tag = "Coupons"
)]
pub async fn list_coupons(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let coupons = state.services.coupons.list().await?;
    Ok(success_response(coupons))
}

/// Get one coupon
#[utoipa::path(
    get,
    path = "/api/v1/coupons/{id}",
    params(("id" = Uuid, Path, description = "Coupon id")),
    responses(
        (status = 200, description = "Coupon detail", body = crate::entities::coupon::Model),
        (status = 404, description = "Coupon not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Coupons"
)]
pub async fn get_coupon(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let coupon = state.services.coupons.get(id).await?;
    Ok(success_response(coupon))
}

/// Delete a coupon, staff only
#[utoipa::path(
    delete,
    path = "/api/v1/coupons/{id}",
    params(("id" = Uuid, Path, description = "Coupon id")),
    responses(
        (status = 204, description = "Coupon deleted"),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse),
        (status = 404, description = "Coupon not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Coupons"
)]
pub async fn delete_coupon(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    state.services.coupons.delete(id).await?;
    Ok(no_content_response())
}

/// Check a coupon against a prospective subtotal
#[utoipa::path(
    post,
    path = "/api/v1/coupons/validate",
    request_body = ValidateCouponRequest,
    responses(
        (status = 200, description = "Validation result", body = crate::services::coupons::CouponValidation),
        (status = 404, description = "Coupon not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Coupons"
)]
pub async fn validate_coupon(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Json(payload): Json<ValidateCouponRequest>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let result = state
        .services
        .coupons
        .validate(&payload.code, payload.subtotal)
        .await?;

    Ok(success_response(result))
}
