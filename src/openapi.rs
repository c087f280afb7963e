use utoipa::OpenApi;

/// OpenAPI document served at /api-docs and rendered by Swagger UI.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "0.1.0",
        description = r#"
Order pricing and checkout API for a storefront backed by the Razorpay
payment gateway.

All endpoints except the catalog and the webhook require a JWT bearer
token:

```
Authorization: Bearer <token>
```

Money is handled as exact decimals and rounded to two places at the
API boundary. Gateway amounts are expressed in the smallest currency
unit (paise for INR).
"#
    ),
    paths(
        crate::handlers::products::list_products,
        crate::handlers::products::get_product,
        crate::handlers::carts::get_cart,
        crate::handlers::carts::add_item,
        crate::handlers::carts::update_item,
        crate::handlers::carts::remove_item,
        crate::handlers::carts::clear_cart,
        crate::handlers::carts::apply_coupon,
        crate::handlers::carts::remove_coupon,
        crate::handlers::orders::checkout,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::update_order_status,
        crate::handlers::payments::initiate_payment,
        crate::handlers::payments::confirm_payment,
        crate::handlers::webhooks::razorpay_webhook,
        crate::handlers::coupons::create_coupon,
        crate::handlers::coupons::list_coupons,
        crate::handlers::coupons::get_coupon,
        crate::handlers::coupons::delete_coupon,
        crate::handlers::coupons::validate_coupon,
        crate::handlers::addresses::list_addresses,
        crate::handlers::addresses::create_address,
        crate::handlers::addresses::get_address,
    ),
    components(schemas(
        crate::errors::ErrorResponse,
        crate::entities::product::Model,
        crate::entities::order::Model,
        crate::entities::order::OrderStatus,
        crate::entities::order::PaymentStatus,
        crate::entities::payment::Model,
        crate::entities::payment::PaymentState,
        crate::entities::coupon::Model,
        crate::entities::coupon::CouponKind,
        crate::entities::address::Model,
        crate::services::carts::CartView,
        crate::services::carts::CartItemView,
        crate::services::orders::OrderView,
        crate::services::orders::OrderItemView,
        crate::services::pricing::Totals,
        crate::services::payments::InitiatedPayment,
        crate::services::coupons::NewCoupon,
        crate::services::coupons::CouponValidation,
        crate::services::addresses::NewAddress,
        crate::handlers::carts::AddItemRequest,
        crate::handlers::carts::UpdateQuantityRequest,
        crate::handlers::carts::ApplyCouponRequest,
        crate::handlers::orders::CheckoutRequest,
        crate::handlers::orders::UpdateStatusRequest,
        crate::handlers::payments::InitiatePaymentRequest,
        crate::handlers::payments::ConfirmPaymentRequest,
        crate::handlers::coupons::ValidateCouponRequest,
    )),
    tags(
        (name = "Products", description = "Catalog browsing"),
        (name = "Cart", description = "Cart lines, coupons, and priced totals"),
        (name = "Orders", description = "Checkout and order lifecycle"),
        (name = "Payments", description = "Gateway payments and reconciliation"),
        (name = "Coupons", description = "Coupon management and validation"),
        (name = "Addresses", description = "Shipping address book")
    )
)]
pub struct ApiDoc;
