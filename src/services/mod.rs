pub mod addresses;
pub mod carts;
pub mod checkout;
pub mod coupons;
pub mod orders;
pub mod payments;
pub mod pricing;
pub mod products;

use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::events::EventSender;
use crate::gateway::PaymentGateway;

pub use addresses::AddressService;
pub use carts::CartService;
pub use checkout::CheckoutService;
pub use coupons::CouponService;
pub use orders::OrderService;
pub use payments::PaymentService;
pub use products::ProductService;

/// All services, constructed once at startup and shared through the
/// application state.
#[derive(Clone)]
pub struct AppServices {
    pub products: Arc<ProductService>,
    pub carts: Arc<CartService>,
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentService>,
    pub coupons: Arc<CouponService>,
    pub addresses: Arc<AddressService>,
}

impl AppServices {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        config: &AppConfig,
    ) -> Self {
        Self {
            products: Arc::new(ProductService::new(db.clone())),
            carts: Arc::new(CartService::new(db.clone(), event_sender.clone())),
            checkout: Arc::new(CheckoutService::new(db.clone(), event_sender.clone())),
            orders: Arc::new(OrderService::new(db.clone(), event_sender.clone())),
            payments: Arc::new(PaymentService::new(
                db.clone(),
                event_sender,
                gateway,
                config,
            )),
            coupons: Arc::new(CouponService::new(db.clone())),
            addresses: Arc::new(AddressService::new(db)),
        }
    }
}
