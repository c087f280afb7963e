pub mod addresses;
pub mod carts;
pub mod common;
pub mod coupons;
pub mod orders;
pub mod payments;
pub mod products;
pub mod webhooks;
