//! sea-orm entities backing the storefront tables.

pub mod cart_item;
pub mod coupon;
pub mod coupon_redemption;
pub mod order;
pub mod order_item;
pub mod payment;
pub mod payment_callback;

pub use order::{OrderStatus, PaymentStatus as OrderPaymentStatus, ShippingMethod};
pub use payment::{PaymentMethod, PaymentStatus};
