pub mod cart;
pub mod coupons;
pub mod orders;
pub mod payment_callbacks;
pub mod payments;

use std::sync::Arc;

use axum::http::HeaderMap;

use crate::{
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    gateways::PaymentGateways,
    services::{
        cart::CartService, coupons::CouponService, orders::OrderService,
        payments::PaymentService, reconciliation::PaymentReconciler,
    },
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer used by the HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub coupons: Arc<CouponService>,
    pub payments: Arc<PaymentService>,
    pub reconciler: Arc<PaymentReconciler>,
    pub cart: Arc<CartService>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        config: &AppConfig,
        gateways: PaymentGateways,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        let coupons = CouponService::new(db_pool.clone(), config.coupons.free_shipping_policy);
        let orders = OrderService::new(
            db_pool.clone(),
            coupons.clone(),
            config,
            event_sender.clone(),
        );
        let payments = PaymentService::new(
            db_pool.clone(),
            gateways.clone(),
            config.currency.clone(),
            event_sender.clone(),
        );
        let reconciler = PaymentReconciler::new(db_pool.clone(), gateways, event_sender);

        Self {
            orders: Arc::new(orders),
            coupons: Arc::new(coupons),
            payments: Arc::new(payments),
            reconciler: Arc::new(reconciler),
            cart: Arc::new(CartService::new(db_pool)),
        }
    }

    /// Swaps the order service, e.g. for a custom order number source.
    pub fn with_orders(mut self, orders: OrderService) -> Self {
        self.orders = Arc::new(orders);
        self
    }
}

/// Best-effort client address for gateways that want one.
pub(crate) fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
        })
        .unwrap_or("127.0.0.1")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn client_ip_prefers_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers), "127.0.0.1");
        headers.insert("x-real-ip", HeaderValue::from_static("10.1.1.1"));
        assert_eq!(client_ip(&headers), "10.1.1.1");
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers), "203.0.113.7");
    }
}
