use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

/// Registers the `bearer_auth` scheme referenced by the handlers.
pub struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "1.0.0",
        description = r#"
# Storefront checkout API

Orders, coupons, carts and payments for the storefront. Payments settle
through MoMo and VNPay; gateway callbacks are verified with the merchant
secret and applied at most once.

## Authentication

Shopper and admin endpoints expect a JWT issued by the account service:

```
Authorization: Bearer <token>
```

Admin endpoints additionally require the `admin` role. Gateway callback
endpoints are public and authenticated by their signature.

## Idempotency

`POST /orders`, `POST /payments/momo` and `POST /payments/vnpay/create`
accept an `Idempotency-Key` header. A repeated key replays the first
successful response.

## Errors

```json
{
  "error": "Bad Request",
  "message": "Coupon minimum order amount not met",
  "details": "min_order_amount",
  "request_id": "5b0c...",
  "timestamp": "2024-01-01T00:00:00Z"
}
```

## Pagination

List endpoints take `page` (default 1) and `limit` (default 20, max 100).
        "#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Orders", description = "Checkout and order management"),
        (name = "Coupons", description = "Coupon quotes and administration"),
        (name = "Payments", description = "Gateway payments and payment administration"),
        (name = "Payment callbacks", description = "MoMo and VNPay return and IPN endpoints"),
        (name = "Cart", description = "Shopping cart"),
        (name = "Health", description = "Health and status")
    ),
    paths(
        // Orders
        crate::handlers::orders::create_order,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::update_order_status,
        crate::handlers::orders::cancel_order,
        crate::handlers::orders::update_order_info,
        crate::handlers::orders::delete_order,

        // Coupons
        crate::handlers::coupons::apply_coupon,
        crate::handlers::coupons::list_coupons,
        crate::handlers::coupons::get_coupon,
        crate::handlers::coupons::create_coupon,
        crate::handlers::coupons::update_coupon,
        crate::handlers::coupons::delete_coupon,

        // Payments
        crate::handlers::payments::create_momo_payment,
        crate::handlers::payments::create_vnpay_payment,
        crate::handlers::payments::create_payment,
        crate::handlers::payments::list_payments,
        crate::handlers::payments::get_payment,
        crate::handlers::payments::update_payment,
        crate::handlers::payments::refund_payment,
        crate::handlers::payments::delete_payment,

        // Gateway callbacks
        crate::handlers::payment_callbacks::vnpay_return,
        crate::handlers::payment_callbacks::vnpay_ipn,
        crate::handlers::payment_callbacks::momo_return,
        crate::handlers::payment_callbacks::momo_ipn,

        // Cart
        crate::handlers::cart::get_cart,
        crate::handlers::cart::add_to_cart,
        crate::handlers::cart::update_cart_item,
        crate::handlers::cart::remove_cart_item,
        crate::handlers::cart::clear_cart,

        // Health
        crate::health_check,
        crate::api_status,
    ),
    components(
        schemas(
            crate::ApiResponse<serde_json::Value>,
            crate::ResponseMeta,

            // Orders
            crate::entities::order::Model,
            crate::entities::order_item::Model,
            crate::entities::OrderStatus,
            crate::entities::OrderPaymentStatus,
            crate::entities::ShippingMethod,
            crate::services::orders::CreateOrderRequest,
            crate::services::orders::OrderItemInput,
            crate::services::orders::OrderSource,
            crate::services::orders::OrderWithItems,
            crate::services::orders::UpdateOrderStatusRequest,
            crate::services::orders::CancelOrderRequest,
            crate::services::orders::UpdateOrderInfoRequest,

            // Coupons
            crate::entities::coupon::Model,
            crate::entities::coupon::DiscountType,
            crate::services::coupons::ApplyCouponRequest,
            crate::services::coupons::CouponQuote,
            crate::services::coupons::CreateCouponRequest,
            crate::services::coupons::UpdateCouponRequest,

            // Payments
            crate::entities::payment::Model,
            crate::entities::PaymentMethod,
            crate::entities::PaymentStatus,
            crate::services::payments::InitiatePaymentRequest,
            crate::services::payments::PaymentInitiation,
            crate::services::payments::CreatePaymentRequest,
            crate::services::payments::UpdatePaymentRequest,
            crate::handlers::payment_callbacks::VnpayIpnResponse,
            crate::handlers::payment_callbacks::MomoIpnResponse,

            // Cart
            crate::entities::cart_item::Model,
            crate::services::cart::AddToCartRequest,
            crate::services::cart::UpdateCartItemRequest,

            // Error types
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&BearerAuth)
)]
pub struct ApiDocV1;

/// The document served at `/api-docs/openapi.json`.
pub fn openapi_json() -> utoipa::openapi::OpenApi {
    ApiDocV1::openapi()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_checkout_and_callback_paths() {
        let json = serde_json::to_string_pretty(&ApiDocV1::openapi()).unwrap();
        assert!(json.contains("Storefront API"));
        assert!(json.contains("/api/v1/orders"));
        assert!(json.contains("/api/v1/payments/vnpay/ipn"));
        assert!(json.contains("/api/v1/coupons/apply"));
        assert!(json.contains("bearer_auth"));
    }
}
