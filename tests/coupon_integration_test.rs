mod common;

use axum::http::{Method, StatusCode};
use common::{order_body, percentage_coupon, TestApp};
use serde_json::json;
use storefront_api::entities::coupon;

#[tokio::test]
async fn apply_quotes_a_percentage_discount() {
    let app = TestApp::new().await;
    app.seed_coupon(percentage_coupon("SAVE25", 25)).await;

    let resp = app
        .as_user(
            Method::POST,
            "/api/v1/coupons/apply",
            Some(json!({ "code": "save25", "subtotal": 200000 })),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK, "{}", resp.body);
    assert_eq!(resp.data()["code"], "SAVE25");
    assert_eq!(resp.data()["discountAmount"], 50000);
    assert_eq!(resp.data()["totalAfterDiscount"], 150000);
}

#[tokio::test]
async fn fixed_coupon_takes_its_value_off_the_subtotal() {
    let app = TestApp::new().await;
    let mut request = percentage_coupon("SAVE50", 0);
    request.discount_type = coupon::DiscountType::Fixed;
    request.discount_value = 50000;
    app.seed_coupon(request).await;

    let resp = app
        .as_user(
            Method::POST,
            "/api/v1/coupons/apply",
            Some(json!({ "code": "SAVE50", "subtotal": 200000 })),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK, "{}", resp.body);
    assert_eq!(resp.data()["discountType"], "fixed");
    assert_eq!(resp.data()["discountAmount"], 50000);
    assert_eq!(resp.data()["totalAfterDiscount"], 150000);
    assert_eq!(resp.data()["shippingDiscount"], 0);
}

#[tokio::test]
async fn unknown_codes_are_not_found() {
    let app = TestApp::new().await;

    let resp = app
        .as_user(
            Method::POST,
            "/api/v1/coupons/apply",
            Some(json!({ "code": "NOPE", "subtotal": 200000 })),
        )
        .await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
    assert_eq!(resp.body["details"], "not_found");
}

#[tokio::test]
async fn minimum_order_value_is_enforced() {
    let app = TestApp::new().await;
    let mut request = percentage_coupon("BIGSPENDER", 10);
    request.min_order_value = 500000;
    app.seed_coupon(request).await;

    let resp = app
        .as_user(
            Method::POST,
            "/api/v1/coupons/apply",
            Some(json!({ "code": "BIGSPENDER", "subtotal": 200000 })),
        )
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.body["details"], "min_order_not_met");
}

#[tokio::test]
async fn order_with_coupon_records_the_discount() {
    let app = TestApp::new().await;
    let coupon = app.seed_coupon(percentage_coupon("SAVE25", 25)).await;

    let resp = app.place_order(json!({ "coupon_code": "SAVE25" })).await;
    assert_eq!(resp.status, StatusCode::CREATED, "{}", resp.body);
    assert_eq!(resp.data()["discount_amount"], 50000);
    assert_eq!(resp.data()["total_price"], 150000);
    assert_eq!(resp.data()["coupon_code"], "SAVE25");

    let stored = app
        .as_admin(Method::GET, &format!("/api/v1/coupons/{}", coupon.id), None)
        .await;
    assert_eq!(stored.data()["current_uses"], 1);
}

#[tokio::test]
async fn per_user_limit_blocks_a_second_order() {
    let app = TestApp::new().await;
    app.seed_coupon(percentage_coupon("ONCE", 10)).await;

    let first = app.place_order(json!({ "coupon_code": "ONCE" })).await;
    assert_eq!(first.status, StatusCode::CREATED, "{}", first.body);

    let second = app.place_order(json!({ "coupon_code": "ONCE" })).await;
    assert_eq!(second.status, StatusCode::BAD_REQUEST);
    assert_eq!(second.body["details"], "per_user_limit_reached");

    // Another shopper still has their own allowance.
    let mut body = order_body();
    body["coupon_code"] = json!("ONCE");
    let other = app
        .request(Method::POST, "/api/v1/orders", Some(body), Some(&app.other_token))
        .await;
    assert_eq!(other.status, StatusCode::CREATED, "{}", other.body);
}

#[tokio::test]
async fn total_usage_cap_holds_under_concurrent_checkouts() {
    let app = TestApp::new().await;
    let mut request = percentage_coupon("LASTONE", 10);
    request.max_total_uses = Some(1);
    let coupon = app.seed_coupon(request).await;

    let mut body = order_body();
    body["coupon_code"] = json!("LASTONE");
    let (a, b) = tokio::join!(
        app.request(
            Method::POST,
            "/api/v1/orders",
            Some(body.clone()),
            Some(&app.user_token)
        ),
        app.request(
            Method::POST,
            "/api/v1/orders",
            Some(body.clone()),
            Some(&app.other_token)
        ),
    );

    let created = [a.status, b.status]
        .iter()
        .filter(|s| **s == StatusCode::CREATED)
        .count();
    assert_eq!(created, 1, "a: {} b: {}", a.body, b.body);
    let rejected = if a.status == StatusCode::CREATED { &b } else { &a };
    assert_eq!(rejected.status, StatusCode::BAD_REQUEST);
    assert_eq!(rejected.body["details"], "usage_limit_reached");

    let stored = app
        .as_admin(Method::GET, &format!("/api/v1/coupons/{}", coupon.id), None)
        .await;
    assert_eq!(stored.data()["current_uses"], 1);
}

#[tokio::test]
async fn cancelling_an_order_gives_the_coupon_back() {
    let app = TestApp::new().await;
    let coupon = app.seed_coupon(percentage_coupon("COMEBACK", 10)).await;

    let order = app.place_order(json!({ "coupon_code": "COMEBACK" })).await;
    assert_eq!(order.status, StatusCode::CREATED, "{}", order.body);
    let id = order.data()["id"].as_str().unwrap().to_string();

    let resp = app
        .as_user(Method::PUT, &format!("/api/v1/orders/{}/cancel", id), None)
        .await;
    assert_eq!(resp.status, StatusCode::OK, "{}", resp.body);

    let stored = app
        .as_admin(Method::GET, &format!("/api/v1/coupons/{}", coupon.id), None)
        .await;
    assert_eq!(stored.data()["current_uses"], 0);

    // The per-customer allowance is restored too.
    let again = app.place_order(json!({ "coupon_code": "COMEBACK" })).await;
    assert_eq!(again.status, StatusCode::CREATED, "{}", again.body);
}

#[tokio::test]
async fn admins_manage_coupons() {
    let app = TestApp::new().await;
    let body = json!({
        "code": "summer10",
        "name": "Summer sale",
        "discount_type": "fixed",
        "discount_value": 10000,
        "valid_from": "2020-01-01T00:00:00Z",
        "valid_until": "2099-01-01T00:00:00Z"
    });

    let resp = app.as_user(Method::POST, "/api/v1/coupons", Some(body.clone())).await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);

    let resp = app.as_admin(Method::POST, "/api/v1/coupons", Some(body.clone())).await;
    assert_eq!(resp.status, StatusCode::CREATED, "{}", resp.body);
    assert_eq!(resp.data()["code"], "SUMMER10");
    let uri = format!("/api/v1/coupons/{}", resp.data()["id"].as_str().unwrap());

    let dup = app.as_admin(Method::POST, "/api/v1/coupons", Some(body)).await;
    assert_eq!(dup.status, StatusCode::CONFLICT);

    let resp = app
        .as_admin(Method::PUT, &uri, Some(json!({ "is_public": false })))
        .await;
    assert_eq!(resp.status, StatusCode::OK, "{}", resp.body);

    // Hidden coupons drop out of the shopper listing.
    let listed = app.as_user(Method::GET, "/api/v1/coupons", None).await;
    assert!(listed.data().as_array().unwrap().is_empty());
    let resp = app.as_user(Method::GET, &uri, None).await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);

    let resp = app.as_admin(Method::DELETE, &uri, None).await;
    assert_eq!(resp.status, StatusCode::OK);
    let resp = app.as_admin(Method::GET, &uri, None).await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn percentage_above_one_hundred_is_rejected() {
    let app = TestApp::new().await;

    let resp = app
        .as_admin(
            Method::POST,
            "/api/v1/coupons",
            Some(json!({
                "code": "TOOMUCH",
                "name": "Broken",
                "discount_type": "percentage",
                "discount_value": 150,
                "valid_from": "2020-01-01T00:00:00Z",
                "valid_until": "2099-01-01T00:00:00Z"
            })),
        )
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
}
