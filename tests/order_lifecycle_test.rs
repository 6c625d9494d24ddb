mod common;

use axum::http::{Method, StatusCode};
use common::{order_body, TestApp};
use serde_json::json;

#[tokio::test]
async fn create_order_computes_totals_and_cod_payment() {
    let app = TestApp::new().await;

    let resp = app.place_order(json!({})).await;
    assert_eq!(resp.status, StatusCode::CREATED, "{}", resp.body);

    let order = resp.data();
    assert_eq!(order["subtotal"], 200000);
    assert_eq!(order["shipping_fee"], 0);
    assert_eq!(order["discount_amount"], 0);
    assert_eq!(order["total_price"], 200000);
    assert_eq!(order["status"], "pending");
    assert_eq!(order["payment_status"], "pending");
    assert_eq!(order["payment_method"], "COD");
    assert!(order["payment_id"].is_string(), "COD orders get a payment row");

    let number = order["order_number"].as_str().unwrap();
    assert!(number.starts_with("ORD"));
    assert_eq!(number.len(), 3 + 8 + 4);

    let items = order["items"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["product_id"], "p-100");
    assert_eq!(items[1]["product_id"], "p-200");
}

#[tokio::test]
async fn express_shipping_adds_configured_fee() {
    let app = TestApp::new().await;

    let resp = app
        .place_order(json!({ "shipping_method": "Express" }))
        .await;
    assert_eq!(resp.status, StatusCode::CREATED, "{}", resp.body);
    assert_eq!(resp.data()["shipping_fee"], 30000);
    assert_eq!(resp.data()["total_price"], 230000);
}

#[tokio::test]
async fn create_order_rejects_missing_items_and_recipient() {
    let app = TestApp::new().await;

    let resp = app.place_order(json!({ "items": [] })).await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.body["message"], "Validation error: items required");

    let resp = app.place_order(json!({ "customer_phone": "  " })).await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        resp.body["message"],
        "Validation error: recipient info required"
    );
}

#[tokio::test]
async fn create_order_rejects_mismatched_client_total() {
    let app = TestApp::new().await;

    let resp = app.place_order(json!({ "total_price": 1000 })).await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert!(resp.body["message"]
        .as_str()
        .unwrap()
        .contains("total_price"));

    let resp = app
        .place_order(json!({ "subtotal": 200000, "total_price": 200000 }))
        .await;
    assert_eq!(resp.status, StatusCode::CREATED);
}

#[tokio::test]
async fn unknown_fields_are_rejected() {
    let app = TestApp::new().await;

    let resp = app.place_order(json!({ "surprise": true })).await;
    assert!(resp.status.is_client_error(), "got {}", resp.status);
}

#[tokio::test]
async fn repeated_idempotency_key_replays_the_first_order() {
    let app = TestApp::new().await;

    let headers = [("idempotency-key", "checkout-1")];
    let first = app
        .request_with_headers(
            Method::POST,
            "/api/v1/orders",
            Some(order_body()),
            Some(&app.user_token),
            &headers,
        )
        .await;
    assert_eq!(first.status, StatusCode::CREATED);

    let second = app
        .request_with_headers(
            Method::POST,
            "/api/v1/orders",
            Some(order_body()),
            Some(&app.user_token),
            &headers,
        )
        .await;
    assert_eq!(second.status, StatusCode::CREATED);
    assert_eq!(second.data()["id"], first.data()["id"]);
    assert_eq!(
        second.headers.get("idempotent-replayed").unwrap(),
        "true"
    );

    let list = app.as_user(Method::GET, "/api/v1/orders", None).await;
    assert_eq!(list.data()["total"], 1);
}

#[tokio::test]
async fn shoppers_only_see_their_own_orders() {
    let app = TestApp::new().await;
    let created = app.place_order(json!({})).await;
    let id = created.data()["id"].as_str().unwrap().to_string();

    let own = app
        .as_user(Method::GET, &format!("/api/v1/orders/{}", id), None)
        .await;
    assert_eq!(own.status, StatusCode::OK);

    let other = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}", id),
            None,
            Some(&app.other_token),
        )
        .await;
    assert_eq!(other.status, StatusCode::FORBIDDEN);

    let other_list = app
        .request(Method::GET, "/api/v1/orders", None, Some(&app.other_token))
        .await;
    assert_eq!(other_list.data()["total"], 0);

    let admin_list = app
        .as_admin(
            Method::GET,
            &format!("/api/v1/orders?user_id={}&status=pending", app.user_id),
            None,
        )
        .await;
    assert_eq!(admin_list.data()["total"], 1);
}

#[tokio::test]
async fn far_out_pages_are_empty_not_errors() {
    let app = TestApp::new().await;
    app.place_order(json!({})).await;

    let resp = app
        .as_user(
            Method::GET,
            "/api/v1/orders?page=1000000000000000000&limit=100",
            None,
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK, "{}", resp.body);
    assert_eq!(resp.data()["total"], 1);
    assert!(resp.data()["items"].as_array().unwrap().is_empty());

    let resp = app
        .as_admin(Method::GET, "/api/v1/payments?page=18446744073709551615", None)
        .await;
    assert_eq!(resp.status, StatusCode::OK, "{}", resp.body);
}

#[tokio::test]
async fn update_info_only_while_pending() {
    let app = TestApp::new().await;
    let created = app.place_order(json!({})).await;
    let id = created.data()["id"].as_str().unwrap().to_string();

    let resp = app
        .as_user(
            Method::PUT,
            &format!("/api/v1/orders/{}/update-info", id),
            Some(json!({ "shipping_address": "99 Nguyen Hue, Quan 1" })),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK, "{}", resp.body);
    assert_eq!(resp.data()["shipping_address"], "99 Nguyen Hue, Quan 1");

    let resp = app
        .as_admin(
            Method::PUT,
            &format!("/api/v1/orders/{}", id),
            Some(json!({ "status": "confirmed" })),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK, "{}", resp.body);

    let resp = app
        .as_user(
            Method::PUT,
            &format!("/api/v1/orders/{}/update-info", id),
            Some(json!({ "customer_name": "Tran Thi B" })),
        )
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cancel_is_only_allowed_from_pending() {
    let app = TestApp::new().await;

    let created = app.place_order(json!({})).await;
    let id = created.data()["id"].as_str().unwrap().to_string();
    let resp = app
        .as_user(
            Method::PUT,
            &format!("/api/v1/orders/{}/cancel", id),
            Some(json!({ "cancel_reason": "changed my mind" })),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK, "{}", resp.body);
    assert_eq!(resp.data()["status"], "cancelled");
    assert_eq!(resp.data()["cancel_reason"], "changed my mind");

    let confirmed = app.place_order(json!({})).await;
    let id = confirmed.data()["id"].as_str().unwrap().to_string();
    app.as_admin(
        Method::PUT,
        &format!("/api/v1/orders/{}", id),
        Some(json!({ "status": "confirmed" })),
    )
    .await;
    let resp = app
        .as_user(Method::PUT, &format!("/api/v1/orders/{}/cancel", id), None)
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn admin_walks_order_through_fulfilment() {
    let app = TestApp::new().await;
    let created = app.place_order(json!({})).await;
    let id = created.data()["id"].as_str().unwrap().to_string();
    let uri = format!("/api/v1/orders/{}", id);

    for status in ["confirmed", "shipped", "delivered"] {
        let resp = app
            .as_admin(Method::PUT, &uri, Some(json!({ "status": status })))
            .await;
        assert_eq!(resp.status, StatusCode::OK, "{}: {}", status, resp.body);
        assert_eq!(resp.data()["status"], status);
    }
    let order = app.as_admin(Method::GET, &uri, None).await;
    assert!(order.data()["confirmed_at"].is_string());
    assert!(order.data()["shipped_at"].is_string());
    assert!(order.data()["delivered_at"].is_string());

    // Delivered orders cannot go back.
    let resp = app
        .as_admin(Method::PUT, &uri, Some(json!({ "status": "pending" })))
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn admin_can_mark_a_pending_order_delivered() {
    let app = TestApp::new().await;
    let created = app.place_order(json!({})).await;
    let uri = format!("/api/v1/orders/{}", created.data()["id"].as_str().unwrap());

    let resp = app
        .as_admin(
            Method::PUT,
            &uri,
            Some(json!({ "status": "delivered", "admin_note": "handed over at the door" })),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK, "{}", resp.body);
    assert_eq!(resp.data()["status"], "delivered");
    assert!(resp.data()["delivered_at"].is_string());
    assert_eq!(resp.data()["admin_note"], "handed over at the door");
}

#[tokio::test]
async fn cancelled_orders_stay_cancelled() {
    let app = TestApp::new().await;
    let created = app.place_order(json!({})).await;
    let uri = format!("/api/v1/orders/{}", created.data()["id"].as_str().unwrap());

    let resp = app
        .as_admin(Method::PUT, &uri, Some(json!({ "status": "cancelled" })))
        .await;
    assert_eq!(resp.status, StatusCode::OK, "{}", resp.body);
    assert!(resp.data()["cancelled_at"].is_string());

    let resp = app
        .as_admin(Method::PUT, &uri, Some(json!({ "status": "confirmed" })))
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn status_updates_and_deletes_need_admin() {
    let app = TestApp::new().await;
    let created = app.place_order(json!({})).await;
    let uri = format!("/api/v1/orders/{}", created.data()["id"].as_str().unwrap());

    let resp = app
        .as_user(Method::PUT, &uri, Some(json!({ "status": "confirmed" })))
        .await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);

    let resp = app.as_user(Method::DELETE, &uri, None).await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);

    let resp = app.as_admin(Method::DELETE, &uri, None).await;
    assert_eq!(resp.status, StatusCode::OK, "{}", resp.body);

    let resp = app.as_admin(Method::GET, &uri, None).await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
}
