mod common;

use axum::http::{Method, StatusCode};
use common::TestApp;
use serde_json::json;

#[tokio::test]
async fn adding_the_same_product_merges_lines() {
    let app = TestApp::new().await;

    let first = app
        .as_user(
            Method::POST,
            "/api/v1/cart/add",
            Some(json!({ "product_id": "p-100", "quantity": 1 })),
        )
        .await;
    assert_eq!(first.status, StatusCode::OK, "{}", first.body);

    let second = app
        .as_user(
            Method::POST,
            "/api/v1/cart/add",
            Some(json!({ "product_id": "p-100", "quantity": 2 })),
        )
        .await;
    assert_eq!(second.data()["id"], first.data()["id"]);
    assert_eq!(second.data()["quantity"], 3);

    // A variant is its own line.
    app.as_user(
        Method::POST,
        "/api/v1/cart/add",
        Some(json!({ "product_id": "p-100", "product_variant_id": "xl", "quantity": 1 })),
    )
    .await;

    let cart = app.as_user(Method::GET, "/api/v1/cart", None).await;
    assert_eq!(cart.data().as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn lines_can_be_updated_removed_and_cleared() {
    let app = TestApp::new().await;

    let added = app
        .as_user(
            Method::POST,
            "/api/v1/cart/add",
            Some(json!({ "product_id": "p-100", "quantity": 1 })),
        )
        .await;
    let uri = format!("/api/v1/cart/{}", added.data()["id"].as_str().unwrap());

    let resp = app
        .as_user(Method::PUT, &uri, Some(json!({ "quantity": 5 })))
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.data()["quantity"], 5);

    let resp = app
        .as_user(Method::PUT, &uri, Some(json!({ "quantity": 0 })))
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);

    let resp = app.as_user(Method::DELETE, &uri, None).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.data()["deleted"], true);

    for product in ["p-1", "p-2"] {
        app.as_user(
            Method::POST,
            "/api/v1/cart/add",
            Some(json!({ "product_id": product, "quantity": 1 })),
        )
        .await;
    }
    let resp = app.as_user(Method::DELETE, "/api/v1/cart/clear/all", None).await;
    assert_eq!(resp.data()["removed"], 2);

    let cart = app.as_user(Method::GET, "/api/v1/cart", None).await;
    assert!(cart.data().as_array().unwrap().is_empty());
}

#[tokio::test]
async fn other_shoppers_lines_are_not_visible() {
    let app = TestApp::new().await;

    let added = app
        .as_user(
            Method::POST,
            "/api/v1/cart/add",
            Some(json!({ "product_id": "p-100", "quantity": 1 })),
        )
        .await;
    let uri = format!("/api/v1/cart/{}", added.data()["id"].as_str().unwrap());

    let resp = app
        .request(
            Method::PUT,
            &uri,
            Some(json!({ "quantity": 3 })),
            Some(&app.other_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);

    let resp = app
        .request(Method::DELETE, &uri, None, Some(&app.other_token))
        .await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);

    let resp = app
        .request(Method::GET, "/api/v1/cart", None, Some(&app.other_token))
        .await;
    assert!(resp.data().as_array().unwrap().is_empty());
}

#[tokio::test]
async fn cart_checkout_removes_ordered_lines() {
    let app = TestApp::new().await;

    for product in ["p-100", "p-200", "p-999"] {
        app.as_user(
            Method::POST,
            "/api/v1/cart/add",
            Some(json!({ "product_id": product, "quantity": 1 })),
        )
        .await;
    }

    let resp = app.place_order(json!({ "source": "cart" })).await;
    assert_eq!(resp.status, StatusCode::CREATED, "{}", resp.body);

    let cart = app.as_user(Method::GET, "/api/v1/cart", None).await;
    let lines = cart.data().as_array().unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["product_id"], "p-999");
}

#[tokio::test]
async fn buy_now_leaves_the_cart_alone() {
    let app = TestApp::new().await;

    app.as_user(
        Method::POST,
        "/api/v1/cart/add",
        Some(json!({ "product_id": "p-100", "quantity": 1 })),
    )
    .await;

    let resp = app.place_order(json!({})).await;
    assert_eq!(resp.status, StatusCode::CREATED);

    let cart = app.as_user(Method::GET, "/api/v1/cart", None).await;
    assert_eq!(cart.data().as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn cart_checkout_only_removes_the_ordered_variant() {
    let app = TestApp::new().await;

    for variant in [None, Some("xl")] {
        app.as_user(
            Method::POST,
            "/api/v1/cart/add",
            Some(json!({ "product_id": "p-100", "product_variant_id": variant, "quantity": 1 })),
        )
        .await;
    }

    let resp = app
        .place_order(json!({
            "source": "cart",
            "items": [
                { "product_id": "p-100", "product_variant_id": "xl", "name": "Ao thun XL", "price": 200000, "quantity": 1 }
            ]
        }))
        .await;
    assert_eq!(resp.status, StatusCode::CREATED, "{}", resp.body);
    assert_eq!(resp.data()["items"][0]["product_variant_id"], "xl");

    let cart = app.as_user(Method::GET, "/api/v1/cart", None).await;
    let lines = cart.data().as_array().unwrap();
    assert_eq!(lines.len(), 1);
    assert!(lines[0]["product_variant_id"].is_null());
}
