mod common;

use assert_matches::assert_matches;
use common::TestApp;
use rust_decimal_macros::dec;
use storefront_core::{errors::ServiceError, services::catalog::ProductPatch};
use uuid::Uuid;

#[tokio::test]
async fn adding_twice_merges_the_line() {
    let app = TestApp::new().await;
    let product = app.seed_product(dec!(2.50), 10).await;
    let user_id = app.cart_with(product.id, 2).await;

    let line = app.services.cart.add_item(user_id, product.id, 3).await.unwrap();
    assert_eq!(line.quantity, 5);

    let cart = app.services.cart.get_cart(user_id).await.unwrap();
    assert_eq!(cart.lines.len(), 1);
    assert_eq!(cart.subtotal, dec!(12.50));
    assert!(cart.lines[0].available);
}

#[tokio::test]
async fn merged_quantity_is_checked_against_stock() {
    let app = TestApp::new().await;
    let product = app.seed_product(dec!(1.00), 4).await;
    let user_id = app.cart_with(product.id, 3).await;

    let err = app
        .services
        .cart
        .add_item(user_id, product.id, 2)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock { requested: 5, available: 4, .. });

    let cart = app.services.cart.get_cart(user_id).await.unwrap();
    assert_eq!(cart.lines[0].quantity, 3);
}

#[tokio::test]
async fn merging_past_integer_range_reports_insufficient_stock() {
    let app = TestApp::new().await;
    let product = app.seed_product(dec!(1.00), 4).await;
    let user_id = app.cart_with(product.id, 1).await;

    let err = app
        .services
        .cart
        .add_item(user_id, product.id, i32::MAX)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock { available: 4, .. });

    let cart = app.services.cart.get_cart(user_id).await.unwrap();
    assert_eq!(cart.lines[0].quantity, 1);
}

#[tokio::test]
async fn non_positive_quantities_are_rejected() {
    let app = TestApp::new().await;
    let product = app.seed_product(dec!(1.00), 4).await;

    for quantity in [0, -1] {
        let err = app
            .services
            .cart
            .add_item(Uuid::new_v4(), product.id, quantity)
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::ValidationError { .. });
    }
}

#[tokio::test]
async fn inactive_and_missing_products_cannot_be_added() {
    let app = TestApp::new().await;
    let product = app.seed_product(dec!(1.00), 4).await;
    app.services
        .catalog
        .update_product(
            product.id,
            ProductPatch {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let err = app
        .services
        .cart
        .add_item(Uuid::new_v4(), product.id, 1)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ProductUnavailable { .. });

    let err = app
        .services
        .cart
        .add_item(Uuid::new_v4(), Uuid::new_v4(), 1)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}

#[tokio::test]
async fn update_quantity_to_zero_removes_the_line() {
    let app = TestApp::new().await;
    let product = app.seed_product(dec!(1.00), 4).await;
    let user_id = app.cart_with(product.id, 2).await;

    let updated = app
        .services
        .cart
        .update_quantity(user_id, product.id, 4)
        .await
        .unwrap();
    assert_eq!(updated.map(|l| l.quantity), Some(4));

    let removed = app
        .services
        .cart
        .update_quantity(user_id, product.id, 0)
        .await
        .unwrap();
    assert!(removed.is_none());
    assert!(app.services.cart.get_cart(user_id).await.unwrap().is_empty());

    let err = app
        .services
        .cart
        .remove_item(user_id, product.id)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}

#[tokio::test]
async fn clear_cart_only_touches_one_user() {
    let app = TestApp::new().await;
    let product = app.seed_product(dec!(1.00), 10).await;
    let mine = app.cart_with(product.id, 1).await;
    let theirs = app.cart_with(product.id, 2).await;

    assert_eq!(app.services.cart.clear_cart(mine).await.unwrap(), 1);
    assert_eq!(app.services.cart.clear_cart(mine).await.unwrap(), 0);
    assert_eq!(app.services.cart.get_cart(theirs).await.unwrap().lines.len(), 1);
}
