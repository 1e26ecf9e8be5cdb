mod common;

use assert_matches::assert_matches;
use common::{order_input, TestApp, WEBHOOK_SECRET};
use rust_decimal_macros::dec;
use sea_orm::{sea_query::Expr, ColumnTrait, EntityTrait, QueryFilter};
use std::time::Duration;
use storefront_core::{
    entities::{
        order::{self, OrderPaymentStatus, OrderStatus},
        payment::PaymentStatus,
    },
    errors::ServiceError,
    services::{
        gateway::ProcessorStatus,
        payments::{BeginPaymentInput, PaymentSession},
        webhooks::{sign_payload, WebhookOutcome},
    },
};

/// An order for two units at 10.00.
async fn placed_order(app: &TestApp) -> order::Model {
    let product = app.seed_product(dec!(10.00), 10).await;
    let user_id = app.cart_with(product.id, 2).await;
    app.services
        .orders
        .create_order(order_input(user_id, None))
        .await
        .expect("order created")
        .order
}

fn payment_for(order: &order::Model) -> BeginPaymentInput {
    BeginPaymentInput {
        order_id: order.id,
        amount: order.total_amount,
        currency: order.currency.clone(),
        payment_method: "card".into(),
    }
}

async fn begin(app: &TestApp, order: &order::Model) -> PaymentSession {
    app.services
        .payments
        .begin_payment(payment_for(order))
        .await
        .expect("payment started")
}

fn reference(session: &PaymentSession) -> String {
    session
        .payment
        .external_reference
        .clone()
        .expect("processor reference stored")
}

#[tokio::test]
async fn successful_payment_marks_order_paid_once() {
    let app = TestApp::new().await;
    let order = placed_order(&app).await;
    assert_eq!(order.total_amount, dec!(20.00));

    let session = begin(&app, &order).await;
    assert_eq!(session.payment.status, PaymentStatus::Pending);
    assert_eq!(session.payment.amount, dec!(20.00));
    assert!(!session.client_handle.is_empty());
    assert_eq!(app.order(order.id).await.payment_status, OrderPaymentStatus::Pending);

    let reference = reference(&session);
    app.processor
        .set_status(&reference, ProcessorStatus::Succeeded)
        .await
        .unwrap();

    let confirmed = app.services.reconciliation.confirm(&reference).await.unwrap();
    assert_eq!(confirmed.status, PaymentStatus::Succeeded);
    assert!(confirmed.transaction_id.is_some());
    assert!(confirmed.processed_at.is_some());
    let paid = app.order(order.id).await;
    assert_eq!(paid.payment_status, OrderPaymentStatus::Paid);

    // replay: no processor call, no further mutation
    let status_calls = app.processor.status_calls();
    let replayed = app.services.reconciliation.confirm(&reference).await.unwrap();
    assert_eq!(replayed.version, confirmed.version);
    assert_eq!(app.processor.status_calls(), status_calls);
    assert_eq!(app.order(order.id).await.version, paid.version);
}

#[tokio::test]
async fn unknown_reference_mutates_nothing() {
    let app = TestApp::new().await;
    let order = placed_order(&app).await;
    begin(&app, &order).await;

    let err = app
        .services
        .reconciliation
        .confirm("ch_does_not_exist")
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::PaymentNotFound(_));
    assert_eq!(app.processor.status_calls(), 0);

    let unchanged = app.order(order.id).await;
    assert_eq!(unchanged.payment_status, OrderPaymentStatus::Pending);
    assert_eq!(unchanged.version, order.version);
}

#[tokio::test]
async fn failed_payment_can_be_retried() {
    let app = TestApp::new().await;
    let order = placed_order(&app).await;

    let first = begin(&app, &order).await;
    let first_ref = reference(&first);
    app.processor
        .set_status(&first_ref, ProcessorStatus::Failed)
        .await
        .unwrap();
    let failed = app.services.reconciliation.confirm(&first_ref).await.unwrap();
    assert_eq!(failed.status, PaymentStatus::Failed);
    assert!(failed.failure_reason.is_some());
    assert_eq!(app.order(order.id).await.payment_status, OrderPaymentStatus::Failed);

    let second = begin(&app, &order).await;
    assert_ne!(second.payment.id, first.payment.id);
    let second_ref = reference(&second);
    app.processor
        .set_status(&second_ref, ProcessorStatus::Succeeded)
        .await
        .unwrap();
    app.services.reconciliation.confirm(&second_ref).await.unwrap();
    assert_eq!(app.order(order.id).await.payment_status, OrderPaymentStatus::Paid);

    let attempts = app
        .services
        .payments
        .list_payments_for_order(order.id)
        .await
        .unwrap();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].status, PaymentStatus::Failed);
    assert_eq!(attempts[1].status, PaymentStatus::Succeeded);
}

#[tokio::test]
async fn non_terminal_status_keeps_payment_pending() {
    let app = TestApp::new().await;
    let order = placed_order(&app).await;
    let session = begin(&app, &order).await;
    let reference = reference(&session);

    for status in [ProcessorStatus::Processing, ProcessorStatus::RequiresAction] {
        app.processor.set_status(&reference, status).await.unwrap();
        let payment = app.services.reconciliation.confirm(&reference).await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert_eq!(payment.version, session.payment.version);
    }
    assert_eq!(app.order(order.id).await.payment_status, OrderPaymentStatus::Pending);
}

#[tokio::test]
async fn begin_resumes_pending_attempt() {
    let app = TestApp::new().await;
    let order = placed_order(&app).await;

    let first = begin(&app, &order).await;
    let again = begin(&app, &order).await;

    assert_eq!(again.payment.id, first.payment.id);
    assert_eq!(again.client_handle, first.client_handle);
    assert_eq!(app.processor.create_calls(), 1);
    assert_eq!(app.payment_count().await, 1);
}

#[tokio::test]
async fn concurrent_begins_share_one_attempt() {
    let app = TestApp::new().await;
    let order = placed_order(&app).await;

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let payments = app.services.payments.clone();
            let input = payment_for(&order);
            tokio::spawn(async move { payments.begin_payment(input).await })
        })
        .collect();

    let mut payment_ids = Vec::new();
    for result in futures::future::join_all(handles).await {
        match result.unwrap() {
            Ok(session) => payment_ids.push(session.payment.id),
            Err(e) => assert_matches!(e, ServiceError::PaymentInProgress { .. }),
        }
    }
    assert!(!payment_ids.is_empty());
    payment_ids.dedup();
    assert_eq!(payment_ids.len(), 1);
    assert_eq!(app.payment_count().await, 1);
    assert_eq!(app.processor.charge_count().await, 1);
}

#[tokio::test]
async fn timeout_leaves_attempt_pending_and_retry_reuses_it() {
    let app = TestApp::with_config(|cfg| cfg.payment_timeout_secs = 1).await;
    let order = placed_order(&app).await;

    app.processor
        .set_delay(Some(Duration::from_millis(1_500)))
        .await;
    let err = app
        .services
        .payments
        .begin_payment(payment_for(&order))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert_matches!(err, ServiceError::ProcessorTimeout { operation } if operation == "create_charge");

    let attempts = app
        .services
        .payments
        .list_payments_for_order(order.id)
        .await
        .unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].status, PaymentStatus::Pending);
    assert!(attempts[0].external_reference.is_none());
    assert_eq!(app.order(order.id).await.payment_status, OrderPaymentStatus::Pending);

    app.processor.set_delay(None).await;
    let resumed = begin(&app, &order).await;
    assert_eq!(resumed.payment.id, attempts[0].id);
    assert!(resumed.payment.external_reference.is_some());
    assert_eq!(app.processor.create_calls(), 2);
    assert_eq!(app.processor.charge_count().await, 1);
}

#[tokio::test]
async fn confirm_timeout_is_recoverable() {
    let app = TestApp::with_config(|cfg| cfg.payment_timeout_secs = 1).await;
    let order = placed_order(&app).await;
    let session = begin(&app, &order).await;
    let reference = reference(&session);
    app.processor
        .set_status(&reference, ProcessorStatus::Succeeded)
        .await
        .unwrap();

    app.processor
        .set_delay(Some(Duration::from_millis(1_500)))
        .await;
    let err = app.services.reconciliation.confirm(&reference).await.unwrap_err();
    assert_matches!(err, ServiceError::ProcessorTimeout { .. });
    let still_pending = app.services.payments.get_payment(session.payment.id).await.unwrap();
    assert_eq!(still_pending.status, PaymentStatus::Pending);

    app.processor.set_delay(None).await;
    let confirmed = app.services.reconciliation.confirm(&reference).await.unwrap();
    assert_eq!(confirmed.status, PaymentStatus::Succeeded);
}

#[tokio::test]
async fn processor_failure_during_begin_is_external() {
    let app = TestApp::new().await;
    let order = placed_order(&app).await;

    app.processor.fail_next(1);
    let err = app
        .services
        .payments
        .begin_payment(payment_for(&order))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ExternalServiceError(_));

    let session = begin(&app, &order).await;
    assert_eq!(session.payment.status, PaymentStatus::Pending);
    assert_eq!(app.payment_count().await, 1);
}

#[tokio::test]
async fn paid_orders_reject_new_payments() {
    let app = TestApp::new().await;
    let order = placed_order(&app).await;
    let session = begin(&app, &order).await;
    let reference = reference(&session);
    app.processor
        .set_status(&reference, ProcessorStatus::Succeeded)
        .await
        .unwrap();
    app.services.reconciliation.confirm(&reference).await.unwrap();

    let err = app
        .services
        .payments
        .begin_payment(payment_for(&order))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::AlreadyPaid { order_id } if order_id == order.id);

    let err = app
        .services
        .orders
        .update_status(order.id, OrderStatus::Cancelled)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidOperation(_));
}

#[tokio::test]
async fn amount_must_match_order_total() {
    let app = TestApp::new().await;
    let order = placed_order(&app).await;

    let mut input = payment_for(&order);
    input.amount = dec!(19.99);
    let err = app.services.payments.begin_payment(input).await.unwrap_err();
    assert_matches!(err, ServiceError::ValidationError { ref details, .. } if details[0].field == "amount");

    let mut input = payment_for(&order);
    input.currency = "EUR".into();
    let err = app.services.payments.begin_payment(input).await.unwrap_err();
    assert_matches!(err, ServiceError::ValidationError { .. });

    assert_eq!(app.payment_count().await, 0);
    assert_eq!(app.processor.create_calls(), 0);
}

#[tokio::test]
async fn cancelled_orders_cannot_be_paid() {
    let app = TestApp::new().await;
    let order = placed_order(&app).await;
    app.services
        .orders
        .update_status(order.id, OrderStatus::Cancelled)
        .await
        .unwrap();

    let err = app
        .services
        .payments
        .begin_payment(payment_for(&order))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidOperation(_));
}

#[tokio::test]
async fn orders_with_a_pending_payment_cannot_be_cancelled() {
    let app = TestApp::new().await;
    let order = placed_order(&app).await;
    let product_id = app.services.orders.get_order(order.id).await.unwrap().items[0].product_id;
    let session = begin(&app, &order).await;

    let err = app
        .services
        .orders
        .update_status(order.id, OrderStatus::Cancelled)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidOperation(_));
    assert_eq!(app.order(order.id).await.status, OrderStatus::Pending);
    assert_eq!(app.product(product_id).await.stock_quantity, 8);

    let reference = reference(&session);
    app.processor
        .set_status(&reference, ProcessorStatus::Succeeded)
        .await
        .unwrap();
    app.services.reconciliation.confirm(&reference).await.unwrap();
    assert_eq!(app.order(order.id).await.payment_status, OrderPaymentStatus::Paid);
}

#[tokio::test]
async fn confirm_never_marks_a_cancelled_order_paid() {
    let app = TestApp::new().await;
    let order = placed_order(&app).await;
    let session = begin(&app, &order).await;

    // cancellation that slipped in after the attempt was opened
    order::Entity::update_many()
        .col_expr(order::Column::Status, Expr::value(OrderStatus::Cancelled))
        .filter(order::Column::Id.eq(order.id))
        .exec(app.db())
        .await
        .unwrap();

    let reference = reference(&session);
    app.processor
        .set_status(&reference, ProcessorStatus::Succeeded)
        .await
        .unwrap();
    let err = app
        .services
        .reconciliation
        .confirm(&reference)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::IntegrityViolation(_));

    let payment = app.services.payments.get_payment(session.payment.id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
    let unchanged = app.order(order.id).await;
    assert_eq!(unchanged.payment_status, OrderPaymentStatus::Pending);
    assert_eq!(unchanged.status, OrderStatus::Cancelled);
}

#[tokio::test]
async fn refund_requires_the_order_to_be_paid() {
    let app = TestApp::new().await;
    let order = placed_order(&app).await;
    let session = begin(&app, &order).await;
    let reference = reference(&session);
    app.processor
        .set_status(&reference, ProcessorStatus::Succeeded)
        .await
        .unwrap();
    app.services.reconciliation.confirm(&reference).await.unwrap();

    order::Entity::update_many()
        .col_expr(order::Column::PaymentStatus, Expr::value(OrderPaymentStatus::Failed))
        .filter(order::Column::Id.eq(order.id))
        .exec(app.db())
        .await
        .unwrap();

    let err = app
        .services
        .reconciliation
        .refund(session.payment.id)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::IntegrityViolation(_));
    let payment = app.services.payments.get_payment(session.payment.id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Succeeded);
    assert!(payment.refund_reference.is_none());
}

#[tokio::test]
async fn refund_moves_payment_and_order_together() {
    let app = TestApp::new().await;
    let order = placed_order(&app).await;
    let session = begin(&app, &order).await;

    let err = app
        .services
        .reconciliation
        .refund(session.payment.id)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotRefundable { status, .. } if status == "pending");

    let reference = reference(&session);
    app.processor
        .set_status(&reference, ProcessorStatus::Succeeded)
        .await
        .unwrap();
    app.services.reconciliation.confirm(&reference).await.unwrap();

    let refund = app
        .services
        .reconciliation
        .refund(session.payment.id)
        .await
        .unwrap();
    assert_eq!(refund.amount, dec!(20.00));
    assert_eq!(refund.order_id, order.id);
    assert_eq!(refund.payment.status, PaymentStatus::Refunded);
    assert_eq!(
        refund.payment.refund_reference.as_deref(),
        Some(refund.refund_reference.as_str())
    );
    assert_eq!(app.order(order.id).await.payment_status, OrderPaymentStatus::Refunded);

    let err = app
        .services
        .reconciliation
        .refund(session.payment.id)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotRefundable { status, .. } if status == "refunded");
    assert_eq!(app.processor.refund_calls(), 1);
}

#[tokio::test]
async fn refund_of_unknown_payment_is_not_found() {
    let app = TestApp::new().await;
    let err = app
        .services
        .reconciliation
        .refund(uuid::Uuid::new_v4())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::PaymentNotFound(_));
}

fn webhook_body(event_type: &str, reference: &str) -> Vec<u8> {
    serde_json::json!({
        "id": "evt_test",
        "type": event_type,
        "data": { "object": { "id": reference } }
    })
    .to_string()
    .into_bytes()
}

#[tokio::test]
async fn signed_webhook_triggers_reconciliation() {
    let app = TestApp::with_config(|cfg| {
        cfg.payment_webhook_secret = Some(WEBHOOK_SECRET.into());
    })
    .await;
    let order = placed_order(&app).await;
    let session = begin(&app, &order).await;
    let reference = reference(&session);
    app.processor
        .set_status(&reference, ProcessorStatus::Succeeded)
        .await
        .unwrap();

    let body = webhook_body("payment_intent.succeeded", &reference);
    let header = sign_payload(WEBHOOK_SECRET, &body, chrono::Utc::now().timestamp()).unwrap();
    let outcome = app
        .services
        .webhooks
        .handle(&body, Some(&header))
        .await
        .unwrap();
    assert_matches!(outcome, WebhookOutcome::Reconciled(payment) if payment.status == PaymentStatus::Succeeded);
    assert_eq!(app.order(order.id).await.payment_status, OrderPaymentStatus::Paid);
}

#[tokio::test]
async fn webhook_body_cannot_claim_success() {
    let app = TestApp::new().await;
    let order = placed_order(&app).await;
    let session = begin(&app, &order).await;
    let reference = reference(&session);

    // processor still says pending, whatever the event type claims
    let body = webhook_body("payment_intent.succeeded", &reference);
    let outcome = app.services.webhooks.handle(&body, None).await.unwrap();
    assert_matches!(outcome, WebhookOutcome::Reconciled(payment) if payment.status == PaymentStatus::Pending);
    assert_eq!(app.order(order.id).await.payment_status, OrderPaymentStatus::Pending);
}

#[tokio::test]
async fn bad_webhook_signature_is_rejected() {
    let app = TestApp::with_config(|cfg| {
        cfg.payment_webhook_secret = Some(WEBHOOK_SECRET.into());
    })
    .await;
    let body = webhook_body("payment_intent.succeeded", "ch_whatever");

    let forged = sign_payload("not-the-secret", &body, chrono::Utc::now().timestamp()).unwrap();
    let err = app
        .services
        .webhooks
        .handle(&body, Some(&forged))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError { ref details, .. } if details[0].field == "signature");

    let err = app.services.webhooks.handle(&body, None).await.unwrap_err();
    assert_matches!(err, ServiceError::ValidationError { .. });
    assert_eq!(app.processor.status_calls(), 0);
}

#[tokio::test]
async fn unrelated_webhook_events_are_ignored() {
    let app = TestApp::new().await;
    let body = webhook_body("customer.created", "cus_1");
    let outcome = app.services.webhooks.handle(&body, None).await.unwrap();
    assert_matches!(outcome, WebhookOutcome::Ignored { event_type } if event_type == "customer.created");
}
