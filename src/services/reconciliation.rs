use crate::{
    db,
    entities::{
        order::{Column as OrderColumn, Entity as Order, OrderPaymentStatus, OrderStatus},
        payment::{self, Column as PaymentColumn, Entity as Payment, PaymentStatus},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{gateway::ProcessorStatus, payments::TimedProcessor},
};
use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Outcome of a completed refund.
#[derive(Debug, Clone, Serialize)]
pub struct RefundResult {
    pub payment: payment::Model,
    pub order_id: Uuid,
    pub refund_reference: String,
    pub amount: Decimal,
}

/// Settles payments from the processor's authoritative status.
///
/// Inbound notifications only say "look at reference X"; the status itself is
/// always fetched from the processor. Every settlement writes the payment and
/// its order in one transaction, guarded on the current status, so replays and
/// concurrent confirmations apply at most once.
pub struct ReconciliationService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    processor: TimedProcessor,
}

impl ReconciliationService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        processor: TimedProcessor,
    ) -> Self {
        Self {
            db,
            event_sender,
            processor,
        }
    }

    /// Confirms the payment bound to a processor reference.
    ///
    /// Already-settled payments are returned unchanged without contacting the
    /// processor. A non-terminal processor status leaves everything as is.
    ///
    /// # Errors
    ///
    /// * `PaymentNotFound` - no payment carries the reference; nothing is touched
    /// * `ProcessorTimeout` / `ExternalServiceError` - status lookup failed
    /// * `IntegrityViolation` - the order cannot take the settled status
    #[instrument(skip(self))]
    pub async fn confirm(&self, reference: &str) -> Result<payment::Model, ServiceError> {
        let existing = self.find_by_reference(reference).await?;
        if existing.status.is_terminal() {
            counter!("storefront.reconciliation.replayed", 1);
            info!(payment_id = %existing.id, status = %existing.status, "Payment already settled");
            return Ok(existing);
        }

        let status = self.processor.get_status(reference).await?;
        if !status.status.is_terminal() {
            info!(payment_id = %existing.id, processor_status = ?status.status, "Payment not settled yet");
            return Ok(existing);
        }

        let (new_status, order_status, failure_reason) = match status.status {
            ProcessorStatus::Succeeded => (PaymentStatus::Succeeded, OrderPaymentStatus::Paid, None),
            _ => (
                PaymentStatus::Failed,
                OrderPaymentStatus::Failed,
                Some(
                    status
                        .failure_reason
                        .clone()
                        .unwrap_or_else(|| format!("processor reported {:?}", status.status)),
                ),
            ),
        };

        if !existing.status.can_transition_to(new_status) {
            return Err(ServiceError::integrity(format!(
                "payment {} cannot move from {} to {}",
                existing.id, existing.status, new_status
            )));
        }

        let txn = db::begin(&self.db).await?;
        let now = Utc::now();
        let updated = Payment::update_many()
            .col_expr(PaymentColumn::Status, Expr::value(new_status))
            .col_expr(PaymentColumn::TransactionId, Expr::value(status.transaction_id.clone()))
            .col_expr(PaymentColumn::FailureReason, Expr::value(failure_reason.clone()))
            .col_expr(PaymentColumn::ProcessedAt, Expr::value(Some(now)))
            .col_expr(PaymentColumn::UpdatedAt, Expr::value(now))
            .col_expr(PaymentColumn::Version, Expr::col(PaymentColumn::Version).add(1))
            .filter(PaymentColumn::Id.eq(existing.id))
            .filter(PaymentColumn::Status.eq(PaymentStatus::Pending))
            .exec(&txn)
            .await?;

        if updated.rows_affected == 0 {
            // a concurrent confirmation settled it first
            txn.rollback().await?;
            counter!("storefront.reconciliation.replayed", 1);
            return self.find_by_reference(reference).await;
        }

        let order = Order::find_by_id(existing.order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::integrity(format!(
                    "payment {} references missing order {}",
                    existing.id, existing.order_id
                ))
            })?;
        // goods of a cancelled order are back in stock; it must not become paid
        let settles_order = order.payment_status.can_transition_to(order_status)
            && !(order_status == OrderPaymentStatus::Paid && order.status == OrderStatus::Cancelled);

        let order_updated = if settles_order {
            let mut update = Order::update_many()
                .col_expr(OrderColumn::PaymentStatus, Expr::value(order_status))
                .col_expr(OrderColumn::Version, Expr::col(OrderColumn::Version).add(1))
                .col_expr(OrderColumn::UpdatedAt, Expr::value(now))
                .filter(OrderColumn::Id.eq(order.id))
                .filter(OrderColumn::PaymentStatus.eq(order.payment_status));
            if order_status == OrderPaymentStatus::Paid {
                update = update.filter(OrderColumn::Status.ne(OrderStatus::Cancelled));
            }
            update.exec(&txn).await?.rows_affected
        } else {
            0
        };

        if order_updated == 0 {
            if order_status == OrderPaymentStatus::Paid {
                txn.rollback().await?;
                return Err(ServiceError::integrity(format!(
                    "order {} ({}, payment {}) cannot be marked paid by payment {}",
                    order.id, order.status, order.payment_status, existing.id
                )));
            }
            // a failed retry must not downgrade an order another attempt paid
            warn!(order_id = %order.id, payment_id = %existing.id, "Order left untouched by failed attempt");
        }

        db::commit(txn).await?;

        let payment = self.find_by_reference(reference).await?;
        match new_status {
            PaymentStatus::Succeeded => {
                counter!("storefront.payments.succeeded", 1);
                info!(payment_id = %payment.id, order_id = %payment.order_id, "Payment succeeded");
                self.event_sender.send_or_log(Event::PaymentSucceeded {
                    payment_id: payment.id,
                    order_id: payment.order_id,
                });
            }
            _ => {
                counter!("storefront.payments.failed", 1);
                let reason = failure_reason.unwrap_or_default();
                warn!(payment_id = %payment.id, order_id = %payment.order_id, %reason, "Payment failed");
                self.event_sender.send_or_log(Event::PaymentFailed {
                    payment_id: payment.id,
                    order_id: payment.order_id,
                    reason,
                });
            }
        }

        Ok(payment)
    }

    /// Refunds a succeeded payment in full.
    ///
    /// The processor call happens before the local transaction and is keyed
    /// on the payment id, so a retry after a local failure reuses the same
    /// processor refund.
    #[instrument(skip(self))]
    pub async fn refund(&self, payment_id: Uuid) -> Result<RefundResult, ServiceError> {
        let existing = Payment::find_by_id(payment_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::PaymentNotFound(payment_id.to_string()))?;

        if !existing.status.can_transition_to(PaymentStatus::Refunded) {
            return Err(ServiceError::NotRefundable {
                payment_id,
                status: existing.status.to_string(),
            });
        }
        let reference = existing.external_reference.clone().ok_or_else(|| {
            ServiceError::integrity(format!("succeeded payment {} has no processor reference", payment_id))
        })?;

        let refund_reference = self
            .processor
            .refund(&reference, &format!("refund-{}", payment_id))
            .await?;

        let txn = db::begin(&self.db).await?;
        let now = Utc::now();
        let updated = Payment::update_many()
            .col_expr(PaymentColumn::Status, Expr::value(PaymentStatus::Refunded))
            .col_expr(PaymentColumn::RefundReference, Expr::value(Some(refund_reference.clone())))
            .col_expr(PaymentColumn::UpdatedAt, Expr::value(now))
            .col_expr(PaymentColumn::Version, Expr::col(PaymentColumn::Version).add(1))
            .filter(PaymentColumn::Id.eq(payment_id))
            .filter(PaymentColumn::Status.eq(PaymentStatus::Succeeded))
            .exec(&txn)
            .await?;

        if updated.rows_affected == 0 {
            txn.rollback().await?;
            let current = Payment::find_by_id(payment_id)
                .one(&*self.db)
                .await?
                .ok_or_else(|| ServiceError::PaymentNotFound(payment_id.to_string()))?;
            return match (current.status, current.refund_reference.clone()) {
                (PaymentStatus::Refunded, Some(reference)) => Ok(RefundResult {
                    order_id: current.order_id,
                    amount: current.amount,
                    refund_reference: reference,
                    payment: current,
                }),
                _ => Err(ServiceError::integrity(format!(
                    "payment {} changed to {} during refund",
                    payment_id, current.status
                ))),
            };
        }

        let order = Order::find_by_id(existing.order_id).one(&txn).await?;
        let order_updated = match &order {
            Some(order) if order.payment_status.can_transition_to(OrderPaymentStatus::Refunded) => {
                Order::update_many()
                    .col_expr(OrderColumn::PaymentStatus, Expr::value(OrderPaymentStatus::Refunded))
                    .col_expr(OrderColumn::Version, Expr::col(OrderColumn::Version).add(1))
                    .col_expr(OrderColumn::UpdatedAt, Expr::value(now))
                    .filter(OrderColumn::Id.eq(order.id))
                    .filter(OrderColumn::PaymentStatus.eq(order.payment_status))
                    .exec(&txn)
                    .await?
                    .rows_affected
            }
            _ => 0,
        };

        if order_updated == 0 {
            txn.rollback().await?;
            return Err(ServiceError::integrity(format!(
                "order {} is not paid but payment {} succeeded",
                existing.order_id, payment_id
            )));
        }

        db::commit(txn).await?;

        let payment = Payment::find_by_id(payment_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::PaymentNotFound(payment_id.to_string()))?;

        counter!("storefront.payments.refunded", 1);
        info!(%payment_id, order_id = %payment.order_id, %refund_reference, "Payment refunded");
        self.event_sender.send_or_log(Event::PaymentRefunded {
            payment_id,
            order_id: payment.order_id,
            refund_reference: refund_reference.clone(),
        });

        Ok(RefundResult {
            order_id: payment.order_id,
            amount: payment.amount,
            refund_reference,
            payment,
        })
    }

    async fn find_by_reference(&self, reference: &str) -> Result<payment::Model, ServiceError> {
        Payment::find()
            .filter(PaymentColumn::ExternalReference.eq(reference))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::PaymentNotFound(reference.to_string()))
    }
}
