use crate::{
    config::validate_currency,
    entities::{
        order::{Entity as Order, OrderPaymentStatus, OrderStatus},
        payment::{self, Column as PaymentColumn, Entity as Payment, PaymentStatus},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::gateway::{ChargeIntent, ChargeRequest, ChargeStatus, GatewayError, PaymentProcessor},
};
use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    error::SqlErr, sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait,
    QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Bounds every processor call with a timeout. A timeout is a recoverable
/// `ProcessorTimeout`; it never settles a payment.
#[derive(Clone)]
pub struct TimedProcessor {
    inner: Arc<dyn PaymentProcessor>,
    timeout: Duration,
}

impl TimedProcessor {
    pub fn new(inner: Arc<dyn PaymentProcessor>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn call<T, F>(&self, operation: &'static str, fut: F) -> Result<T, ServiceError>
    where
        F: Future<Output = Result<T, GatewayError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                counter!("storefront.processor.errors", 1, "operation" => operation);
                warn!(operation, error = %e, "Payment processor call failed");
                Err(e.into())
            }
            Err(_) => {
                counter!("storefront.processor.timeouts", 1, "operation" => operation);
                warn!(operation, timeout = ?self.timeout, "Payment processor call timed out");
                Err(ServiceError::ProcessorTimeout {
                    operation: operation.to_string(),
                })
            }
        }
    }

    pub async fn create_charge(&self, request: ChargeRequest) -> Result<ChargeIntent, ServiceError> {
        self.call("create_charge", self.inner.create_charge(request)).await
    }

    pub async fn get_status(&self, reference: &str) -> Result<ChargeStatus, ServiceError> {
        self.call("get_status", self.inner.get_status(reference)).await
    }

    pub async fn refund(&self, reference: &str, idempotency_key: &str) -> Result<String, ServiceError> {
        self.call("refund", self.inner.refund(reference, idempotency_key)).await
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct BeginPaymentInput {
    pub order_id: Uuid,
    pub amount: Decimal,
    #[validate(custom = "validate_currency")]
    pub currency: String,
    #[validate(length(min = 1, max = 64))]
    pub payment_method: String,
}

/// What the client needs to complete a payment.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentSession {
    pub payment: payment::Model,
    pub client_handle: String,
}

/// Starts payment attempts against the processor. Never marks anything paid;
/// settlement is the reconciliation handler's job.
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    processor: TimedProcessor,
}

impl PaymentService {
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

    /// Opens (or resumes) the single pending payment attempt for an order and
    /// requests a charge for it.
    ///
    /// The payment id doubles as the processor idempotency key, so when a
    /// previous call failed or timed out after the local row was written, a
    /// retry re-issues the same charge request rather than creating a second
    /// charge. A timeout leaves the attempt `pending`.
    ///
    /// # Errors
    ///
    /// * `NotFound` - no such order
    /// * `AlreadyPaid` - the order's payment status is `paid`
    /// * `InvalidOperation` - the order is cancelled or refunded
    /// * `ValidationError` - amount or currency differ from the order
    /// * `PaymentInProgress` - a concurrent call opened the attempt first
    /// * `ExternalServiceError` / `ProcessorTimeout` - the charge request failed
    #[instrument(skip(self, input), fields(order_id = %input.order_id))]
    pub async fn begin_payment(&self, input: BeginPaymentInput) -> Result<PaymentSession, ServiceError> {
        input.validate()?;

        let order = Order::find_by_id(input.order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", input.order_id)))?;

        match order.payment_status {
            OrderPaymentStatus::Paid => return Err(ServiceError::AlreadyPaid { order_id: order.id }),
            OrderPaymentStatus::Refunded => {
                return Err(ServiceError::InvalidOperation(format!(
                    "Order {} has been refunded",
                    order.id
                )))
            }
            OrderPaymentStatus::Pending | OrderPaymentStatus::Failed => {}
        }
        if order.status == OrderStatus::Cancelled {
            return Err(ServiceError::InvalidOperation(format!(
                "Order {} is cancelled",
                order.id
            )));
        }
        if input.amount != order.total_amount {
            return Err(ServiceError::invalid_field(
                "amount",
                "order_total",
                format!("amount must equal the order total {}", order.total_amount),
            ));
        }
        if !input.currency.eq_ignore_ascii_case(&order.currency) {
            return Err(ServiceError::invalid_field(
                "currency",
                "order_currency",
                format!("currency must be {}", order.currency),
            ));
        }

        let attempt = match self.pending_attempt(order.id).await? {
            Some(existing) => {
                let handle = existing
                    .external_reference
                    .as_ref()
                    .and(existing.client_handle.clone());
                if let Some(client_handle) = handle {
                    info!(payment_id = %existing.id, "Resuming pending payment attempt");
                    return Ok(PaymentSession {
                        payment: existing,
                        client_handle,
                    });
                }
                existing
            }
            None => self.open_attempt(&input, order.total_amount).await?,
        };

        let intent = self
            .processor
            .create_charge(ChargeRequest {
                amount: attempt.amount,
                currency: attempt.currency.clone(),
                order_id: attempt.order_id,
                payment_method: attempt.payment_method.clone(),
                idempotency_key: attempt.id.to_string(),
            })
            .await?;

        let payment = self.attach_intent(attempt, &intent).await?;

        counter!("storefront.payments.initiated", 1);
        self.event_sender.send_or_log(Event::PaymentInitiated {
            payment_id: payment.id,
            order_id: payment.order_id,
            amount: payment.amount,
        });
        info!(payment_id = %payment.id, reference = %intent.reference, "Payment attempt started");

        Ok(PaymentSession {
            payment,
            client_handle: intent.client_handle,
        })
    }

    #[instrument(skip(self))]
    pub async fn get_payment(&self, id: Uuid) -> Result<payment::Model, ServiceError> {
        Payment::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::PaymentNotFound(id.to_string()))
    }

    /// Every attempt for an order, oldest first.
    #[instrument(skip(self))]
    pub async fn list_payments_for_order(&self, order_id: Uuid) -> Result<Vec<payment::Model>, ServiceError> {
        Ok(Payment::find()
            .filter(PaymentColumn::OrderId.eq(order_id))
            .order_by_asc(PaymentColumn::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    async fn pending_attempt(&self, order_id: Uuid) -> Result<Option<payment::Model>, ServiceError> {
        Ok(Payment::find()
            .filter(PaymentColumn::OrderId.eq(order_id))
            .filter(PaymentColumn::Status.eq(PaymentStatus::Pending))
            .one(&*self.db)
            .await?)
    }

    async fn open_attempt(
        &self,
        input: &BeginPaymentInput,
        amount: Decimal,
    ) -> Result<payment::Model, ServiceError> {
        let now = Utc::now();
        payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(input.order_id),
            amount: Set(amount),
            currency: Set(input.currency.to_uppercase()),
            payment_method: Set(input.payment_method.clone()),
            status: Set(PaymentStatus::Pending),
            external_reference: Set(None),
            client_handle: Set(None),
            transaction_id: Set(None),
            refund_reference: Set(None),
            failure_reason: Set(None),
            version: Set(1),
            created_at: Set(now),
            updated_at: Set(now),
            processed_at: Set(None),
        }
        .insert(&*self.db)
        .await
        .map_err(|e| match e.sql_err() {
            // the partial unique index on pending attempts
            Some(SqlErr::UniqueConstraintViolation(_)) => ServiceError::PaymentInProgress {
                order_id: input.order_id,
            },
            _ => ServiceError::from_db_err(e),
        })
    }

    /// Stores the processor reference on a still-pending attempt.
    async fn attach_intent(
        &self,
        attempt: payment::Model,
        intent: &ChargeIntent,
    ) -> Result<payment::Model, ServiceError> {
        let result = Payment::update_many()
            .col_expr(PaymentColumn::ExternalReference, Expr::value(intent.reference.clone()))
            .col_expr(PaymentColumn::ClientHandle, Expr::value(intent.client_handle.clone()))
            .col_expr(PaymentColumn::Version, Expr::col(PaymentColumn::Version).add(1))
            .col_expr(PaymentColumn::UpdatedAt, Expr::value(Utc::now()))
            .filter(PaymentColumn::Id.eq(attempt.id))
            .filter(PaymentColumn::Status.eq(PaymentStatus::Pending))
            .filter(PaymentColumn::ExternalReference.is_null())
            .exec(&*self.db)
            .await
            .map_err(ServiceError::from_db_err)?;

        let current = self.get_payment(attempt.id).await?;
        if result.rows_affected == 0 && current.external_reference.as_deref() != Some(intent.reference.as_str()) {
            return Err(ServiceError::integrity(format!(
                "payment {} is bound to a different processor reference",
                attempt.id
            )));
        }
        Ok(current)
    }
}
