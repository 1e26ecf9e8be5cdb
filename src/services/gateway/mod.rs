//! Payment processor capability set.
//!
//! The orchestrator and the reconciliation handler only ever talk to a
//! [`PaymentProcessor`]; which processor sits behind it is a configuration
//! concern.

mod http;
mod in_memory;

pub use http::HttpPaymentProcessor;
pub use in_memory::InMemoryPaymentProcessor;

use crate::config::{AppConfig, PaymentProvider};
use crate::errors::ServiceError;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Status of a charge as reported by the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProcessorStatus {
    Pending,
    Processing,
    RequiresAction,
    Succeeded,
    Failed,
    Canceled,
}

impl ProcessorStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProcessorStatus::Succeeded | ProcessorStatus::Failed | ProcessorStatus::Canceled
        )
    }

    /// Maps a processor status string. Unknown values are treated as still in
    /// flight so they can never settle a payment.
    pub fn from_wire(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "succeeded" | "paid" | "captured" => ProcessorStatus::Succeeded,
            "failed" | "declined" => ProcessorStatus::Failed,
            "canceled" | "cancelled" | "expired" => ProcessorStatus::Canceled,
            "processing" => ProcessorStatus::Processing,
            "requires_action" | "requires_confirmation" | "requires_payment_method" => {
                ProcessorStatus::RequiresAction
            }
            _ => ProcessorStatus::Pending,
        }
    }
}

/// A charge request. `idempotency_key` is the local payment id, so a retried
/// request for the same attempt maps onto the same processor-side charge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChargeRequest {
    pub amount: Decimal,
    pub currency: String,
    pub order_id: Uuid,
    pub payment_method: String,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeIntent {
    pub reference: String,
    pub client_handle: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeStatus {
    pub reference: String,
    pub status: ProcessorStatus,
    pub transaction_id: Option<String>,
    pub failure_reason: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("processor unreachable: {0}")]
    Transport(String),
    #[error("processor rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("unknown processor reference: {0}")]
    UnknownReference(String),
    #[error("malformed processor response: {0}")]
    Decode(String),
}

impl From<GatewayError> for ServiceError {
    fn from(err: GatewayError) -> Self {
        ServiceError::ExternalServiceError(err.to_string())
    }
}

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn create_charge(&self, request: ChargeRequest) -> Result<ChargeIntent, GatewayError>;

    async fn get_status(&self, reference: &str) -> Result<ChargeStatus, GatewayError>;

    /// Returns the processor's refund id.
    async fn refund(&self, reference: &str, idempotency_key: &str) -> Result<String, GatewayError>;
}

/// Builds the processor selected by configuration.
pub fn build_payment_processor(
    config: &AppConfig,
) -> Result<Arc<dyn PaymentProcessor>, ServiceError> {
    match config.payment_provider {
        PaymentProvider::InMemory => Ok(Arc::new(InMemoryPaymentProcessor::new())),
        PaymentProvider::Http => {
            let base_url = config.payment_api_base_url.clone().ok_or_else(|| {
                ServiceError::InternalError("payment_api_base_url is not configured".into())
            })?;
            let api_key = config.payment_api_key.clone().ok_or_else(|| {
                ServiceError::InternalError("payment_api_key is not configured".into())
            })?;
            let processor = HttpPaymentProcessor::new(base_url, api_key, config.payment_timeout())?;
            Ok(Arc::new(processor))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_statuses_map_conservatively() {
        assert_eq!(ProcessorStatus::from_wire("succeeded"), ProcessorStatus::Succeeded);
        assert_eq!(ProcessorStatus::from_wire("CANCELED"), ProcessorStatus::Canceled);
        assert_eq!(
            ProcessorStatus::from_wire("requires_payment_method"),
            ProcessorStatus::RequiresAction
        );
        assert_eq!(ProcessorStatus::from_wire("something_new"), ProcessorStatus::Pending);
    }

    #[test]
    fn terminal_statuses() {
        assert!(ProcessorStatus::Succeeded.is_terminal());
        assert!(ProcessorStatus::Failed.is_terminal());
        assert!(ProcessorStatus::Canceled.is_terminal());
        assert!(!ProcessorStatus::Processing.is_terminal());
        assert!(!ProcessorStatus::RequiresAction.is_terminal());
    }

    #[test]
    fn gateway_errors_become_external_service_errors() {
        let err: ServiceError = GatewayError::Transport("connection reset".into()).into();
        assert!(matches!(err, ServiceError::ExternalServiceError(_)));
        assert!(err.is_retryable());
    }
}
