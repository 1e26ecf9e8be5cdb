use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::{DbErr, SqlErr};
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

/// Error payload handed to whatever API layer sits in front of the core.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Unprocessable Entity")
    pub error: String,
    /// Taxonomy tag, stable across releases
    pub kind: ErrorKind,
    /// Human-readable error description
    pub message: String,
    /// Field-level details, only present for validation failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldError>>,
    /// RFC 3339 timestamp when the error was rendered
    pub timestamp: String,
}

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Coarse error taxonomy. Callers branch on this rather than on variants.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    BusinessRule,
    NotFound,
    ExternalService,
    Integrity,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        details: Vec<FieldError>,
    },

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: Uuid,
        requested: i32,
        available: i32,
    },

    #[error("Product {product_id} is unavailable")]
    ProductUnavailable { product_id: Uuid },

    #[error("Invalid coupon: {reason}")]
    InvalidCoupon { reason: String },

    #[error("Order {order_id} is already paid")]
    AlreadyPaid { order_id: Uuid },

    #[error("Payment {payment_id} is not refundable in status {status}")]
    NotRefundable { payment_id: Uuid, status: String },

    #[error("A payment attempt is already in progress for order {order_id}")]
    PaymentInProgress { order_id: Uuid },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Payment not found: {0}")]
    PaymentNotFound(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Payment processor timed out during {operation}")]
    ProcessorTimeout { operation: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Integrity violation: {0}")]
    IntegrityViolation(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        let mut details: Vec<FieldError> = err
            .field_errors()
            .into_iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |e| FieldError {
                    field: field.to_string(),
                    code: e.code.to_string(),
                    message: e.message.as_ref().map(|m| m.to_string()),
                })
            })
            .collect();
        details.sort_by(|a, b| a.field.cmp(&b.field));

        ServiceError::ValidationError {
            message: err.to_string(),
            details,
        }
    }
}

impl ServiceError {
    /// Validation failure on a single field.
    pub fn invalid_field(field: &str, code: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        ServiceError::ValidationError {
            message: format!("{}: {}", field, message),
            details: vec![FieldError {
                field: field.to_string(),
                code: code.to_string(),
                message: Some(message),
            }],
        }
    }

    /// Raises an integrity violation and logs it for operator attention.
    pub fn integrity(message: impl Into<String>) -> Self {
        let message = message.into();
        error!(%message, "integrity violation");
        ServiceError::IntegrityViolation(message)
    }

    /// Translates storage-layer constraint violations into the taxonomy.
    /// Anything that is not a constraint violation stays a database error.
    pub fn from_db_err(err: DbErr) -> Self {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(detail)) => ServiceError::Conflict(detail),
            Some(SqlErr::ForeignKeyConstraintViolation(detail)) => ServiceError::integrity(detail),
            _ => ServiceError::DatabaseError(err),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ValidationError { .. } => ErrorKind::Validation,
            Self::EmptyCart
            | Self::InsufficientStock { .. }
            | Self::ProductUnavailable { .. }
            | Self::InvalidCoupon { .. }
            | Self::AlreadyPaid { .. }
            | Self::NotRefundable { .. }
            | Self::PaymentInProgress { .. }
            | Self::InvalidOperation(_)
            | Self::Conflict(_) => ErrorKind::BusinessRule,
            Self::NotFound(_) | Self::PaymentNotFound(_) => ErrorKind::NotFound,
            Self::ExternalServiceError(_) | Self::ProcessorTimeout { .. } => {
                ErrorKind::ExternalService
            }
            Self::IntegrityViolation(_) => ErrorKind::Integrity,
            Self::DatabaseError(_) | Self::InternalError(_) => ErrorKind::Internal,
        }
    }

    /// Whether the caller can retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ExternalServiceError(_) | Self::ProcessorTimeout { .. } | Self::PaymentInProgress { .. }
        )
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ValidationError { .. } | Self::EmptyCart | Self::InvalidOperation(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::InsufficientStock { .. }
            | Self::ProductUnavailable { .. }
            | Self::InvalidCoupon { .. }
            | Self::NotRefundable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::AlreadyPaid { .. } | Self::PaymentInProgress { .. } | Self::Conflict(_) => {
                StatusCode::CONFLICT
            }
            Self::NotFound(_) | Self::PaymentNotFound(_) => StatusCode::NOT_FOUND,
            Self::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            Self::ProcessorTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::IntegrityViolation(_) | Self::DatabaseError(_) | Self::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) | Self::IntegrityViolation(_) => {
                "Internal server error".to_string()
            }
            Self::ExternalServiceError(_) => "Payment processor unavailable".to_string(),
            _ => self.to_string(),
        }
    }

    pub fn to_response(&self) -> ErrorResponse {
        let status = self.status_code();
        let details = match self {
            Self::ValidationError { details, .. } => Some(details.clone()),
            _ => None,
        };

        ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            kind: self.kind(),
            message: self.response_message(),
            details,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(self.to_response())).into_response()
    }
}
