use super::{ChargeIntent, ChargeRequest, ChargeStatus, GatewayError, PaymentProcessor, ProcessorStatus};
use crate::errors::ServiceError;
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Client for a payment-intent style REST API.
///
/// * `POST {base}/v1/charges` creates a charge, returning `id` and `client_secret`
/// * `GET {base}/v1/charges/{id}` reads the authoritative status
/// * `POST {base}/v1/charges/{id}/refunds` refunds a settled charge
///
/// Writes carry an `Idempotency-Key` header so retries never double-charge.
#[derive(Clone)]
pub struct HttpPaymentProcessor {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Serialize)]
struct CreateChargeBody<'a> {
    /// Minor currency units
    amount: i64,
    currency: String,
    payment_method: &'a str,
    metadata: ChargeMetadata,
}

#[derive(Serialize)]
struct ChargeMetadata {
    order_id: String,
}

#[derive(Deserialize)]
struct ChargeResponse {
    id: String,
    #[serde(default)]
    client_secret: Option<String>,
    status: String,
    #[serde(default)]
    latest_transaction: Option<String>,
    #[serde(default)]
    failure_message: Option<String>,
}

#[derive(Deserialize)]
struct RefundResponse {
    id: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

impl HttpPaymentProcessor {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base_url, path)
    }

    async fn decode<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> Result<T, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| GatewayError::Decode(e.to_string()));
        }

        let message = response
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|b| b.message)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string());
        warn!(status = status.as_u16(), %message, "Processor rejected request");
        Err(GatewayError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

fn to_minor_units(amount: Decimal) -> Result<i64, GatewayError> {
    (amount * Decimal::ONE_HUNDRED)
        .round()
        .to_i64()
        .ok_or_else(|| GatewayError::Decode(format!("amount {} out of range", amount)))
}

fn transport(err: reqwest::Error) -> GatewayError {
    GatewayError::Transport(err.to_string())
}

#[async_trait]
impl PaymentProcessor for HttpPaymentProcessor {
    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_charge(&self, request: ChargeRequest) -> Result<ChargeIntent, GatewayError> {
        let body = CreateChargeBody {
            amount: to_minor_units(request.amount)?,
            currency: request.currency.to_lowercase(),
            payment_method: &request.payment_method,
            metadata: ChargeMetadata {
                order_id: request.order_id.to_string(),
            },
        };

        let response = self
            .client
            .post(self.url("charges"))
            .bearer_auth(&self.api_key)
            .header("Idempotency-Key", &request.idempotency_key)
            .json(&body)
            .send()
            .await
            .map_err(transport)?;

        let charge: ChargeResponse = Self::decode(response).await?;
        debug!(reference = %charge.id, "Processor charge created");

        let client_handle = charge
            .client_secret
            .ok_or_else(|| GatewayError::Decode("charge response missing client_secret".into()))?;
        Ok(ChargeIntent {
            reference: charge.id,
            client_handle,
        })
    }

    #[instrument(skip(self))]
    async fn get_status(&self, reference: &str) -> Result<ChargeStatus, GatewayError> {
        let response = self
            .client
            .get(self.url(&format!("charges/{}", reference)))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(transport)?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(GatewayError::UnknownReference(reference.to_string()));
        }

        let charge: ChargeResponse = Self::decode(response).await?;
        Ok(ChargeStatus {
            reference: charge.id,
            status: ProcessorStatus::from_wire(&charge.status),
            transaction_id: charge.latest_transaction,
            failure_reason: charge.failure_message,
        })
    }

    #[instrument(skip(self))]
    async fn refund(&self, reference: &str, idempotency_key: &str) -> Result<String, GatewayError> {
        let response = self
            .client
            .post(self.url(&format!("charges/{}/refunds", reference)))
            .bearer_auth(&self.api_key)
            .header("Idempotency-Key", idempotency_key)
            .send()
            .await
            .map_err(transport)?;

        let refund: RefundResponse = Self::decode(response).await?;
        Ok(refund.id)
    }
}
