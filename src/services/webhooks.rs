use crate::{
    entities::payment,
    errors::ServiceError,
    services::reconciliation::ReconciliationService,
};
use hmac::{Hmac, Mac};
use metrics::counter;
use serde::Deserialize;
use sha2::Sha256;
use std::sync::Arc;
use tracing::{info, instrument, warn};

type HmacSha256 = Hmac<Sha256>;

/// What a delivered notification led to.
#[derive(Debug, Clone)]
pub enum WebhookOutcome {
    Reconciled(payment::Model),
    Ignored { event_type: String },
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type")]
    event_type: String,
    data: WebhookData,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    object: WebhookObject,
}

#[derive(Debug, Deserialize)]
struct WebhookObject {
    id: String,
}

/// Turns processor notifications into reconciliation calls. The payload is a
/// trigger only; status always comes from the processor.
pub struct WebhookHandler {
    reconciliation: Arc<ReconciliationService>,
    secret: Option<String>,
    tolerance_secs: u64,
}

impl WebhookHandler {
    pub fn new(
        reconciliation: Arc<ReconciliationService>,
        secret: Option<String>,
        tolerance_secs: u64,
    ) -> Self {
        Self {
            reconciliation,
            secret,
            tolerance_secs,
        }
    }

    #[instrument(skip(self, payload, signature_header))]
    pub async fn handle(
        &self,
        payload: &[u8],
        signature_header: Option<&str>,
    ) -> Result<WebhookOutcome, ServiceError> {
        if let Some(secret) = &self.secret {
            let now = chrono::Utc::now().timestamp();
            let verified = signature_header
                .map(|header| verify_signature(secret, header, payload, self.tolerance_secs, now))
                .unwrap_or(false);
            if !verified {
                counter!("storefront.webhooks.rejected", 1);
                warn!("Payment webhook signature verification failed");
                return Err(ServiceError::invalid_field(
                    "signature",
                    "invalid_signature",
                    "webhook signature is missing or invalid",
                ));
            }
        }

        let event: WebhookEvent = serde_json::from_slice(payload).map_err(|e| {
            ServiceError::invalid_field("payload", "invalid_json", format!("invalid webhook body: {}", e))
        })?;
        counter!("storefront.webhooks.received", 1);

        if !settles_charge(&event.event_type) {
            info!(event_type = %event.event_type, "Unhandled payment webhook type");
            return Ok(WebhookOutcome::Ignored {
                event_type: event.event_type,
            });
        }

        info!(
            event_id = event.id.as_deref().unwrap_or(""),
            event_type = %event.event_type,
            reference = %event.data.object.id,
            "Reconciling payment from webhook"
        );
        let payment = self.reconciliation.confirm(&event.data.object.id).await?;
        Ok(WebhookOutcome::Reconciled(payment))
    }
}

fn settles_charge(event_type: &str) -> bool {
    (event_type.starts_with("payment_intent.") || event_type.starts_with("charge."))
        && !event_type.contains("refund")
}

/// Checks a `t=<unix>,v1=<hex hmac>` header over `"{t}.{payload}"`.
pub fn verify_signature(
    secret: &str,
    header: &str,
    payload: &[u8],
    tolerance_secs: u64,
    now: i64,
) -> bool {
    let mut ts = "";
    let mut v1 = "";
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", val)) => ts = val,
            Some(("v1", val)) => v1 = val,
            _ => {}
        }
    }
    if ts.is_empty() || v1.is_empty() {
        return false;
    }
    let Ok(ts_i) = ts.parse::<i64>() else {
        return false;
    };
    if (now - ts_i).unsigned_abs() > tolerance_secs {
        return false;
    }

    match compute_signature(secret, ts, payload) {
        Some(expected) => constant_time_eq(&expected, v1),
        None => false,
    }
}

/// Builds a header [`verify_signature`] accepts.
pub fn sign_payload(secret: &str, payload: &[u8], timestamp: i64) -> Option<String> {
    let ts = timestamp.to_string();
    compute_signature(secret, &ts, payload).map(|sig| format!("t={},v1={}", ts, sig))
}

fn compute_signature(secret: &str, ts: &str, payload: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(ts.as_bytes());
    mac.update(b".");
    mac.update(payload);
    Some(hex::encode(mac.finalize().into_bytes()))
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}
