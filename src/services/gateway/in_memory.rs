use super::{ChargeIntent, ChargeRequest, ChargeStatus, GatewayError, PaymentProcessor, ProcessorStatus};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct ChargeRecord {
    client_handle: String,
    status: ProcessorStatus,
    transaction_id: Option<String>,
    refund_id: Option<String>,
}

#[derive(Default)]
struct State {
    charges: HashMap<String, ChargeRecord>,
    /// idempotency key → reference
    by_key: HashMap<String, String>,
}

/// Deterministic processor for development and tests. New charges start
/// `pending`; tests move them along with [`InMemoryPaymentProcessor::set_status`].
#[derive(Default)]
pub struct InMemoryPaymentProcessor {
    state: Mutex<State>,
    delay: Mutex<Option<Duration>>,
    failures_remaining: AtomicU32,
    create_calls: AtomicUsize,
    status_calls: AtomicUsize,
    refund_calls: AtomicUsize,
}

impl InMemoryPaymentProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the processor-side status of a charge.
    pub async fn set_status(&self, reference: &str, status: ProcessorStatus) -> Result<(), GatewayError> {
        let mut state = self.state.lock().await;
        let charge = state
            .charges
            .get_mut(reference)
            .ok_or_else(|| GatewayError::UnknownReference(reference.to_string()))?;
        charge.status = status;
        if status == ProcessorStatus::Succeeded && charge.transaction_id.is_none() {
            charge.transaction_id = Some(format!("txn_{}", Uuid::new_v4().simple()));
        }
        Ok(())
    }

    /// Delays every subsequent call; `None` removes the delay.
    pub async fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().await = delay;
    }

    /// Makes the next `count` calls fail with a transport error.
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn refund_calls(&self) -> usize {
        self.refund_calls.load(Ordering::SeqCst)
    }

    /// Number of distinct charges created.
    pub async fn charge_count(&self) -> usize {
        self.state.lock().await.charges.len()
    }

    async fn before_call(&self) -> Result<(), GatewayError> {
        let delay = *self.delay.lock().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let injected = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(GatewayError::Transport("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentProcessor for InMemoryPaymentProcessor {
    async fn create_charge(&self, request: ChargeRequest) -> Result<ChargeIntent, GatewayError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.before_call().await?;

        let mut state = self.state.lock().await;
        if let Some(reference) = state.by_key.get(&request.idempotency_key).cloned() {
            if let Some(existing) = state.charges.get(&reference) {
                return Ok(ChargeIntent {
                    reference,
                    client_handle: existing.client_handle.clone(),
                });
            }
        }

        let reference = format!("ch_{}", Uuid::new_v4().simple());
        let client_handle = format!("{}_secret_{}", reference, Uuid::new_v4().simple());
        state.charges.insert(
            reference.clone(),
            ChargeRecord {
                client_handle: client_handle.clone(),
                status: ProcessorStatus::Pending,
                transaction_id: None,
                refund_id: None,
            },
        );
        state.by_key.insert(request.idempotency_key, reference.clone());

        Ok(ChargeIntent {
            reference,
            client_handle,
        })
    }

    async fn get_status(&self, reference: &str) -> Result<ChargeStatus, GatewayError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.before_call().await?;

        let state = self.state.lock().await;
        let charge = state
            .charges
            .get(reference)
            .ok_or_else(|| GatewayError::UnknownReference(reference.to_string()))?;

        Ok(ChargeStatus {
            reference: reference.to_string(),
            status: charge.status,
            transaction_id: charge.transaction_id.clone(),
            failure_reason: match charge.status {
                ProcessorStatus::Failed => Some("card_declined".into()),
                ProcessorStatus::Canceled => Some("canceled".into()),
                _ => None,
            },
        })
    }

    async fn refund(&self, reference: &str, _idempotency_key: &str) -> Result<String, GatewayError> {
        self.refund_calls.fetch_add(1, Ordering::SeqCst);
        self.before_call().await?;

        let mut state = self.state.lock().await;
        let charge = state
            .charges
            .get_mut(reference)
            .ok_or_else(|| GatewayError::UnknownReference(reference.to_string()))?;

        if let Some(refund_id) = &charge.refund_id {
            return Ok(refund_id.clone());
        }
        if charge.status != ProcessorStatus::Succeeded {
            return Err(GatewayError::Rejected {
                status: 400,
                message: format!("charge {} is {}", reference, charge.status),
            });
        }

        let refund_id = format!("re_{}", Uuid::new_v4().simple());
        charge.refund_id = Some(refund_id.clone());
        Ok(refund_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request(key: &str) -> ChargeRequest {
        ChargeRequest {
            amount: dec!(20.00),
            currency: "USD".into(),
            order_id: Uuid::new_v4(),
            payment_method: "card".into(),
            idempotency_key: key.into(),
        }
    }

    #[tokio::test]
    async fn same_idempotency_key_returns_same_charge() {
        let processor = InMemoryPaymentProcessor::new();
        let first = processor.create_charge(request("pay_1")).await.unwrap();
        let second = processor.create_charge(request("pay_1")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(processor.charge_count().await, 1);
        assert_eq!(processor.create_calls(), 2);
    }

    #[tokio::test]
    async fn refund_requires_settled_charge_and_is_idempotent() {
        let processor = InMemoryPaymentProcessor::new();
        let intent = processor.create_charge(request("pay_2")).await.unwrap();

        assert!(processor.refund(&intent.reference, "k").await.is_err());

        processor
            .set_status(&intent.reference, ProcessorStatus::Succeeded)
            .await
            .unwrap();
        let first = processor.refund(&intent.reference, "k").await.unwrap();
        let second = processor.refund(&intent.reference, "k").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let processor = InMemoryPaymentProcessor::new();
        processor.fail_next(1);
        assert!(matches!(
            processor.create_charge(request("pay_3")).await,
            Err(GatewayError::Transport(_))
        ));
        assert!(processor.create_charge(request("pay_3")).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_reference_is_reported() {
        let processor = InMemoryPaymentProcessor::new();
        assert!(matches!(
            processor.get_status("ch_missing").await,
            Err(GatewayError::UnknownReference(_))
        ));
    }
}
