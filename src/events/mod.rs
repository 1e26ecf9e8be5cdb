use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{info, warn};
use uuid::Uuid;

/// Domain events, published only after the owning transaction has committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // Order events
    OrderCreated {
        order_id: Uuid,
        user_id: Uuid,
        total_amount: Decimal,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    CouponRedeemed {
        coupon_id: Uuid,
        order_id: Uuid,
        discount: Decimal,
    },

    // Cart events
    CartItemAdded {
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    },
    CartCleared(Uuid),

    // Payment events
    PaymentInitiated {
        payment_id: Uuid,
        order_id: Uuid,
        amount: Decimal,
    },
    PaymentSucceeded {
        payment_id: Uuid,
        order_id: Uuid,
    },
    PaymentFailed {
        payment_id: Uuid,
        order_id: Uuid,
        reason: String,
    },
    PaymentRefunded {
        payment_id: Uuid,
        order_id: Uuid,
        refund_reference: String,
    },

    // Catalog events
    StockAdjusted {
        product_id: Uuid,
        old_quantity: i32,
        new_quantity: i32,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::OrderCreated { .. } => "order_created",
            Event::OrderStatusChanged { .. } => "order_status_changed",
            Event::CouponRedeemed { .. } => "coupon_redeemed",
            Event::CartItemAdded { .. } => "cart_item_added",
            Event::CartCleared(_) => "cart_cleared",
            Event::PaymentInitiated { .. } => "payment_initiated",
            Event::PaymentSucceeded { .. } => "payment_succeeded",
            Event::PaymentFailed { .. } => "payment_failed",
            Event::PaymentRefunded { .. } => "payment_refunded",
            Event::StockAdjusted { .. } => "stock_adjusted",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Creates a bounded channel and wraps its sending half.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// Sends an event, waiting for channel capacity.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Publishes without blocking. Committed state is never undone because
    /// an event could not be delivered, so failures are only logged.
    pub fn send_or_log(&self, event: Event) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                metrics::counter!("storefront.events.dropped", 1);
                warn!(event = event.name(), "Event channel full; dropping event");
            }
            Err(TrySendError::Closed(event)) => {
                warn!(event = event.name(), "Event channel closed; dropping event");
            }
        }
    }
}

/// Drains the channel and logs every event until all senders are dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        metrics::counter!("storefront.events.processed", 1, "event" => event.name());
        match &event {
            Event::OrderCreated {
                order_id,
                user_id,
                total_amount,
            } => info!(%order_id, %user_id, %total_amount, "order created"),
            Event::PaymentFailed {
                payment_id,
                order_id,
                reason,
            } => warn!(%payment_id, %order_id, %reason, "payment failed"),
            other => info!(event = other.name(), payload = ?other, "domain event"),
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_or_log_delivers_when_capacity_allows() {
        let (sender, mut rx) = EventSender::channel(4);
        let user_id = Uuid::new_v4();
        sender.send_or_log(Event::CartCleared(user_id));
        assert_eq!(rx.recv().await, Some(Event::CartCleared(user_id)));
    }

    #[tokio::test]
    async fn send_or_log_never_blocks_on_full_channel() {
        let (sender, mut rx) = EventSender::channel(1);
        sender.send_or_log(Event::CartCleared(Uuid::new_v4()));
        // dropped, not awaited
        sender.send_or_log(Event::CartCleared(Uuid::new_v4()));
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_or_log_tolerates_closed_channel() {
        let (sender, rx) = EventSender::channel(1);
        drop(rx);
        sender.send_or_log(Event::CartCleared(Uuid::new_v4()));
        assert!(sender.send(Event::CartCleared(Uuid::new_v4())).await.is_err());
    }
}
