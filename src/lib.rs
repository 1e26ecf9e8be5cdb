//! Storefront core
//!
//! Transactional core of a storefront: catalog, carts, coupon evaluation,
//! atomic order creation, and the payment lifecycle with processor
//! reconciliation. Services share one database pool, one event channel and
//! one payment processor, wired together by [`CoreServices`].
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod migrator;
pub mod services;

use crate::{
    config::AppConfig,
    errors::ServiceError,
    events::EventSender,
    services::{
        cart::CartService,
        catalog::CatalogService,
        coupons::CouponService,
        gateway::PaymentProcessor,
        orders::OrderService,
        payments::{PaymentService, TimedProcessor},
        reconciliation::ReconciliationService,
        settings::SettingsService,
        webhooks::WebhookHandler,
    },
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tracing::info;

/// Every service, wired against one pool, one event channel and one
/// payment processor.
#[derive(Clone)]
pub struct CoreServices {
    pub db: Arc<DatabaseConnection>,
    pub catalog: Arc<CatalogService>,
    pub cart: Arc<CartService>,
    pub coupons: Arc<CouponService>,
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentService>,
    pub reconciliation: Arc<ReconciliationService>,
    pub settings: Arc<SettingsService>,
    pub webhooks: Arc<WebhookHandler>,
}

impl CoreServices {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        processor: Arc<dyn PaymentProcessor>,
        config: &AppConfig,
    ) -> Self {
        let timed = TimedProcessor::new(processor, config.payment_timeout());

        let reconciliation = Arc::new(ReconciliationService::new(
            db.clone(),
            event_sender.clone(),
            timed.clone(),
        ));
        let webhooks = Arc::new(WebhookHandler::new(
            reconciliation.clone(),
            config.payment_webhook_secret.clone(),
            config.payment_webhook_tolerance_secs,
        ));

        Self {
            catalog: Arc::new(CatalogService::new(db.clone(), event_sender.clone())),
            cart: Arc::new(CartService::new(db.clone(), event_sender.clone())),
            coupons: Arc::new(CouponService::new(db.clone())),
            orders: Arc::new(OrderService::new(
                db.clone(),
                event_sender.clone(),
                config.default_currency.clone(),
            )),
            payments: Arc::new(PaymentService::new(db.clone(), event_sender, timed)),
            settings: Arc::new(SettingsService::new(db.clone())),
            reconciliation,
            webhooks,
            db,
        }
    }

    /// Connects, optionally migrates, builds the configured processor and
    /// starts the event loop on the current runtime.
    pub async fn from_config(config: &AppConfig) -> Result<Self, ServiceError> {
        let pool = db::establish_connection_from_app_config(config).await?;
        if config.auto_migrate {
            db::run_migrations(&pool).await?;
        }

        let processor = services::gateway::build_payment_processor(config)?;
        let (event_sender, rx) = EventSender::channel(config.event_channel_capacity);
        tokio::spawn(events::process_events(rx));

        info!(
            environment = %config.environment,
            payment_provider = ?config.payment_provider,
            "Storefront core services initialised"
        );
        Ok(Self::new(Arc::new(pool), Arc::new(event_sender), processor, config))
    }
}
