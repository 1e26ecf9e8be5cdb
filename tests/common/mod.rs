#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use sea_orm::{DatabaseConnection, EntityTrait};
use storefront_core::{
    config::AppConfig,
    db,
    entities::{coupon, order, payment, product},
    events::{self, EventSender},
    services::{
        catalog::CreateProductInput,
        coupons::CreateCouponInput,
        gateway::InMemoryPaymentProcessor,
        orders::{Address, CreateOrderInput},
    },
    CoreServices,
};
use tempfile::TempDir;
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

/// Core services backed by a throwaway SQLite file and a scriptable processor.
pub struct TestApp {
    pub services: CoreServices,
    pub processor: Arc<InMemoryPaymentProcessor>,
    pub config: AppConfig,
    _event_task: tokio::task::JoinHandle<()>,
    _dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Builds the harness after letting the caller tweak configuration.
    pub async fn with_config(tweak: impl FnOnce(&mut AppConfig)) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let db_path = dir.path().join("storefront_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            "test".to_string(),
        );
        // one connection: transactions queue behind each other like row locks
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.db_acquire_timeout_secs = 60;
        cfg.payment_timeout_secs = 2;
        tweak(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (event_sender, event_rx) = EventSender::channel(cfg.event_channel_capacity);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let processor = Arc::new(InMemoryPaymentProcessor::new());
        let services = CoreServices::new(
            Arc::new(pool),
            Arc::new(event_sender),
            processor.clone(),
            &cfg,
        );

        Self {
            services,
            processor,
            config: cfg,
            _event_task: event_task,
            _dir: dir,
        }
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.services.db
    }

    pub async fn seed_product(&self, price: Decimal, stock: i32) -> product::Model {
        let sku = format!("SKU-{}", &Uuid::new_v4().simple().to_string()[..12]);
        self.services
            .catalog
            .create_product(CreateProductInput {
                name: format!("Product {}", sku),
                sku,
                price,
                stock_quantity: stock,
                is_active: true,
            })
            .await
            .expect("seed product")
    }

    pub async fn seed_coupon(&self, input: CreateCouponInput) -> coupon::Model {
        self.services
            .coupons
            .create_coupon(input)
            .await
            .expect("seed coupon")
    }

    /// Adds the product to a fresh user's cart and returns the user id.
    pub async fn cart_with(&self, product_id: Uuid, quantity: i32) -> Uuid {
        let user_id = Uuid::new_v4();
        self.services
            .cart
            .add_item(user_id, product_id, quantity)
            .await
            .expect("add to cart");
        user_id
    }

    pub async fn product(&self, id: Uuid) -> product::Model {
        product::Entity::find_by_id(id)
            .one(self.db())
            .await
            .expect("query product")
            .expect("product exists")
    }

    pub async fn coupon(&self, id: Uuid) -> coupon::Model {
        coupon::Entity::find_by_id(id)
            .one(self.db())
            .await
            .expect("query coupon")
            .expect("coupon exists")
    }

    pub async fn order(&self, id: Uuid) -> order::Model {
        order::Entity::find_by_id(id)
            .one(self.db())
            .await
            .expect("query order")
            .expect("order exists")
    }

    pub async fn order_count(&self) -> usize {
        order::Entity::find()
            .all(self.db())
            .await
            .expect("query orders")
            .len()
    }

    pub async fn payment_count(&self) -> usize {
        payment::Entity::find()
            .all(self.db())
            .await
            .expect("query payments")
            .len()
    }
}

pub fn address() -> Address {
    Address {
        name: "Ada Lovelace".into(),
        line1: "12 Analytical Row".into(),
        line2: None,
        city: "London".into(),
        region: None,
        postal_code: "N1 9GU".into(),
        country: "GB".into(),
    }
}

pub fn order_input(user_id: Uuid, coupon_code: Option<&str>) -> CreateOrderInput {
    CreateOrderInput {
        user_id,
        shipping_address: address(),
        billing_address: None,
        payment_method: "card".into(),
        coupon_code: coupon_code.map(str::to_string),
        currency: None,
    }
}

/// An active percentage coupon valid from yesterday with no end date.
pub fn percentage_coupon(code: &str, percent: Decimal) -> CreateCouponInput {
    CreateCouponInput {
        code: code.into(),
        discount_type: coupon::DiscountType::Percentage,
        discount_value: percent,
        min_purchase_amount: Decimal::ZERO,
        max_discount_amount: None,
        usage_limit: None,
        valid_from: Utc::now() - ChronoDuration::days(1),
        valid_until: None,
    }
}
