use crate::{
    db,
    entities::product::{self, Column as ProductColumn, Entity as Product},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{validate_non_negative_amount, page_bounds},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateProductInput {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(min = 1, max = 64))]
    pub sku: String,
    #[validate(custom = "validate_non_negative_amount")]
    pub price: Decimal,
    #[validate(range(min = 0))]
    pub stock_quantity: i32,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// Fields left as `None` are not touched.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct ProductPatch {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    #[validate(custom = "validate_non_negative_amount")]
    pub price: Option<Decimal>,
    pub is_active: Option<bool>,
}

impl ProductPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.price.is_none() && self.is_active.is_none()
    }
}

/// Product catalog: price, stock and the active flag.
pub struct CatalogService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl CatalogService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    #[instrument(skip(self))]
    pub async fn create_product(
        &self,
        input: CreateProductInput,
    ) -> Result<product::Model, ServiceError> {
        input.validate()?;

        let now = Utc::now();
        let product = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(input.name),
            sku: Set(input.sku.trim().to_string()),
            price: Set(input.price),
            stock_quantity: Set(input.stock_quantity),
            is_active: Set(input.is_active),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .map_err(ServiceError::from_db_err)?;

        info!(product_id = %product.id, sku = %product.sku, "Created product");
        Ok(product)
    }

    #[instrument(skip(self))]
    pub async fn get_product(&self, id: Uuid) -> Result<product::Model, ServiceError> {
        Product::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", id)))
    }

    /// Active products, newest first. Pages are 1-based.
    #[instrument(skip(self))]
    pub async fn list_active_products(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<product::Model>, u64), ServiceError> {
        let (page_index, per_page) = page_bounds(page, per_page);
        let paginator = Product::find()
            .filter(ProductColumn::IsActive.eq(true))
            .order_by_desc(ProductColumn::CreatedAt)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let products = paginator.fetch_page(page_index).await?;
        Ok((products, total))
    }

    #[instrument(skip(self))]
    pub async fn update_product(
        &self,
        id: Uuid,
        patch: ProductPatch,
    ) -> Result<product::Model, ServiceError> {
        patch.validate()?;
        let existing = self.get_product(id).await?;
        if patch.is_empty() {
            return Ok(existing);
        }

        let mut product: product::ActiveModel = existing.into();
        if let Some(name) = patch.name {
            product.name = Set(name);
        }
        if let Some(price) = patch.price {
            product.price = Set(price);
        }
        if let Some(is_active) = patch.is_active {
            product.is_active = Set(is_active);
        }
        product.updated_at = Set(Utc::now());

        let updated = product.update(&*self.db).await?;
        info!(product_id = %id, "Updated product");
        Ok(updated)
    }

    /// Adds `delta` (which may be negative) to the stock level. The update is
    /// conditional, so stock never goes below zero even under concurrent use.
    #[instrument(skip(self))]
    pub async fn adjust_stock(&self, id: Uuid, delta: i32) -> Result<product::Model, ServiceError> {
        let txn = db::begin(&self.db).await?;

        let mut update = Product::update_many()
            .col_expr(
                ProductColumn::StockQuantity,
                Expr::col(ProductColumn::StockQuantity).add(delta),
            )
            .col_expr(ProductColumn::UpdatedAt, Expr::value(Utc::now()))
            .filter(ProductColumn::Id.eq(id));
        if delta < 0 {
            update = update.filter(ProductColumn::StockQuantity.gte(-delta));
        }
        let result = update.exec(&txn).await?;

        let product = Product::find_by_id(id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", id)))?;

        if result.rows_affected == 0 {
            return Err(ServiceError::InsufficientStock {
                product_id: id,
                requested: -delta,
                available: product.stock_quantity,
            });
        }

        db::commit(txn).await?;

        self.event_sender.send_or_log(Event::StockAdjusted {
            product_id: id,
            old_quantity: product.stock_quantity - delta,
            new_quantity: product.stock_quantity,
        });
        info!(product_id = %id, delta, stock = product.stock_quantity, "Adjusted stock");
        Ok(product)
    }
}
