use crate::{
    db,
    entities::{
        cart_item::{self, Column as CartItemColumn, Entity as CartItem},
        product::{self, Entity as Product},
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// A cart line priced at the current catalog price. Informational only:
/// checkout re-reads prices.
#[derive(Debug, Clone, Serialize)]
pub struct CartLineView {
    pub product_id: Uuid,
    pub name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    pub available: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CartView {
    pub user_id: Uuid,
    pub lines: Vec<CartLineView>,
    pub subtotal: Decimal,
}

impl CartView {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Per-user staging area for checkout.
///
/// A user has at most one line per product; adding a product that is already
/// in the cart sums the quantities, and the merged quantity is checked
/// against current stock.
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Adds `quantity` units of a product, merging with an existing line.
    ///
    /// # Errors
    ///
    /// * `ValidationError` - `quantity` is not positive
    /// * `NotFound` - the product does not exist
    /// * `ProductUnavailable` - the product is inactive
    /// * `InsufficientStock` - the merged quantity exceeds current stock
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<cart_item::Model, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::invalid_field(
                "quantity",
                "range",
                "quantity must be greater than zero",
            ));
        }

        let txn = db::begin(&self.db).await?;
        let product = load_sellable_product(&txn, product_id).await?;
        let existing = find_line(&txn, user_id, product_id).await?;

        let merged = existing
            .as_ref()
            .map_or(0, |line| line.quantity)
            .checked_add(quantity)
            .ok_or(ServiceError::InsufficientStock {
                product_id: product.id,
                requested: i32::MAX,
                available: product.stock_quantity,
            })?;
        ensure_stock(&product, merged)?;

        let now = Utc::now();
        let line = match existing {
            Some(line) => {
                let mut line: cart_item::ActiveModel = line.into();
                line.quantity = Set(merged);
                line.updated_at = Set(now);
                line.update(&txn).await?
            }
            None => cart_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                user_id: Set(user_id),
                product_id: Set(product_id),
                quantity: Set(merged),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&txn)
            .await
            .map_err(ServiceError::from_db_err)?,
        };

        db::commit(txn).await?;

        self.event_sender.send_or_log(Event::CartItemAdded {
            user_id,
            product_id,
            quantity,
        });
        info!(%user_id, %product_id, quantity = merged, "Added item to cart");
        Ok(line)
    }

    /// Sets the quantity of an existing line. Zero removes the line and
    /// returns `None`.
    #[instrument(skip(self))]
    pub async fn update_quantity(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<Option<cart_item::Model>, ServiceError> {
        if quantity < 0 {
            return Err(ServiceError::invalid_field(
                "quantity",
                "range",
                "quantity must not be negative",
            ));
        }
        if quantity == 0 {
            self.remove_item(user_id, product_id).await?;
            return Ok(None);
        }

        let txn = db::begin(&self.db).await?;
        let line = find_line(&txn, user_id, product_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} is not in the cart", product_id)))?;
        let product = load_sellable_product(&txn, product_id).await?;
        ensure_stock(&product, quantity)?;

        let mut line: cart_item::ActiveModel = line.into();
        line.quantity = Set(quantity);
        line.updated_at = Set(Utc::now());
        let line = line.update(&txn).await?;
        db::commit(txn).await?;

        Ok(Some(line))
    }

    #[instrument(skip(self))]
    pub async fn remove_item(&self, user_id: Uuid, product_id: Uuid) -> Result<(), ServiceError> {
        let result = CartItem::delete_many()
            .filter(CartItemColumn::UserId.eq(user_id))
            .filter(CartItemColumn::ProductId.eq(product_id))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "Product {} is not in the cart",
                product_id
            )));
        }
        Ok(())
    }

    /// The user's cart priced at current catalog prices.
    #[instrument(skip(self))]
    pub async fn get_cart(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        let rows = CartItem::find()
            .filter(CartItemColumn::UserId.eq(user_id))
            .order_by_asc(CartItemColumn::CreatedAt)
            .find_also_related(Product)
            .all(&*self.db)
            .await?;

        let lines: Vec<CartLineView> = rows
            .into_iter()
            .filter_map(|(line, product)| {
                product.map(|product| CartLineView {
                    product_id: product.id,
                    available: product.can_fulfill(line.quantity),
                    name: product.name,
                    quantity: line.quantity,
                    unit_price: product.price,
                    line_total: product.price * Decimal::from(line.quantity),
                })
            })
            .collect();
        let subtotal = lines.iter().map(|l| l.line_total).sum();

        Ok(CartView {
            user_id,
            lines,
            subtotal,
        })
    }

    /// Removes every line; returns how many were removed.
    #[instrument(skip(self))]
    pub async fn clear_cart(&self, user_id: Uuid) -> Result<u64, ServiceError> {
        let removed = clear_lines(&*self.db, user_id).await?;
        if removed > 0 {
            self.event_sender.send_or_log(Event::CartCleared(user_id));
        }
        Ok(removed)
    }
}

/// Deletes all cart lines for a user on the given connection or transaction.
pub(crate) async fn clear_lines<C: ConnectionTrait>(conn: &C, user_id: Uuid) -> Result<u64, ServiceError> {
    let result = CartItem::delete_many()
        .filter(CartItemColumn::UserId.eq(user_id))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}

async fn find_line<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    product_id: Uuid,
) -> Result<Option<cart_item::Model>, ServiceError> {
    Ok(CartItem::find()
        .filter(CartItemColumn::UserId.eq(user_id))
        .filter(CartItemColumn::ProductId.eq(product_id))
        .one(conn)
        .await?)
}

async fn load_sellable_product<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
) -> Result<product::Model, ServiceError> {
    let product = Product::find_by_id(product_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;
    if !product.is_active {
        return Err(ServiceError::ProductUnavailable { product_id });
    }
    Ok(product)
}

fn ensure_stock(product: &product::Model, quantity: i32) -> Result<(), ServiceError> {
    if product.stock_quantity < quantity {
        return Err(ServiceError::InsufficientStock {
            product_id: product.id,
            requested: quantity,
            available: product.stock_quantity,
        });
    }
    Ok(())
}
