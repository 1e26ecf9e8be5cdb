use crate::{
    config::validate_currency,
    db,
    entities::{
        cart_item::{self, Column as CartItemColumn, Entity as CartItem},
        order::{self, Column as OrderColumn, Entity as Order, OrderPaymentStatus, OrderStatus},
        order_item::{self, Column as OrderItemColumn, Entity as OrderItem},
        payment::{Column as PaymentColumn, Entity as Payment, PaymentStatus},
        product::{Column as ProductColumn, Entity as Product},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        cart::clear_lines,
        coupons::{evaluate, find_by_code_on, CouponRejection, CouponService},
        page_bounds,
    },
};
use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Address {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(min = 1, max = 255))]
    pub line1: String,
    #[validate(length(max = 255))]
    pub line2: Option<String>,
    #[validate(length(min = 1, max = 128))]
    pub city: String,
    #[validate(length(max = 128))]
    pub region: Option<String>,
    #[validate(length(min = 1, max = 32))]
    pub postal_code: String,
    /// ISO 3166-1 alpha-2
    #[validate(length(equal = 2))]
    pub country: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateOrderInput {
    pub user_id: Uuid,
    #[validate]
    pub shipping_address: Address,
    /// Defaults to the shipping address.
    #[validate]
    pub billing_address: Option<Address>,
    #[validate(length(min = 1, max = 64))]
    pub payment_method: String,
    pub coupon_code: Option<String>,
    #[validate(custom = "validate_currency")]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderWithItems {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

/// A cart line priced from the catalog inside the checkout transaction.
#[derive(Debug, Clone, Copy)]
struct PricedLine {
    product_id: Uuid,
    quantity: i32,
    unit_price: Decimal,
}

impl PricedLine {
    fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// Turns carts into orders and manages the order lifecycle afterwards.
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    default_currency: String,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        default_currency: impl Into<String>,
    ) -> Self {
        Self {
            db,
            event_sender,
            default_currency: default_currency.into(),
        }
    }

    /// Converts the user's cart into a priced, stock-reserved order.
    ///
    /// Everything happens in one transaction: price the cart from the catalog,
    /// check stock and availability, apply the coupon, insert the order and its
    /// items, decrement stock conditionally, consume one coupon use and clear
    /// the cart. Any failure rolls all of it back, leaving stock, coupon usage
    /// and the cart untouched.
    ///
    /// # Errors
    ///
    /// * `EmptyCart` - nothing to check out
    /// * `ProductUnavailable` - a line references an inactive or missing product
    /// * `InsufficientStock` - a line asks for more than is in stock, either at
    ///   the initial check or when the conditional decrement loses a race
    /// * `InvalidCoupon` - unknown, inactive, expired, exhausted or below minimum
    #[instrument(skip(self, input), fields(user_id = %input.user_id))]
    pub async fn create_order(&self, input: CreateOrderInput) -> Result<OrderWithItems, ServiceError> {
        input.validate()?;

        let result = self.build_order(input).await;
        match &result {
            Ok(built) => {
                counter!("storefront.orders.created", 1);
                info!(
                    order_id = %built.order.id,
                    total = %built.order.total_amount,
                    items = built.items.len(),
                    "Order created"
                );
            }
            Err(e) => {
                counter!("storefront.orders.rejected", 1, "kind" => e.kind().to_string());
                warn!(error = %e, "Order creation rejected");
            }
        }
        result
    }

    async fn build_order(&self, input: CreateOrderInput) -> Result<OrderWithItems, ServiceError> {
        let user_id = input.user_id;
        let currency = input
            .currency
            .as_deref()
            .unwrap_or(&self.default_currency)
            .to_uppercase();
        let shipping_address = to_json(&input.shipping_address)?;
        let billing_address = match &input.billing_address {
            Some(address) => to_json(address)?,
            None => shipping_address.clone(),
        };

        let txn = db::begin(&self.db).await?;

        let lines = price_cart(&txn, user_id).await?;
        let subtotal: Decimal = lines.iter().map(PricedLine::line_total).sum();

        let coupon = match input.coupon_code.as_deref() {
            Some(code) => {
                let coupon = find_by_code_on(&txn, code)
                    .await?
                    .ok_or(ServiceError::from(CouponRejection::Unknown))?;
                let discount = evaluate(&coupon, subtotal, Utc::now()).into_discount()?;
                Some((coupon, discount))
            }
            None => None,
        };
        let discount = coupon.as_ref().map_or(Decimal::ZERO, |(_, d)| *d);
        let total_amount = subtotal - discount;
        if total_amount < Decimal::ZERO {
            return Err(ServiceError::integrity(format!(
                "order total would be negative: subtotal {} discount {}",
                subtotal, discount
            )));
        }

        let now = Utc::now();
        let order = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            status: Set(OrderStatus::Pending),
            payment_status: Set(OrderPaymentStatus::Pending),
            currency: Set(currency),
            subtotal: Set(subtotal),
            discount_amount: Set(discount),
            total_amount: Set(total_amount),
            coupon_code: Set(coupon.as_ref().map(|(c, _)| c.code.clone())),
            payment_method: Set(input.payment_method),
            shipping_address: Set(shipping_address),
            billing_address: Set(billing_address),
            version: Set(1),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(ServiceError::from_db_err)?;

        let mut items = Vec::with_capacity(lines.len());
        for line in &lines {
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order.id),
                product_id: Set(line.product_id),
                quantity: Set(line.quantity),
                unit_price: Set(line.unit_price),
                line_total: Set(line.line_total()),
                created_at: Set(now),
            }
            .insert(&txn)
            .await
            .map_err(ServiceError::from_db_err)?;
            items.push(item);
        }

        for line in &lines {
            reserve_stock(&txn, line).await?;
        }

        if let Some((coupon, _)) = &coupon {
            CouponService::redeem_in_txn(&txn, coupon.id).await?;
        }

        clear_lines(&txn, user_id).await?;

        db::commit(txn).await?;

        self.event_sender.send_or_log(Event::OrderCreated {
            order_id: order.id,
            user_id,
            total_amount: order.total_amount,
        });
        if let Some((coupon, discount)) = coupon {
            self.event_sender.send_or_log(Event::CouponRedeemed {
                coupon_id: coupon.id,
                order_id: order.id,
                discount,
            });
        }
        self.event_sender.send_or_log(Event::CartCleared(user_id));

        Ok(OrderWithItems { order, items })
    }

    #[instrument(skip(self))]
    pub async fn get_order(&self, id: Uuid) -> Result<OrderWithItems, ServiceError> {
        let order = Order::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", id)))?;
        let items = OrderItem::find()
            .filter(OrderItemColumn::OrderId.eq(id))
            .order_by_asc(OrderItemColumn::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(OrderWithItems { order, items })
    }

    /// Newest first. Pages are 1-based.
    #[instrument(skip(self))]
    pub async fn list_orders_for_user(
        &self,
        user_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<order::Model>, u64), ServiceError> {
        let (page_index, per_page) = page_bounds(page, per_page);
        let paginator = Order::find()
            .filter(OrderColumn::UserId.eq(user_id))
            .order_by_desc(OrderColumn::CreatedAt)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page_index).await?;
        Ok((orders, total))
    }

    /// Moves the order along its fulfillment lifecycle. Cancelling puts every
    /// line's quantity back in stock within the same transaction, and is
    /// refused while the order is paid or has a pending payment attempt.
    #[instrument(skip(self))]
    pub async fn update_status(&self, id: Uuid, new_status: OrderStatus) -> Result<order::Model, ServiceError> {
        let txn = db::begin(&self.db).await?;

        let current = Order::find_by_id(id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", id)))?;

        if !current.status.can_transition_to(new_status) {
            return Err(ServiceError::InvalidOperation(format!(
                "Cannot move order from {} to {}",
                current.status, new_status
            )));
        }
        if new_status == OrderStatus::Cancelled && current.payment_status == OrderPaymentStatus::Paid {
            return Err(ServiceError::InvalidOperation(
                "Paid orders must be refunded before they can be cancelled".to_string(),
            ));
        }
        if new_status == OrderStatus::Cancelled {
            let open_attempts = Payment::find()
                .filter(PaymentColumn::OrderId.eq(id))
                .filter(PaymentColumn::Status.eq(PaymentStatus::Pending))
                .count(&txn)
                .await?;
            if open_attempts > 0 {
                return Err(ServiceError::InvalidOperation(
                    "Order has a payment in progress; confirm it before cancelling".to_string(),
                ));
            }
        }

        let result = Order::update_many()
            .col_expr(OrderColumn::Status, Expr::value(new_status))
            .col_expr(OrderColumn::Version, Expr::col(OrderColumn::Version).add(1))
            .col_expr(OrderColumn::UpdatedAt, Expr::value(Utc::now()))
            .filter(OrderColumn::Id.eq(id))
            .filter(OrderColumn::Version.eq(current.version))
            .exec(&txn)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::Conflict(format!(
                "Order {} was modified concurrently",
                id
            )));
        }

        if new_status == OrderStatus::Cancelled {
            restore_stock(&txn, id).await?;
        }

        let updated = Order::find_by_id(id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::integrity(format!("order {} vanished mid-update", id)))?;
        db::commit(txn).await?;

        self.event_sender.send_or_log(Event::OrderStatusChanged {
            order_id: id,
            old_status: current.status.to_string(),
            new_status: new_status.to_string(),
        });
        info!(order_id = %id, from = %current.status, to = %new_status, "Order status changed");
        Ok(updated)
    }
}

fn to_json(address: &Address) -> Result<serde_json::Value, ServiceError> {
    serde_json::to_value(address)
        .map_err(|e| ServiceError::InternalError(format!("Failed to serialize address: {}", e)))
}

/// Reads the cart joined with the catalog and checks every line.
async fn price_cart(txn: &DatabaseTransaction, user_id: Uuid) -> Result<Vec<PricedLine>, ServiceError> {
    let rows: Vec<(cart_item::Model, Option<_>)> = CartItem::find()
        .filter(CartItemColumn::UserId.eq(user_id))
        .order_by_asc(CartItemColumn::CreatedAt)
        .find_also_related(Product)
        .all(txn)
        .await?;

    if rows.is_empty() {
        return Err(ServiceError::EmptyCart);
    }

    rows.into_iter()
        .map(|(line, product)| {
            let product = product.ok_or(ServiceError::ProductUnavailable {
                product_id: line.product_id,
            })?;
            if !product.is_active {
                return Err(ServiceError::ProductUnavailable {
                    product_id: product.id,
                });
            }
            if product.stock_quantity < line.quantity {
                return Err(ServiceError::InsufficientStock {
                    product_id: product.id,
                    requested: line.quantity,
                    available: product.stock_quantity,
                });
            }
            Ok(PricedLine {
                product_id: product.id,
                quantity: line.quantity,
                unit_price: product.price,
            })
        })
        .collect()
}

/// `stock = stock - qty WHERE stock >= qty AND is_active`: the check and the
/// write are one statement, so concurrent checkouts cannot oversell.
async fn reserve_stock(txn: &DatabaseTransaction, line: &PricedLine) -> Result<(), ServiceError> {
    let result = Product::update_many()
        .col_expr(
            ProductColumn::StockQuantity,
            Expr::col(ProductColumn::StockQuantity).sub(line.quantity),
        )
        .col_expr(ProductColumn::UpdatedAt, Expr::value(Utc::now()))
        .filter(ProductColumn::Id.eq(line.product_id))
        .filter(ProductColumn::IsActive.eq(true))
        .filter(ProductColumn::StockQuantity.gte(line.quantity))
        .exec(txn)
        .await?;

    if result.rows_affected == 1 {
        return Ok(());
    }

    let product = Product::find_by_id(line.product_id).one(txn).await?;
    Err(match product {
        Some(p) if p.is_active => ServiceError::InsufficientStock {
            product_id: p.id,
            requested: line.quantity,
            available: p.stock_quantity,
        },
        _ => ServiceError::ProductUnavailable {
            product_id: line.product_id,
        },
    })
}

async fn restore_stock(txn: &DatabaseTransaction, order_id: Uuid) -> Result<(), ServiceError> {
    let items = OrderItem::find()
        .filter(OrderItemColumn::OrderId.eq(order_id))
        .all(txn)
        .await?;

    for item in items {
        let result = Product::update_many()
            .col_expr(
                ProductColumn::StockQuantity,
                Expr::col(ProductColumn::StockQuantity).add(item.quantity),
            )
            .col_expr(ProductColumn::UpdatedAt, Expr::value(Utc::now()))
            .filter(ProductColumn::Id.eq(item.product_id))
            .exec(txn)
            .await?;
        if result.rows_affected != 1 {
            return Err(ServiceError::integrity(format!(
                "cannot restore stock for product {} of order {}",
                item.product_id, order_id
            )));
        }
    }
    Ok(())
}
