use crate::{
    entities::coupon::{self, normalize_code, Column as CouponColumn, DiscountType, Entity as Coupon},
    errors::ServiceError,
    services::validate_non_negative_amount,
};
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{
    sea_query::{Condition, Expr},
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Why a coupon could not be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CouponRejection {
    Unknown,
    Inactive,
    Expired,
    LimitReached,
    BelowMinimum,
}

impl CouponRejection {
    pub fn as_str(self) -> &'static str {
        match self {
            CouponRejection::Unknown => "unknown code",
            CouponRejection::Inactive => "inactive",
            CouponRejection::Expired => "expired",
            CouponRejection::LimitReached => "limit reached",
            CouponRejection::BelowMinimum => "below minimum",
        }
    }
}

impl std::fmt::Display for CouponRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<CouponRejection> for ServiceError {
    fn from(reason: CouponRejection) -> Self {
        ServiceError::InvalidCoupon {
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CouponEvaluation {
    pub valid: bool,
    pub discount: Decimal,
    pub reason: Option<CouponRejection>,
}

impl CouponEvaluation {
    fn rejected(reason: CouponRejection) -> Self {
        Self {
            valid: false,
            discount: Decimal::ZERO,
            reason: Some(reason),
        }
    }

    /// Converts a rejection into `InvalidCoupon`, returning the discount otherwise.
    pub fn into_discount(self) -> Result<Decimal, ServiceError> {
        match self.reason {
            Some(reason) => Err(reason.into()),
            None => Ok(self.discount),
        }
    }
}

/// Computes the discount a coupon grants on `subtotal` at `now`.
///
/// Rules run in order and the first failure wins: inactive, outside the
/// validity window, usage limit reached, subtotal below the minimum. The
/// discount is rounded to cents and never exceeds the subtotal, so a total
/// can never go negative. Pure: usage counts are only touched by
/// [`CouponService::redeem_in_txn`].
pub fn evaluate(coupon: &coupon::Model, subtotal: Decimal, now: DateTime<Utc>) -> CouponEvaluation {
    if !coupon.is_active {
        return CouponEvaluation::rejected(CouponRejection::Inactive);
    }
    let not_started = now < coupon.valid_from;
    let ended = coupon.valid_until.map_or(false, |until| now > until);
    if not_started || ended {
        return CouponEvaluation::rejected(CouponRejection::Expired);
    }
    if let Some(limit) = coupon.usage_limit {
        if coupon.used_count >= limit {
            return CouponEvaluation::rejected(CouponRejection::LimitReached);
        }
    }
    if subtotal < coupon.min_purchase_amount {
        return CouponEvaluation::rejected(CouponRejection::BelowMinimum);
    }

    let raw = match coupon.discount_type {
        DiscountType::Percentage => {
            let discount = subtotal * coupon.discount_value / Decimal::ONE_HUNDRED;
            match coupon.max_discount_amount {
                Some(cap) => discount.min(cap),
                None => discount,
            }
        }
        DiscountType::Fixed => coupon.discount_value,
    };

    let discount = raw
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
        .max(Decimal::ZERO)
        .min(subtotal);

    CouponEvaluation {
        valid: true,
        discount,
        reason: None,
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateCouponInput {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
    pub discount_type: DiscountType,
    #[validate(custom = "validate_non_negative_amount")]
    pub discount_value: Decimal,
    #[serde(default)]
    #[validate(custom = "validate_non_negative_amount")]
    pub min_purchase_amount: Decimal,
    #[validate(custom = "validate_non_negative_amount")]
    pub max_discount_amount: Option<Decimal>,
    #[validate(range(min = 1))]
    pub usage_limit: Option<i32>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
}

pub struct CouponService {
    db: Arc<DatabaseConnection>,
}

impl CouponService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(code = %input.code))]
    pub async fn create_coupon(&self, input: CreateCouponInput) -> Result<coupon::Model, ServiceError> {
        input.validate()?;
        let code = normalize_code(&input.code);
        if code.is_empty() {
            return Err(ServiceError::invalid_field("code", "length", "code must not be blank"));
        }
        if input.discount_type == DiscountType::Percentage && input.discount_value > Decimal::ONE_HUNDRED {
            return Err(ServiceError::invalid_field(
                "discount_value",
                "range",
                "percentage discounts cannot exceed 100",
            ));
        }
        if let Some(until) = input.valid_until {
            if until <= input.valid_from {
                return Err(ServiceError::invalid_field(
                    "valid_until",
                    "range",
                    "valid_until must be after valid_from",
                ));
            }
        }

        let now = Utc::now();
        let coupon = coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code),
            discount_type: Set(input.discount_type),
            discount_value: Set(input.discount_value),
            min_purchase_amount: Set(input.min_purchase_amount),
            max_discount_amount: Set(input.max_discount_amount),
            usage_limit: Set(input.usage_limit),
            used_count: Set(0),
            valid_from: Set(input.valid_from),
            valid_until: Set(input.valid_until),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .map_err(ServiceError::from_db_err)?;

        info!(coupon_id = %coupon.id, code = %coupon.code, "Created coupon");
        Ok(coupon)
    }

    /// Case-insensitive lookup.
    pub async fn find_by_code(&self, code: &str) -> Result<Option<coupon::Model>, ServiceError> {
        find_by_code_on(&*self.db, code).await
    }

    #[instrument(skip(self))]
    pub async fn deactivate(&self, code: &str) -> Result<coupon::Model, ServiceError> {
        let coupon = self
            .find_by_code(code)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Coupon {} not found", normalize_code(code))))?;

        let mut active: coupon::ActiveModel = coupon.into();
        active.is_active = Set(false);
        active.updated_at = Set(Utc::now());
        Ok(active.update(&*self.db).await?)
    }

    /// Evaluates a code against a subtotal without redeeming it.
    #[instrument(skip(self))]
    pub async fn preview(&self, code: &str, subtotal: Decimal) -> Result<CouponEvaluation, ServiceError> {
        match self.find_by_code(code).await? {
            Some(coupon) => Ok(evaluate(&coupon, subtotal, Utc::now())),
            None => Ok(CouponEvaluation::rejected(CouponRejection::Unknown)),
        }
    }

    /// Consumes one use inside the caller's transaction. The usage limit is
    /// re-checked by the UPDATE itself, so concurrent checkouts cannot jointly
    /// exceed it.
    pub async fn redeem_in_txn<C: ConnectionTrait>(conn: &C, coupon_id: Uuid) -> Result<(), ServiceError> {
        let result = Coupon::update_many()
            .col_expr(CouponColumn::UsedCount, Expr::col(CouponColumn::UsedCount).add(1))
            .col_expr(CouponColumn::UpdatedAt, Expr::value(Utc::now()))
            .filter(CouponColumn::Id.eq(coupon_id))
            .filter(CouponColumn::IsActive.eq(true))
            .filter(
                Condition::any()
                    .add(CouponColumn::UsageLimit.is_null())
                    .add(Expr::col(CouponColumn::UsedCount).lt(Expr::col(CouponColumn::UsageLimit))),
            )
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            warn!(%coupon_id, "Coupon redemption lost the race for its last use");
            return Err(CouponRejection::LimitReached.into());
        }
        debug!(%coupon_id, "Coupon redeemed");
        Ok(())
    }
}

pub(crate) async fn find_by_code_on<C: ConnectionTrait>(
    conn: &C,
    code: &str,
) -> Result<Option<coupon::Model>, ServiceError> {
    Ok(Coupon::find()
        .filter(CouponColumn::Code.eq(normalize_code(code)))
        .one(conn)
        .await?)
}
