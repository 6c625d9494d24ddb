use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait,
    DatabaseConnection, EntityTrait, ModelTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    config::FreeShippingPolicy,
    entities::{
        coupon::{self, normalize_code, DiscountType, Entity as CouponEntity},
        coupon_redemption::{self, Entity as RedemptionEntity},
    },
    errors::{is_unique_violation, CouponRejection, ServiceError},
    services::Actor,
};

/// Result of applying a coupon to a subtotal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CouponQuote {
    pub coupon_id: Uuid,
    pub code: String,
    pub discount_type: DiscountType,
    /// Discount taken off the subtotal
    pub discount_amount: i64,
    /// `max(0, subtotal - discount_amount)`
    pub total_after_discount: i64,
    /// Discount taken off the shipping fee (free_shipping coupons only)
    pub shipping_discount: i64,
}

fn floor_percent(amount: i64, percent: i64) -> i64 {
    (Decimal::from(amount) * Decimal::from(percent) / Decimal::from(100))
        .floor()
        .to_i64()
        .unwrap_or(0)
}

/// Checks a coupon against the order and computes its discount.
///
/// Checks run in a fixed order: active, validity window, order minimum,
/// total usage cap. The per-customer cap needs the redemption table and is
/// checked by [`CouponService::quote_with`].
pub fn evaluate(
    coupon: &coupon::Model,
    subtotal: i64,
    shipping_fee: i64,
    now: DateTime<Utc>,
    policy: FreeShippingPolicy,
) -> Result<CouponQuote, CouponRejection> {
    if !coupon.is_active {
        return Err(CouponRejection::NotFound(coupon.code.clone()));
    }
    if now < coupon.valid_from || now > coupon.valid_until {
        return Err(CouponRejection::Expired(coupon.code.clone()));
    }
    if subtotal < coupon.min_order_value {
        return Err(CouponRejection::MinOrderNotMet {
            minimum: coupon.min_order_value,
            subtotal,
        });
    }
    if let Some(max) = coupon.max_total_uses {
        if coupon.current_uses >= max {
            return Err(CouponRejection::UsageLimitReached(coupon.code.clone()));
        }
    }

    let subtotal = subtotal.max(0);
    let shipping_fee = shipping_fee.max(0);
    let value = coupon.discount_value.max(0);

    let (discount_amount, shipping_discount) = match coupon.discount_type {
        DiscountType::Percentage => {
            let mut discount = floor_percent(subtotal, value);
            if let Some(cap) = coupon.max_discount_amount {
                discount = discount.min(cap.max(0));
            }
            (discount.min(subtotal), 0)
        }
        DiscountType::Fixed => (value.min(subtotal), 0),
        DiscountType::FreeShipping => {
            let waived = match policy {
                FreeShippingPolicy::CapAtValue if value > 0 => value.min(shipping_fee),
                _ => shipping_fee,
            };
            (0, waived)
        }
    };

    Ok(CouponQuote {
        coupon_id: coupon.id,
        code: coupon.code.clone(),
        discount_type: coupon.discount_type,
        discount_amount,
        total_after_discount: (subtotal - discount_amount).max(0),
        shipping_discount,
    })
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct ApplyCouponRequest {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
    #[validate(range(min = 0))]
    pub subtotal: i64,
    #[validate(range(min = 0))]
    pub shipping_fee: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateCouponRequest {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub description: Option<String>,
    pub discount_type: DiscountType,
    #[validate(range(min = 0))]
    pub discount_value: i64,
    #[validate(range(min = 0))]
    pub max_discount_amount: Option<i64>,
    #[validate(range(min = 0))]
    #[serde(default)]
    pub min_order_value: i64,
    #[validate(range(min = 1))]
    pub max_total_uses: Option<i32>,
    #[validate(range(min = 1))]
    #[serde(default = "default_max_uses_per_user")]
    pub max_uses_per_user: i32,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "default_true")]
    pub is_public: bool,
}

fn default_max_uses_per_user() -> i32 {
    1
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct UpdateCouponRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    pub description: Option<String>,
    pub discount_type: Option<DiscountType>,
    #[validate(range(min = 0))]
    pub discount_value: Option<i64>,
    #[validate(range(min = 0))]
    pub max_discount_amount: Option<i64>,
    #[validate(range(min = 0))]
    pub min_order_value: Option<i64>,
    #[validate(range(min = 1))]
    pub max_total_uses: Option<i32>,
    #[validate(range(min = 1))]
    pub max_uses_per_user: Option<i32>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub is_active: Option<bool>,
    pub is_public: Option<bool>,
}

fn check_coupon_shape(
    discount_type: DiscountType,
    discount_value: i64,
    valid_from: DateTime<Utc>,
    valid_until: DateTime<Utc>,
) -> Result<(), ServiceError> {
    if discount_type == DiscountType::Percentage && discount_value > 100 {
        return Err(ServiceError::ValidationError(
            "percentage discount_value must be between 0 and 100".into(),
        ));
    }
    if valid_until <= valid_from {
        return Err(ServiceError::ValidationError(
            "valid_until must be after valid_from".into(),
        ));
    }
    Ok(())
}

/// Coupon administration, evaluation and redemption.
#[derive(Clone)]
pub struct CouponService {
    db: Arc<DatabaseConnection>,
    policy: FreeShippingPolicy,
}

impl CouponService {
    pub fn new(db: Arc<DatabaseConnection>, policy: FreeShippingPolicy) -> Self {
        Self { db, policy }
    }

    pub fn policy(&self) -> FreeShippingPolicy {
        self.policy
    }

    /// Quotes a coupon for the given subtotal without redeeming it.
    #[instrument(skip(self), fields(coupon_code = %code))]
    pub async fn quote(
        &self,
        code: &str,
        subtotal: i64,
        shipping_fee: i64,
        user_id: Option<Uuid>,
    ) -> Result<CouponQuote, ServiceError> {
        self.quote_with(&*self.db, code, subtotal, shipping_fee, user_id, Utc::now())
            .await
    }

    /// Quotes a coupon on an existing connection or transaction.
    pub async fn quote_with<C>(
        &self,
        conn: &C,
        code: &str,
        subtotal: i64,
        shipping_fee: i64,
        user_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<CouponQuote, ServiceError>
    where
        C: ConnectionTrait,
    {
        let code = normalize_code(code);
        let coupon = CouponEntity::find()
            .filter(coupon::Column::Code.eq(code.clone()))
            .one(conn)
            .await
            .map_err(|e| ServiceError::db("find coupon", e))?
            .ok_or_else(|| CouponRejection::NotFound(code.clone()))?;

        let quote = evaluate(&coupon, subtotal, shipping_fee, now, self.policy)?;

        if let Some(user_id) = user_id {
            let used = RedemptionEntity::find()
                .filter(coupon_redemption::Column::CouponId.eq(coupon.id))
                .filter(coupon_redemption::Column::UserId.eq(user_id))
                .count(conn)
                .await
                .map_err(|e| ServiceError::db("count coupon redemptions", e))?;
            if used >= coupon.max_uses_per_user.max(0) as u64 {
                return Err(CouponRejection::PerUserLimitReached(code).into());
            }
        }

        Ok(quote)
    }

    /// Records a use of the coupon. Must run inside the order transaction.
    ///
    /// The increment is conditional so concurrent checkouts cannot push
    /// `current_uses` past `max_total_uses`.
    pub async fn redeem<C>(
        &self,
        conn: &C,
        quote: &CouponQuote,
        user_id: Uuid,
        order_id: Uuid,
    ) -> Result<(), ServiceError>
    where
        C: ConnectionTrait,
    {
        let result = CouponEntity::update_many()
            .col_expr(
                coupon::Column::CurrentUses,
                Expr::col(coupon::Column::CurrentUses).add(1),
            )
            .filter(coupon::Column::Id.eq(quote.coupon_id))
            .filter(
                Condition::any()
                    .add(coupon::Column::MaxTotalUses.is_null())
                    .add(
                        Expr::col(coupon::Column::CurrentUses)
                            .lt(Expr::col(coupon::Column::MaxTotalUses)),
                    ),
            )
            .exec(conn)
            .await
            .map_err(|e| ServiceError::db("increment coupon usage", e))?;

        if result.rows_affected == 0 {
            warn!(coupon_code = %quote.code, "coupon usage limit reached during redemption");
            return Err(CouponRejection::UsageLimitReached(quote.code.clone()).into());
        }

        coupon_redemption::ActiveModel {
            id: Set(Uuid::new_v4()),
            coupon_id: Set(quote.coupon_id),
            user_id: Set(user_id),
            order_id: Set(order_id),
            discount_amount: Set(quote.discount_amount + quote.shipping_discount),
            created_at: Set(Utc::now()),
        }
        .insert(conn)
        .await
        .map_err(|e| ServiceError::db("insert coupon redemption", e))?;

        Ok(())
    }

    /// Gives back the use recorded for `order_id`, if any.
    pub async fn release<C>(&self, conn: &C, order_id: Uuid) -> Result<bool, ServiceError>
    where
        C: ConnectionTrait,
    {
        let Some(redemption) = RedemptionEntity::find()
            .filter(coupon_redemption::Column::OrderId.eq(order_id))
            .one(conn)
            .await
            .map_err(|e| ServiceError::db("find coupon redemption", e))?
        else {
            return Ok(false);
        };

        let coupon_id = redemption.coupon_id;
        redemption
            .delete(conn)
            .await
            .map_err(|e| ServiceError::db("delete coupon redemption", e))?;

        CouponEntity::update_many()
            .col_expr(
                coupon::Column::CurrentUses,
                Expr::col(coupon::Column::CurrentUses).sub(1),
            )
            .filter(coupon::Column::Id.eq(coupon_id))
            .filter(coupon::Column::CurrentUses.gt(0))
            .exec(conn)
            .await
            .map_err(|e| ServiceError::db("decrement coupon usage", e))?;

        info!(%order_id, %coupon_id, "coupon redemption released");
        Ok(true)
    }

    /// Admins see every coupon; shoppers only active public ones.
    #[instrument(skip(self))]
    pub async fn list(&self, actor: Actor) -> Result<Vec<coupon::Model>, ServiceError> {
        let mut query = CouponEntity::find().order_by_desc(coupon::Column::CreatedAt);
        if !actor.is_admin {
            query = query
                .filter(coupon::Column::IsActive.eq(true))
                .filter(coupon::Column::IsPublic.eq(true));
        }
        query
            .all(&*self.db)
            .await
            .map_err(|e| ServiceError::db("list coupons", e))
    }

    #[instrument(skip(self))]
    pub async fn get(&self, actor: Actor, id: Uuid) -> Result<coupon::Model, ServiceError> {
        let coupon = self.find(id).await?;
        if !actor.is_admin && !(coupon.is_active && coupon.is_public) {
            return Err(ServiceError::NotFound(format!("Coupon {} not found", id)));
        }
        Ok(coupon)
    }

    async fn find(&self, id: Uuid) -> Result<coupon::Model, ServiceError> {
        CouponEntity::find_by_id(id)
            .one(&*self.db)
            .await
            .map_err(|e| ServiceError::db("find coupon", e))?
            .ok_or_else(|| ServiceError::NotFound(format!("Coupon {} not found", id)))
    }

    #[instrument(skip(self, request), fields(coupon_code = %request.code))]
    pub async fn create(&self, request: CreateCouponRequest) -> Result<coupon::Model, ServiceError> {
        request.validate()?;
        check_coupon_shape(
            request.discount_type,
            request.discount_value,
            request.valid_from,
            request.valid_until,
        )?;

        let now = Utc::now();
        let code = normalize_code(&request.code);
        let model = coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.clone()),
            name: Set(request.name),
            description: Set(request.description),
            discount_type: Set(request.discount_type),
            discount_value: Set(request.discount_value),
            max_discount_amount: Set(request.max_discount_amount),
            min_order_value: Set(request.min_order_value),
            max_total_uses: Set(request.max_total_uses),
            max_uses_per_user: Set(request.max_uses_per_user),
            current_uses: Set(0),
            valid_from: Set(request.valid_from),
            valid_until: Set(request.valid_until),
            is_active: Set(request.is_active),
            is_public: Set(request.is_public),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ServiceError::Conflict(format!("Coupon code {} already exists", code))
            } else {
                ServiceError::db("insert coupon", e)
            }
        })?;

        info!(coupon_id = %model.id, coupon_code = %model.code, "coupon created");
        Ok(model)
    }

    #[instrument(skip(self, request))]
    pub async fn update(
        &self,
        id: Uuid,
        request: UpdateCouponRequest,
    ) -> Result<coupon::Model, ServiceError> {
        request.validate()?;
        let existing = self.find(id).await?;

        check_coupon_shape(
            request.discount_type.unwrap_or(existing.discount_type),
            request.discount_value.unwrap_or(existing.discount_value),
            request.valid_from.unwrap_or(existing.valid_from),
            request.valid_until.unwrap_or(existing.valid_until),
        )?;

        let mut active: coupon::ActiveModel = existing.into();
        if let Some(name) = request.name {
            active.name = Set(name);
        }
        if let Some(description) = request.description {
            active.description = Set(Some(description));
        }
        if let Some(discount_type) = request.discount_type {
            active.discount_type = Set(discount_type);
        }
        if let Some(value) = request.discount_value {
            active.discount_value = Set(value);
        }
        if let Some(cap) = request.max_discount_amount {
            active.max_discount_amount = Set(Some(cap));
        }
        if let Some(min) = request.min_order_value {
            active.min_order_value = Set(min);
        }
        if let Some(max) = request.max_total_uses {
            active.max_total_uses = Set(Some(max));
        }
        if let Some(per_user) = request.max_uses_per_user {
            active.max_uses_per_user = Set(per_user);
        }
        if let Some(from) = request.valid_from {
            active.valid_from = Set(from);
        }
        if let Some(until) = request.valid_until {
            active.valid_until = Set(until);
        }
        if let Some(is_active) = request.is_active {
            active.is_active = Set(is_active);
        }
        if let Some(is_public) = request.is_public {
            active.is_public = Set(is_public);
        }

        active
            .update(&*self.db)
            .await
            .map_err(|e| ServiceError::db("update coupon", e))
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> Result<(), ServiceError> {
        let result = CouponEntity::delete_by_id(id)
            .exec(&*self.db)
            .await
            .map_err(|e| ServiceError::db("delete coupon", e))?;
        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!("Coupon {} not found", id)));
        }
        info!(coupon_id = %id, "coupon deleted");
        Ok(())
    }
}
