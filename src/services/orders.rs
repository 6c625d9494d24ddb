use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    config::{AppConfig, ShippingConfig},
    entities::{
        cart_item,
        order::{self, Entity as OrderEntity, OrderStatus, PaymentStatus as OrderPaymentStatus, ShippingMethod},
        order_item::{self, Entity as OrderItemEntity},
        payment::{self, Entity as PaymentEntity, PaymentMethod, PaymentStatus},
        payment_callback,
    },
    errors::{is_unique_violation, ServiceError},
    events::{Event, EventSender},
    services::{
        coupons::{CouponQuote, CouponService},
        order_status::{
            apply_payment_status, check_cancellable, check_order_transition, payment_status_for,
            stamp_status, PaymentUpdate,
        },
        Actor, Page, Paged,
    },
};

/// Where the ordered items came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OrderSource {
    /// Checkout of the shopper's cart; ordered lines are removed from it.
    #[default]
    Cart,
    BuyNow,
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct OrderItemInput {
    pub product_id: String,
    /// Cart line variant; only that line is removed on cart checkout.
    #[serde(default)]
    pub product_variant_id: Option<String>,
    pub name: String,
    /// Unit price in VND
    pub price: i64,
    pub quantity: i32,
    pub image: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateOrderRequest {
    #[serde(default)]
    pub items: Vec<OrderItemInput>,

    #[validate(length(max = 255))]
    pub customer_name: Option<String>,
    #[validate(length(max = 32))]
    pub customer_phone: Option<String>,
    #[validate(email)]
    pub customer_email: Option<String>,
    #[validate(length(max = 500))]
    pub shipping_address: Option<String>,
    pub shipping_ward: Option<String>,
    pub shipping_district: Option<String>,
    pub shipping_province: Option<String>,

    /// Optional client-side totals; verified against the server computation.
    pub subtotal: Option<i64>,
    pub shipping_fee: Option<i64>,
    pub discount_amount: Option<i64>,
    pub tax: Option<i64>,
    pub total_price: Option<i64>,

    #[serde(default)]
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub shipping_method: ShippingMethod,
    #[validate(length(max = 1000))]
    pub customer_note: Option<String>,
    pub coupon_code: Option<String>,
    #[serde(default)]
    pub source: OrderSource,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct UpdateOrderStatusRequest {
    pub status: Option<OrderStatus>,
    pub payment_status: Option<OrderPaymentStatus>,
    #[validate(length(max = 1000))]
    pub admin_note: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CancelOrderRequest {
    #[validate(length(max = 1000))]
    pub cancel_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct UpdateOrderInfoRequest {
    #[validate(length(min = 1, max = 255))]
    pub customer_name: Option<String>,
    #[validate(length(min = 1, max = 32))]
    pub customer_phone: Option<String>,
    #[validate(email)]
    pub customer_email: Option<String>,
    #[validate(length(min = 1, max = 500))]
    pub shipping_address: Option<String>,
    pub shipping_ward: Option<String>,
    pub shipping_district: Option<String>,
    pub shipping_province: Option<String>,
    #[validate(length(max = 1000))]
    pub customer_note: Option<String>,
}

/// Admin-side filters for listing orders.
#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub user_id: Option<Uuid>,
    pub status: Option<OrderStatus>,
}

/// An order with its line items in submission order.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct OrderWithItems {
    #[serde(flatten)]
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

/// Server-side order totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderTotals {
    pub subtotal: i64,
    pub shipping_fee: i64,
    /// Subtotal discount plus shipping discount
    pub discount_amount: i64,
    pub tax: i64,
    pub total_price: i64,
}

impl OrderTotals {
    pub fn compute(
        subtotal: i64,
        shipping_fee: i64,
        quote: Option<&CouponQuote>,
        tax_rate: Decimal,
    ) -> Self {
        let subtotal_discount = quote.map(|q| q.discount_amount).unwrap_or(0);
        let shipping_discount = quote.map(|q| q.shipping_discount).unwrap_or(0);
        let taxable = (subtotal - subtotal_discount).max(0);
        let tax = (Decimal::from(taxable) * tax_rate)
            .floor()
            .to_i64()
            .unwrap_or(0);
        let discount_amount = subtotal_discount + shipping_discount;
        Self {
            subtotal,
            shipping_fee,
            discount_amount,
            tax,
            total_price: (subtotal - discount_amount + shipping_fee + tax).max(0),
        }
    }

    /// Rejects any client-sent total that differs from ours.
    fn verify_client(&self, request: &CreateOrderRequest) -> Result<(), ServiceError> {
        let pairs = [
            ("subtotal", request.subtotal, self.subtotal),
            ("shipping_fee", request.shipping_fee, self.shipping_fee),
            ("discount_amount", request.discount_amount, self.discount_amount),
            ("tax", request.tax, self.tax),
            ("total_price", request.total_price, self.total_price),
        ];
        for (field, sent, expected) in pairs {
            if let Some(sent) = sent {
                if sent != expected {
                    return Err(ServiceError::ValidationError(format!(
                        "{} mismatch: expected {}, got {}",
                        field, expected, sent
                    )));
                }
            }
        }
        Ok(())
    }
}

/// `ORD` + UTC date + four random digits.
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let suffix: u16 = rand::thread_rng().gen_range(1000..=9999);
    format!("ORD{}{}", now.format("%Y%m%d"), suffix)
}

pub type OrderNumberGenerator = Arc<dyn Fn(DateTime<Utc>) -> String + Send + Sync>;

fn required(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn subtotal_of(items: &[OrderItemInput]) -> Result<i64, ServiceError> {
    let mut subtotal: i64 = 0;
    for (idx, item) in items.iter().enumerate() {
        if item.product_id.trim().is_empty() || item.name.trim().is_empty() {
            return Err(ServiceError::ValidationError(format!(
                "items[{}]: product_id and name are required",
                idx
            )));
        }
        if item.price < 0 {
            return Err(ServiceError::ValidationError(format!(
                "items[{}]: price must be >= 0",
                idx
            )));
        }
        if item.quantity < 1 {
            return Err(ServiceError::ValidationError(format!(
                "items[{}]: quantity must be >= 1",
                idx
            )));
        }
        subtotal = item
            .price
            .checked_mul(i64::from(item.quantity))
            .and_then(|line| subtotal.checked_add(line))
            .ok_or_else(|| ServiceError::ValidationError("order subtotal is too large".into()))?;
    }
    Ok(subtotal)
}

#[derive(Debug, Clone)]
struct OrderSettings {
    shipping: ShippingConfig,
    tax_rate: Decimal,
    currency: String,
    number_max_attempts: u32,
}

/// Checkout and the order lifecycle.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    coupons: CouponService,
    settings: OrderSettings,
    event_sender: Option<Arc<EventSender>>,
    order_numbers: OrderNumberGenerator,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        coupons: CouponService,
        config: &AppConfig,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db,
            coupons,
            settings: OrderSettings {
                shipping: config.shipping.clone(),
                tax_rate: config.tax_rate_decimal(),
                currency: config.currency.clone(),
                number_max_attempts: config.orders.number_max_attempts.max(1),
            },
            event_sender,
            order_numbers: Arc::new(generate_order_number),
        }
    }

    /// Replaces the order number source.
    pub fn with_order_numbers(mut self, generator: OrderNumberGenerator) -> Self {
        self.order_numbers = generator;
        self
    }

    pub fn shipping_fee_for(&self, method: ShippingMethod) -> i64 {
        match method {
            ShippingMethod::Standard => self.settings.shipping.standard_fee,
            ShippingMethod::Express => self.settings.shipping.express_fee,
        }
    }

    async fn publish(&self, events: Vec<Event>) {
        if let Some(sender) = &self.event_sender {
            sender.publish_all(events).await;
        }
    }

    async fn load_items<C: ConnectionTrait>(
        conn: &C,
        order_ids: Vec<Uuid>,
    ) -> Result<HashMap<Uuid, Vec<order_item::Model>>, ServiceError> {
        let mut grouped: HashMap<Uuid, Vec<order_item::Model>> = HashMap::new();
        if order_ids.is_empty() {
            return Ok(grouped);
        }
        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.is_in(order_ids))
            .order_by_asc(order_item::Column::Position)
            .all(conn)
            .await
            .map_err(|e| ServiceError::db("load order items", e))?;
        for item in items {
            grouped.entry(item.order_id).or_default().push(item);
        }
        Ok(grouped)
    }

    async fn with_items<C: ConnectionTrait>(
        conn: &C,
        order: order::Model,
    ) -> Result<OrderWithItems, ServiceError> {
        let mut grouped = Self::load_items(conn, vec![order.id]).await?;
        let items = grouped.remove(&order.id).unwrap_or_default();
        Ok(OrderWithItems { order, items })
    }

    async fn find_order<C: ConnectionTrait>(conn: &C, id: Uuid) -> Result<order::Model, ServiceError> {
        OrderEntity::find_by_id(id)
            .one(conn)
            .await
            .map_err(|e| ServiceError::db("find order", e))?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", id)))
    }

    /// Places an order for `user_id`.
    ///
    /// Totals are computed here; the coupon is redeemed, the COD payment
    /// created and the cart cleaned up in the same transaction as the insert.
    #[instrument(skip(self, request), fields(user_id = %user_id))]
    pub async fn create_order(
        &self,
        user_id: Uuid,
        request: CreateOrderRequest,
    ) -> Result<OrderWithItems, ServiceError> {
        if request.items.is_empty() {
            return Err(ServiceError::ValidationError("items required".into()));
        }
        let (Some(customer_name), Some(customer_phone), Some(shipping_address)) = (
            required(&request.customer_name),
            required(&request.customer_phone),
            required(&request.shipping_address),
        ) else {
            return Err(ServiceError::ValidationError(
                "recipient info required".into(),
            ));
        };
        request.validate()?;
        if request.payment_method == PaymentMethod::BankTransfer {
            return Err(ServiceError::ValidationError(
                "payment_method must be one of COD, VNPAY, MOMO".into(),
            ));
        }
        let subtotal = subtotal_of(&request.items)?;
        let shipping_fee = self.shipping_fee_for(request.shipping_method);
        let coupon_code = non_blank(request.coupon_code.clone());

        let now = Utc::now();
        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| ServiceError::db("begin order transaction", e))?;

        let quote = match &coupon_code {
            Some(code) => Some(
                self.coupons
                    .quote_with(&txn, code, subtotal, shipping_fee, Some(user_id), now)
                    .await?,
            ),
            None => None,
        };
        let totals = OrderTotals::compute(subtotal, shipping_fee, quote.as_ref(), self.settings.tax_rate);
        totals.verify_client(&request)?;

        let order_id = Uuid::new_v4();
        let payment_id = (request.payment_method == PaymentMethod::Cod).then(Uuid::new_v4);

        let template = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(String::new()),
            user_id: Set(user_id),
            customer_name: Set(customer_name),
            customer_phone: Set(customer_phone),
            customer_email: Set(non_blank(request.customer_email.clone())),
            shipping_address: Set(shipping_address),
            shipping_ward: Set(non_blank(request.shipping_ward.clone())),
            shipping_district: Set(non_blank(request.shipping_district.clone())),
            shipping_province: Set(non_blank(request.shipping_province.clone())),
            subtotal: Set(totals.subtotal),
            shipping_fee: Set(totals.shipping_fee),
            discount_amount: Set(totals.discount_amount),
            tax: Set(totals.tax),
            total_price: Set(totals.total_price),
            status: Set(OrderStatus::Pending),
            payment_status: Set(OrderPaymentStatus::Pending),
            payment_method: Set(request.payment_method),
            shipping_method: Set(request.shipping_method),
            coupon_code: Set(quote.as_ref().map(|q| q.code.clone())),
            payment_id: Set(payment_id),
            customer_note: Set(non_blank(request.customer_note.clone())),
            admin_note: Set(None),
            cancel_reason: Set(None),
            confirmed_at: Set(None),
            shipped_at: Set(None),
            delivered_at: Set(None),
            cancelled_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let mut created = None;
        for attempt in 1..=self.settings.number_max_attempts {
            let mut candidate = template.clone();
            candidate.order_number = Set((self.order_numbers)(now));

            // Savepoint so a collision does not poison the outer transaction.
            let savepoint = txn
                .begin()
                .await
                .map_err(|e| ServiceError::db("begin savepoint", e))?;
            match candidate.insert(&savepoint).await {
                Ok(model) => {
                    savepoint
                        .commit()
                        .await
                        .map_err(|e| ServiceError::db("release savepoint", e))?;
                    created = Some(model);
                    break;
                }
                Err(e) if is_unique_violation(&e) => {
                    warn!(attempt, "order number collision, retrying");
                    savepoint
                        .rollback()
                        .await
                        .map_err(|e| ServiceError::db("rollback savepoint", e))?;
                }
                Err(e) => return Err(ServiceError::db("insert order", e)),
            }
        }
        let Some(order) = created else {
            return Err(ServiceError::Conflict(
                "could not allocate a unique order number".into(),
            ));
        };

        let mut items = Vec::with_capacity(request.items.len());
        for (position, item) in request.items.iter().enumerate() {
            let model = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order.id),
                position: Set(position as i32),
                product_id: Set(item.product_id.trim().to_string()),
                product_variant_id: Set(item.product_variant_id.clone()),
                name: Set(item.name.trim().to_string()),
                price: Set(item.price),
                quantity: Set(item.quantity),
                image: Set(non_blank(item.image.clone())),
            }
            .insert(&txn)
            .await
            .map_err(|e| ServiceError::db("insert order item", e))?;
            items.push(model);
        }

        if let Some(quote) = &quote {
            self.coupons.redeem(&txn, quote, user_id, order.id).await?;
        }

        if let Some(payment_id) = payment_id {
            payment::ActiveModel {
                id: Set(payment_id),
                order_id: Set(order.id),
                user_id: Set(user_id),
                method: Set(PaymentMethod::Cod),
                amount: Set(order.total_price),
                currency: Set(self.settings.currency.clone()),
                status: Set(PaymentStatus::Pending),
                transaction_id: Set(None),
                request_id: Set(None),
                gateway_response: Set(None),
                paid_at: Set(None),
                refunded_at: Set(None),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&txn)
            .await
            .map_err(|e| ServiceError::db("insert COD payment", e))?;
        }

        if request.source == OrderSource::Cart {
            let ordered_lines = items.iter().fold(Condition::any(), |any, item| {
                let variant = match &item.product_variant_id {
                    Some(v) => cart_item::Column::ProductVariantId.eq(v.clone()),
                    None => cart_item::Column::ProductVariantId.is_null(),
                };
                any.add(
                    Condition::all()
                        .add(cart_item::Column::ProductId.eq(item.product_id.clone()))
                        .add(variant),
                )
            });
            cart_item::Entity::delete_many()
                .filter(cart_item::Column::UserId.eq(user_id))
                .filter(ordered_lines)
                .exec(&txn)
                .await
                .map_err(|e| ServiceError::db("clear ordered cart lines", e))?;
        }

        txn.commit()
            .await
            .map_err(|e| ServiceError::db("commit order transaction", e))?;

        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            total_price = order.total_price,
            coupon_code = order.coupon_code.as_deref().unwrap_or(""),
            "order created"
        );

        let mut events = vec![Event::OrderCreated {
            order_id: order.id,
            order_number: order.order_number.clone(),
            total_price: order.total_price,
        }];
        if let Some(quote) = &quote {
            events.push(Event::CouponRedeemed {
                coupon_code: quote.code.clone(),
                order_id: order.id,
                discount_amount: order.discount_amount,
            });
        }
        self.publish(events).await;

        Ok(OrderWithItems { order, items })
    }

    /// Shoppers see their own orders; admins see all, optionally filtered.
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        actor: Actor,
        filter: OrderFilter,
        page: Page,
    ) -> Result<Paged<OrderWithItems>, ServiceError> {
        let db = &*self.db;
        let mut query = OrderEntity::find().order_by_desc(order::Column::CreatedAt);

        let user_scope = if actor.is_admin {
            filter.user_id
        } else {
            Some(actor.user_id)
        };
        if let Some(user_id) = user_scope {
            query = query.filter(order::Column::UserId.eq(user_id));
        }
        if let Some(status) = filter.status {
            query = query.filter(order::Column::Status.eq(status));
        }

        let paginator = query.paginate(db, page.limit);
        let total = paginator
            .num_items()
            .await
            .map_err(|e| ServiceError::db("count orders", e))?;
        let orders = paginator
            .fetch_page(page.index())
            .await
            .map_err(|e| ServiceError::db("fetch orders page", e))?;

        let mut grouped = Self::load_items(db, orders.iter().map(|o| o.id).collect()).await?;
        let items = orders
            .into_iter()
            .map(|order| {
                let items = grouped.remove(&order.id).unwrap_or_default();
                OrderWithItems { order, items }
            })
            .collect();

        Ok(Paged {
            items,
            total,
            page: page.page,
            limit: page.limit,
        })
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_order(&self, actor: Actor, order_id: Uuid) -> Result<OrderWithItems, ServiceError> {
        let db = &*self.db;
        let order = Self::find_order(db, order_id).await?;
        if !actor.can_access(order.user_id) {
            return Err(ServiceError::Forbidden(
                "You do not have access to this order".into(),
            ));
        }
        Self::with_items(db, order).await
    }

    /// Admin update of status, payment status and admin note.
    #[instrument(skip(self, request), fields(order_id = %order_id))]
    pub async fn update_order_status(
        &self,
        actor: Actor,
        order_id: Uuid,
        request: UpdateOrderStatusRequest,
    ) -> Result<OrderWithItems, ServiceError> {
        if !actor.is_admin {
            return Err(ServiceError::Forbidden("Admin role required".into()));
        }
        request.validate()?;

        let now = Utc::now();
        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| ServiceError::db("begin status transaction", e))?;
        let mut order = Self::find_order(&txn, order_id).await?;
        let old_status = order.status;
        let mut cancelled = false;

        let status_change = request.status.filter(|s| *s != order.status);
        if status_change.is_some() || request.admin_note.is_some() {
            let mut active: order::ActiveModel = order.clone().into();
            if let Some(status) = status_change {
                check_order_transition(order.status, status)?;
                stamp_status(&mut active, status, now);
                cancelled = status == OrderStatus::Cancelled;
            }
            if let Some(note) = request.admin_note.clone() {
                active.admin_note = Set(Some(note));
            }
            order = active
                .update(&txn)
                .await
                .map_err(|e| ServiceError::db("update order status", e))?;
        }

        if cancelled {
            self.coupons.release(&txn, order.id).await?;
        }

        if let Some(payment_status) = request.payment_status {
            let payment = PaymentEntity::find()
                .filter(payment::Column::OrderId.eq(order.id))
                .one(&txn)
                .await
                .map_err(|e| ServiceError::db("find order payment", e))?;
            let (updated, _) = apply_payment_status(
                &txn,
                order,
                payment,
                PaymentUpdate::to(payment_status_for(payment_status)),
                now,
            )
            .await?;
            order = updated;
        }

        let result = Self::with_items(&txn, order).await?;
        txn.commit()
            .await
            .map_err(|e| ServiceError::db("commit status transaction", e))?;

        info!(
            order_id = %order_id,
            old_status = %old_status,
            new_status = %result.order.status,
            payment_status = %result.order.payment_status,
            "order status updated"
        );

        let mut events = vec![Event::OrderStatusChanged {
            order_id,
            status: result.order.status,
            payment_status: result.order.payment_status,
        }];
        if cancelled {
            events.push(Event::OrderCancelled {
                order_id,
                reason: None,
            });
        }
        self.publish(events).await;

        Ok(result)
    }

    /// Cancels a pending order, giving back any redeemed coupon.
    #[instrument(skip(self, request), fields(order_id = %order_id))]
    pub async fn cancel_order(
        &self,
        actor: Actor,
        order_id: Uuid,
        request: CancelOrderRequest,
    ) -> Result<OrderWithItems, ServiceError> {
        request.validate()?;
        let now = Utc::now();
        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| ServiceError::db("begin cancel transaction", e))?;

        let order = Self::find_order(&txn, order_id).await?;
        if !actor.can_access(order.user_id) {
            return Err(ServiceError::Forbidden(
                "You do not have access to this order".into(),
            ));
        }
        check_cancellable(order.status)?;

        let reason = non_blank(request.cancel_reason);
        let mut active: order::ActiveModel = order.into();
        stamp_status(&mut active, OrderStatus::Cancelled, now);
        active.cancel_reason = Set(reason.clone());
        let order = active
            .update(&txn)
            .await
            .map_err(|e| ServiceError::db("cancel order", e))?;

        self.coupons.release(&txn, order.id).await?;

        let result = Self::with_items(&txn, order).await?;
        txn.commit()
            .await
            .map_err(|e| ServiceError::db("commit cancel transaction", e))?;

        info!(order_id = %order_id, "order cancelled");
        self.publish(vec![Event::OrderCancelled { order_id, reason }])
            .await;

        Ok(result)
    }

    /// Owner edit of recipient details while the order is still pending.
    #[instrument(skip(self, request), fields(order_id = %order_id))]
    pub async fn update_order_info(
        &self,
        actor: Actor,
        order_id: Uuid,
        request: UpdateOrderInfoRequest,
    ) -> Result<OrderWithItems, ServiceError> {
        request.validate()?;
        let db = &*self.db;
        let order = Self::find_order(db, order_id).await?;
        if order.user_id != actor.user_id {
            return Err(ServiceError::Forbidden(
                "Only the order owner can edit recipient info".into(),
            ));
        }
        if order.status != OrderStatus::Pending {
            return Err(ServiceError::InvalidTransition(format!(
                "recipient info can only be changed while pending (order is {})",
                order.status
            )));
        }

        let mut active: order::ActiveModel = order.into();
        if let Some(name) = non_blank(request.customer_name) {
            active.customer_name = Set(name);
        }
        if let Some(phone) = non_blank(request.customer_phone) {
            active.customer_phone = Set(phone);
        }
        if let Some(email) = non_blank(request.customer_email) {
            active.customer_email = Set(Some(email));
        }
        if let Some(address) = non_blank(request.shipping_address) {
            active.shipping_address = Set(address);
        }
        if let Some(ward) = request.shipping_ward {
            active.shipping_ward = Set(non_blank(Some(ward)));
        }
        if let Some(district) = request.shipping_district {
            active.shipping_district = Set(non_blank(Some(district)));
        }
        if let Some(province) = request.shipping_province {
            active.shipping_province = Set(non_blank(Some(province)));
        }
        if let Some(note) = request.customer_note {
            active.customer_note = Set(non_blank(Some(note)));
        }

        let order = active
            .update(db)
            .await
            .map_err(|e| ServiceError::db("update order info", e))?;
        info!(order_id = %order_id, "order recipient info updated");
        Self::with_items(db, order).await
    }

    /// Hard delete with items, payment and callback ledger (admin).
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn delete_order(&self, actor: Actor, order_id: Uuid) -> Result<(), ServiceError> {
        if !actor.is_admin {
            return Err(ServiceError::Forbidden("Admin role required".into()));
        }
        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| ServiceError::db("begin delete transaction", e))?;
        let order = Self::find_order(&txn, order_id).await?;

        self.coupons.release(&txn, order.id).await?;
        payment_callback::Entity::delete_many()
            .filter(payment_callback::Column::OrderId.eq(order.id))
            .exec(&txn)
            .await
            .map_err(|e| ServiceError::db("delete payment callbacks", e))?;
        PaymentEntity::delete_many()
            .filter(payment::Column::OrderId.eq(order.id))
            .exec(&txn)
            .await
            .map_err(|e| ServiceError::db("delete payments", e))?;
        OrderItemEntity::delete_many()
            .filter(order_item::Column::OrderId.eq(order.id))
            .exec(&txn)
            .await
            .map_err(|e| ServiceError::db("delete order items", e))?;
        OrderEntity::delete_by_id(order.id)
            .exec(&txn)
            .await
            .map_err(|e| ServiceError::db("delete order", e))?;

        txn.commit()
            .await
            .map_err(|e| ServiceError::db("commit delete transaction", e))?;

        info!(order_id = %order_id, order_number = %order.order_number, "order deleted");
        self.publish(vec![Event::OrderDeleted(order_id)]).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::coupon::DiscountType;
    use rust_decimal_macros::dec;

    fn quote(discount: i64, shipping_discount: i64) -> CouponQuote {
        CouponQuote {
            coupon_id: Uuid::new_v4(),
            code: "X".into(),
            discount_type: DiscountType::Fixed,
            discount_amount: discount,
            total_after_discount: 0,
            shipping_discount,
        }
    }

    #[test]
    fn order_number_format() {
        let now = DateTime::parse_from_rfc3339("2024-03-05T23:59:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let number = generate_order_number(now);
        assert!(number.starts_with("ORD20240305"));
        assert_eq!(number.len(), 15);
        let suffix: u32 = number[11..].parse().unwrap();
        assert!((1000..=9999).contains(&suffix));
    }

    #[test]
    fn totals_hold_the_invariant() {
        let totals = OrderTotals::compute(200_000, 30_000, Some(&quote(50_000, 0)), dec!(0.1));
        assert_eq!(totals.tax, 15_000);
        assert_eq!(totals.discount_amount, 50_000);
        assert_eq!(
            totals.total_price,
            totals.subtotal - totals.discount_amount + totals.shipping_fee + totals.tax
        );
        assert_eq!(totals.total_price, 195_000);
    }

    #[test]
    fn shipping_discount_is_folded_into_discount_amount() {
        let totals = OrderTotals::compute(100_000, 30_000, Some(&quote(0, 30_000)), Decimal::ZERO);
        assert_eq!(totals.discount_amount, 30_000);
        assert_eq!(totals.total_price, 100_000);
    }

    #[test]
    fn tax_is_floored() {
        let totals = OrderTotals::compute(99_999, 0, None, dec!(0.08));
        assert_eq!(totals.tax, 7_999);
    }

    #[test]
    fn client_total_mismatch_names_the_field() {
        let totals = OrderTotals::compute(100_000, 0, None, Decimal::ZERO);
        let request = CreateOrderRequest {
            total_price: Some(1),
            ..Default::default()
        };
        let err = totals.verify_client(&request).unwrap_err();
        assert!(err.to_string().contains("total_price"));
    }

    #[test]
    fn item_checks() {
        let item = |price, quantity| OrderItemInput {
            product_id: "p1".into(),
            product_variant_id: None,
            name: "Tea".into(),
            price,
            quantity,
            image: None,
        };
        assert_eq!(subtotal_of(&[item(10_000, 2), item(5_000, 1)]).unwrap(), 25_000);
        assert!(subtotal_of(&[item(-1, 1)]).is_err());
        assert!(subtotal_of(&[item(1, 0)]).is_err());
        assert!(subtotal_of(&[item(i64::MAX, 2)]).is_err());
    }
}
