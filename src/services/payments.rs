use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{
        order::{self, Entity as OrderEntity, OrderStatus, PaymentStatus as OrderPaymentStatus},
        payment::{self, Entity as PaymentEntity, PaymentMethod, PaymentStatus},
        payment_callback,
    },
    errors::{is_unique_violation, ServiceError},
    events::{Event, EventSender},
    gateways::{PaymentGateways, PaymentIntent},
    services::{
        order_status::{apply_payment_status, check_payment_transition, PaymentUpdate},
        Actor, Page, Paged,
    },
};

/// Body of `POST /payments/momo` and `POST /payments/vnpay/create`.
#[derive(Debug, Clone, Deserialize, Serialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct InitiatePaymentRequest {
    pub order_id: Uuid,
    /// Optional; must equal the order total when sent
    pub amount: Option<i64>,
    #[validate(length(min = 1, max = 20))]
    pub bank_code: Option<String>,
    #[validate(length(min = 2, max = 5))]
    pub locale: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInitiation {
    pub payment_id: Uuid,
    pub order_id: Uuid,
    pub method: PaymentMethod,
    pub amount: i64,
    pub pay_url: String,
    pub request_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CreatePaymentRequest {
    pub order_id: Uuid,
    pub method: PaymentMethod,
    /// Defaults to the order total
    #[validate(range(min = 0))]
    pub amount: Option<i64>,
    pub status: Option<PaymentStatus>,
    #[validate(length(min = 1, max = 128))]
    pub transaction_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct UpdatePaymentRequest {
    pub status: Option<PaymentStatus>,
    #[validate(length(min = 1, max = 128))]
    pub transaction_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PaymentFilter {
    pub status: Option<PaymentStatus>,
    pub method: Option<PaymentMethod>,
    pub order_id: Option<Uuid>,
}

/// Events for a payment status change.
pub(crate) fn payment_events(before: PaymentStatus, after: &payment::Model) -> Vec<Event> {
    if before == after.status {
        return Vec::new();
    }
    match after.status {
        PaymentStatus::Success => vec![Event::PaymentSucceeded {
            payment_id: after.id,
            order_id: after.order_id,
            method: after.method,
            transaction_id: after.transaction_id.clone(),
        }],
        PaymentStatus::Failed => vec![Event::PaymentFailed {
            payment_id: after.id,
            order_id: after.order_id,
            method: after.method,
        }],
        PaymentStatus::Refunded => vec![Event::PaymentRefunded {
            payment_id: after.id,
            order_id: after.order_id,
        }],
        PaymentStatus::Pending => Vec::new(),
    }
}

/// Payment initiation through the gateways plus payment administration.
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    gateways: PaymentGateways,
    currency: String,
    event_sender: Option<Arc<EventSender>>,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateways: PaymentGateways,
        currency: String,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db,
            gateways,
            currency,
            event_sender,
        }
    }

    async fn publish(&self, events: Vec<Event>) {
        if events.is_empty() {
            return;
        }
        if let Some(sender) = &self.event_sender {
            sender.publish_all(events).await;
        }
    }

    async fn find_payment(&self, id: Uuid) -> Result<payment::Model, ServiceError> {
        PaymentEntity::find_by_id(id)
            .one(&*self.db)
            .await
            .map_err(|e| ServiceError::db("find payment", e))?
            .ok_or_else(|| ServiceError::NotFound(format!("Payment {} not found", id)))
    }

    /// Arms a pending payment for the order and asks the gateway for a
    /// redirect. The charged amount is the stored order total.
    #[instrument(skip(self, request), fields(provider = %method, order_id = %request.order_id))]
    pub async fn initiate(
        &self,
        actor: Actor,
        method: PaymentMethod,
        request: InitiatePaymentRequest,
        client_ip: String,
    ) -> Result<PaymentInitiation, ServiceError> {
        request.validate()?;
        let provider = self.gateways.get(method)?;

        let order = OrderEntity::find_by_id(request.order_id)
            .one(&*self.db)
            .await
            .map_err(|e| ServiceError::db("find order", e))?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", request.order_id)))?;
        if order.user_id != actor.user_id {
            return Err(ServiceError::Forbidden(
                "Only the order owner can pay for it".into(),
            ));
        }
        if order.status == OrderStatus::Cancelled {
            return Err(ServiceError::InvalidTransition(
                "cancelled orders cannot be paid".into(),
            ));
        }
        if matches!(
            order.payment_status,
            OrderPaymentStatus::Paid | OrderPaymentStatus::Refunded
        ) {
            return Err(ServiceError::InvalidTransition(format!(
                "order payment is already {}",
                order.payment_status
            )));
        }
        if let Some(amount) = request.amount {
            if amount != order.total_price {
                return Err(ServiceError::ValidationError(format!(
                    "amount mismatch: expected {}, got {}",
                    order.total_price, amount
                )));
            }
        }

        // Nothing is written until the provider accepts the request.
        let current = PaymentEntity::find()
            .filter(payment::Column::OrderId.eq(order.id))
            .one(&*self.db)
            .await
            .map_err(|e| ServiceError::db("find order payment", e))?;
        if let Some(p) = &current {
            if p.status != PaymentStatus::Pending {
                check_payment_transition(p.status, PaymentStatus::Pending)?;
            }
        }

        let intent = PaymentIntent {
            order_id: order.id,
            order_number: order.order_number.clone(),
            amount: order.total_price,
            client_ip,
            bank_code: request.bank_code,
            locale: request.locale,
        };
        let redirect = provider.create_payment(&intent).await.map_err(|e| {
            error!(order_id = %order.id, error = %e, "gateway rejected payment request");
            e
        })?;

        let now = Utc::now();
        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| ServiceError::db("begin payment transaction", e))?;

        let existing = PaymentEntity::find()
            .filter(payment::Column::OrderId.eq(order.id))
            .one(&txn)
            .await
            .map_err(|e| ServiceError::db("find order payment", e))?;

        let payment = match existing {
            Some(p) => {
                if p.status != PaymentStatus::Pending {
                    check_payment_transition(p.status, PaymentStatus::Pending)?;
                }
                let (_, p) = apply_payment_status(
                    &txn,
                    order.clone(),
                    Some(p),
                    PaymentUpdate::to(PaymentStatus::Pending),
                    now,
                )
                .await?;
                let Some(p) = p else {
                    return Err(ServiceError::InternalError("payment row vanished".into()));
                };
                let mut active: payment::ActiveModel = p.into();
                active.method = Set(method);
                active.amount = Set(order.total_price);
                active.request_id = Set(Some(redirect.request_id.clone()));
                active
                    .update(&txn)
                    .await
                    .map_err(|e| ServiceError::db("re-arm payment", e))?
            }
            None => payment::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order.id),
                user_id: Set(order.user_id),
                method: Set(method),
                amount: Set(order.total_price),
                currency: Set(self.currency.clone()),
                status: Set(PaymentStatus::Pending),
                transaction_id: Set(None),
                request_id: Set(Some(redirect.request_id.clone())),
                gateway_response: Set(None),
                paid_at: Set(None),
                refunded_at: Set(None),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&txn)
            .await
            .map_err(|e| ServiceError::db("insert payment", e))?,
        };

        if order.payment_method != method || order.payment_id != Some(payment.id) {
            let mut active: order::ActiveModel = order.clone().into();
            active.payment_method = Set(method);
            active.payment_id = Set(Some(payment.id));
            active
                .update(&txn)
                .await
                .map_err(|e| ServiceError::db("link order payment", e))?;
        }

        txn.commit()
            .await
            .map_err(|e| ServiceError::db("commit payment transaction", e))?;

        info!(payment_id = %payment.id, amount = order.total_price, "payment initiated");
        Ok(PaymentInitiation {
            payment_id: payment.id,
            order_id: order.id,
            method,
            amount: order.total_price,
            pay_url: redirect.pay_url,
            request_id: redirect.request_id,
        })
    }

    /// Records a payment by hand (e.g. a bank transfer). One per order.
    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    pub async fn create(&self, request: CreatePaymentRequest) -> Result<payment::Model, ServiceError> {
        request.validate()?;
        let now = Utc::now();
        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| ServiceError::db("begin payment transaction", e))?;

        let order = OrderEntity::find_by_id(request.order_id)
            .one(&txn)
            .await
            .map_err(|e| ServiceError::db("find order", e))?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", request.order_id)))?;

        let existing = PaymentEntity::find()
            .filter(payment::Column::OrderId.eq(order.id))
            .count(&txn)
            .await
            .map_err(|e| ServiceError::db("count order payments", e))?;
        if existing > 0 {
            return Err(ServiceError::Conflict(format!(
                "Order {} already has a payment",
                order.id
            )));
        }

        let created = payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            user_id: Set(order.user_id),
            method: Set(request.method),
            amount: Set(request.amount.unwrap_or(order.total_price)),
            currency: Set(self.currency.clone()),
            status: Set(PaymentStatus::Pending),
            transaction_id: Set(request.transaction_id.clone()),
            request_id: Set(None),
            gateway_response: Set(None),
            paid_at: Set(None),
            refunded_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ServiceError::Conflict(format!("Order {} already has a payment", order.id))
            } else {
                ServiceError::db("insert payment", e)
            }
        })?;

        let mut active: order::ActiveModel = order.clone().into();
        active.payment_method = Set(request.method);
        active.payment_id = Set(Some(created.id));
        let order = active
            .update(&txn)
            .await
            .map_err(|e| ServiceError::db("link order payment", e))?;

        let target = request.status.unwrap_or(PaymentStatus::Pending);
        let (_, payment) = apply_payment_status(
            &txn,
            order,
            Some(created),
            PaymentUpdate::to(target),
            now,
        )
        .await?;
        let payment = payment
            .ok_or_else(|| ServiceError::InternalError("payment row vanished".into()))?;

        txn.commit()
            .await
            .map_err(|e| ServiceError::db("commit payment transaction", e))?;

        info!(payment_id = %payment.id, method = %payment.method, "payment recorded");
        self.publish(payment_events(PaymentStatus::Pending, &payment))
            .await;
        Ok(payment)
    }

    #[instrument(skip(self))]
    pub async fn list(
        &self,
        filter: PaymentFilter,
        page: Page,
    ) -> Result<Paged<payment::Model>, ServiceError> {
        let mut query = PaymentEntity::find().order_by_desc(payment::Column::CreatedAt);
        if let Some(status) = filter.status {
            query = query.filter(payment::Column::Status.eq(status));
        }
        if let Some(method) = filter.method {
            query = query.filter(payment::Column::Method.eq(method));
        }
        if let Some(order_id) = filter.order_id {
            query = query.filter(payment::Column::OrderId.eq(order_id));
        }

        let paginator = query.paginate(&*self.db, page.limit);
        let total = paginator
            .num_items()
            .await
            .map_err(|e| ServiceError::db("count payments", e))?;
        let items = paginator
            .fetch_page(page.index())
            .await
            .map_err(|e| ServiceError::db("fetch payments page", e))?;

        Ok(Paged {
            items,
            total,
            page: page.page,
            limit: page.limit,
        })
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: Uuid) -> Result<payment::Model, ServiceError> {
        self.find_payment(id).await
    }

    /// Admin status change, mirrored onto the order.
    #[instrument(skip(self, request), fields(payment_id = %id))]
    pub async fn update(
        &self,
        id: Uuid,
        request: UpdatePaymentRequest,
    ) -> Result<payment::Model, ServiceError> {
        request.validate()?;
        let now = Utc::now();
        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| ServiceError::db("begin payment transaction", e))?;

        let payment = PaymentEntity::find_by_id(id)
            .one(&txn)
            .await
            .map_err(|e| ServiceError::db("find payment", e))?
            .ok_or_else(|| ServiceError::NotFound(format!("Payment {} not found", id)))?;
        let before = payment.status;

        let payment = match request.status {
            Some(status) if status != payment.status => {
                let order = OrderEntity::find_by_id(payment.order_id)
                    .one(&txn)
                    .await
                    .map_err(|e| ServiceError::db("find order", e))?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("Order {} not found", payment.order_id))
                    })?;
                let update = PaymentUpdate {
                    transaction_id: request.transaction_id.clone(),
                    ..PaymentUpdate::to(status)
                };
                let (_, payment) = apply_payment_status(&txn, order, Some(payment), update, now).await?;
                payment.ok_or_else(|| ServiceError::InternalError("payment row vanished".into()))?
            }
            _ => match request.transaction_id.clone() {
                Some(transaction_id) => {
                    let mut active: payment::ActiveModel = payment.into();
                    active.transaction_id = Set(Some(transaction_id));
                    active
                        .update(&txn)
                        .await
                        .map_err(|e| ServiceError::db("update payment", e))?
                }
                None => payment,
            },
        };

        txn.commit()
            .await
            .map_err(|e| ServiceError::db("commit payment transaction", e))?;

        info!(payment_id = %id, old_status = %before, new_status = %payment.status, "payment updated");
        self.publish(payment_events(before, &payment)).await;
        Ok(payment)
    }

    /// `success -> refunded`, mirrored onto the order.
    #[instrument(skip(self), fields(payment_id = %id))]
    pub async fn refund(&self, id: Uuid) -> Result<payment::Model, ServiceError> {
        let payment = self.find_payment(id).await?;
        if payment.status != PaymentStatus::Success {
            return Err(ServiceError::InvalidTransition(format!(
                "only successful payments can be refunded (payment is {})",
                payment.status
            )));
        }
        self.update(
            id,
            UpdatePaymentRequest {
                status: Some(PaymentStatus::Refunded),
                transaction_id: None,
            },
        )
        .await
    }

    /// Removes the payment and its callback ledger, unlinking the order.
    #[instrument(skip(self), fields(payment_id = %id))]
    pub async fn delete(&self, id: Uuid) -> Result<(), ServiceError> {
        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| ServiceError::db("begin payment transaction", e))?;

        let payment = PaymentEntity::find_by_id(id)
            .one(&txn)
            .await
            .map_err(|e| ServiceError::db("find payment", e))?
            .ok_or_else(|| ServiceError::NotFound(format!("Payment {} not found", id)))?;

        if let Some(order) = OrderEntity::find_by_id(payment.order_id)
            .one(&txn)
            .await
            .map_err(|e| ServiceError::db("find order", e))?
        {
            if order.payment_id == Some(payment.id) {
                let mut active: order::ActiveModel = order.into();
                active.payment_id = Set(None);
                active
                    .update(&txn)
                    .await
                    .map_err(|e| ServiceError::db("unlink order payment", e))?;
            }
        } else {
            warn!(order_id = %payment.order_id, "payment belongs to a missing order");
        }

        payment_callback::Entity::delete_many()
            .filter(payment_callback::Column::PaymentId.eq(payment.id))
            .exec(&txn)
            .await
            .map_err(|e| ServiceError::db("delete payment callbacks", e))?;
        PaymentEntity::delete_by_id(payment.id)
            .exec(&txn)
            .await
            .map_err(|e| ServiceError::db("delete payment", e))?;

        txn.commit()
            .await
            .map_err(|e| ServiceError::db("commit payment transaction", e))?;
        info!(payment_id = %id, "payment deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payment(status: PaymentStatus) -> payment::Model {
        let now = Utc::now();
        payment::Model {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            method: PaymentMethod::Vnpay,
            amount: 100_000,
            currency: "VND".into(),
            status,
            transaction_id: Some("14226112".into()),
            request_id: None,
            gateway_response: None,
            paid_at: None,
            refunded_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn events_follow_status_changes() {
        assert!(payment_events(PaymentStatus::Success, &payment(PaymentStatus::Success)).is_empty());
        assert!(payment_events(PaymentStatus::Failed, &payment(PaymentStatus::Pending)).is_empty());

        let events = payment_events(PaymentStatus::Pending, &payment(PaymentStatus::Success));
        assert!(matches!(
            events.as_slice(),
            [Event::PaymentSucceeded { transaction_id: Some(_), .. }]
        ));
        let events = payment_events(PaymentStatus::Success, &payment(PaymentStatus::Refunded));
        assert_eq!(events[0].name(), "payment.refunded");
    }

    #[test]
    fn initiate_rejects_unknown_fields() {
        let err = serde_json::from_value::<InitiatePaymentRequest>(serde_json::json!({
            "order_id": Uuid::new_v4(),
            "returnUrl": "http://evil.example"
        }));
        assert!(err.is_err());
    }
}
