//! Applies verified gateway callbacks to payments and orders.
//!
//! Every applied callback leaves a row in `payment_callbacks`, unique on
//! (provider, idempotency key). Inserting that row is the first write of the
//! reconciliation transaction, so a re-delivered callback hits the unique index
//! and is answered from the ledger without touching the payment again.

use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::{
        order::{self, Entity as OrderEntity, OrderStatus},
        payment::{self, Entity as PaymentEntity, PaymentMethod, PaymentStatus},
        payment_callback::{self, CallbackOutcome},
    },
    errors::{is_unique_violation, ServiceError},
    events::{Event, EventSender},
    gateways::{CallbackParams, OrderRef, PaymentGateways, VerifiedCallback},
    services::{
        order_status::{apply_payment_status, PaymentUpdate},
        payments::payment_events,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The callback changed the payment.
    Applied,
    /// The same callback was seen before; nothing was written.
    Replayed,
    /// Verified and recorded, but it does not change the payment.
    Ignored,
    /// The payment succeeded but its order is cancelled and needs a refund.
    NeedsRefund,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub order_id: Uuid,
    pub payment_id: Uuid,
    pub outcome: ReconcileOutcome,
    /// Payment status after reconciliation
    pub payment_status: PaymentStatus,
}

impl Reconciliation {
    pub fn is_paid(&self) -> bool {
        self.payment_status == PaymentStatus::Success
    }
}

/// What a callback should do to a payment currently in `current`.
/// A success never gets downgraded and a failure only lands on a pending payment.
pub fn decide(current: PaymentStatus, success: bool) -> CallbackOutcome {
    match (current, success) {
        (PaymentStatus::Pending | PaymentStatus::Failed, true) => CallbackOutcome::Success,
        (PaymentStatus::Pending, false) => CallbackOutcome::Failed,
        _ => CallbackOutcome::Ignored,
    }
}

/// A success landing on a cancelled order is kept but flagged for refund.
pub fn flag_cancelled(order_status: OrderStatus, outcome: CallbackOutcome) -> CallbackOutcome {
    match (order_status, outcome) {
        (OrderStatus::Cancelled, CallbackOutcome::Success) => CallbackOutcome::NeedsRefund,
        _ => outcome,
    }
}

#[derive(Clone)]
pub struct PaymentReconciler {
    db: Arc<DatabaseConnection>,
    gateways: PaymentGateways,
    event_sender: Option<Arc<EventSender>>,
}

impl PaymentReconciler {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateways: PaymentGateways,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db,
            gateways,
            event_sender,
        }
    }

    async fn find_order<C: sea_orm::ConnectionTrait>(
        conn: &C,
        order_ref: &OrderRef,
    ) -> Result<order::Model, ServiceError> {
        let query = match order_ref {
            OrderRef::Id(id) => OrderEntity::find_by_id(*id),
            OrderRef::Number(number) => {
                OrderEntity::find().filter(order::Column::OrderNumber.eq(number.clone()))
            }
        };
        query
            .one(conn)
            .await
            .map_err(|e| ServiceError::db("find callback order", e))?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_ref)))
    }

    /// Verifies `params` with the provider for `method` and applies them.
    #[instrument(skip(self, params), fields(provider = %method))]
    pub async fn reconcile(
        &self,
        method: PaymentMethod,
        params: &CallbackParams,
    ) -> Result<Reconciliation, ServiceError> {
        let provider = self.gateways.get(method)?;
        let callback = provider.verify_callback(params).map_err(|e| {
            warn!(error = %e, "rejected payment callback");
            e
        })?;
        self.apply(callback).await
    }

    /// Applies an already verified callback.
    #[instrument(skip(self, callback), fields(provider = %callback.provider, order_ref = %callback.order_ref))]
    pub async fn apply(&self, callback: VerifiedCallback) -> Result<Reconciliation, ServiceError> {
        let now = Utc::now();
        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| ServiceError::db("begin reconciliation", e))?;

        let order = Self::find_order(&txn, &callback.order_ref).await?;
        let payment = PaymentEntity::find()
            .filter(payment::Column::OrderId.eq(order.id))
            .one(&txn)
            .await
            .map_err(|e| ServiceError::db("find callback payment", e))?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("No payment for order {}", order.id))
            })?;

        if callback.amount != payment.amount {
            warn!(
                payment_id = %payment.id,
                expected = payment.amount,
                received = callback.amount,
                "callback amount mismatch"
            );
            return Err(ServiceError::ValidationError(format!(
                "callback amount {} does not match payment amount {}",
                callback.amount, payment.amount
            )));
        }

        let outcome = flag_cancelled(order.status, decide(payment.status, callback.success));
        if outcome == CallbackOutcome::NeedsRefund {
            warn!(
                payment_id = %payment.id,
                order_id = %order.id,
                amount = payment.amount,
                "payment succeeded for a cancelled order"
            );
        }
        let ledger = payment_callback::ActiveModel {
            id: Set(Uuid::new_v4()),
            payment_id: Set(payment.id),
            order_id: Set(order.id),
            provider: Set(callback.provider),
            idempotency_key: Set(callback.idempotency_key.clone()),
            transaction_id: Set(callback.transaction_id.clone()),
            outcome: Set(outcome),
            amount: Set(callback.amount),
            payload: Set(callback.raw_json()),
            received_at: Set(now),
        };

        if let Err(e) = ledger.insert(&txn).await {
            if !is_unique_violation(&e) {
                return Err(ServiceError::db("insert callback ledger", e));
            }
            txn.rollback()
                .await
                .map_err(|e| ServiceError::db("rollback reconciliation", e))?;
            return self.replayed(&callback, order.id).await;
        }

        let before = payment.status;
        let payment = match outcome {
            CallbackOutcome::Success | CallbackOutcome::NeedsRefund | CallbackOutcome::Failed => {
                let status = if outcome == CallbackOutcome::Failed {
                    PaymentStatus::Failed
                } else {
                    PaymentStatus::Success
                };
                let update = PaymentUpdate {
                    status,
                    transaction_id: callback.transaction_id.clone(),
                    gateway_response: Some(callback.raw_json()),
                    confirm_order: true,
                };
                let (_, payment) =
                    apply_payment_status(&txn, order, Some(payment), update, now).await?;
                payment.ok_or_else(|| ServiceError::InternalError("payment row vanished".into()))?
            }
            CallbackOutcome::Ignored => payment,
        };

        txn.commit()
            .await
            .map_err(|e| ServiceError::db("commit reconciliation", e))?;

        let result = Reconciliation {
            order_id: payment.order_id,
            payment_id: payment.id,
            outcome: match outcome {
                CallbackOutcome::Ignored => ReconcileOutcome::Ignored,
                CallbackOutcome::NeedsRefund => ReconcileOutcome::NeedsRefund,
                CallbackOutcome::Success | CallbackOutcome::Failed => ReconcileOutcome::Applied,
            },
            payment_status: payment.status,
        };
        info!(
            payment_id = %payment.id,
            order_id = %payment.order_id,
            callback_outcome = %outcome,
            payment_status = %payment.status,
            "payment callback reconciled"
        );

        if let Some(sender) = &self.event_sender {
            let mut events: Vec<Event> = payment_events(before, &payment);
            if outcome == CallbackOutcome::NeedsRefund {
                events.push(Event::PaymentNeedsRefund {
                    payment_id: payment.id,
                    order_id: payment.order_id,
                    amount: payment.amount,
                });
            }
            if !events.is_empty() {
                sender.publish_all(events).await;
            }
        }
        Ok(result)
    }

    async fn replayed(
        &self,
        callback: &VerifiedCallback,
        order_id: Uuid,
    ) -> Result<Reconciliation, ServiceError> {
        let db = &*self.db;
        let recorded = payment_callback::Entity::find()
            .filter(payment_callback::Column::Provider.eq(callback.provider))
            .filter(payment_callback::Column::IdempotencyKey.eq(callback.idempotency_key.clone()))
            .one(db)
            .await
            .map_err(|e| ServiceError::db("find callback ledger", e))?;
        let payment = PaymentEntity::find()
            .filter(payment::Column::OrderId.eq(order_id))
            .one(db)
            .await
            .map_err(|e| ServiceError::db("find callback payment", e))?
            .ok_or_else(|| ServiceError::NotFound(format!("No payment for order {}", order_id)))?;

        info!(
            payment_id = %payment.id,
            idempotency_key = %callback.idempotency_key,
            recorded_outcome = recorded.as_ref().map(|r| r.outcome.to_string()).unwrap_or_default(),
            "payment callback replayed"
        );
        Ok(Reconciliation {
            order_id,
            payment_id: payment.id,
            outcome: ReconcileOutcome::Replayed,
            payment_status: payment.status,
        })
    }
}
