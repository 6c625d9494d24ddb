//! Order and payment state machines.
//!
//! The order lifecycle only moves forward (steps may be skipped) and may be
//! cancelled while still pending. Payment status is tracked on the `payments`
//! row and mirrored onto `orders.payment_status`.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, ConnectionTrait, Set};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::{
    entities::{
        order::{self, OrderStatus, PaymentStatus as OrderPaymentStatus},
        payment::{self, PaymentStatus},
    },
    errors::ServiceError,
};

fn rank(status: OrderStatus) -> u8 {
    match status {
        OrderStatus::Pending => 0,
        OrderStatus::Confirmed => 1,
        OrderStatus::Shipped => 2,
        OrderStatus::Delivered => 3,
        OrderStatus::Cancelled => u8::MAX,
    }
}

/// Whether an order may move from `from` to `to`. Same-status is not a move.
pub fn can_transition_order(from: OrderStatus, to: OrderStatus) -> bool {
    match (from, to) {
        (OrderStatus::Pending, OrderStatus::Cancelled) => true,
        (_, OrderStatus::Cancelled) => false,
        (OrderStatus::Delivered | OrderStatus::Cancelled, _) => false,
        (from, to) => rank(to) > rank(from),
    }
}

pub fn check_order_transition(from: OrderStatus, to: OrderStatus) -> Result<(), ServiceError> {
    if can_transition_order(from, to) {
        Ok(())
    } else {
        Err(ServiceError::InvalidTransition(format!(
            "order cannot move from {} to {}",
            from, to
        )))
    }
}

/// Cancellation is only allowed while the order is pending.
pub fn check_cancellable(status: OrderStatus) -> Result<(), ServiceError> {
    if status == OrderStatus::Pending {
        Ok(())
    } else {
        Err(ServiceError::InvalidTransition(format!(
            "only pending orders can be cancelled (order is {})",
            status
        )))
    }
}

pub fn can_transition_payment(from: PaymentStatus, to: PaymentStatus) -> bool {
    use PaymentStatus::*;
    matches!(
        (from, to),
        (Pending, Success) | (Pending, Failed) | (Failed, Pending) | (Failed, Success) | (Success, Refunded)
    )
}

pub fn check_payment_transition(from: PaymentStatus, to: PaymentStatus) -> Result<(), ServiceError> {
    if can_transition_payment(from, to) {
        Ok(())
    } else {
        Err(ServiceError::InvalidTransition(format!(
            "payment cannot move from {} to {}",
            from, to
        )))
    }
}

/// The order-side view of a payment status.
pub fn order_payment_status(status: PaymentStatus) -> OrderPaymentStatus {
    match status {
        PaymentStatus::Pending => OrderPaymentStatus::Pending,
        PaymentStatus::Success => OrderPaymentStatus::Paid,
        PaymentStatus::Failed => OrderPaymentStatus::Failed,
        PaymentStatus::Refunded => OrderPaymentStatus::Refunded,
    }
}

/// The payment-side view of an order payment status.
pub fn payment_status_for(status: OrderPaymentStatus) -> PaymentStatus {
    match status {
        OrderPaymentStatus::Pending => PaymentStatus::Pending,
        OrderPaymentStatus::Paid => PaymentStatus::Success,
        OrderPaymentStatus::Failed => PaymentStatus::Failed,
        OrderPaymentStatus::Refunded => PaymentStatus::Refunded,
    }
}

/// Sets `status` and stamps the timestamp belonging to it.
pub fn stamp_status(active: &mut order::ActiveModel, status: OrderStatus, now: DateTime<Utc>) {
    active.status = Set(status);
    match status {
        OrderStatus::Confirmed => active.confirmed_at = Set(Some(now)),
        OrderStatus::Shipped => active.shipped_at = Set(Some(now)),
        OrderStatus::Delivered => active.delivered_at = Set(Some(now)),
        OrderStatus::Cancelled => active.cancelled_at = Set(Some(now)),
        OrderStatus::Pending => {}
    }
}

/// A payment status change to apply to an order and its payment row.
#[derive(Debug, Clone)]
pub struct PaymentUpdate {
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub gateway_response: Option<JsonValue>,
    /// Move a pending order to confirmed when the payment succeeds.
    pub confirm_order: bool,
}

impl PaymentUpdate {
    pub fn to(status: PaymentStatus) -> Self {
        Self {
            status,
            transaction_id: None,
            gateway_response: None,
            confirm_order: false,
        }
    }
}

/// Applies a payment status change to both rows on `conn`.
///
/// The transition is checked against the payment row when one exists,
/// otherwise against the order's own payment status. Re-applying the
/// current status changes nothing.
pub async fn apply_payment_status<C>(
    conn: &C,
    order: order::Model,
    payment: Option<payment::Model>,
    update: PaymentUpdate,
    now: DateTime<Utc>,
) -> Result<(order::Model, Option<payment::Model>), ServiceError>
where
    C: ConnectionTrait,
{
    let current = payment
        .as_ref()
        .map(|p| p.status)
        .unwrap_or_else(|| payment_status_for(order.payment_status));

    if current == update.status {
        debug!(order_id = %order.id, status = %current, "payment status unchanged");
        return Ok((order, payment));
    }
    check_payment_transition(current, update.status)?;

    let payment = match payment {
        Some(p) => {
            let mut active: payment::ActiveModel = p.into();
            active.status = Set(update.status);
            match update.status {
                PaymentStatus::Success => active.paid_at = Set(Some(now)),
                PaymentStatus::Refunded => active.refunded_at = Set(Some(now)),
                PaymentStatus::Pending | PaymentStatus::Failed => {}
            }
            if let Some(txn_id) = update.transaction_id.clone() {
                active.transaction_id = Set(Some(txn_id));
            }
            if let Some(resp) = update.gateway_response.clone() {
                active.gateway_response = Set(Some(resp));
            }
            Some(
                active
                    .update(conn)
                    .await
                    .map_err(|e| ServiceError::db("update payment status", e))?,
            )
        }
        None => None,
    };

    let order_status = order.status;
    let mut active: order::ActiveModel = order.into();
    active.payment_status = Set(order_payment_status(update.status));
    if update.status == PaymentStatus::Success {
        if let Some(p) = &payment {
            active.payment_id = Set(Some(p.id));
        }
        if update.confirm_order && order_status == OrderStatus::Pending {
            stamp_status(&mut active, OrderStatus::Confirmed, now);
        }
    }
    let order = active
        .update(conn)
        .await
        .map_err(|e| ServiceError::db("update order payment status", e))?;

    Ok((order, payment))
}
