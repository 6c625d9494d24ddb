//! Domain events emitted after state changes commit.
//!
//! Events are fire-and-forget: a full or closed channel is logged and never
//! fails the operation that produced the event.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::{OrderPaymentStatus, OrderStatus, PaymentMethod};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        order_number: String,
        total_price: i64,
    },
    OrderStatusChanged {
        order_id: Uuid,
        status: OrderStatus,
        payment_status: OrderPaymentStatus,
    },
    OrderCancelled {
        order_id: Uuid,
        reason: Option<String>,
    },
    OrderDeleted(Uuid),
    PaymentSucceeded {
        payment_id: Uuid,
        order_id: Uuid,
        method: PaymentMethod,
        transaction_id: Option<String>,
    },
    PaymentFailed {
        payment_id: Uuid,
        order_id: Uuid,
        method: PaymentMethod,
    },
    PaymentRefunded {
        payment_id: Uuid,
        order_id: Uuid,
    },
    /// A payment succeeded after its order was cancelled.
    PaymentNeedsRefund {
        payment_id: Uuid,
        order_id: Uuid,
        amount: i64,
    },
    CouponRedeemed {
        coupon_code: String,
        order_id: Uuid,
        discount_amount: i64,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::OrderCreated { .. } => "order.created",
            Event::OrderStatusChanged { .. } => "order.status_changed",
            Event::OrderCancelled { .. } => "order.cancelled",
            Event::OrderDeleted(_) => "order.deleted",
            Event::PaymentSucceeded { .. } => "payment.succeeded",
            Event::PaymentFailed { .. } => "payment.failed",
            Event::PaymentRefunded { .. } => "payment.refunded",
            Event::PaymentNeedsRefund { .. } => "payment.needs_refund",
            Event::CouponRedeemed { .. } => "coupon.redeemed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends a batch of events, logging instead of failing.
    pub async fn publish_all(&self, events: Vec<Event>) {
        for event in events {
            let name = event.name();
            if let Err(e) = self.send(event).await {
                warn!(event = name, error = %e, "dropping domain event");
            }
        }
    }
}

/// Drains the channel, logging each event until all senders are dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderCreated {
                order_id,
                order_number,
                total_price,
            } => info!(%order_id, %order_number, total_price, "order created"),
            Event::OrderStatusChanged {
                order_id,
                status,
                payment_status,
            } => info!(%order_id, %status, %payment_status, "order status changed"),
            Event::OrderCancelled { order_id, reason } => {
                info!(%order_id, reason = reason.as_deref().unwrap_or(""), "order cancelled")
            }
            Event::OrderDeleted(order_id) => info!(%order_id, "order deleted"),
            Event::PaymentSucceeded {
                payment_id,
                order_id,
                method,
                transaction_id,
            } => info!(
                %payment_id,
                %order_id,
                provider = %method,
                transaction_id = transaction_id.as_deref().unwrap_or(""),
                "payment succeeded"
            ),
            Event::PaymentFailed {
                payment_id,
                order_id,
                method,
            } => info!(%payment_id, %order_id, provider = %method, "payment failed"),
            Event::PaymentRefunded {
                payment_id,
                order_id,
            } => info!(%payment_id, %order_id, "payment refunded"),
            Event::PaymentNeedsRefund {
                payment_id,
                order_id,
                amount,
            } => warn!(%payment_id, %order_id, amount, "paid order is cancelled, refund required"),
            Event::CouponRedeemed {
                coupon_code,
                order_id,
                discount_amount,
            } => info!(%coupon_code, %order_id, discount_amount, "coupon redeemed"),
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_all_survives_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);
        sender.publish_all(vec![Event::OrderDeleted(Uuid::new_v4())]).await;
    }

    #[tokio::test]
    async fn consumer_drains_until_senders_drop() {
        let (tx, rx) = mpsc::channel(8);
        let sender = EventSender::new(tx);
        let handle = tokio::spawn(process_events(rx));
        sender
            .send(Event::PaymentRefunded {
                payment_id: Uuid::new_v4(),
                order_id: Uuid::new_v4(),
            })
            .await
            .unwrap();
        drop(sender);
        handle.await.unwrap();
    }
}
