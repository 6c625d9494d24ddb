use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::payment::PaymentMethod;

/// What a verified callback did to the payment.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CallbackOutcome {
    #[sea_orm(string_value = "success")]
    Success,
    #[sea_orm(string_value = "failed")]
    Failed,
    /// Verified but not applied (e.g. a failure after success)
    #[sea_orm(string_value = "ignored")]
    Ignored,
    /// Money arrived for an order that was already cancelled
    #[sea_orm(string_value = "needs_refund")]
    NeedsRefund,
}

/// Ledger of applied gateway callbacks; unique on (provider, idempotency_key).
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payment_callbacks")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub payment_id: Uuid,
    pub order_id: Uuid,
    pub provider: PaymentMethod,
    pub idempotency_key: String,
    pub transaction_id: Option<String>,
    pub outcome: CallbackOutcome,
    pub amount: i64,
    pub payload: Json,
    pub received_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
