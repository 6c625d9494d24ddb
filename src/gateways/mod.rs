//! Payment gateway adapters.
//!
//! Each provider signs outbound payment requests and verifies inbound
//! callbacks with its merchant secret. Providers without configuration are
//! simply not registered.

pub mod momo;
pub mod vnpay;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde_json::Value as JsonValue;
use sha2::{Sha256, Sha512};
use tracing::info;
use uuid::Uuid;

use crate::{config::AppConfig, entities::PaymentMethod, errors::ServiceError};

pub use momo::MomoGateway;
pub use vnpay::VnpayGateway;

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

/// Raw callback parameters (query string or flattened JSON body).
pub type CallbackParams = BTreeMap<String, String>;

/// How a callback identifies its order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderRef {
    Id(Uuid),
    Number(String),
}

impl std::fmt::Display for OrderRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderRef::Id(id) => write!(f, "{}", id),
            OrderRef::Number(number) => f.write_str(number),
        }
    }
}

/// What to charge. `amount` is always the stored order total.
#[derive(Debug, Clone)]
pub struct PaymentIntent {
    pub order_id: Uuid,
    pub order_number: String,
    pub amount: i64,
    pub client_ip: String,
    pub bank_code: Option<String>,
    pub locale: Option<String>,
}

impl PaymentIntent {
    pub fn order_info(&self) -> String {
        format!("Thanh toan don hang {}", self.order_number)
    }
}

/// Where to send the payer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRedirect {
    pub pay_url: String,
    pub request_id: String,
}

/// A callback whose signature checked out.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedCallback {
    pub provider: PaymentMethod,
    pub order_ref: OrderRef,
    pub transaction_id: Option<String>,
    /// Ledger key; stable across re-deliveries of the same notification
    pub idempotency_key: String,
    pub amount: i64,
    pub success: bool,
    pub result_code: String,
    pub raw: CallbackParams,
}

impl VerifiedCallback {
    pub fn raw_json(&self) -> JsonValue {
        serde_json::to_value(&self.raw).unwrap_or(JsonValue::Null)
    }
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn method(&self) -> PaymentMethod;

    /// Signs and submits a payment request, returning the payer redirect.
    async fn create_payment(&self, intent: &PaymentIntent) -> Result<PaymentRedirect, ServiceError>;

    /// Checks the callback signature and extracts the result.
    fn verify_callback(&self, params: &CallbackParams) -> Result<VerifiedCallback, ServiceError>;
}

/// Registry of configured providers.
#[derive(Clone, Default)]
pub struct PaymentGateways {
    providers: HashMap<PaymentMethod, Arc<dyn PaymentProvider>>,
}

impl PaymentGateways {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every provider that has a config section.
    pub fn from_config(config: &AppConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.gateway_timeout_secs))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client: {}", e)))?;

        let mut gateways = Self::new();
        if let Some(momo) = &config.momo {
            gateways.register(Arc::new(MomoGateway::new(momo.clone(), client.clone())));
        }
        if let Some(vnpay) = &config.vnpay {
            gateways.register(Arc::new(VnpayGateway::new(vnpay.clone())));
        }
        info!(
            momo = gateways.is_configured(PaymentMethod::Momo),
            vnpay = gateways.is_configured(PaymentMethod::Vnpay),
            "payment gateways configured"
        );
        Ok(gateways)
    }

    pub fn register(&mut self, provider: Arc<dyn PaymentProvider>) {
        self.providers.insert(provider.method(), provider);
    }

    pub fn is_configured(&self, method: PaymentMethod) -> bool {
        self.providers.contains_key(&method)
    }

    pub fn get(&self, method: PaymentMethod) -> Result<Arc<dyn PaymentProvider>, ServiceError> {
        self.providers.get(&method).cloned().ok_or_else(|| {
            ServiceError::ServiceUnavailable(format!("{} payments are not configured", method))
        })
    }
}

pub(crate) fn hmac_sha256_hex(key: &str, data: &str) -> Result<String, ServiceError> {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|e| ServiceError::InternalError(format!("hmac key: {}", e)))?;
    mac.update(data.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

pub(crate) fn hmac_sha512_hex(key: &str, data: &str) -> Result<String, ServiceError> {
    let mut mac = HmacSha512::new_from_slice(key.as_bytes())
        .map_err(|e| ServiceError::InternalError(format!("hmac key: {}", e)))?;
    mac.update(data.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a hex signature; hex case is ignored.
pub(crate) fn verify_hmac_sha256(key: &str, data: &str, signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(key.as_bytes()) else {
        return false;
    };
    mac.update(data.as_bytes());
    mac.verify_slice(&expected).is_ok()
}

pub(crate) fn verify_hmac_sha512(key: &str, data: &str, signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha512::new_from_slice(key.as_bytes()) else {
        return false;
    };
    mac.update(data.as_bytes());
    mac.verify_slice(&expected).is_ok()
}

/// Flattens a JSON object body into string parameters.
pub fn params_from_json(body: &JsonValue) -> CallbackParams {
    let mut params = CallbackParams::new();
    if let JsonValue::Object(map) = body {
        for (key, value) in map {
            let value = match value {
                JsonValue::String(s) => s.clone(),
                JsonValue::Null => String::new(),
                other => other.to_string(),
            };
            params.insert(key.clone(), value);
        }
    }
    params
}

fn param<'a>(params: &'a CallbackParams, key: &str) -> &'a str {
    params.get(key).map(String::as_str).unwrap_or("")
}

fn non_zero(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty() && value != "0").then(|| value.to_string())
}
