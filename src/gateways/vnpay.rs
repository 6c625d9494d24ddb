use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, Utc};
use tracing::{debug, instrument};
use url::form_urlencoded::byte_serialize;
use uuid::Uuid;

use super::{
    hmac_sha512_hex, non_zero, param, verify_hmac_sha512, CallbackParams, OrderRef,
    PaymentIntent, PaymentProvider, PaymentRedirect, VerifiedCallback,
};
use crate::{config::VnpayConfig, entities::PaymentMethod, errors::ServiceError};

pub const VNP_VERSION: &str = "2.1.0";
const SECURE_HASH: &str = "vnp_SecureHash";
const SECURE_HASH_TYPE: &str = "vnp_SecureHashType";
/// VNPay timestamps are Vietnam local time.
const VN_OFFSET_SECS: i32 = 7 * 3600;

fn encode(value: &str) -> String {
    byte_serialize(value.as_bytes()).collect()
}

/// `k=v&...` over key-sorted parameters, form-urlencoded (space as `+`).
pub fn canonical_query(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// HMAC-SHA512 hex of the canonical query.
pub fn sign_params(params: &BTreeMap<String, String>, secret: &str) -> Result<String, ServiceError> {
    hmac_sha512_hex(secret, &canonical_query(params))
}

/// VNPay (v2.1.0) redirect adapter.
pub struct VnpayGateway {
    config: VnpayConfig,
}

impl VnpayGateway {
    pub fn new(config: VnpayConfig) -> Self {
        Self { config }
    }

    /// Builds the signed payment URL for `intent` as of `now`.
    pub fn payment_url(
        &self,
        intent: &PaymentIntent,
        now: DateTime<Utc>,
    ) -> Result<PaymentRedirect, ServiceError> {
        let offset = FixedOffset::east_opt(VN_OFFSET_SECS)
            .ok_or_else(|| ServiceError::InternalError("invalid VNPay timezone offset".into()))?;
        let created = now.with_timezone(&offset);
        let expires = created + Duration::minutes(self.config.expire_minutes);
        let txn_ref = intent.order_id.simple().to_string();

        let mut params = BTreeMap::new();
        params.insert("vnp_Version".to_string(), VNP_VERSION.to_string());
        params.insert("vnp_Command".to_string(), "pay".to_string());
        params.insert("vnp_TmnCode".to_string(), self.config.tmn_code.clone());
        params.insert(
            "vnp_Locale".to_string(),
            intent.locale.clone().unwrap_or_else(|| self.config.locale.clone()),
        );
        params.insert("vnp_CurrCode".to_string(), "VND".to_string());
        params.insert("vnp_TxnRef".to_string(), txn_ref.clone());
        params.insert("vnp_OrderInfo".to_string(), intent.order_info());
        params.insert("vnp_OrderType".to_string(), "other".to_string());
        params.insert("vnp_Amount".to_string(), (intent.amount * 100).to_string());
        params.insert("vnp_ReturnUrl".to_string(), self.config.return_url.clone());
        params.insert("vnp_IpAddr".to_string(), intent.client_ip.clone());
        params.insert(
            "vnp_CreateDate".to_string(),
            created.format("%Y%m%d%H%M%S").to_string(),
        );
        params.insert(
            "vnp_ExpireDate".to_string(),
            expires.format("%Y%m%d%H%M%S").to_string(),
        );
        if let Some(bank_code) = intent.bank_code.as_deref().filter(|b| !b.is_empty()) {
            params.insert("vnp_BankCode".to_string(), bank_code.to_string());
        }

        let query = canonical_query(&params);
        let secure_hash = hmac_sha512_hex(&self.config.hash_secret, &query)?;
        let pay_url = format!(
            "{}?{}&{}={}",
            self.config.payment_url, query, SECURE_HASH, secure_hash
        );

        Ok(PaymentRedirect {
            pay_url,
            request_id: txn_ref,
        })
    }
}

#[async_trait]
impl PaymentProvider for VnpayGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Vnpay
    }

    #[instrument(skip(self, intent), fields(provider = "VNPAY", order_id = %intent.order_id))]
    async fn create_payment(&self, intent: &PaymentIntent) -> Result<PaymentRedirect, ServiceError> {
        let redirect = self.payment_url(intent, Utc::now())?;
        debug!(txn_ref = %redirect.request_id, "VNPay payment URL built");
        Ok(redirect)
    }

    fn verify_callback(&self, params: &CallbackParams) -> Result<VerifiedCallback, ServiceError> {
        let provided = params
            .get(SECURE_HASH)
            .ok_or_else(|| ServiceError::InvalidSignature("missing vnp_SecureHash".into()))?;
        let signed: BTreeMap<String, String> = params
            .iter()
            .filter(|(k, _)| k.starts_with("vnp_") && *k != SECURE_HASH && *k != SECURE_HASH_TYPE)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if !verify_hmac_sha512(&self.config.hash_secret, &canonical_query(&signed), provided) {
            return Err(ServiceError::InvalidSignature(
                "vnp_SecureHash mismatch".into(),
            ));
        }

        let txn_ref = param(params, "vnp_TxnRef").trim();
        let order_id = Uuid::parse_str(txn_ref)
            .map_err(|_| ServiceError::NotFound(format!("Order {} not found", txn_ref)))?;
        let amount = param(params, "vnp_Amount")
            .trim()
            .parse::<i64>()
            .map_err(|_| ServiceError::ValidationError("invalid vnp_Amount".into()))?
            / 100;

        let result_code = param(params, "vnp_ResponseCode").trim().to_string();
        let success = result_code == "00"
            && params
                .get("vnp_TransactionStatus")
                .map_or(true, |s| s.trim() == "00");
        let transaction_id = non_zero(param(params, "vnp_TransactionNo"));
        let idempotency_key = transaction_id.clone().unwrap_or_else(|| {
            format!(
                "{}:{}:{}",
                txn_ref,
                param(params, "vnp_PayDate"),
                result_code
            )
        });

        Ok(VerifiedCallback {
            provider: PaymentMethod::Vnpay,
            order_ref: OrderRef::Id(order_id),
            transaction_id,
            idempotency_key,
            amount,
            success,
            result_code,
            raw: params.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "VNPAYSECRETKEYFORTESTS0123456789";

    fn gateway() -> VnpayGateway {
        VnpayGateway::new(VnpayConfig {
            tmn_code: "DEMOTMN1".into(),
            hash_secret: SECRET.into(),
            payment_url: "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html".into(),
            return_url: "http://localhost:5173/vnpay-return".into(),
            expire_minutes: 15,
            locale: "vn".into(),
        })
    }

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn canonical_query_sorts_and_form_encodes() {
        let p = params(&[
            ("vnp_TxnRef", "0f8e7c9a2b3d4e5f60718293a4b5c6d7"),
            ("vnp_Amount", "15000000"),
            ("vnp_OrderInfo", "Thanh toan don hang ORD202401011234"),
            ("vnp_ReturnUrl", "http://localhost:5173/vnpay-return"),
        ]);
        assert_eq!(
            canonical_query(&p),
            "vnp_Amount=15000000&vnp_OrderInfo=Thanh+toan+don+hang+ORD202401011234\
             &vnp_ReturnUrl=http%3A%2F%2Flocalhost%3A5173%2Fvnpay-return\
             &vnp_TxnRef=0f8e7c9a2b3d4e5f60718293a4b5c6d7"
        );
        assert_eq!(
            sign_params(&p, SECRET).unwrap(),
            "b07022b61e773018f872155c13baa8e36b1d6ef7cb966779b89386fb4792ea39\
             ac27379aa484130660c8558fe69d52b27c5748fdde730e7f983bbb2789f3eaf4"
        );
    }

    #[test]
    fn payment_url_uses_vietnam_time_and_scaled_amount() {
        let order_id = Uuid::new_v4();
        let intent = PaymentIntent {
            order_id,
            order_number: "ORD202401011234".into(),
            amount: 150000,
            client_ip: "10.0.0.1".into(),
            bank_code: Some("NCB".into()),
            locale: None,
        };
        let now = DateTime::parse_from_rfc3339("2024-01-01T20:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let redirect = gateway().payment_url(&intent, now).unwrap();

        assert_eq!(redirect.request_id, order_id.simple().to_string());
        let url = url::Url::parse(&redirect.pay_url).unwrap();
        let query: BTreeMap<String, String> = url.query_pairs().into_owned().collect();
        assert_eq!(query["vnp_Amount"], "15000000");
        assert_eq!(query["vnp_CreateDate"], "20240102033000");
        assert_eq!(query["vnp_ExpireDate"], "20240102034500");
        assert_eq!(query["vnp_BankCode"], "NCB");
        assert_eq!(query["vnp_Locale"], "vn");

        // What VNPay echoes back verifies against our own signature.
        let verified = gateway().verify_callback(&query);
        assert!(verified.is_ok());
    }

    fn signed_return(response_code: &str, status: Option<&str>) -> CallbackParams {
        let mut p = params(&[
            ("vnp_Amount", "15000000"),
            ("vnp_BankCode", "NCB"),
            ("vnp_OrderInfo", "Thanh toan don hang ORD202401011234"),
            ("vnp_PayDate", "20240102033512"),
            ("vnp_ResponseCode", response_code),
            ("vnp_TmnCode", "DEMOTMN1"),
            ("vnp_TransactionNo", "14226112"),
            ("vnp_TxnRef", "0f8e7c9a2b3d4e5f60718293a4b5c6d7"),
        ]);
        if let Some(status) = status {
            p.insert("vnp_TransactionStatus".into(), status.into());
        }
        let hash = sign_params(&p, SECRET).unwrap();
        p.insert(SECURE_HASH_TYPE.into(), "HmacSHA512".into());
        p.insert(SECURE_HASH.into(), hash.to_uppercase());
        p
    }

    #[test]
    fn verifies_success_return() {
        let verified = gateway()
            .verify_callback(&signed_return("00", Some("00")))
            .unwrap();
        assert!(verified.success);
        assert_eq!(verified.amount, 150000);
        assert_eq!(
            verified.order_ref,
            OrderRef::Id(Uuid::parse_str("0f8e7c9a2b3d4e5f60718293a4b5c6d7").unwrap())
        );
        assert_eq!(verified.transaction_id.as_deref(), Some("14226112"));
    }

    #[test]
    fn non_zero_transaction_status_is_failure() {
        let verified = gateway()
            .verify_callback(&signed_return("00", Some("02")))
            .unwrap();
        assert!(!verified.success);
        let verified = gateway().verify_callback(&signed_return("24", None)).unwrap();
        assert!(!verified.success);
        assert_eq!(verified.result_code, "24");
    }

    #[test]
    fn tampered_return_is_rejected() {
        let mut p = signed_return("00", Some("00"));
        p.insert("vnp_Amount".into(), "100".into());
        assert!(matches!(
            gateway().verify_callback(&p),
            Err(ServiceError::InvalidSignature(_))
        ));

        let mut p = signed_return("00", Some("00"));
        p.remove(SECURE_HASH);
        assert!(matches!(
            gateway().verify_callback(&p),
            Err(ServiceError::InvalidSignature(_))
        ));
    }
}
