use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument, warn};

use super::{
    hmac_sha256_hex, non_zero, param, verify_hmac_sha256, CallbackParams, OrderRef,
    PaymentIntent, PaymentProvider, PaymentRedirect, VerifiedCallback,
};
use crate::{config::MomoConfig, entities::PaymentMethod, errors::ServiceError};

/// Body of a MoMo `create` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MomoCreateRequest {
    pub partner_code: String,
    pub access_key: String,
    pub request_id: String,
    pub amount: i64,
    pub order_id: String,
    pub order_info: String,
    pub redirect_url: String,
    pub ipn_url: String,
    pub extra_data: String,
    pub request_type: String,
    pub signature: String,
    pub lang: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MomoCreateResponse {
    result_code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    pay_url: Option<String>,
}

/// MoMo wallet (captureWallet) adapter.
pub struct MomoGateway {
    config: MomoConfig,
    client: reqwest::Client,
}

impl MomoGateway {
    pub fn new(config: MomoConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    /// Builds the signed request body for `intent`.
    pub fn build_request(
        &self,
        intent: &PaymentIntent,
        request_id: String,
    ) -> Result<MomoCreateRequest, ServiceError> {
        let order_info = intent.order_info();
        let extra_data = String::new();
        let raw = format!(
            "accessKey={}&amount={}&extraData={}&ipnUrl={}&orderId={}&orderInfo={}&partnerCode={}&redirectUrl={}&requestId={}&requestType={}",
            self.config.access_key,
            intent.amount,
            extra_data,
            self.config.ipn_url,
            intent.order_number,
            order_info,
            self.config.partner_code,
            self.config.redirect_url,
            request_id,
            self.config.request_type,
        );
        let signature = hmac_sha256_hex(&self.config.secret_key, &raw)?;

        Ok(MomoCreateRequest {
            partner_code: self.config.partner_code.clone(),
            access_key: self.config.access_key.clone(),
            request_id,
            amount: intent.amount,
            order_id: intent.order_number.clone(),
            order_info,
            redirect_url: self.config.redirect_url.clone(),
            ipn_url: self.config.ipn_url.clone(),
            extra_data,
            request_type: self.config.request_type.clone(),
            signature,
            lang: self.config.lang.clone(),
        })
    }

    /// The string MoMo signs on its callbacks.
    fn callback_signature_payload(&self, params: &CallbackParams) -> String {
        format!(
            "accessKey={}&amount={}&extraData={}&message={}&orderId={}&orderInfo={}&orderType={}&partnerCode={}&payType={}&requestId={}&responseTime={}&resultCode={}&transId={}",
            self.config.access_key,
            param(params, "amount"),
            param(params, "extraData"),
            param(params, "message"),
            param(params, "orderId"),
            param(params, "orderInfo"),
            param(params, "orderType"),
            param(params, "partnerCode"),
            param(params, "payType"),
            param(params, "requestId"),
            param(params, "responseTime"),
            param(params, "resultCode"),
            param(params, "transId"),
        )
    }
}

#[async_trait]
impl PaymentProvider for MomoGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Momo
    }

    #[instrument(skip(self, intent), fields(provider = "MOMO", order_number = %intent.order_number))]
    async fn create_payment(&self, intent: &PaymentIntent) -> Result<PaymentRedirect, ServiceError> {
        let request_id = format!("{}-{}", intent.order_number, Utc::now().timestamp_millis());
        let body = self.build_request(intent, request_id.clone())?;

        let response = self
            .client
            .post(&self.config.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "MoMo request failed");
                ServiceError::GatewayError(format!("MoMo request failed: {}", e))
            })?;

        let status = response.status();
        let payload: MomoCreateResponse = response.json().await.map_err(|e| {
            error!(error = %e, %status, "MoMo returned an unreadable response");
            ServiceError::GatewayError(format!("MoMo response unreadable ({})", status))
        })?;

        let message = payload
            .message
            .unwrap_or_else(|| "MoMo rejected the payment".to_string());
        if payload.result_code != 0 {
            warn!(result_code = payload.result_code, %message, "MoMo rejected payment request");
            return Err(ServiceError::GatewayError(message));
        }
        let Some(pay_url) = payload.pay_url.filter(|u| !u.is_empty()) else {
            warn!("MoMo response carried no payUrl");
            return Err(ServiceError::GatewayError(message));
        };

        debug!(%request_id, "MoMo payment created");
        Ok(PaymentRedirect {
            pay_url,
            request_id,
        })
    }

    fn verify_callback(&self, params: &CallbackParams) -> Result<VerifiedCallback, ServiceError> {
        let signature = params
            .get("signature")
            .ok_or_else(|| ServiceError::InvalidSignature("missing MoMo signature".into()))?;
        let payload = self.callback_signature_payload(params);
        if !verify_hmac_sha256(&self.config.secret_key, &payload, signature) {
            return Err(ServiceError::InvalidSignature(
                "MoMo signature mismatch".into(),
            ));
        }
        if param(params, "partnerCode") != self.config.partner_code {
            return Err(ServiceError::InvalidSignature(
                "MoMo partner code mismatch".into(),
            ));
        }

        let order_number = param(params, "orderId").trim();
        if order_number.is_empty() {
            return Err(ServiceError::ValidationError("MoMo callback without orderId".into()));
        }
        let amount: i64 = param(params, "amount")
            .trim()
            .parse()
            .map_err(|_| ServiceError::ValidationError("invalid MoMo amount".into()))?;
        let result_code = param(params, "resultCode").trim().to_string();
        let transaction_id = non_zero(param(params, "transId"));
        let idempotency_key = transaction_id
            .clone()
            .unwrap_or_else(|| format!("{}:{}", param(params, "requestId"), result_code));

        Ok(VerifiedCallback {
            provider: PaymentMethod::Momo,
            order_ref: OrderRef::Number(order_number.to_string()),
            transaction_id,
            idempotency_key,
            amount,
            success: result_code == "0",
            result_code,
            raw: params.clone(),
        })
    }
}
