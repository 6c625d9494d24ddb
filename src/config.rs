use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";

/// How a `free_shipping` coupon reduces the shipping fee.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FreeShippingPolicy {
    /// The whole shipping fee is waived.
    #[default]
    WaiveFull,
    /// The waiver is limited to the coupon's `discount_value` (0 means unlimited).
    CapAtValue,
}

#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ShippingConfig {
    #[validate(range(min = 0))]
    #[serde(default = "default_standard_fee")]
    pub standard_fee: i64,
    #[validate(range(min = 0))]
    #[serde(default = "default_express_fee")]
    pub express_fee: i64,
}

impl Default for ShippingConfig {
    fn default() -> Self {
        Self {
            standard_fee: default_standard_fee(),
            express_fee: default_express_fee(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct CouponConfig {
    #[serde(default)]
    pub free_shipping_policy: FreeShippingPolicy,
}

#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct OrderConfig {
    /// Attempts at drawing an unused order number before giving up
    #[validate(range(min = 1, max = 50))]
    #[serde(default = "default_number_max_attempts")]
    pub number_max_attempts: u32,
}

impl Default for OrderConfig {
    fn default() -> Self {
        Self {
            number_max_attempts: default_number_max_attempts(),
        }
    }
}

/// MoMo wallet (captureWallet) credentials
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MomoConfig {
    pub partner_code: String,
    pub access_key: String,
    pub secret_key: String,
    #[serde(default = "default_momo_endpoint")]
    pub endpoint: String,
    pub redirect_url: String,
    pub ipn_url: String,
    #[serde(default = "default_momo_request_type")]
    pub request_type: String,
    #[serde(default = "default_momo_lang")]
    pub lang: String,
}

/// VNPay merchant credentials
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VnpayConfig {
    pub tmn_code: String,
    pub hash_secret: String,
    #[serde(default = "default_vnpay_payment_url")]
    pub payment_url: String,
    pub return_url: String,
    #[serde(default = "default_vnpay_expire_minutes")]
    pub expire_minutes: i64,
    #[serde(default = "default_vnpay_locale")]
    pub locale: String,
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    #[validate(length(min = 1))]
    pub database_url: String,

    /// JWT secret key shared with the account service
    #[validate(length(min = 32), custom = "validate_jwt_secret")]
    pub jwt_secret: String,

    /// JWT expiration time in seconds, used when minting tokens
    #[serde(default = "default_jwt_expiration")]
    pub jwt_expiration: u64,

    #[serde(default = "default_auth_issuer")]
    pub auth_issuer: String,

    #[serde(default = "default_auth_audience")]
    pub auth_audience: String,

    /// Server host address
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[validate(length(min = 1))]
    pub environment: String,

    #[validate(custom = "validate_log_level")]
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// Comma separated list of allowed CORS origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    #[serde(default)]
    pub cors_allow_any_origin: bool,

    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Per-request timeout applied by the HTTP stack
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_currency")]
    pub currency: String,

    /// Tax rate applied to the discounted subtotal (0.0 - 1.0)
    #[validate(custom = "validate_tax_rate")]
    #[serde(default)]
    pub tax_rate: f64,

    /// Storefront base URL that payment results are redirected to
    #[serde(default = "default_frontend_url")]
    pub frontend_url: String,

    #[serde(default = "default_payment_result_path")]
    pub payment_result_path: String,

    /// Timeout for outbound payment gateway calls
    #[validate(range(min = 1, max = 120))]
    #[serde(default = "default_gateway_timeout_secs")]
    pub gateway_timeout_secs: u64,

    #[validate]
    #[serde(default)]
    pub shipping: ShippingConfig,

    #[serde(default)]
    pub coupons: CouponConfig,

    #[validate]
    #[serde(default)]
    pub orders: OrderConfig,

    #[serde(default)]
    pub momo: Option<MomoConfig>,

    #[serde(default)]
    pub vnpay: Option<VnpayConfig>,
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),
    #[error("invalid configuration: {0}")]
    Validation(#[from] ValidationErrors),
}

impl AppConfig {
    /// Creates a configuration with defaults for everything but the essentials.
    pub fn new(database_url: String, jwt_secret: String, environment: String) -> Self {
        Self {
            database_url,
            jwt_secret,
            jwt_expiration: default_jwt_expiration(),
            auth_issuer: default_auth_issuer(),
            auth_audience: default_auth_audience(),
            host: "0.0.0.0".to_string(),
            port: default_port(),
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            currency: default_currency(),
            tax_rate: 0.0,
            frontend_url: default_frontend_url(),
            payment_result_path: default_payment_result_path(),
            gateway_timeout_secs: default_gateway_timeout_secs(),
            shipping: ShippingConfig::default(),
            coupons: CouponConfig::default(),
            orders: OrderConfig::default(),
            momo: None,
            vnpay: None,
        }
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
            || self.environment.eq_ignore_ascii_case("test")
    }

    /// Returns true if explicit CORS origins are configured
    pub fn has_cors_allowed_origins(&self) -> bool {
        self.cors_allowed_origins
            .as_ref()
            .map(|raw| raw.split(',').any(|origin| !origin.trim().is_empty()))
            .unwrap_or(false)
    }

    /// Whether we should fall back to permissive CORS
    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.cors_allow_any_origin
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// Tax rate as an exact decimal.
    pub fn tax_rate_decimal(&self) -> Decimal {
        Decimal::try_from(self.tax_rate).unwrap_or(Decimal::ZERO)
    }

    /// Where the shopper lands after a gateway round trip.
    pub fn payment_result_url(&self) -> String {
        format!(
            "{}{}",
            self.frontend_url.trim_end_matches('/'),
            self.payment_result_path
        )
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.is_development()
            && !self.has_cors_allowed_origins()
            && !self.cors_allow_any_origin
        {
            let mut err = ValidationError::new("cors_allowed_origins");
            err.message = Some(
                "Set APP__CORS_ALLOWED_ORIGINS or APP__CORS_ALLOW_ANY_ORIGIN outside development"
                    .into(),
            );
            errors.add("cors_allowed_origins", err);
        }

        if let Some(momo) = &self.momo {
            if [&momo.partner_code, &momo.access_key, &momo.secret_key]
                .iter()
                .any(|v| v.trim().is_empty())
            {
                let mut err = ValidationError::new("momo");
                err.message = Some("momo partner_code, access_key and secret_key are required".into());
                errors.add("momo", err);
            }
        }

        if let Some(vnpay) = &self.vnpay {
            if vnpay.tmn_code.trim().is_empty() || vnpay.hash_secret.trim().is_empty() {
                let mut err = ValidationError::new("vnpay");
                err.message = Some("vnpay tmn_code and hash_secret are required".into());
                errors.add("vnpay", err);
            }
            if vnpay.expire_minutes <= 0 {
                let mut err = ValidationError::new("vnpay");
                err.message = Some("vnpay expire_minutes must be positive".into());
                errors.add("vnpay", err);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_jwt_expiration() -> u64 {
    3600
}

fn default_auth_issuer() -> String {
    "storefront-auth".to_string()
}

fn default_auth_audience() -> String {
    "storefront-api".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_currency() -> String {
    "VND".to_string()
}

fn default_frontend_url() -> String {
    "http://localhost:5173".to_string()
}

fn default_payment_result_path() -> String {
    "/payment-success".to_string()
}

fn default_gateway_timeout_secs() -> u64 {
    15
}

fn default_standard_fee() -> i64 {
    0
}

fn default_express_fee() -> i64 {
    30_000
}

fn default_number_max_attempts() -> u32 {
    5
}

fn default_momo_endpoint() -> String {
    "https://test-payment.momo.vn/v2/gateway/api/create".to_string()
}

fn default_momo_request_type() -> String {
    "captureWallet".to_string()
}

fn default_momo_lang() -> String {
    "vi".to_string()
}

fn default_vnpay_payment_url() -> String {
    "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html".to_string()
}

fn default_vnpay_expire_minutes() -> i64 {
    15
}

fn default_vnpay_locale() -> String {
    "vn".to_string()
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_jwt_secret(secret: &str) -> Result<(), ValidationError> {
    let trimmed = secret.trim();

    const DISALLOWED: [&str; 3] = ["your-secret-key", "default-secret-key", "changeme"];
    if DISALLOWED
        .iter()
        .any(|&bad| trimmed.eq_ignore_ascii_case(bad))
    {
        let mut err = ValidationError::new("jwt_secret");
        err.message = Some("JWT secret must be overridden with a secure random value".into());
        return Err(err);
    }

    let unique_chars: std::collections::HashSet<char> = trimmed.chars().collect();
    if unique_chars.len() < 10 {
        let mut err = ValidationError::new("jwt_secret");
        err.message =
            Some("JWT secret must have at least 10 unique characters for adequate entropy".into());
        return Err(err);
    }

    Ok(())
}

fn validate_tax_rate(rate: f64) -> Result<(), ValidationError> {
    if !rate.is_finite() || !(0.0..=1.0).contains(&rate) {
        let mut err = ValidationError::new("tax_rate");
        err.message = Some("tax_rate must be a finite value between 0.0 and 1.0".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("storefront_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    load_config_from(Path::new(CONFIG_DIR))
}

pub fn load_config_from(config_dir: &Path) -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !config_dir.exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            config_dir.display()
        );
    }

    // jwt_secret has no default and must come from a file or APP__JWT_SECRET.
    let config = Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT)?
        .set_default("environment", run_env.as_str())?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .add_source(File::from(config_dir.join("default")).required(false))
        .add_source(File::from(config_dir.join(&run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    if config.get_string("jwt_secret").is_err() {
        error!("JWT secret is not configured. Set APP__JWT_SECRET.");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "jwt_secret is required but not configured. Set APP__JWT_SECRET environment variable."
                .into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration constraint validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const SECRET: &str = "k3y-for-unit-tests-9f8e7d6c5b4a3210zyxw";

    fn base_config() -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".into(),
            SECRET.into(),
            "production".into(),
        )
    }

    #[test]
    fn non_dev_requires_cors_origins() {
        let cfg = base_config();
        assert!(cfg.validate_additional_constraints().is_err());
    }

    #[test]
    fn non_dev_with_origins_passes() {
        let mut cfg = base_config();
        cfg.cors_allowed_origins = Some("https://shop.example.com".into());
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn incomplete_gateway_section_is_rejected() {
        let mut cfg = base_config();
        cfg.cors_allow_any_origin = true;
        cfg.vnpay = Some(VnpayConfig {
            tmn_code: "DEMO".into(),
            hash_secret: " ".into(),
            payment_url: default_vnpay_payment_url(),
            return_url: "http://localhost/return".into(),
            expire_minutes: 15,
            locale: "vn".into(),
        });
        let errors = cfg.validate_additional_constraints().unwrap_err();
        assert!(errors.field_errors().contains_key("vnpay"));
    }

    #[test]
    fn weak_jwt_secret_is_rejected() {
        assert!(validate_jwt_secret("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").is_err());
        assert!(validate_jwt_secret("your-secret-key").is_err());
        assert!(validate_jwt_secret(SECRET).is_ok());
    }

    #[test]
    fn tax_rate_bounds() {
        assert!(validate_tax_rate(0.1).is_ok());
        assert!(validate_tax_rate(1.5).is_err());
        assert!(validate_tax_rate(f64::NAN).is_err());
    }

    #[test]
    fn payment_result_url_joins_without_double_slash() {
        let mut cfg = base_config();
        cfg.frontend_url = "https://shop.example.com/".into();
        assert_eq!(
            cfg.payment_result_url(),
            "https://shop.example.com/payment-success"
        );
    }

    #[test]
    fn loads_layered_file_config() {
        let dir = TempDir::new().unwrap();
        let mut file = std::fs::File::create(dir.path().join("default.toml")).unwrap();
        writeln!(
            file,
            r#"
            jwt_secret = "{SECRET}"
            environment = "development"
            tax_rate = 0.08

            [shipping]
            express_fee = 45000

            [coupons]
            free_shipping_policy = "cap_at_value"

            [vnpay]
            tmn_code = "DEMOTMN1"
            hash_secret = "SECRETHASHKEY"
            return_url = "http://localhost:8080/api/v1/payments/vnpay/return"
            "#
        )
        .unwrap();

        let cfg = load_config_from(dir.path()).unwrap();
        assert_eq!(cfg.shipping.express_fee, 45_000);
        assert_eq!(cfg.shipping.standard_fee, 0);
        assert_eq!(cfg.coupons.free_shipping_policy, FreeShippingPolicy::CapAtValue);
        assert_eq!(cfg.vnpay.as_ref().unwrap().expire_minutes, 15);
        assert!(cfg.momo.is_none());
        assert_eq!(cfg.tax_rate_decimal().to_string(), "0.08");
    }
}
