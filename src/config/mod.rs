use serde::Deserialize;
use config::{Config, ConfigError, Environment, File};

use crate::domain::{GatewayName, RevenueSplit};

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    pub gateways: GatewaysConfig,
    pub policy: PolicyConfig,
    #[serde(default)]
    pub enrollment: EnrollmentConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub base_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuthConfig {
    /// Shared token the course platform presents on `/api` calls. When unset
    /// the API is open, which is only acceptable behind a private network.
    pub api_token: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GatewaysConfig {
    /// Gateway used for checkout when the request does not name one.
    pub default_checkout: String,
    pub primary_transfer: String,
    pub secondary_transfer: Option<String>,
    pub request_timeout_secs: u64,
    pub paystack: Option<PaystackConfig>,
    pub flutterwave: Option<FlutterwaveConfig>,
    pub stripe: Option<StripeConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaystackConfig {
    pub secret_key: String,
    #[serde(default = "default_paystack_url")]
    pub base_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FlutterwaveConfig {
    pub secret_key: String,
    /// Value Flutterwave echoes back in the `verif-hash` header.
    pub secret_hash: String,
    #[serde(default = "default_flutterwave_url")]
    pub base_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PolicyConfig {
    pub currency: String,
    pub instructor_share_rate: f64,
    pub refund_window_days: i64,
    /// Refunds at or below this amount skip manual review.
    pub refund_auto_approve_ceiling: i64,
    /// Payouts at or below this amount are disbursed by the batch job without
    /// an operator. Independent from the refund ceiling.
    pub payout_auto_process_ceiling: i64,
    pub minimum_payout: i64,
    /// Learners past this percentage of the course keep access after a full refund.
    pub access_retention_progress_percent: f64,
    pub name_match_threshold: f64,
    pub max_verification_attempts: i64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct EnrollmentConfig {
    pub base_url: Option<String>,
    pub api_token: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct NotificationConfig {
    #[serde(default)]
    pub log_events: bool,
    pub webhook_url: Option<String>,
}

fn default_paystack_url() -> String {
    "https://api.paystack.co".to_string()
}

fn default_flutterwave_url() -> String {
    "https://api.flutterwave.com/v3".to_string()
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.base_url", "http://localhost:8080")?
            .set_default("database.url", "sqlite://coursepay.db")?
            .set_default("database.max_connections", 10)?
            .set_default("gateways.default_checkout", "paystack")?
            .set_default("gateways.primary_transfer", "paystack")?
            .set_default("gateways.request_timeout_secs", 30)?
            .set_default("policy.currency", "NGN")?
            .set_default("policy.instructor_share_rate", 0.70)?
            .set_default("policy.refund_window_days", 30)?
            .set_default("policy.refund_auto_approve_ceiling", 5_000_000)?
            .set_default("policy.payout_auto_process_ceiling", 2_000_000)?
            .set_default("policy.minimum_payout", 500_000)?
            .set_default("policy.access_retention_progress_percent", 20.0)?
            .set_default("policy.name_match_threshold", 0.8)?
            .set_default("policy.max_verification_attempts", 3)?

            // Add config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))

            // Add environment variables (with COURSEPAY__ prefix, double underscore separates levels)
            .add_source(Environment::with_prefix("COURSEPAY").separator("__"))

            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate().map_err(ConfigError::Message)?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), String> {
        let policy = &self.policy;
        if !(policy.instructor_share_rate > 0.0 && policy.instructor_share_rate <= 1.0) {
            return Err(format!(
                "policy.instructor_share_rate must be in (0, 1], got {}",
                policy.instructor_share_rate
            ));
        }
        if !(policy.name_match_threshold > 0.0 && policy.name_match_threshold <= 1.0) {
            return Err("policy.name_match_threshold must be in (0, 1]".to_string());
        }
        if policy.refund_window_days <= 0 {
            return Err("policy.refund_window_days must be positive".to_string());
        }
        if policy.refund_auto_approve_ceiling < 0 || policy.payout_auto_process_ceiling < 0 {
            return Err("auto-processing ceilings cannot be negative".to_string());
        }
        if policy.minimum_payout <= 0 {
            return Err("policy.minimum_payout must be positive".to_string());
        }
        if policy.max_verification_attempts <= 0 {
            return Err("policy.max_verification_attempts must be positive".to_string());
        }

        let mut names = vec![&self.gateways.default_checkout, &self.gateways.primary_transfer];
        if let Some(secondary) = &self.gateways.secondary_transfer {
            names.push(secondary);
        }
        for name in names {
            name.parse::<GatewayName>().map_err(|e| e.to_string())?;
        }
        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                base_url: "http://localhost:8080".to_string(),
            },
            database: DatabaseConfig {
                url: "sqlite://coursepay.db".to_string(),
                max_connections: 10,
            },
            auth: AuthConfig::default(),
            gateways: GatewaysConfig {
                default_checkout: "paystack".to_string(),
                primary_transfer: "paystack".to_string(),
                secondary_transfer: None,
                request_timeout_secs: 30,
                paystack: None,
                flutterwave: None,
                stripe: None,
            },
            policy: PolicyConfig::default(),
            enrollment: EnrollmentConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

impl PolicyConfig {
    pub fn revenue_split(&self) -> RevenueSplit {
        RevenueSplit::from_rate(self.instructor_share_rate)
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            currency: "NGN".to_string(),
            instructor_share_rate: 0.70,
            refund_window_days: 30,
            refund_auto_approve_ceiling: 5_000_000,
            payout_auto_process_ceiling: 2_000_000,
            minimum_payout: 500_000,
            access_retention_progress_percent: 20.0,
            name_match_threshold: 0.8,
            max_verification_attempts: 3,
        }
    }
}
