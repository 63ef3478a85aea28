//! Uniform adapter over the payment providers.
//!
//! Every provider call reports one of three outcomes: a decoded answer, an
//! explicit rejection (`GatewayRejected`), or an indeterminate failure
//! (`GatewayUnavailable`). Callers must never treat the last one as a failure
//! of the underlying charge, refund or transfer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::GatewaysConfig;
use crate::domain::{
    ChargeConfirmation, GatewayName, GatewayStatus, InstructorBankAccount, Payment, WebhookEvent,
};
use crate::error::{AppError, Result};

pub mod flutterwave;
pub mod paystack;
pub mod signature;
pub mod stripe;

#[cfg(any(test, feature = "test-utils"))]
pub mod fake;

pub use flutterwave::FlutterwaveGateway;
pub use paystack::PaystackGateway;
pub use self::stripe::StripeGateway;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentInitialization {
    pub authorization_url: String,
    /// Provider-side id known at initialization time (e.g. a checkout session).
    pub provider_reference: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundInitiation {
    pub provider_refund_reference: Option<String>,
    pub status: GatewayStatus,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedAccount {
    pub account_number: String,
    pub account_name: String,
    pub bank_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Our idempotency reference, unique per attempt.
    pub reference: String,
    pub amount: i64,
    pub currency: String,
    /// Provider recipient code or beneficiary id, when one was registered.
    pub recipient: Option<String>,
    pub account_number: String,
    pub bank_code: String,
    pub account_name: String,
    pub narration: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferInitiation {
    pub transfer_code: Option<String>,
    pub status: GatewayStatus,
    pub raw: serde_json::Value,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> GatewayName;

    fn supports_transfers(&self) -> bool {
        false
    }

    async fn initialize_payment(
        &self,
        payment: &Payment,
        callback_url: Option<&str>,
    ) -> Result<PaymentInitialization>;

    async fn verify_payment(&self, payment: &Payment) -> Result<ChargeConfirmation>;

    fn verify_webhook_signature(&self, payload: &[u8], signature: Option<&str>) -> bool;

    /// Header carrying the provider's webhook signature.
    fn signature_header(&self) -> &'static str;

    fn parse_webhook_event(&self, payload: &[u8]) -> Result<WebhookEvent>;

    async fn initiate_refund(
        &self,
        payment: &Payment,
        amount: i64,
        reason: &str,
    ) -> Result<RefundInitiation>;

    async fn resolve_account(&self, _bank_code: &str, _account_number: &str) -> Result<ResolvedAccount> {
        Err(AppError::Configuration(format!(
            "{} does not support account resolution",
            self.name()
        )))
    }

    async fn create_transfer_recipient(&self, _account: &InstructorBankAccount) -> Result<String> {
        Err(AppError::Configuration(format!(
            "{} does not support transfers",
            self.name()
        )))
    }

    async fn initiate_transfer(&self, _request: &TransferRequest) -> Result<TransferInitiation> {
        Err(AppError::Configuration(format!(
            "{} does not support transfers",
            self.name()
        )))
    }
}

/// Configured gateways plus the routing choices between them.
pub struct GatewayRegistry {
    gateways: HashMap<GatewayName, Arc<dyn PaymentGateway>>,
    default_checkout: GatewayName,
    primary_transfer: GatewayName,
    secondary_transfer: Option<GatewayName>,
}

impl GatewayRegistry {
    pub fn new(
        default_checkout: GatewayName,
        primary_transfer: GatewayName,
        secondary_transfer: Option<GatewayName>,
    ) -> Self {
        Self {
            gateways: HashMap::new(),
            default_checkout,
            primary_transfer,
            secondary_transfer,
        }
    }

    pub fn from_settings(config: &GatewaysConfig, callback_base: &str) -> Result<Self> {
        let parse = |name: &str| name.parse::<GatewayName>();
        let mut registry = Self::new(
            parse(&config.default_checkout)?,
            parse(&config.primary_transfer)?,
            config.secondary_transfer.as_deref().map(parse).transpose()?,
        );

        let timeout = Duration::from_secs(config.request_timeout_secs);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Configuration(e.to_string()))?;

        if let Some(paystack) = &config.paystack {
            registry.register(Arc::new(PaystackGateway::new(http.clone(), paystack.clone())));
        }
        if let Some(flutterwave) = &config.flutterwave {
            registry.register(Arc::new(FlutterwaveGateway::new(http.clone(), flutterwave.clone())));
        }
        if let Some(stripe) = &config.stripe {
            registry.register(Arc::new(StripeGateway::new(
                stripe.clone(),
                callback_base.to_string(),
                timeout,
            )));
        }

        Ok(registry)
    }

    pub fn register(&mut self, gateway: Arc<dyn PaymentGateway>) {
        tracing::info!("Registered payment gateway: {}", gateway.name());
        self.gateways.insert(gateway.name(), gateway);
    }

    pub fn get(&self, name: GatewayName) -> Result<Arc<dyn PaymentGateway>> {
        self.gateways
            .get(&name)
            .cloned()
            .ok_or_else(|| AppError::Configuration(format!("gateway {} is not configured", name)))
    }

    pub fn by_name(&self, name: &str) -> Result<Arc<dyn PaymentGateway>> {
        self.get(name.parse()?)
    }

    /// Gateway for a new checkout; the platform default unless one is requested.
    pub fn checkout(&self, requested: Option<&str>) -> Result<Arc<dyn PaymentGateway>> {
        match requested {
            Some(name) => self.by_name(name),
            None => self.get(self.default_checkout),
        }
    }

    /// Transfer-capable gateways in fallback order: primary, then secondary.
    pub fn transfer_chain(&self) -> Vec<Arc<dyn PaymentGateway>> {
        std::iter::once(self.primary_transfer)
            .chain(self.secondary_transfer)
            .filter_map(|name| self.gateways.get(&name).cloned())
            .filter(|gateway| gateway.supports_transfers())
            .collect()
    }
}

/// Sends a request and decodes a JSON answer, folding transport problems and
/// 5xx into `GatewayUnavailable` and 4xx into `GatewayRejected`.
pub(crate) async fn send_json<T: DeserializeOwned>(
    gateway: GatewayName,
    request: reqwest::RequestBuilder,
) -> Result<T> {
    let response = request.send().await.map_err(|e| {
        tracing::warn!("{} request failed: {}", gateway, e);
        AppError::GatewayUnavailable(format!("{}: {}", gateway, e))
    })?;

    let status = response.status();
    if status.is_server_error() {
        return Err(AppError::GatewayUnavailable(format!(
            "{} answered {}",
            gateway, status
        )));
    }
    if status.is_client_error() {
        let body = response.text().await.unwrap_or_default();
        return Err(AppError::GatewayRejected(format!(
            "{} answered {}: {}",
            gateway,
            status,
            provider_message(&body)
        )));
    }

    response.json::<T>().await.map_err(|e| {
        AppError::GatewayUnavailable(format!("{} returned an unreadable body: {}", gateway, e))
    })
}

fn provider_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.chars().take(200).collect())
}

/// Reads an id that providers send as either a number or a string.
pub(crate) fn json_id(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateways::fake::FakeGateway;

    #[test]
    fn transfer_chain_follows_configured_order_and_skips_non_transfer_gateways() {
        let mut registry = GatewayRegistry::new(
            GatewayName::Stripe,
            GatewayName::Flutterwave,
            Some(GatewayName::Paystack),
        );
        registry.register(Arc::new(FakeGateway::new(GatewayName::Paystack)));
        registry.register(Arc::new(FakeGateway::new(GatewayName::Flutterwave)));
        registry.register(Arc::new(FakeGateway::new(GatewayName::Stripe)));

        let chain: Vec<GatewayName> = registry.transfer_chain().iter().map(|g| g.name()).collect();
        assert_eq!(chain, vec![GatewayName::Flutterwave, GatewayName::Paystack]);
        assert_eq!(registry.checkout(None).unwrap().name(), GatewayName::Stripe);
    }

    #[test]
    fn unknown_or_unconfigured_gateway_is_a_configuration_error() {
        let registry = GatewayRegistry::new(GatewayName::Paystack, GatewayName::Paystack, None);
        assert!(matches!(registry.by_name("mpesa"), Err(AppError::Configuration(_))));
        assert!(matches!(registry.get(GatewayName::Paystack), Err(AppError::Configuration(_))));
    }

    #[test]
    fn json_id_accepts_numbers_and_strings() {
        assert_eq!(json_id(&serde_json::json!(4521)), Some("4521".to_string()));
        assert_eq!(json_id(&serde_json::json!("TRF_1")), Some("TRF_1".to_string()));
        assert_eq!(json_id(&serde_json::json!(null)), None);
    }
}
