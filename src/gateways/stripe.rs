use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use stripe::{
    CheckoutSession, CheckoutSessionId, CheckoutSessionMode, CheckoutSessionPaymentStatus,
    CheckoutSessionStatus, Client, CreateCheckoutSession, CreateCheckoutSessionLineItems,
    CreateRefund, Currency, Event, EventObject, EventType, PaymentIntentId, Refund, StripeError,
    Webhook,
};

use crate::config::StripeConfig;
use crate::domain::{
    ChargeConfirmation, GatewayName, GatewayStatus, Payment, WebhookEvent, WebhookEventKind,
};
use crate::error::{AppError, Result};
use crate::gateways::{PaymentGateway, PaymentInitialization, RefundInitiation};

pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Card checkout and refunds through Stripe Checkout. Stripe is never used
/// for instructor payouts here, so the transfer operations keep their
/// unsupported defaults.
pub struct StripeGateway {
    client: Client,
    webhook_secret: String,
    return_base_url: String,
    timeout: Duration,
}

impl StripeGateway {
    pub fn new(config: StripeConfig, return_base_url: String, timeout: Duration) -> Self {
        Self {
            client: Client::new(config.secret_key),
            webhook_secret: config.webhook_secret,
            return_base_url,
            timeout,
        }
    }

    async fn call<T, F>(&self, future: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, StripeError>> + Send,
    {
        match tokio::time::timeout(self.timeout, future).await {
            Ok(result) => result.map_err(map_stripe_error),
            Err(_) => Err(AppError::GatewayUnavailable(
                "stripe: request timed out".to_string(),
            )),
        }
    }
}

fn map_stripe_error(err: StripeError) -> AppError {
    match err {
        StripeError::Stripe(ref request) if (400..500).contains(&request.http_status) => {
            AppError::GatewayRejected(format!("stripe: {}", err))
        }
        other => AppError::GatewayUnavailable(format!("stripe: {}", other)),
    }
}

pub fn stripe_currency(code: &str) -> Result<Currency> {
    match code.to_ascii_uppercase().as_str() {
        "USD" => Ok(Currency::USD),
        "NGN" => Ok(Currency::NGN),
        "GBP" => Ok(Currency::GBP),
        "EUR" => Ok(Currency::EUR),
        other => Err(AppError::Validation(format!(
            "stripe checkout does not support currency {}",
            other
        ))),
    }
}

fn session_confirmation(session: &CheckoutSession) -> ChargeConfirmation {
    let status = if session.payment_status == CheckoutSessionPaymentStatus::Paid {
        GatewayStatus::Success
    } else if session.status == Some(CheckoutSessionStatus::Expired) {
        GatewayStatus::Failed
    } else {
        GatewayStatus::Pending
    };

    ChargeConfirmation {
        status,
        amount: session.amount_total,
        currency: session.currency.as_ref().map(|c| c.to_string().to_uppercase()),
        gateway_fee: None,
        gateway_reference: session.payment_intent.as_ref().map(|pi| pi.id().to_string()),
        paid_at: None,
        failure_reason: match status {
            GatewayStatus::Failed => Some("checkout session expired".to_string()),
            _ => None,
        },
        raw: serde_json::to_value(session).unwrap_or(Value::Null),
    }
}

/// Maps a Stripe event onto the shared event vocabulary. Checkout sessions
/// carry our payment reference in `client_reference_id`.
pub fn map_event(event: Event, raw: Value) -> WebhookEvent {
    let event_type = raw["type"].as_str().unwrap_or("unknown").to_string();

    match (event.type_, event.data.object) {
        (
            EventType::CheckoutSessionCompleted | EventType::CheckoutSessionAsyncPaymentSucceeded,
            EventObject::CheckoutSession(session),
        ) if session.payment_status == CheckoutSessionPaymentStatus::Paid => {
            session_event(WebhookEventKind::ChargeSucceeded, event_type, &session, raw)
        }
        (
            EventType::CheckoutSessionAsyncPaymentFailed | EventType::CheckoutSessionExpired,
            EventObject::CheckoutSession(session),
        ) => session_event(WebhookEventKind::ChargeFailed, event_type, &session, raw),
        (EventType::ChargeRefunded, EventObject::Charge(charge)) => {
            let mut mapped = WebhookEvent::new(WebhookEventKind::RefundProcessed, event_type, raw);
            mapped.gateway_reference = charge.payment_intent.as_ref().map(|pi| pi.id().to_string());
            mapped.amount = Some(charge.amount_refunded);
            mapped.currency = Some(charge.currency.to_string().to_uppercase());
            mapped
        }
        _ => WebhookEvent::new(WebhookEventKind::Unrecognized, event_type, raw),
    }
}

fn session_event(
    kind: WebhookEventKind,
    event_type: String,
    session: &CheckoutSession,
    raw: Value,
) -> WebhookEvent {
    let mut mapped = WebhookEvent::new(kind, event_type, raw);
    mapped.reference = session.client_reference_id.clone();
    mapped.gateway_reference = session.payment_intent.as_ref().map(|pi| pi.id().to_string());
    mapped.amount = session.amount_total;
    mapped.currency = session.currency.as_ref().map(|c| c.to_string().to_uppercase());
    mapped.customer_email = session.customer_email.clone();
    mapped
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn name(&self) -> GatewayName {
        GatewayName::Stripe
    }

    async fn initialize_payment(
        &self,
        payment: &Payment,
        callback_url: Option<&str>,
    ) -> Result<PaymentInitialization> {
        let currency = stripe_currency(&payment.currency)?;
        let return_url = callback_url
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}/payments/{}", self.return_base_url, payment.reference));

        let mut params = CreateCheckoutSession::new();
        params.mode = Some(CheckoutSessionMode::Payment);
        params.success_url = Some(&return_url);
        params.cancel_url = Some(&return_url);
        params.client_reference_id = Some(&payment.reference);
        params.customer_email = Some(&payment.customer_email);
        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            price_data: Some(stripe::CreateCheckoutSessionLineItemsPriceData {
                currency,
                unit_amount: Some(payment.amount),
                product_data: Some(stripe::CreateCheckoutSessionLineItemsPriceDataProductData {
                    name: "Course enrollment".to_string(),
                    description: Some(format!("Course {}", payment.course_id)),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            quantity: Some(1),
            ..Default::default()
        }]);

        let mut metadata = HashMap::new();
        metadata.insert("payment_reference".to_string(), payment.reference.clone());
        metadata.insert("course_id".to_string(), payment.course_id.to_string());
        metadata.insert("user_id".to_string(), payment.user_id.to_string());
        params.metadata = Some(metadata);

        let session = self.call(CheckoutSession::create(&self.client, params)).await?;
        let url = session
            .url
            .clone()
            .ok_or_else(|| AppError::GatewayUnavailable("stripe: no checkout URL returned".to_string()))?;

        Ok(PaymentInitialization {
            authorization_url: url,
            provider_reference: Some(session.id.to_string()),
        })
    }

    async fn verify_payment(&self, payment: &Payment) -> Result<ChargeConfirmation> {
        let session_id = payment
            .gateway_reference
            .as_deref()
            .ok_or_else(|| {
                AppError::Validation(format!("payment {} has no checkout session", payment.reference))
            })?
            .parse::<CheckoutSessionId>()
            .map_err(|e| AppError::Validation(format!("invalid checkout session id: {}", e)))?;

        let session = self
            .call(CheckoutSession::retrieve(&self.client, &session_id, &[]))
            .await?;
        Ok(session_confirmation(&session))
    }

    fn verify_webhook_signature(&self, payload: &[u8], signature: Option<&str>) -> bool {
        let (Some(signature), Ok(body)) = (signature, std::str::from_utf8(payload)) else {
            return false;
        };
        Webhook::construct_event(body, signature, &self.webhook_secret).is_ok()
    }

    fn signature_header(&self) -> &'static str {
        SIGNATURE_HEADER
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> Result<WebhookEvent> {
        let raw: Value = serde_json::from_slice(payload)
            .map_err(|e| AppError::BadRequest(format!("malformed stripe payload: {}", e)))?;
        match serde_json::from_value::<Event>(raw.clone()) {
            Ok(event) => Ok(map_event(event, raw)),
            Err(e) => {
                tracing::debug!("Stripe event not decodable, treating as unrecognized: {}", e);
                let event_type = raw["type"].as_str().unwrap_or("unknown").to_string();
                Ok(WebhookEvent::new(WebhookEventKind::Unrecognized, event_type, raw))
            }
        }
    }

    async fn initiate_refund(
        &self,
        payment: &Payment,
        amount: i64,
        reason: &str,
    ) -> Result<RefundInitiation> {
        let payment_intent = payment
            .gateway_reference
            .as_deref()
            .ok_or_else(|| {
                AppError::Validation(format!("payment {} has no payment intent", payment.reference))
            })?
            .parse::<PaymentIntentId>()
            .map_err(|e| AppError::Validation(format!("invalid payment intent id: {}", e)))?;

        let mut metadata = HashMap::new();
        metadata.insert("payment_reference".to_string(), payment.reference.clone());
        metadata.insert("reason".to_string(), reason.chars().take(450).collect());

        let mut params = CreateRefund::new();
        params.payment_intent = Some(payment_intent);
        params.amount = Some(amount);
        params.metadata = Some(metadata);

        let refund = self.call(Refund::create(&self.client, params)).await?;

        // Card refunds settle asynchronously; `charge.refunded` confirms them.
        Ok(RefundInitiation {
            provider_refund_reference: Some(refund.id.to_string()),
            status: GatewayStatus::Pending,
            raw: serde_json::to_value(&refund).unwrap_or(Value::Null),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn currency_mapping() {
        assert_eq!(stripe_currency("usd").unwrap(), Currency::USD);
        assert_eq!(stripe_currency("NGN").unwrap(), Currency::NGN);
        assert!(matches!(stripe_currency("XOF"), Err(AppError::Validation(_))));
    }

    #[test]
    fn missing_signature_is_rejected() {
        let gateway = StripeGateway::new(
            StripeConfig {
                secret_key: "sk_test_123".into(),
                webhook_secret: "whsec_test".into(),
            },
            "http://localhost:8080".into(),
            Duration::from_secs(5),
        );
        assert!(!gateway.verify_webhook_signature(b"{}", None));
        assert!(!gateway.verify_webhook_signature(b"{}", Some("t=1,v1=deadbeef")));
    }

    #[test]
    fn undecodable_event_is_unrecognized() {
        let gateway = StripeGateway::new(
            StripeConfig {
                secret_key: "sk_test_123".into(),
                webhook_secret: "whsec_test".into(),
            },
            "http://localhost:8080".into(),
            Duration::from_secs(5),
        );
        let event = gateway
            .parse_webhook_event(br#"{"type":"customer.created","data":{}}"#)
            .unwrap();
        assert_eq!(event.kind, WebhookEventKind::Unrecognized);
        assert_eq!(event.event_type, "customer.created");
    }
}
