use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::PaystackConfig;
use crate::domain::{
    ChargeConfirmation, GatewayName, GatewayStatus, InstructorBankAccount, Payment, WebhookEvent,
    WebhookEventKind,
};
use crate::error::{AppError, Result};
use crate::gateways::{
    json_id, send_json, signature, PaymentGateway, PaymentInitialization, RefundInitiation,
    ResolvedAccount, TransferInitiation, TransferRequest,
};

pub const SIGNATURE_HEADER: &str = "x-paystack-signature";

/// Paystack wraps every answer in `{ status, message, data }`.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: bool,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

impl<T> Envelope<T> {
    fn into_data(self) -> Result<T> {
        if !self.status {
            return Err(AppError::GatewayRejected(format!("paystack: {}", self.message)));
        }
        self.data.ok_or_else(|| {
            AppError::GatewayUnavailable(format!("paystack: response had no data ({})", self.message))
        })
    }
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    authorization_url: String,
    #[allow(dead_code)]
    access_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResolveData {
    account_number: String,
    account_name: String,
}

#[derive(Debug, Deserialize)]
struct RecipientData {
    recipient_code: String,
}

pub struct PaystackGateway {
    http: reqwest::Client,
    config: PaystackConfig,
}

impl PaystackGateway {
    pub fn new(http: reqwest::Client, config: PaystackConfig) -> Self {
        Self { http, config }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let request = self.http.get(self.url(path)).bearer_auth(&self.config.secret_key);
        send_json::<Envelope<Value>>(GatewayName::Paystack, request)
            .await?
            .into_data()
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        let request = self
            .http
            .post(self.url(path))
            .bearer_auth(&self.config.secret_key)
            .json(&body);
        send_json::<Envelope<Value>>(GatewayName::Paystack, request)
            .await?
            .into_data()
    }
}

/// Folds Paystack's transaction and transfer status strings.
pub fn map_status(status: &str) -> GatewayStatus {
    match status {
        "success" | "processed" => GatewayStatus::Success,
        "failed" | "reversed" | "rejected" => GatewayStatus::Failed,
        // "abandoned" only means the customer has not finished checkout yet.
        _ => GatewayStatus::Pending,
    }
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn text(value: &Value, pointer: &str) -> Option<String> {
    value
        .pointer(pointer)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn charge_confirmation(data: &Value) -> ChargeConfirmation {
    let status = map_status(data["status"].as_str().unwrap_or_default());
    ChargeConfirmation {
        status,
        amount: data["amount"].as_i64(),
        currency: text(data, "/currency"),
        gateway_fee: data["fees"].as_i64(),
        gateway_reference: json_id(&data["id"]),
        paid_at: parse_timestamp(&data["paid_at"]).or_else(|| parse_timestamp(&data["paidAt"])),
        failure_reason: match status {
            GatewayStatus::Failed => text(data, "/gateway_response")
                .or_else(|| text(data, "/message"))
                .or_else(|| Some("charge failed".to_string())),
            _ => None,
        },
        raw: data.clone(),
    }
}

/// Turns a Paystack webhook body into a provider-neutral event.
pub fn parse_event(payload: &[u8]) -> Result<WebhookEvent> {
    let raw: Value = serde_json::from_slice(payload)
        .map_err(|e| AppError::BadRequest(format!("malformed paystack payload: {}", e)))?;
    let event_type = raw["event"]
        .as_str()
        .ok_or_else(|| AppError::BadRequest("paystack payload has no event".to_string()))?
        .to_string();
    let data = raw["data"].clone();

    let kind = match event_type.as_str() {
        "charge.success" => WebhookEventKind::ChargeSucceeded,
        "charge.failed" => WebhookEventKind::ChargeFailed,
        "transfer.success" => WebhookEventKind::TransferSucceeded,
        "transfer.failed" | "transfer.reversed" => WebhookEventKind::TransferFailed,
        "refund.processed" => WebhookEventKind::RefundProcessed,
        "refund.failed" => WebhookEventKind::RefundFailed,
        "dedicatedaccount.assign.success" => WebhookEventKind::DedicatedAccountAssigned,
        _ => WebhookEventKind::Unrecognized,
    };

    let mut event = WebhookEvent::new(kind, event_type, raw.clone());
    event.amount = data["amount"].as_i64();
    event.currency = text(&data, "/currency");
    event.customer_email = text(&data, "/customer/email");

    match kind {
        WebhookEventKind::ChargeSucceeded | WebhookEventKind::ChargeFailed => {
            event.reference = text(&data, "/reference");
            event.gateway_reference = json_id(&data["id"]);
            event.gateway_fee = data["fees"].as_i64();
            event.reason = text(&data, "/gateway_response");
        }
        WebhookEventKind::TransferSucceeded | WebhookEventKind::TransferFailed => {
            event.reference = text(&data, "/reference");
            event.gateway_reference = text(&data, "/transfer_code");
            event.reason = text(&data, "/reason").or_else(|| text(&data, "/failures"));
        }
        WebhookEventKind::RefundProcessed | WebhookEventKind::RefundFailed => {
            event.reference = text(&data, "/transaction_reference")
                .or_else(|| text(&data, "/transaction/reference"));
            event.gateway_reference = json_id(&data["id"]).or_else(|| text(&data, "/refund_reference"));
            event.reason = text(&data, "/merchant_note").or_else(|| text(&data, "/customer_note"));
        }
        WebhookEventKind::DedicatedAccountAssigned => {
            event.account_number = text(&data, "/dedicated_account/account_number");
            event.bank_name = text(&data, "/dedicated_account/bank/name");
        }
        WebhookEventKind::Unrecognized => {}
    }

    Ok(event)
}

#[async_trait]
impl PaymentGateway for PaystackGateway {
    fn name(&self) -> GatewayName {
        GatewayName::Paystack
    }

    fn supports_transfers(&self) -> bool {
        true
    }

    async fn initialize_payment(
        &self,
        payment: &Payment,
        callback_url: Option<&str>,
    ) -> Result<PaymentInitialization> {
        let mut body = json!({
            "email": payment.customer_email,
            "amount": payment.amount,
            "currency": payment.currency,
            "reference": payment.reference,
            "metadata": {
                "user_id": payment.user_id,
                "course_id": payment.course_id,
                "instructor_id": payment.instructor_id,
            },
        });
        if let Some(callback_url) = callback_url {
            body["callback_url"] = json!(callback_url);
        }

        let data: InitializeData = serde_json::from_value(self.post("/transaction/initialize", body).await?)
            .map_err(|e| AppError::GatewayUnavailable(format!("paystack: {}", e)))?;

        Ok(PaymentInitialization {
            authorization_url: data.authorization_url,
            provider_reference: None,
        })
    }

    async fn verify_payment(&self, payment: &Payment) -> Result<ChargeConfirmation> {
        let path = format!(
            "/transaction/verify/{}",
            urlencoding::encode(&payment.reference)
        );
        let data = self.get(&path).await?;
        Ok(charge_confirmation(&data))
    }

    fn verify_webhook_signature(&self, payload: &[u8], signature: Option<&str>) -> bool {
        match signature {
            Some(sig) => signature::verify_hmac_sha512(self.config.secret_key.as_bytes(), payload, sig),
            None => false,
        }
    }

    fn signature_header(&self) -> &'static str {
        SIGNATURE_HEADER
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> Result<WebhookEvent> {
        parse_event(payload)
    }

    async fn initiate_refund(
        &self,
        payment: &Payment,
        amount: i64,
        reason: &str,
    ) -> Result<RefundInitiation> {
        let body = json!({
            "transaction": payment.gateway_reference.as_deref().unwrap_or(&payment.reference),
            "amount": amount,
            "currency": payment.currency,
            "merchant_note": reason,
        });
        let data = self.post("/refund", body).await?;

        Ok(RefundInitiation {
            provider_refund_reference: json_id(&data["id"]),
            status: map_status(data["status"].as_str().unwrap_or("pending")),
            raw: data,
        })
    }

    async fn resolve_account(&self, bank_code: &str, account_number: &str) -> Result<ResolvedAccount> {
        let path = format!(
            "/bank/resolve?account_number={}&bank_code={}",
            urlencoding::encode(account_number),
            urlencoding::encode(bank_code)
        );
        let data: ResolveData = serde_json::from_value(self.get(&path).await?)
            .map_err(|e| AppError::GatewayUnavailable(format!("paystack: {}", e)))?;

        Ok(ResolvedAccount {
            account_number: data.account_number,
            account_name: data.account_name,
            bank_code: bank_code.to_string(),
        })
    }

    async fn create_transfer_recipient(&self, account: &InstructorBankAccount) -> Result<String> {
        let body = json!({
            "type": "nuban",
            "name": account.verified_account_name.as_deref().unwrap_or(&account.account_name),
            "account_number": account.account_number,
            "bank_code": account.bank_code,
            "currency": "NGN",
        });
        let data: RecipientData = serde_json::from_value(self.post("/transferrecipient", body).await?)
            .map_err(|e| AppError::GatewayUnavailable(format!("paystack: {}", e)))?;
        Ok(data.recipient_code)
    }

    async fn initiate_transfer(&self, request: &TransferRequest) -> Result<TransferInitiation> {
        let recipient = request.recipient.as_deref().ok_or_else(|| {
            AppError::Validation("paystack transfers need a recipient code".to_string())
        })?;
        let body = json!({
            "source": "balance",
            "amount": request.amount,
            "currency": request.currency,
            "recipient": recipient,
            "reason": request.narration,
            "reference": request.reference,
        });
        let data = self.post("/transfer", body).await?;

        Ok(TransferInitiation {
            transfer_code: text(&data, "/transfer_code"),
            status: map_status(data["status"].as_str().unwrap_or("pending")),
            raw: data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_charge_success() {
        let body = json!({
            "event": "charge.success",
            "data": {
                "id": 302961,
                "reference": "PAY-ABC",
                "amount": 2000000,
                "currency": "NGN",
                "fees": 30000,
                "status": "success",
                "paid_at": "2026-09-14T10:00:00.000Z",
                "customer": { "email": "learner@example.com" }
            }
        });
        let event = parse_event(body.to_string().as_bytes()).unwrap();
        assert_eq!(event.kind, WebhookEventKind::ChargeSucceeded);
        assert_eq!(event.reference.as_deref(), Some("PAY-ABC"));
        assert_eq!(event.gateway_reference.as_deref(), Some("302961"));
        assert_eq!(event.amount, Some(2_000_000));
        assert_eq!(event.gateway_fee, Some(30_000));
        assert_eq!(event.customer_email.as_deref(), Some("learner@example.com"));
    }

    #[test]
    fn reversed_transfer_counts_as_failed() {
        let body = json!({
            "event": "transfer.reversed",
            "data": { "reference": "PO-1", "transfer_code": "TRF_x", "amount": 500000, "reason": "account closed" }
        });
        let event = parse_event(body.to_string().as_bytes()).unwrap();
        assert_eq!(event.kind, WebhookEventKind::TransferFailed);
        assert_eq!(event.reference.as_deref(), Some("PO-1"));
        assert_eq!(event.gateway_reference.as_deref(), Some("TRF_x"));
    }

    #[test]
    fn refund_events_carry_the_payment_reference() {
        let body = json!({
            "event": "refund.processed",
            "data": { "id": 771, "transaction_reference": "PAY-ABC", "amount": 500000, "status": "processed" }
        });
        let event = parse_event(body.to_string().as_bytes()).unwrap();
        assert_eq!(event.kind, WebhookEventKind::RefundProcessed);
        assert_eq!(event.reference.as_deref(), Some("PAY-ABC"));
        assert_eq!(event.gateway_reference.as_deref(), Some("771"));
    }

    #[test]
    fn unknown_event_is_unrecognized_not_an_error() {
        let body = json!({ "event": "subscription.create", "data": {} });
        let event = parse_event(body.to_string().as_bytes()).unwrap();
        assert_eq!(event.kind, WebhookEventKind::Unrecognized);
    }

    #[test]
    fn malformed_payload_is_rejected() {
        assert!(parse_event(b"not json").is_err());
        assert!(parse_event(br#"{"data":{}}"#).is_err());
    }

    #[test]
    fn verification_payload_maps_to_confirmation() {
        let data = json!({
            "id": 99, "status": "failed", "amount": 1000, "currency": "NGN",
            "gateway_response": "Declined"
        });
        let confirmation = charge_confirmation(&data);
        assert_eq!(confirmation.status, GatewayStatus::Failed);
        assert_eq!(confirmation.failure_reason.as_deref(), Some("Declined"));
        assert_eq!(map_status("ongoing"), GatewayStatus::Pending);
        assert_eq!(map_status("otp"), GatewayStatus::Pending);
    }

    #[test]
    fn unfinished_checkout_is_still_pending() {
        let data = json!({
            "id": 99, "status": "abandoned", "amount": 1000, "currency": "NGN",
            "gateway_response": "The transaction was not completed"
        });
        assert_eq!(charge_confirmation(&data).status, GatewayStatus::Pending);
        assert_eq!(map_status("queued"), GatewayStatus::Pending);
    }
}
