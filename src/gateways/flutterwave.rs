use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::FlutterwaveConfig;
use crate::domain::{
    from_major_units, to_major_units, ChargeConfirmation, GatewayName, GatewayStatus,
    InstructorBankAccount, Payment, WebhookEvent, WebhookEventKind,
};
use crate::error::{AppError, Result};
use crate::gateways::{
    json_id, send_json, signature, PaymentGateway, PaymentInitialization, RefundInitiation,
    ResolvedAccount, TransferInitiation, TransferRequest,
};

pub const SIGNATURE_HEADER: &str = "verif-hash";

/// Flutterwave answers `{ status: "success" | "error", message, data }` and
/// quotes amounts in major units.
#[derive(Debug, Deserialize)]
struct Envelope {
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Value,
}

impl Envelope {
    fn into_data(self) -> Result<Value> {
        if self.status != "success" {
            return Err(AppError::GatewayRejected(format!("flutterwave: {}", self.message)));
        }
        if self.data.is_null() {
            return Err(AppError::GatewayUnavailable(format!(
                "flutterwave: response had no data ({})",
                self.message
            )));
        }
        Ok(self.data)
    }
}

pub struct FlutterwaveGateway {
    http: reqwest::Client,
    config: FlutterwaveConfig,
}

impl FlutterwaveGateway {
    pub fn new(http: reqwest::Client, config: FlutterwaveConfig) -> Self {
        Self { http, config }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let request = self.http.get(self.url(path)).bearer_auth(&self.config.secret_key);
        send_json::<Envelope>(GatewayName::Flutterwave, request)
            .await?
            .into_data()
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        let request = self
            .http
            .post(self.url(path))
            .bearer_auth(&self.config.secret_key)
            .json(&body);
        send_json::<Envelope>(GatewayName::Flutterwave, request)
            .await?
            .into_data()
    }
}

pub fn map_status(status: &str) -> GatewayStatus {
    match status.to_ascii_lowercase().as_str() {
        "successful" | "success" | "completed" => GatewayStatus::Success,
        "failed" | "cancelled" | "error" => GatewayStatus::Failed,
        _ => GatewayStatus::Pending,
    }
}

fn minor(value: &Value) -> Option<i64> {
    value.as_f64().map(from_major_units)
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
        amount: minor(&data["amount"]),
        currency: text(data, "/currency"),
        gateway_fee: minor(&data["app_fee"]),
        gateway_reference: json_id(&data["id"]),
        paid_at: data["created_at"]
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
        failure_reason: match status {
            GatewayStatus::Failed => text(data, "/processor_response")
                .or_else(|| Some("charge failed".to_string())),
            _ => None,
        },
        raw: data.clone(),
    }
}

pub fn parse_event(payload: &[u8]) -> Result<WebhookEvent> {
    let raw: Value = serde_json::from_slice(payload)
        .map_err(|e| AppError::BadRequest(format!("malformed flutterwave payload: {}", e)))?;
    let event_type = raw["event"]
        .as_str()
        .or_else(|| raw["event.type"].as_str())
        .ok_or_else(|| AppError::BadRequest("flutterwave payload has no event".to_string()))?
        .to_string();
    let data = raw["data"].clone();
    let status = map_status(data["status"].as_str().unwrap_or_default());

    let kind = match (event_type.as_str(), status) {
        ("charge.completed", GatewayStatus::Success) => WebhookEventKind::ChargeSucceeded,
        ("charge.completed", GatewayStatus::Failed) => WebhookEventKind::ChargeFailed,
        ("transfer.completed", GatewayStatus::Success) => WebhookEventKind::TransferSucceeded,
        ("transfer.completed", GatewayStatus::Failed) => WebhookEventKind::TransferFailed,
        ("refund.completed", GatewayStatus::Success) => WebhookEventKind::RefundProcessed,
        ("refund.completed", GatewayStatus::Failed) => WebhookEventKind::RefundFailed,
        _ => WebhookEventKind::Unrecognized,
    };

    let mut event = WebhookEvent::new(kind, event_type, raw.clone());
    event.currency = text(&data, "/currency");
    event.customer_email = text(&data, "/customer/email");

    match kind {
        WebhookEventKind::ChargeSucceeded | WebhookEventKind::ChargeFailed => {
            event.reference = text(&data, "/tx_ref");
            event.gateway_reference = json_id(&data["id"]);
            event.amount = minor(&data["amount"]);
            event.gateway_fee = minor(&data["app_fee"]);
            event.reason = text(&data, "/processor_response");
        }
        WebhookEventKind::TransferSucceeded | WebhookEventKind::TransferFailed => {
            event.reference = text(&data, "/reference");
            event.gateway_reference = json_id(&data["id"]);
            event.amount = minor(&data["amount"]);
            event.reason = text(&data, "/complete_message");
        }
        WebhookEventKind::RefundProcessed | WebhookEventKind::RefundFailed => {
            event.reference = text(&data, "/tx_ref");
            event.gateway_reference = json_id(&data["id"]);
            event.amount = minor(&data["amount_refunded"]).or_else(|| minor(&data["amount"]));
            event.reason = text(&data, "/comments");
        }
        _ => {}
    }

    Ok(event)
}

#[async_trait]
impl PaymentGateway for FlutterwaveGateway {
    fn name(&self) -> GatewayName {
        GatewayName::Flutterwave
    }

    fn supports_transfers(&self) -> bool {
        true
    }

    async fn initialize_payment(
        &self,
        payment: &Payment,
        callback_url: Option<&str>,
    ) -> Result<PaymentInitialization> {
        let body = json!({
            "tx_ref": payment.reference,
            "amount": to_major_units(payment.amount),
            "currency": payment.currency,
            "redirect_url": callback_url,
            "customer": {
                "email": payment.customer_email,
                "name": payment.customer_name,
                "phonenumber": payment.customer_phone,
            },
            "meta": {
                "user_id": payment.user_id,
                "course_id": payment.course_id,
                "instructor_id": payment.instructor_id,
            },
        });
        let data = self.post("/payments", body).await?;
        let link = text(&data, "/link")
            .ok_or_else(|| AppError::GatewayUnavailable("flutterwave: no payment link".to_string()))?;

        Ok(PaymentInitialization {
            authorization_url: link,
            provider_reference: None,
        })
    }

    async fn verify_payment(&self, payment: &Payment) -> Result<ChargeConfirmation> {
        let path = format!(
            "/transactions/verify_by_reference?tx_ref={}",
            urlencoding::encode(&payment.reference)
        );
        let data = self.get(&path).await?;
        Ok(charge_confirmation(&data))
    }

    fn verify_webhook_signature(&self, _payload: &[u8], signature: Option<&str>) -> bool {
        match signature {
            Some(presented) => signature::secrets_match(&self.config.secret_hash, presented),
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
        let transaction_id = payment.gateway_reference.as_deref().ok_or_else(|| {
            AppError::Validation(format!(
                "payment {} has no flutterwave transaction id",
                payment.reference
            ))
        })?;
        let body = json!({
            "amount": to_major_units(amount),
            "comments": reason,
        });
        let path = format!("/transactions/{}/refund", urlencoding::encode(transaction_id));
        let data = self.post(&path, body).await?;

        Ok(RefundInitiation {
            provider_refund_reference: json_id(&data["id"]),
            status: map_status(data["status"].as_str().unwrap_or("pending")),
            raw: data,
        })
    }

    async fn resolve_account(&self, bank_code: &str, account_number: &str) -> Result<ResolvedAccount> {
        let body = json!({
            "account_number": account_number,
            "account_bank": bank_code,
        });
        let data = self.post("/accounts/resolve", body).await?;
        let account_name = text(&data, "/account_name").ok_or_else(|| {
            AppError::GatewayRejected("flutterwave: account could not be resolved".to_string())
        })?;

        Ok(ResolvedAccount {
            account_number: text(&data, "/account_number").unwrap_or_else(|| account_number.to_string()),
            account_name,
            bank_code: bank_code.to_string(),
        })
    }

    async fn create_transfer_recipient(&self, account: &InstructorBankAccount) -> Result<String> {
        let body = json!({
            "account_number": account.account_number,
            "account_bank": account.bank_code,
            "beneficiary_name": account.verified_account_name.as_deref().unwrap_or(&account.account_name),
        });
        let data = self.post("/beneficiaries", body).await?;
        json_id(&data["id"]).ok_or_else(|| {
            AppError::GatewayUnavailable("flutterwave: beneficiary has no id".to_string())
        })
    }

    async fn initiate_transfer(&self, request: &TransferRequest) -> Result<TransferInitiation> {
        let body = json!({
            "account_bank": request.bank_code,
            "account_number": request.account_number,
            "amount": to_major_units(request.amount),
            "currency": request.currency,
            "narration": request.narration,
            "reference": request.reference,
            "beneficiary_name": request.account_name,
        });
        let data = self.post("/transfers", body).await?;

        Ok(TransferInitiation {
            transfer_code: json_id(&data["id"]),
            status: map_status(data["status"].as_str().unwrap_or("pending")),
            raw: data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charge_completed_converts_major_units() {
        let body = json!({
            "event": "charge.completed",
            "data": {
                "id": 285959875,
                "tx_ref": "PAY-XYZ",
                "amount": 20000.5,
                "app_fee": 280,
                "currency": "NGN",
                "status": "successful",
                "customer": { "email": "learner@example.com" }
            }
        });
        let event = parse_event(body.to_string().as_bytes()).unwrap();
        assert_eq!(event.kind, WebhookEventKind::ChargeSucceeded);
        assert_eq!(event.reference.as_deref(), Some("PAY-XYZ"));
        assert_eq!(event.amount, Some(2_000_050));
        assert_eq!(event.gateway_fee, Some(28_000));
        assert_eq!(event.gateway_reference.as_deref(), Some("285959875"));
    }

    #[test]
    fn failed_charge_and_transfer_statuses() {
        let failed_charge = json!({
            "event": "charge.completed",
            "data": { "id": 1, "tx_ref": "PAY-1", "amount": 10, "status": "failed" }
        });
        assert_eq!(
            parse_event(failed_charge.to_string().as_bytes()).unwrap().kind,
            WebhookEventKind::ChargeFailed
        );

        let failed_transfer = json!({
            "event": "transfer.completed",
            "data": { "id": 9, "reference": "PO-1", "amount": 10, "status": "FAILED",
                      "complete_message": "DISBURSE FAILED: Insufficient funds" }
        });
        let event = parse_event(failed_transfer.to_string().as_bytes()).unwrap();
        assert_eq!(event.kind, WebhookEventKind::TransferFailed);
        assert_eq!(event.reason.as_deref(), Some("DISBURSE FAILED: Insufficient funds"));
    }

    #[test]
    fn status_mapping_is_case_insensitive() {
        assert_eq!(map_status("SUCCESSFUL"), GatewayStatus::Success);
        assert_eq!(map_status("NEW"), GatewayStatus::Pending);
        assert_eq!(map_status("FAILED"), GatewayStatus::Failed);
    }
}
