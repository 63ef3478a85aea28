use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::GatewayName;

/// Audit row for every inbound provider request, valid or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentWebhook {
    pub id: Uuid,
    pub gateway: GatewayName,
    pub event_type: String,
    pub reference: Option<String>,
    pub payload: String,
    pub signature_valid: bool,
    pub processed: bool,
    pub success: bool,
    pub error_message: Option<String>,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl PaymentWebhook {
    pub fn received(
        gateway: GatewayName,
        event_type: impl Into<String>,
        reference: Option<String>,
        payload: impl Into<String>,
        signature_valid: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            gateway,
            event_type: event_type.into(),
            reference,
            payload: payload.into(),
            signature_valid,
            processed: false,
            success: false,
            error_message: None,
            received_at: Utc::now(),
            processed_at: None,
        }
    }
}

/// Provider-neutral classification of webhook events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventKind {
    ChargeSucceeded,
    ChargeFailed,
    TransferSucceeded,
    TransferFailed,
    RefundProcessed,
    RefundFailed,
    DedicatedAccountAssigned,
    Unrecognized,
}

/// A parsed, provider-neutral webhook event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub kind: WebhookEventKind,
    /// The provider's own event name, e.g. `charge.success`.
    pub event_type: String,
    /// Our reference: payment reference for charges/refunds, transfer
    /// reference for transfers.
    pub reference: Option<String>,
    /// Provider-side id (transaction id, refund id, transfer code, ...).
    pub gateway_reference: Option<String>,
    pub amount: Option<i64>,
    pub currency: Option<String>,
    pub gateway_fee: Option<i64>,
    pub reason: Option<String>,
    pub customer_email: Option<String>,
    pub account_number: Option<String>,
    pub bank_name: Option<String>,
    pub raw: serde_json::Value,
}

impl WebhookEvent {
    pub fn new(kind: WebhookEventKind, event_type: impl Into<String>, raw: serde_json::Value) -> Self {
        Self {
            kind,
            event_type: event_type.into(),
            reference: None,
            gateway_reference: None,
            amount: None,
            currency: None,
            gateway_fee: None,
            reason: None,
            customer_email: None,
            account_number: None,
            bank_name: None,
            raw,
        }
    }
}

/// What the ingestion pipeline did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookDisposition {
    /// Signature check failed; logged and dropped.
    Dropped,
    /// Payload could not be parsed.
    Malformed,
    /// Known event, effect applied (or already applied earlier).
    Applied,
    /// Known event, but the referenced record does not exist.
    NotFound,
    /// Event type we do not act on.
    Ignored,
    /// Handler refused the event for good (e.g. an amount mismatch); the
    /// error is kept on the audit row.
    Failed,
}
