use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::{FeeBreakdown, GatewayName};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub reference: String,
    pub gateway: GatewayName,
    pub gateway_reference: Option<String>,
    pub user_id: Uuid,
    pub course_id: Uuid,
    pub instructor_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub gateway_fee: i64,
    pub platform_fee: i64,
    pub net_amount: i64,
    pub status: PaymentStatus,
    pub customer_email: String,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub authorization_url: Option<String>,
    pub gateway_response: Option<serde_json::Value>,
    pub enrollment_id: Option<String>,
    pub failure_reason: Option<String>,
    pub initiated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn fee_breakdown(&self) -> FeeBreakdown {
        FeeBreakdown {
            gateway_fee: self.gateway_fee,
            platform_fee: self.platform_fee,
            net_amount: self.net_amount,
        }
    }

    pub fn is_refundable_status(&self) -> bool {
        matches!(
            self.status,
            PaymentStatus::Completed | PaymentStatus::PartiallyRefunded
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Refunded,
    PartiallyRefunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::PartiallyRefunded => "partially_refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "processing" => Some(PaymentStatus::Processing),
            "completed" => Some(PaymentStatus::Completed),
            "failed" => Some(PaymentStatus::Failed),
            "cancelled" => Some(PaymentStatus::Cancelled),
            "refunded" => Some(PaymentStatus::Refunded),
            "partially_refunded" => Some(PaymentStatus::PartiallyRefunded),
            _ => None,
        }
    }

    /// Still waiting on a charge confirmation.
    pub fn is_awaiting_confirmation(&self) -> bool {
        matches!(self, PaymentStatus::Pending | PaymentStatus::Processing)
    }

    /// A charge confirmation for this payment has already been applied,
    /// successfully or not.
    pub fn is_settled(&self) -> bool {
        !self.is_awaiting_confirmation()
    }

    /// Statuses the payout calculator counts as earned revenue. Refunded
    /// payments stay in: their clawback runs through refund deductions.
    pub fn counts_as_revenue(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Completed | PaymentStatus::PartiallyRefunded | PaymentStatus::Refunded
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CheckoutRequest {
    pub user_id: Uuid,
    pub course_id: Uuid,
    pub instructor_id: Uuid,
    #[validate(range(min = 1, message = "must be greater than zero"))]
    pub amount: i64,
    #[validate(length(equal = 3, message = "must be an ISO 4217 code"))]
    pub currency: Option<String>,
    #[validate(email(message = "must be a valid email address"))]
    pub customer_email: String,
    #[validate(length(min = 1, max = 200, message = "must not be empty"))]
    pub customer_name: Option<String>,
    #[validate(length(min = 7, max = 20, message = "must be a phone number"))]
    pub customer_phone: Option<String>,
    pub gateway: Option<String>,
    #[validate(url(message = "must be a valid URL"))]
    pub callback_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub payment: Payment,
    pub authorization_url: String,
}

/// Normalised charge outcome, produced either by a verification call or a
/// charge webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeConfirmation {
    pub status: super::GatewayStatus,
    pub amount: Option<i64>,
    pub currency: Option<String>,
    pub gateway_fee: Option<i64>,
    pub gateway_reference: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub raw: serde_json::Value,
}

/// Outcome of applying a charge confirmation.
#[derive(Debug, Clone)]
pub enum ChargeOutcome {
    Completed(Payment),
    Failed(Payment),
    StillPending(Payment),
    /// The payment had already been settled by the other confirmation channel.
    AlreadySettled(Payment),
}

impl ChargeOutcome {
    pub fn payment(&self) -> &Payment {
        match self {
            ChargeOutcome::Completed(p)
            | ChargeOutcome::Failed(p)
            | ChargeOutcome::StillPending(p)
            | ChargeOutcome::AlreadySettled(p) => p,
        }
    }

    pub fn into_payment(self) -> Payment {
        match self {
            ChargeOutcome::Completed(p)
            | ChargeOutcome::Failed(p)
            | ChargeOutcome::StillPending(p)
            | ChargeOutcome::AlreadySettled(p) => p,
        }
    }
}

/// Per-instructor totals over a payout window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructorRevenue {
    pub instructor_id: Uuid,
    pub total_revenue: i64,
    pub gateway_fees: i64,
    pub payment_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_round_trip() {
        for status in [
            PaymentStatus::Pending,
            PaymentStatus::Processing,
            PaymentStatus::Completed,
            PaymentStatus::Failed,
            PaymentStatus::Cancelled,
            PaymentStatus::Refunded,
            PaymentStatus::PartiallyRefunded,
        ] {
            assert_eq!(PaymentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(PaymentStatus::parse("success"), None);
    }

    #[test]
    fn only_pending_and_processing_await_confirmation() {
        assert!(PaymentStatus::Pending.is_awaiting_confirmation());
        assert!(PaymentStatus::Processing.is_awaiting_confirmation());
        assert!(PaymentStatus::Completed.is_settled());
        assert!(PaymentStatus::Failed.is_settled());
        assert!(PaymentStatus::Refunded.is_settled());
    }

    #[test]
    fn checkout_request_validation() {
        let mut request = CheckoutRequest {
            user_id: Uuid::new_v4(),
            course_id: Uuid::new_v4(),
            instructor_id: Uuid::new_v4(),
            amount: 2_000_000,
            currency: Some("NGN".into()),
            customer_email: "learner@example.com".into(),
            customer_name: Some("Ada Learner".into()),
            customer_phone: None,
            gateway: None,
            callback_url: None,
        };
        assert!(request.validate().is_ok());

        request.amount = 0;
        request.customer_email = "not-an-email".into();
        let errors = request.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("amount"));
        assert!(fields.contains_key("customer_email"));
    }
}
