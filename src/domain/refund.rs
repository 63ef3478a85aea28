use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::{Payment, PaymentStatus};
use crate::error::{AppError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRefund {
    pub id: Uuid,
    pub reference: String,
    pub payment_id: Uuid,
    pub amount: i64,
    pub reason: String,
    pub status: RefundStatus,
    pub gateway_refund_reference: Option<String>,
    pub failure_reason: Option<String>,
    pub requested_by: Uuid,
    pub reviewed_by: Option<Uuid>,
    pub review_note: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    PendingReview,
    Approved,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl RefundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundStatus::PendingReview => "pending_review",
            RefundStatus::Approved => "approved",
            RefundStatus::Processing => "processing",
            RefundStatus::Completed => "completed",
            RefundStatus::Failed => "failed",
            RefundStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending_review" => Some(RefundStatus::PendingReview),
            "approved" => Some(RefundStatus::Approved),
            "processing" => Some(RefundStatus::Processing),
            "completed" => Some(RefundStatus::Completed),
            "failed" => Some(RefundStatus::Failed),
            "cancelled" => Some(RefundStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RefundStatus::Completed | RefundStatus::Failed | RefundStatus::Cancelled
        )
    }

    pub const OPEN: [RefundStatus; 3] = [
        RefundStatus::PendingReview,
        RefundStatus::Approved,
        RefundStatus::Processing,
    ];
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RefundRequest {
    #[validate(length(min = 1, message = "is required"))]
    pub payment_reference: String,
    #[validate(range(min = 1, message = "must be greater than zero"))]
    pub amount: i64,
    #[validate(length(min = 3, max = 1000, message = "must explain the refund"))]
    pub reason: String,
    pub requested_by: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundReview {
    pub reviewer_id: Uuid,
    pub note: Option<String>,
}

/// Checks a refund request against the payment before anything is written.
pub fn check_refund_eligibility(
    payment: &Payment,
    requested_amount: i64,
    completed_refunds_total: i64,
    has_open_refund: bool,
    window_days: i64,
    now: DateTime<Utc>,
) -> Result<()> {
    if requested_amount <= 0 {
        return Err(AppError::Validation("amount must be greater than zero".to_string()));
    }

    if !payment.is_refundable_status() {
        return Err(AppError::Validation(format!(
            "payment {} is {} and cannot be refunded",
            payment.reference,
            payment.status.as_str()
        )));
    }

    let paid_at = payment.paid_at.ok_or_else(|| {
        AppError::Validation(format!("payment {} has no settlement date", payment.reference))
    })?;
    if now - paid_at > Duration::days(window_days) {
        return Err(AppError::Validation(format!(
            "refund window of {} days has elapsed",
            window_days
        )));
    }

    let remaining = remaining_refundable(payment.amount, completed_refunds_total);
    if requested_amount > remaining {
        return Err(AppError::ReconciliationConflict(format!(
            "requested {} exceeds remaining refundable amount {}",
            requested_amount, remaining
        )));
    }

    if has_open_refund {
        return Err(AppError::ReconciliationConflict(format!(
            "payment {} already has a refund in progress",
            payment.reference
        )));
    }

    Ok(())
}

pub fn remaining_refundable(payment_amount: i64, completed_refunds_total: i64) -> i64 {
    (payment_amount - completed_refunds_total).max(0)
}

/// Payment status once `completed_total` has been refunded.
pub fn status_after_refunds(payment_amount: i64, completed_total: i64) -> PaymentStatus {
    if completed_total >= payment_amount {
        PaymentStatus::Refunded
    } else if completed_total > 0 {
        PaymentStatus::PartiallyRefunded
    } else {
        PaymentStatus::Completed
    }
}

/// Whether a fully refunded learner keeps course access.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AccessDecision {
    RetainWithAccess,
    Revoke,
}

pub fn decide_access(progress_percent: f64, retention_threshold_percent: f64) -> AccessDecision {
    if progress_percent > retention_threshold_percent {
        AccessDecision::RetainWithAccess
    } else {
        AccessDecision::Revoke
    }
}
