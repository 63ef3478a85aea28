use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use uuid::Uuid;

use crate::domain::*;
use crate::error::{AppError, Result};
use crate::integrations::enrollment::EnrollmentService;

pub mod payment_repository;
pub mod refund_repository;
pub mod payout_repository;
pub mod bank_account_repository;
pub mod webhook_repository;

pub use payment_repository::SqlitePaymentRepository;
pub use refund_repository::SqliteRefundRepository;
pub use payout_repository::SqlitePayoutRepository;
pub use bank_account_repository::SqliteBankAccountRepository;
pub use webhook_repository::SqliteWebhookRepository;

/// Fields written when a charge is confirmed.
#[derive(Debug, Clone)]
pub struct PaymentCompletion {
    pub fees: FeeBreakdown,
    pub gateway_reference: Option<String>,
    pub paid_at: DateTime<Utc>,
    pub raw: serde_json::Value,
}

/// Everything committed together when a refund is confirmed.
#[derive(Debug, Clone)]
pub struct RefundSettlement {
    pub refund: PaymentRefund,
    pub payment: Payment,
    pub deduction: DeductionOutcome,
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn create(&self, payment: Payment) -> Result<Payment>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>>;
    async fn find_by_reference(&self, reference: &str) -> Result<Option<Payment>>;
    async fn find_by_gateway_reference(
        &self,
        gateway: GatewayName,
        gateway_reference: &str,
    ) -> Result<Option<Payment>>;
    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<Payment>>;
    async fn record_initialization(
        &self,
        id: Uuid,
        gateway_reference: Option<&str>,
        authorization_url: &str,
    ) -> Result<Payment>;
    /// `pending -> processing`. Returns false when the payment already moved on.
    async fn mark_processing(&self, id: Uuid, note: Option<&str>) -> Result<bool>;
    /// `pending|processing -> failed`.
    async fn mark_failed(
        &self,
        id: Uuid,
        reason: &str,
        raw: Option<&serde_json::Value>,
    ) -> Result<bool>;
    /// `pending -> cancelled`.
    async fn mark_cancelled(&self, id: Uuid) -> Result<bool>;
    /// `pending|processing -> completed` together with enrollment activation,
    /// in one transaction. `None` when another confirmation got there first.
    async fn complete_and_activate(
        &self,
        id: Uuid,
        completion: &PaymentCompletion,
        enrollments: &dyn EnrollmentService,
    ) -> Result<Option<Payment>>;
    /// Paid revenue per instructor for payments settled in `[from, until)`.
    async fn revenue_by_instructor(
        &self,
        from: NaiveDateTime,
        until: NaiveDateTime,
    ) -> Result<Vec<InstructorRevenue>>;
}

#[async_trait]
pub trait RefundRepository: Send + Sync {
    /// Inserts after re-checking eligibility under the write lock, so two
    /// concurrent requests cannot both pass the balance check.
    async fn create_checked(
        &self,
        refund: PaymentRefund,
        window_days: i64,
    ) -> Result<PaymentRefund>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<PaymentRefund>>;
    async fn find_by_gateway_reference(&self, gateway_reference: &str) -> Result<Option<PaymentRefund>>;
    async fn find_open_for_payment(&self, payment_id: Uuid) -> Result<Option<PaymentRefund>>;
    async fn list_for_payment(&self, payment_id: Uuid) -> Result<Vec<PaymentRefund>>;
    async fn completed_total(&self, payment_id: Uuid) -> Result<i64>;
    /// `pending_review -> approved`.
    async fn mark_approved(&self, id: Uuid, reviewer: Uuid, note: Option<&str>) -> Result<bool>;
    /// `pending_review -> cancelled`.
    async fn mark_cancelled(&self, id: Uuid, reviewer: Uuid, note: Option<&str>) -> Result<bool>;
    /// `approved -> processing`; false when another caller already sent the
    /// refund to the gateway.
    async fn claim_for_execution(&self, id: Uuid) -> Result<bool>;
    /// `approved -> processing`, or attaches a gateway reference to a refund
    /// already in `processing`.
    async fn mark_processing(&self, id: Uuid, gateway_reference: Option<&str>) -> Result<bool>;
    /// Any open status `-> failed`.
    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<bool>;
    /// `approved|processing -> completed`, payment status update and the
    /// instructor deduction cascade, all in one transaction. `None` when the
    /// refund was already terminal.
    async fn complete_with_deduction(
        &self,
        id: Uuid,
        gateway_reference: Option<&str>,
        split: &RevenueSplit,
    ) -> Result<Option<RefundSettlement>>;
}

#[async_trait]
pub trait PayoutRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<InstructorPayout>>;
    async fn find_by_transfer_reference(&self, reference: &str) -> Result<Option<InstructorPayout>>;
    async fn list_for_instructor(&self, instructor_id: Uuid) -> Result<Vec<InstructorPayout>>;
    async fn list_pending(&self) -> Result<Vec<InstructorPayout>>;
    async fn exists_for_period(
        &self,
        instructor_id: Uuid,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> Result<bool>;
    /// Inserts an earnings payout and absorbs outstanding debt into it.
    /// A duplicate period is a `ReconciliationConflict`.
    async fn create_earnings(&self, draft: &PayoutDraft) -> Result<InstructorPayout>;
    /// Re-nets a pending payout against debt created since it was computed.
    async fn absorb_outstanding_debt(&self, id: Uuid) -> Result<InstructorPayout>;
    async fn outstanding_debt(&self, instructor_id: Uuid) -> Result<i64>;
    /// Nets outstanding debt and moves `pending -> processing` in one
    /// transaction, returning the row as claimed. `None` if the payout was
    /// not pending.
    async fn claim_for_disbursement(&self, id: Uuid) -> Result<Option<InstructorPayout>>;
    async fn record_transfer_attempt(
        &self,
        id: Uuid,
        gateway: GatewayName,
        transfer_reference: &str,
        gateway_transfer_code: Option<&str>,
    ) -> Result<()>;
    /// `processing -> completed`.
    async fn mark_completed(&self, id: Uuid, gateway_transfer_code: Option<&str>) -> Result<bool>;
    /// `processing -> failed`.
    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<bool>;
    /// `processing -> pending`, used when no gateway accepted the transfer
    /// before any money moved.
    async fn release_claim(&self, id: Uuid, reason: &str) -> Result<bool>;
    /// `failed -> pending`, clearing the previous transfer reference.
    async fn reset_for_retry(&self, id: Uuid) -> Result<bool>;
}

#[async_trait]
pub trait BankAccountRepository: Send + Sync {
    async fn find_by_instructor(&self, instructor_id: Uuid) -> Result<Option<InstructorBankAccount>>;
    /// Creates or replaces the instructor's account. Always resets
    /// verification state and provider recipient ids.
    async fn upsert(
        &self,
        instructor_id: Uuid,
        request: &BankAccountRequest,
    ) -> Result<InstructorBankAccount>;
    async fn record_attempt(&self, id: Uuid) -> Result<InstructorBankAccount>;
    async fn mark_verified(&self, id: Uuid, verified_name: &str) -> Result<InstructorBankAccount>;
    async fn mark_failed(
        &self,
        id: Uuid,
        status: VerificationStatus,
        error: &str,
        resolved_name: Option<&str>,
    ) -> Result<InstructorBankAccount>;
    async fn set_recipient(&self, id: Uuid, gateway: GatewayName, recipient_id: &str) -> Result<()>;
    async fn set_auto_payout(&self, id: Uuid, enabled: bool) -> Result<InstructorBankAccount>;
}

#[async_trait]
pub trait WebhookRepository: Send + Sync {
    async fn record(&self, webhook: &PaymentWebhook) -> Result<()>;
    async fn mark_processed(&self, id: Uuid, success: bool, error: Option<&str>) -> Result<()>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<PaymentWebhook>>;
    async fn list_by_reference(&self, reference: &str) -> Result<Vec<PaymentWebhook>>;
}

pub(crate) fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| AppError::Database(e.to_string()))
}

pub(crate) fn to_utc(dt: NaiveDateTime) -> DateTime<Utc> {
    DateTime::from_naive_utc_and_offset(dt, Utc)
}

pub(crate) fn parse_gateway(value: &str) -> Result<GatewayName> {
    value
        .parse::<GatewayName>()
        .map_err(|_| AppError::Database(format!("Invalid gateway: {}", value)))
}

pub(crate) fn parse_json(value: Option<String>) -> Option<serde_json::Value> {
    value.and_then(|raw| serde_json::from_str(&raw).ok())
}
