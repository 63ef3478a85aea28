use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{GatewayName, InstructorRevenue, RevenueSplit};

/// One settlement row for one instructor.
///
/// `net_payout == instructor_share - previous_advance - refund_deductions`
/// holds for every row. Debt rows (`kind == RefundDebt`, or earnings rows that
/// went negative) carry a negative `net_payout`; `debt_recovered` tracks how
/// much of it later earnings have absorbed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstructorPayout {
    pub id: Uuid,
    pub instructor_id: Uuid,
    pub kind: PayoutKind,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub total_revenue: i64,
    pub gateway_fees: i64,
    pub instructor_share: i64,
    pub platform_fee: i64,
    pub previous_advance: i64,
    pub refund_deductions: i64,
    pub net_payout: i64,
    pub minimum_payout: i64,
    pub debt_recovered: i64,
    pub status: PayoutStatus,
    pub source_refund_id: Option<Uuid>,
    pub gateway: Option<GatewayName>,
    pub transfer_reference: Option<String>,
    pub gateway_transfer_code: Option<String>,
    pub failure_reason: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InstructorPayout {
    pub fn recompute_net(&mut self) {
        self.net_payout = net_payout(
            self.instructor_share,
            self.previous_advance,
            self.refund_deductions,
        );
    }

    /// Amount still owed back by the instructor on a debt row.
    pub fn outstanding_debt(&self) -> i64 {
        if self.status == PayoutStatus::DebtCreated && self.net_payout < 0 {
            (-self.net_payout - self.debt_recovered).max(0)
        } else {
            0
        }
    }
}

pub fn net_payout(instructor_share: i64, previous_advance: i64, refund_deductions: i64) -> i64 {
    instructor_share - previous_advance - refund_deductions
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PayoutKind {
    Earnings,
    RefundDebt,
}

impl PayoutKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutKind::Earnings => "earnings",
            PayoutKind::RefundDebt => "refund_debt",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "earnings" => Some(PayoutKind::Earnings),
            "refund_debt" => Some(PayoutKind::RefundDebt),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    DebtCreated,
    DebtSettled,
}

impl PayoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutStatus::Pending => "pending",
            PayoutStatus::Processing => "processing",
            PayoutStatus::Completed => "completed",
            PayoutStatus::Failed => "failed",
            PayoutStatus::DebtCreated => "debt_created",
            PayoutStatus::DebtSettled => "debt_settled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PayoutStatus::Pending),
            "processing" => Some(PayoutStatus::Processing),
            "completed" => Some(PayoutStatus::Completed),
            "failed" => Some(PayoutStatus::Failed),
            "debt_created" => Some(PayoutStatus::DebtCreated),
            "debt_settled" => Some(PayoutStatus::DebtSettled),
            _ => None,
        }
    }
}

/// Spendable balance of a pending payout, as seen by the deduction cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayoutBalance {
    pub payout_id: Uuid,
    pub net_payout: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeductionPlan {
    /// `(payout_id, amount)` pairs, oldest payout first.
    pub applied: Vec<(Uuid, i64)>,
    /// Left over once every pending balance is used; becomes a debt row.
    pub remaining: i64,
}

impl DeductionPlan {
    pub fn deducted(&self) -> i64 {
        self.applied.iter().map(|(_, amount)| amount).sum()
    }
}

/// Spreads `amount` across pending payouts in the given (oldest first) order.
/// A payout never loses more than its current positive `net_payout`, so the
/// deduction alone never drives a payout negative.
pub fn plan_refund_deduction(pending: &[PayoutBalance], amount: i64) -> DeductionPlan {
    let mut remaining = amount.max(0);
    let mut applied = Vec::new();

    for balance in pending {
        if remaining == 0 {
            break;
        }
        let available = balance.net_payout.max(0);
        if available == 0 {
            continue;
        }
        let take = available.min(remaining);
        applied.push((balance.payout_id, take));
        remaining -= take;
    }

    DeductionPlan { applied, remaining }
}

/// Outstanding debt on a debt row, oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebtBalance {
    pub payout_id: Uuid,
    pub outstanding: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryPlan {
    pub applied: Vec<(Uuid, i64)>,
}

impl RecoveryPlan {
    pub fn total(&self) -> i64 {
        self.applied.iter().map(|(_, amount)| amount).sum()
    }
}

/// Recovers as much outstanding debt as `available` earnings allow.
pub fn plan_debt_recovery(debts: &[DebtBalance], available: i64) -> RecoveryPlan {
    let mut budget = available.max(0);
    let mut applied = Vec::new();

    for debt in debts {
        if budget == 0 {
            break;
        }
        if debt.outstanding <= 0 {
            continue;
        }
        let take = debt.outstanding.min(budget);
        applied.push((debt.payout_id, take));
        budget -= take;
    }

    RecoveryPlan { applied }
}

/// Result of running the deduction cascade for one refund.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeductionOutcome {
    pub instructor_id: Uuid,
    pub requested: i64,
    pub deducted_from_pending: i64,
    pub debt_payout_id: Option<Uuid>,
    pub debt_amount: i64,
}

/// Figures for a new earnings payout, before any debt is absorbed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutDraft {
    pub instructor_id: Uuid,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub total_revenue: i64,
    pub gateway_fees: i64,
    pub instructor_share: i64,
    pub platform_fee: i64,
    pub minimum_payout: i64,
}

impl PayoutDraft {
    /// Gateway fees come out of the instructor's side, so the stored share is
    /// already net of them.
    pub fn from_revenue(
        revenue: &InstructorRevenue,
        period_start: NaiveDate,
        period_end: NaiveDate,
        split: &RevenueSplit,
        minimum_payout: i64,
    ) -> Self {
        let gross_share = split.instructor_portion(revenue.total_revenue);
        Self {
            instructor_id: revenue.instructor_id,
            period_start,
            period_end,
            total_revenue: revenue.total_revenue,
            gateway_fees: revenue.gateway_fees,
            instructor_share: gross_share - revenue.gateway_fees,
            platform_fee: revenue.total_revenue - gross_share,
            minimum_payout,
        }
    }
}

/// Why a payout cannot be disbursed right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PayoutHold {
    NotPending(PayoutStatus),
    BelowMinimum { net_payout: i64, minimum: i64 },
    NoVerifiedBankAccount,
    AboveAutoCeiling { net_payout: i64, ceiling: i64 },
}

impl std::fmt::Display for PayoutHold {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PayoutHold::NotPending(status) => write!(f, "payout is {}", status.as_str()),
            PayoutHold::BelowMinimum { net_payout, minimum } => {
                write!(f, "net payout {} is below the minimum {}", net_payout, minimum)
            }
            PayoutHold::NoVerifiedBankAccount => f.write_str("instructor has no verified bank account"),
            PayoutHold::AboveAutoCeiling { net_payout, ceiling } => write!(
                f,
                "net payout {} exceeds the auto-processing ceiling {}",
                net_payout, ceiling
            ),
        }
    }
}

pub fn check_disbursable(
    payout: &InstructorPayout,
    has_verified_account: bool,
) -> std::result::Result<(), PayoutHold> {
    if payout.status != PayoutStatus::Pending {
        return Err(PayoutHold::NotPending(payout.status));
    }
    if payout.net_payout <= 0 || payout.net_payout < payout.minimum_payout {
        return Err(PayoutHold::BelowMinimum {
            net_payout: payout.net_payout,
            minimum: payout.minimum_payout,
        });
    }
    if !has_verified_account {
        return Err(PayoutHold::NoVerifiedBankAccount);
    }
    Ok(())
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PayoutBatchSummary {
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
    pub created: Vec<Uuid>,
    pub skipped_existing: Vec<Uuid>,
    pub skipped_no_earnings: Vec<Uuid>,
    pub disbursed: Vec<Uuid>,
    pub held: Vec<(Uuid, String)>,
    pub failed: Vec<(Uuid, String)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn balance(net: i64) -> PayoutBalance {
        PayoutBalance {
            payout_id: Uuid::new_v4(),
            net_payout: net,
        }
    }

    #[test]
    fn deduction_spills_into_debt_when_pending_is_short() {
        // One pending payout of 5,000 and an 8,000 clawback.
        let pending = [balance(5_000)];
        let plan = plan_refund_deduction(&pending, 8_000);
        assert_eq!(plan.applied, vec![(pending[0].payout_id, 5_000)]);
        assert_eq!(plan.remaining, 3_000);
        assert_eq!(plan.deducted() + plan.remaining, 8_000);
    }

    #[test]
    fn deduction_walks_payouts_oldest_first() {
        let pending = [balance(2_000), balance(0), balance(10_000)];
        let plan = plan_refund_deduction(&pending, 7_000);
        assert_eq!(
            plan.applied,
            vec![(pending[0].payout_id, 2_000), (pending[2].payout_id, 5_000)]
        );
        assert_eq!(plan.remaining, 0);
    }

    #[test]
    fn deduction_without_pending_payouts_is_all_debt() {
        let plan = plan_refund_deduction(&[], 14_000);
        assert!(plan.applied.is_empty());
        assert_eq!(plan.remaining, 14_000);
    }

    #[test]
    fn deduction_ignores_negative_balances() {
        let pending = [balance(-500), balance(1_000)];
        let plan = plan_refund_deduction(&pending, 400);
        assert_eq!(plan.applied, vec![(pending[1].payout_id, 400)]);
    }

    #[test]
    fn debt_recovery_is_capped_by_earnings() {
        let debts = [
            DebtBalance { payout_id: Uuid::new_v4(), outstanding: 3_000 },
            DebtBalance { payout_id: Uuid::new_v4(), outstanding: 4_000 },
        ];
        let plan = plan_debt_recovery(&debts, 5_000);
        assert_eq!(plan.applied, vec![(debts[0].payout_id, 3_000), (debts[1].payout_id, 2_000)]);
        assert_eq!(plan.total(), 5_000);
    }

    #[test]
    fn draft_takes_gateway_fees_from_instructor_share() {
        let revenue = InstructorRevenue {
            instructor_id: Uuid::new_v4(),
            total_revenue: 100_000,
            gateway_fees: 1_500,
            payment_count: 4,
        };
        let start = NaiveDate::from_ymd_opt(2026, 9, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2026, 9, 30).unwrap();
        let draft = PayoutDraft::from_revenue(&revenue, start, end, &RevenueSplit::from_rate(0.7), 5_000);
        assert_eq!(draft.instructor_share, 68_500);
        assert_eq!(draft.platform_fee, 30_000);
    }

    #[test]
    fn outstanding_debt_accounts_for_recovery() {
        let now = Utc::now();
        let today = now.date_naive();
        let mut debt = InstructorPayout {
            id: Uuid::new_v4(),
            instructor_id: Uuid::new_v4(),
            kind: PayoutKind::RefundDebt,
            period_start: today,
            period_end: today,
            total_revenue: 0,
            gateway_fees: 0,
            instructor_share: 0,
            platform_fee: 0,
            previous_advance: 0,
            refund_deductions: 3_000,
            net_payout: -3_000,
            minimum_payout: 0,
            debt_recovered: 1_000,
            status: PayoutStatus::DebtCreated,
            source_refund_id: None,
            gateway: None,
            transfer_reference: None,
            gateway_transfer_code: None,
            failure_reason: None,
            processed_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(debt.outstanding_debt(), 2_000);
        debt.status = PayoutStatus::DebtSettled;
        assert_eq!(debt.outstanding_debt(), 0);
    }
}
