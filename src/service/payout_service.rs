use std::sync::Arc;
use chrono::{Days, NaiveDate, NaiveTime};
use uuid::Uuid;

use crate::{
    config::PolicyConfig,
    domain::*,
    error::{AppError, Result},
    gateways::{GatewayRegistry, TransferRequest},
    integrations::{NotificationDispatcher, NotificationEvent},
    repository::{PaymentRepository, PayoutRepository},
    service::{bank_account_service::BankAccountService, new_reference},
};

/// Computes instructor settlements per period and pushes them out through
/// the transfer-capable gateways.
pub struct PayoutService {
    payouts: Arc<dyn PayoutRepository>,
    payments: Arc<dyn PaymentRepository>,
    bank_accounts: Arc<BankAccountService>,
    gateways: Arc<GatewayRegistry>,
    notifications: Arc<NotificationDispatcher>,
    policy: PolicyConfig,
}

impl PayoutService {
    pub fn new(
        payouts: Arc<dyn PayoutRepository>,
        payments: Arc<dyn PaymentRepository>,
        bank_accounts: Arc<BankAccountService>,
        gateways: Arc<GatewayRegistry>,
        notifications: Arc<NotificationDispatcher>,
        policy: PolicyConfig,
    ) -> Self {
        Self { payouts, payments, bank_accounts, gateways, notifications, policy }
    }

    /// Creates one earnings payout per instructor with revenue settled in
    /// `[period_start, period_end]`. Running it twice for the same period
    /// creates nothing new.
    pub async fn calculate_period(
        &self,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> Result<PayoutBatchSummary> {
        let revenues = self.revenue_for_period(period_start, period_end).await?;
        let mut summary = PayoutBatchSummary {
            period_start: Some(period_start),
            period_end: Some(period_end),
            ..Default::default()
        };

        for revenue in revenues {
            if self
                .payouts
                .exists_for_period(revenue.instructor_id, period_start, period_end)
                .await?
            {
                summary.skipped_existing.push(revenue.instructor_id);
                continue;
            }

            let draft = self.draft(&revenue, period_start, period_end);
            if draft.instructor_share <= 0 {
                tracing::info!(
                    "Instructor {} earned nothing payable for {} to {}",
                    revenue.instructor_id,
                    period_start,
                    period_end
                );
                summary.skipped_no_earnings.push(revenue.instructor_id);
                continue;
            }

            match self.payouts.create_earnings(&draft).await {
                Ok(payout) => {
                    tracing::info!(
                        "Payout {} for instructor {}: share {}, net {}",
                        payout.id,
                        payout.instructor_id,
                        payout.instructor_share,
                        payout.net_payout
                    );
                    summary.created.push(payout.id);
                }
                // Lost a race with a concurrent run for the same period.
                Err(AppError::ReconciliationConflict(_)) => {
                    summary.skipped_existing.push(revenue.instructor_id);
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            "Payout calculation {} to {}: {} created, {} already present, {} without earnings",
            period_start,
            period_end,
            summary.created.len(),
            summary.skipped_existing.len(),
            summary.skipped_no_earnings.len()
        );
        Ok(summary)
    }

    pub async fn calculate_for_instructor(
        &self,
        instructor_id: Uuid,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> Result<InstructorPayout> {
        if self
            .payouts
            .exists_for_period(instructor_id, period_start, period_end)
            .await?
        {
            return Err(AppError::ReconciliationConflict(format!(
                "payout for instructor {} already exists for {} to {}",
                instructor_id, period_start, period_end
            )));
        }

        let revenue = self
            .revenue_for_period(period_start, period_end)
            .await?
            .into_iter()
            .find(|r| r.instructor_id == instructor_id)
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "instructor {} has no settled revenue for {} to {}",
                    instructor_id, period_start, period_end
                ))
            })?;

        let draft = self.draft(&revenue, period_start, period_end);
        if draft.instructor_share <= 0 {
            return Err(AppError::Validation(format!(
                "instructor {} has no payable share for {} to {}",
                instructor_id, period_start, period_end
            )));
        }
        self.payouts.create_earnings(&draft).await
    }

    /// Calculates the period and, when asked, disburses every pending payout
    /// that the auto-processing rules allow.
    pub async fn run_batch(
        &self,
        period_start: NaiveDate,
        period_end: NaiveDate,
        disburse: bool,
    ) -> Result<PayoutBatchSummary> {
        let mut summary = self.calculate_period(period_start, period_end).await?;
        if !disburse {
            return Ok(summary);
        }

        for payout in self.payouts.list_pending().await? {
            let auto_enabled = self
                .find_account(payout.instructor_id)
                .await?
                .map_or(false, |account| account.auto_payout_enabled);
            if !auto_enabled {
                summary
                    .held
                    .push((payout.id, "auto payout is disabled for this instructor".to_string()));
                continue;
            }
            let result = self.process_payout(payout.id, false).await;
            record_outcome(&mut summary, payout.id, result);
        }
        Ok(summary)
    }

    /// Operator-triggered disbursement of several payouts. The auto ceiling
    /// does not apply.
    pub async fn process_bulk(&self, ids: &[Uuid]) -> Result<PayoutBatchSummary> {
        let mut summary = PayoutBatchSummary::default();
        for id in ids {
            let result = self.process_payout(*id, true).await;
            record_outcome(&mut summary, *id, result);
        }
        Ok(summary)
    }

    /// Disburses one payout. Outstanding debt is netted first; holds (below
    /// minimum, no verified account, above the auto ceiling when not manual)
    /// come back as validation errors.
    pub async fn process_payout(&self, id: Uuid, manual: bool) -> Result<InstructorPayout> {
        let mut payout = self.get_payout(id).await?;
        if payout.status == PayoutStatus::Pending {
            payout = self.payouts.absorb_outstanding_debt(id).await?;
        }

        let account = self.find_account(payout.instructor_id).await?;
        let verified = account.as_ref().map_or(false, |a| a.is_verified());
        if let Err(hold) = check_disbursable(&payout, verified) {
            return Err(AppError::Validation(hold.to_string()));
        }
        if !manual && payout.net_payout > self.policy.payout_auto_process_ceiling {
            let hold = PayoutHold::AboveAutoCeiling {
                net_payout: payout.net_payout,
                ceiling: self.policy.payout_auto_process_ceiling,
            };
            return Err(AppError::Validation(hold.to_string()));
        }
        let account = account.ok_or_else(|| {
            AppError::Validation(PayoutHold::NoVerifiedBankAccount.to_string())
        })?;

        let Some(claimed) = self.payouts.claim_for_disbursement(id).await? else {
            tracing::debug!("Payout {} already claimed", id);
            return self.get_payout(id).await;
        };

        // A refund may have cut the payout since it was read above; only the
        // claimed row decides what gets sent.
        if let Err(hold) = self.check_claimed(&claimed, manual) {
            self.payouts.release_claim(claimed.id, &hold.to_string()).await?;
            return Err(AppError::Validation(hold.to_string()));
        }

        self.disburse(claimed, account).await
    }

    fn check_claimed(&self, payout: &InstructorPayout, manual: bool) -> std::result::Result<(), PayoutHold> {
        if payout.net_payout <= 0 || payout.net_payout < payout.minimum_payout {
            return Err(PayoutHold::BelowMinimum {
                net_payout: payout.net_payout,
                minimum: payout.minimum_payout,
            });
        }
        if !manual && payout.net_payout > self.policy.payout_auto_process_ceiling {
            return Err(PayoutHold::AboveAutoCeiling {
                net_payout: payout.net_payout,
                ceiling: self.policy.payout_auto_process_ceiling,
            });
        }
        Ok(())
    }

    /// Tries the transfer chain in order. Only an explicit rejection moves on
    /// to the next gateway; an unknown outcome stops with the payout left in
    /// `processing` for the webhook to settle.
    async fn disburse(
        &self,
        payout: InstructorPayout,
        account: InstructorBankAccount,
    ) -> Result<InstructorPayout> {
        let chain = self.gateways.transfer_chain();
        if chain.is_empty() {
            self.payouts
                .release_claim(payout.id, "no transfer gateway configured")
                .await?;
            return Err(AppError::Configuration(
                "no transfer-capable gateway is configured".to_string(),
            ));
        }

        let mut rejections = Vec::new();
        for gateway in chain {
            let recipient = match self
                .bank_accounts
                .ensure_recipient(&account, gateway.as_ref())
                .await
            {
                Ok(recipient) => recipient,
                Err(e) if e.is_indeterminate() => {
                    // Nothing was sent yet, so the payout can go back to pending.
                    self.payouts.release_claim(payout.id, &e.to_string()).await?;
                    return Err(e);
                }
                Err(e) => {
                    rejections.push(format!("{}: {}", gateway.name(), e));
                    continue;
                }
            };

            let request = TransferRequest {
                reference: new_reference("PO"),
                amount: payout.net_payout,
                currency: self.policy.currency.clone(),
                recipient: Some(recipient),
                account_number: account.account_number.clone(),
                bank_code: account.bank_code.clone(),
                account_name: account
                    .verified_account_name
                    .clone()
                    .unwrap_or_else(|| account.account_name.clone()),
                narration: format!(
                    "Instructor earnings {} to {}",
                    payout.period_start, payout.period_end
                ),
            };
            self.payouts
                .record_transfer_attempt(payout.id, gateway.name(), &request.reference, None)
                .await?;

            match gateway.initiate_transfer(&request).await {
                Ok(initiation) => match initiation.status {
                    GatewayStatus::Success => {
                        self.payouts
                            .mark_completed(payout.id, initiation.transfer_code.as_deref())
                            .await?;
                        let completed = self.get_payout(payout.id).await?;
                        tracing::info!(
                            "Payout {} of {} sent via {}",
                            completed.id,
                            format_minor(completed.net_payout, &self.policy.currency),
                            gateway.name()
                        );
                        self.notifications
                            .dispatch(NotificationEvent::PayoutCompleted(completed.clone()))
                            .await;
                        return Ok(completed);
                    }
                    GatewayStatus::Pending => {
                        self.payouts
                            .record_transfer_attempt(
                                payout.id,
                                gateway.name(),
                                &request.reference,
                                initiation.transfer_code.as_deref(),
                            )
                            .await?;
                        tracing::info!(
                            "Payout {} queued with {} as {}",
                            payout.id,
                            gateway.name(),
                            request.reference
                        );
                        return self.get_payout(payout.id).await;
                    }
                    GatewayStatus::Failed => {
                        rejections.push(format!("{}: transfer failed", gateway.name()));
                    }
                },
                Err(e) if e.is_indeterminate() => {
                    tracing::warn!(
                        "Payout {} transfer {} outcome unknown: {}",
                        payout.id,
                        request.reference,
                        e
                    );
                    return self.get_payout(payout.id).await;
                }
                Err(e) => {
                    tracing::warn!("{} refused payout {}: {}", gateway.name(), payout.id, e);
                    rejections.push(format!("{}: {}", gateway.name(), e));
                }
            }
        }

        let reason = rejections.join("; ");
        self.payouts.mark_failed(payout.id, &reason).await?;
        let failed = self.get_payout(payout.id).await?;
        tracing::error!("Payout {} failed on every gateway: {}", failed.id, reason);
        self.notifications
            .dispatch(NotificationEvent::PayoutFailed {
                payout: failed.clone(),
                reason,
            })
            .await;
        Ok(failed)
    }

    /// Puts a failed payout back in the queue and disburses it again under a
    /// fresh transfer reference.
    pub async fn retry_payout(&self, id: Uuid) -> Result<InstructorPayout> {
        if !self.payouts.reset_for_retry(id).await? {
            let payout = self.get_payout(id).await?;
            return Err(AppError::Validation(format!(
                "payout {} is {}; only failed payouts can be retried",
                payout.id,
                payout.status.as_str()
            )));
        }
        tracing::info!("Payout {} reset for retry", id);
        self.process_payout(id, true).await
    }

    /// Applies a transfer-succeeded webhook. `None` when the reference is unknown.
    pub async fn confirm_transfer(
        &self,
        transfer_reference: &str,
        transfer_code: Option<&str>,
    ) -> Result<Option<InstructorPayout>> {
        let payout = match self.payouts.find_by_transfer_reference(transfer_reference).await? {
            Some(payout) => payout,
            None => return Ok(None),
        };

        if self.payouts.mark_completed(payout.id, transfer_code).await? {
            let completed = self.get_payout(payout.id).await?;
            tracing::info!("Payout {} confirmed by webhook", completed.id);
            self.notifications
                .dispatch(NotificationEvent::PayoutCompleted(completed.clone()))
                .await;
            return Ok(Some(completed));
        }
        Ok(Some(payout))
    }

    /// Applies a transfer-failed or reversed webhook.
    pub async fn fail_transfer(
        &self,
        transfer_reference: &str,
        reason: &str,
    ) -> Result<Option<InstructorPayout>> {
        let payout = match self.payouts.find_by_transfer_reference(transfer_reference).await? {
            Some(payout) => payout,
            None => return Ok(None),
        };

        if self.payouts.mark_failed(payout.id, reason).await? {
            let failed = self.get_payout(payout.id).await?;
            tracing::warn!("Payout {} failed by webhook: {}", failed.id, reason);
            self.notifications
                .dispatch(NotificationEvent::PayoutFailed {
                    payout: failed.clone(),
                    reason: reason.to_string(),
                })
                .await;
            return Ok(Some(failed));
        }
        if payout.status == PayoutStatus::Completed {
            tracing::error!(
                "Transfer {} reported failed after payout {} completed: {}",
                transfer_reference,
                payout.id,
                reason
            );
        }
        Ok(Some(payout))
    }

    pub async fn get_payout(&self, id: Uuid) -> Result<InstructorPayout> {
        self.payouts
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Payout {} not found", id)))
    }

    pub async fn list_payouts_for_instructor(&self, instructor_id: Uuid) -> Result<Vec<InstructorPayout>> {
        self.payouts.list_for_instructor(instructor_id).await
    }

    pub async fn outstanding_debt(&self, instructor_id: Uuid) -> Result<i64> {
        self.payouts.outstanding_debt(instructor_id).await
    }

    async fn revenue_for_period(
        &self,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> Result<Vec<InstructorRevenue>> {
        if period_end < period_start {
            return Err(AppError::Validation(format!(
                "period end {} is before period start {}",
                period_end, period_start
            )));
        }
        let until = period_end
            .checked_add_days(Days::new(1))
            .ok_or_else(|| AppError::Validation("period end is out of range".to_string()))?;

        self.payments
            .revenue_by_instructor(
                period_start.and_time(NaiveTime::MIN),
                until.and_time(NaiveTime::MIN),
            )
            .await
    }

    fn draft(&self, revenue: &InstructorRevenue, start: NaiveDate, end: NaiveDate) -> PayoutDraft {
        PayoutDraft::from_revenue(revenue, start, end, &self.policy.revenue_split(), self.policy.minimum_payout)
    }

    async fn find_account(&self, instructor_id: Uuid) -> Result<Option<InstructorBankAccount>> {
        match self.bank_accounts.get_bank_account(instructor_id).await {
            Ok(account) => Ok(Some(account)),
            Err(AppError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn record_outcome(summary: &mut PayoutBatchSummary, id: Uuid, result: Result<InstructorPayout>) {
    match result {
        Ok(payout) => match payout.status {
            PayoutStatus::Completed | PayoutStatus::Processing => summary.disbursed.push(id),
            PayoutStatus::Failed => summary
                .failed
                .push((id, payout.failure_reason.unwrap_or_default())),
            _ => summary
                .held
                .push((id, payout.failure_reason.unwrap_or_default())),
        },
        Err(AppError::Validation(reason)) => summary.held.push((id, reason)),
        Err(e) => summary.failed.push((id, e.to_string())),
    }
}
