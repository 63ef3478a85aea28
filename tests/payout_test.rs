mod common;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use coursepay::{
    config::PolicyConfig,
    domain::{
        GatewayName, GatewayStatus, InstructorPayout, PayoutDraft, PayoutKind, PayoutStatus,
        RefundRequest,
    },
    error::{AppError, Result},
    gateways::fake::{FakeFailure, FakeOp},
    repository::{PayoutRepository, SqlitePayoutRepository},
    service::payout_service::PayoutService,
};
use sqlx::SqlitePool;
use uuid::Uuid;

use common::{setup_with, today, TestApp};

fn policy() -> PolicyConfig {
    PolicyConfig {
        minimum_payout: 1_000,
        ..PolicyConfig::default()
    }
}

/// One instructor with a verified account and a pending payout for today.
async fn pending_payout(app: &TestApp, amount: i64) -> anyhow::Result<(Uuid, Uuid)> {
    let instructor_id = Uuid::new_v4();
    app.verified_account(instructor_id, false).await?;
    app.completed_payment(instructor_id, amount, 0).await?;
    let payout = app
        .context
        .payout_service
        .calculate_for_instructor(instructor_id, today(), today())
        .await?;
    Ok((instructor_id, payout.id))
}

#[tokio::test]
async fn calculation_is_idempotent_per_period() -> anyhow::Result<()> {
    let app = setup_with(policy()).await?;
    let instructor_id = Uuid::new_v4();
    app.completed_payment(instructor_id, 20_000, 300).await?;

    let first = app
        .context
        .payout_service
        .calculate_period(today(), today())
        .await?;
    assert_eq!(first.created.len(), 1);

    let payout = app.context.payout_service.get_payout(first.created[0]).await?;
    assert_eq!(payout.kind, PayoutKind::Earnings);
    assert_eq!(payout.status, PayoutStatus::Pending);
    assert_eq!(payout.total_revenue, 20_000);
    assert_eq!(payout.gateway_fees, 300);
    assert_eq!(payout.instructor_share, 13_700);
    assert_eq!(payout.platform_fee, 6_000);
    assert_eq!(payout.net_payout, 13_700);

    let second = app
        .context
        .payout_service
        .calculate_period(today(), today())
        .await?;
    assert!(second.created.is_empty());
    assert_eq!(second.skipped_existing, vec![instructor_id]);

    let err = app
        .context
        .payout_service
        .calculate_for_instructor(instructor_id, today(), today())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ReconciliationConflict(_)));
    Ok(())
}

#[tokio::test]
async fn calculation_rejects_bad_input() -> anyhow::Result<()> {
    let app = setup_with(policy()).await?;
    let yesterday = today().pred_opt().unwrap();

    let err = app
        .context
        .payout_service
        .calculate_period(today(), yesterday)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let err = app
        .context
        .payout_service
        .calculate_for_instructor(Uuid::new_v4(), today(), today())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    Ok(())
}

#[tokio::test]
async fn new_earnings_absorb_outstanding_debt() -> anyhow::Result<()> {
    let app = setup_with(policy()).await?;
    let instructor_id = Uuid::new_v4();
    app.completed_payment(instructor_id, 50_000, 0).await?;
    let refunded = app.completed_payment(instructor_id, 10_000, 0).await?;
    app.context
        .refund_service
        .request_refund(RefundRequest {
            payment_reference: refunded.reference.clone(),
            amount: 10_000,
            reason: "Duplicate purchase".to_string(),
            requested_by: Uuid::new_v4(),
        })
        .await?;
    assert_eq!(
        app.context.payout_service.outstanding_debt(instructor_id).await?,
        7_000
    );

    let summary = app
        .context
        .payout_service
        .calculate_period(today(), today())
        .await?;
    let payout = app.context.payout_service.get_payout(summary.created[0]).await?;

    assert_eq!(payout.instructor_share, 42_000);
    assert_eq!(payout.previous_advance, 7_000);
    assert_eq!(payout.net_payout, 35_000);
    assert_eq!(
        payout.net_payout,
        payout.instructor_share - payout.previous_advance - payout.refund_deductions
    );
    assert_eq!(app.context.payout_service.outstanding_debt(instructor_id).await?, 0);

    let debts: Vec<_> = app
        .context
        .payout_service
        .list_payouts_for_instructor(instructor_id)
        .await?
        .into_iter()
        .filter(|p| p.kind == PayoutKind::RefundDebt)
        .collect();
    assert_eq!(debts.len(), 1);
    assert_eq!(debts[0].status, PayoutStatus::DebtSettled);
    assert_eq!(debts[0].debt_recovered, 7_000);
    Ok(())
}

#[tokio::test]
async fn queued_transfer_completes_on_confirmation() -> anyhow::Result<()> {
    let app = setup_with(policy()).await?;
    let (_, payout_id) = pending_payout(&app, 20_000).await?;

    let payout = app
        .context
        .payout_service
        .process_payout(payout_id, true)
        .await?;
    assert_eq!(payout.status, PayoutStatus::Processing);
    assert_eq!(payout.gateway, Some(GatewayName::Paystack));
    let reference = payout.transfer_reference.clone().expect("transfer reference");
    assert!(reference.starts_with("PO-"));

    let transfers = app.paystack.transfers();
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].amount, 14_000);
    assert_eq!(transfers[0].account_name, "ADA OKONKWO");

    let confirmed = app
        .context
        .payout_service
        .confirm_transfer(&reference, Some("TRF_confirmed"))
        .await?
        .expect("payout");
    assert_eq!(confirmed.status, PayoutStatus::Completed);
    assert!(confirmed.completed_at.is_some());
    assert!(app.notifier.names().contains(&"payout_completed"));
    Ok(())
}

#[tokio::test]
async fn immediate_transfer_success_completes_payout() -> anyhow::Result<()> {
    let app = setup_with(policy()).await?;
    let (_, payout_id) = pending_payout(&app, 20_000).await?;
    app.paystack.set_transfer_status(GatewayStatus::Success);

    let payout = app
        .context
        .payout_service
        .process_payout(payout_id, true)
        .await?;

    assert_eq!(payout.status, PayoutStatus::Completed);
    assert!(payout.gateway_transfer_code.is_some());
    Ok(())
}

#[tokio::test]
async fn rejected_transfer_falls_back_to_secondary_gateway() -> anyhow::Result<()> {
    let app = setup_with(policy()).await?;
    let (_, payout_id) = pending_payout(&app, 20_000).await?;
    app.paystack.fail(
        FakeOp::Transfer,
        FakeFailure::Rejected("insufficient balance".to_string()),
    );

    let payout = app
        .context
        .payout_service
        .process_payout(payout_id, true)
        .await?;

    assert_eq!(payout.status, PayoutStatus::Processing);
    assert_eq!(payout.gateway, Some(GatewayName::Flutterwave));
    assert_eq!(app.flutterwave.transfers().len(), 1);
    Ok(())
}

#[tokio::test]
async fn unknown_transfer_outcome_stops_the_chain() -> anyhow::Result<()> {
    let app = setup_with(policy()).await?;
    let (_, payout_id) = pending_payout(&app, 20_000).await?;
    app.paystack.fail(FakeOp::Transfer, FakeFailure::Unavailable);

    let payout = app
        .context
        .payout_service
        .process_payout(payout_id, true)
        .await?;

    assert_eq!(payout.status, PayoutStatus::Processing);
    assert_eq!(app.flutterwave.calls(FakeOp::Transfer), 0);

    // Still in flight, so it cannot be sent again
    let err = app
        .context
        .payout_service
        .process_payout(payout_id, true)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(app.paystack.calls(FakeOp::Transfer), 1);
    Ok(())
}

#[tokio::test]
async fn payout_fails_when_every_gateway_rejects_and_can_be_retried() -> anyhow::Result<()> {
    let app = setup_with(policy()).await?;
    let (_, payout_id) = pending_payout(&app, 20_000).await?;
    for gateway in [&app.paystack, &app.flutterwave] {
        gateway.fail(FakeOp::Transfer, FakeFailure::Rejected("account blocked".to_string()));
    }

    let failed = app
        .context
        .payout_service
        .process_payout(payout_id, true)
        .await?;
    assert_eq!(failed.status, PayoutStatus::Failed);
    assert!(failed.failure_reason.unwrap_or_default().contains("account blocked"));
    assert!(app.notifier.names().contains(&"payout_failed"));
    let first_reference = failed.transfer_reference;

    app.paystack.clear_failure(FakeOp::Transfer);
    let retried = app.context.payout_service.retry_payout(payout_id).await?;
    assert_eq!(retried.status, PayoutStatus::Processing);
    assert_ne!(retried.transfer_reference, first_reference);

    let err = app
        .context
        .payout_service
        .retry_payout(payout_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    Ok(())
}

#[tokio::test]
async fn transfer_failure_webhook_fails_processing_payout() -> anyhow::Result<()> {
    let app = setup_with(policy()).await?;
    let (_, payout_id) = pending_payout(&app, 20_000).await?;
    let payout = app
        .context
        .payout_service
        .process_payout(payout_id, true)
        .await?;
    let reference = payout.transfer_reference.expect("transfer reference");

    let failed = app
        .context
        .payout_service
        .fail_transfer(&reference, "Account closed")
        .await?
        .expect("payout");
    assert_eq!(failed.status, PayoutStatus::Failed);
    assert_eq!(failed.failure_reason.as_deref(), Some("Account closed"));

    assert!(app
        .context
        .payout_service
        .fail_transfer("PO-UNKNOWN", "Account closed")
        .await?
        .is_none());
    Ok(())
}

#[tokio::test]
async fn payouts_are_held_without_verified_account_or_below_minimum() -> anyhow::Result<()> {
    let app = setup_with(PolicyConfig {
        minimum_payout: 50_000,
        ..PolicyConfig::default()
    })
    .await?;

    let unverified = Uuid::new_v4();
    app.completed_payment(unverified, 100_000, 0).await?;
    let payout = app
        .context
        .payout_service
        .calculate_for_instructor(unverified, today(), today())
        .await?;
    let err = app
        .context
        .payout_service
        .process_payout(payout.id, true)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(ref reason) if reason.contains("bank account")));

    let (_, small) = pending_payout(&app, 20_000).await?;
    let err = app
        .context
        .payout_service
        .process_payout(small, true)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(ref reason) if reason.contains("minimum")));

    assert_eq!(app.paystack.calls(FakeOp::Transfer), 0);
    Ok(())
}

#[tokio::test]
async fn batch_only_disburses_auto_payout_instructors_under_the_ceiling() -> anyhow::Result<()> {
    let app = setup_with(PolicyConfig {
        minimum_payout: 1_000,
        payout_auto_process_ceiling: 20_000,
        ..PolicyConfig::default()
    })
    .await?;

    let auto = Uuid::new_v4();
    app.verified_account(auto, true).await?;
    app.completed_payment(auto, 20_000, 0).await?;

    let manual = Uuid::new_v4();
    app.verified_account(manual, false).await?;
    app.completed_payment(manual, 20_000, 0).await?;

    let large = Uuid::new_v4();
    app.verified_account(large, true).await?;
    app.completed_payment(large, 100_000, 0).await?;

    let summary = app
        .context
        .payout_service
        .run_batch(today(), today(), true)
        .await?;
    assert_eq!(summary.created.len(), 3);
    assert_eq!(summary.disbursed.len(), 1);
    assert_eq!(summary.held.len(), 2);
    assert!(summary.failed.is_empty());

    let auto_payout = &app
        .context
        .payout_service
        .list_payouts_for_instructor(auto)
        .await?[0];
    assert_eq!(summary.disbursed, vec![auto_payout.id]);

    let large_payout = &app
        .context
        .payout_service
        .list_payouts_for_instructor(large)
        .await?[0];
    let (_, reason) = summary
        .held
        .iter()
        .find(|(id, _)| *id == large_payout.id)
        .expect("large payout held");
    assert!(reason.contains("ceiling"));

    // An operator can still push it through
    let bulk = app
        .context
        .payout_service
        .process_bulk(&[large_payout.id])
        .await?;
    assert_eq!(bulk.disbursed, vec![large_payout.id]);
    Ok(())
}

#[tokio::test]
async fn batch_without_disbursement_only_calculates() -> anyhow::Result<()> {
    let app = setup_with(policy()).await?;
    let instructor_id = Uuid::new_v4();
    app.verified_account(instructor_id, true).await?;
    app.completed_payment(instructor_id, 20_000, 0).await?;

    let summary = app
        .context
        .payout_service
        .run_batch(today(), today(), false)
        .await?;

    assert_eq!(summary.created.len(), 1);
    assert!(summary.disbursed.is_empty());
    assert_eq!(app.paystack.calls(FakeOp::Transfer), 0);
    Ok(())
}

/// Commits a refund clawback against the payout right before delegating the
/// claim, the way a concurrent refund confirmation would.
struct ClawbackBeforeClaim {
    inner: SqlitePayoutRepository,
    pool: SqlitePool,
    clawback: i64,
}

#[async_trait]
impl PayoutRepository for ClawbackBeforeClaim {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<InstructorPayout>> {
        self.inner.find_by_id(id).await
    }
    async fn find_by_transfer_reference(&self, reference: &str) -> Result<Option<InstructorPayout>> {
        self.inner.find_by_transfer_reference(reference).await
    }
    async fn list_for_instructor(&self, instructor_id: Uuid) -> Result<Vec<InstructorPayout>> {
        self.inner.list_for_instructor(instructor_id).await
    }
    async fn list_pending(&self) -> Result<Vec<InstructorPayout>> {
        self.inner.list_pending().await
    }
    async fn exists_for_period(
        &self,
        instructor_id: Uuid,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> Result<bool> {
        self.inner
            .exists_for_period(instructor_id, period_start, period_end)
            .await
    }
    async fn create_earnings(&self, draft: &PayoutDraft) -> Result<InstructorPayout> {
        self.inner.create_earnings(draft).await
    }
    async fn absorb_outstanding_debt(&self, id: Uuid) -> Result<InstructorPayout> {
        self.inner.absorb_outstanding_debt(id).await
    }
    async fn outstanding_debt(&self, instructor_id: Uuid) -> Result<i64> {
        self.inner.outstanding_debt(instructor_id).await
    }
    async fn claim_for_disbursement(&self, id: Uuid) -> Result<Option<InstructorPayout>> {
        sqlx::query(
            r#"
            UPDATE instructor_payouts
            SET refund_deductions = refund_deductions + ?,
                net_payout = net_payout - ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(self.clawback)
        .bind(self.clawback)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;
        self.inner.claim_for_disbursement(id).await
    }
    async fn record_transfer_attempt(
        &self,
        id: Uuid,
        gateway: GatewayName,
        transfer_reference: &str,
        gateway_transfer_code: Option<&str>,
    ) -> Result<()> {
        self.inner
            .record_transfer_attempt(id, gateway, transfer_reference, gateway_transfer_code)
            .await
    }
    async fn mark_completed(&self, id: Uuid, gateway_transfer_code: Option<&str>) -> Result<bool> {
        self.inner.mark_completed(id, gateway_transfer_code).await
    }
    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<bool> {
        self.inner.mark_failed(id, reason).await
    }
    async fn release_claim(&self, id: Uuid, reason: &str) -> Result<bool> {
        self.inner.release_claim(id, reason).await
    }
    async fn reset_for_retry(&self, id: Uuid) -> Result<bool> {
        self.inner.reset_for_retry(id).await
    }
}

fn service_with_clawback(app: &TestApp, clawback: i64) -> PayoutService {
    let pool = app.context.db_pool.clone();
    let repo = ClawbackBeforeClaim {
        inner: SqlitePayoutRepository::new(pool.clone()),
        pool,
        clawback,
    };
    PayoutService::new(
        Arc::new(repo),
        app.context.payment_repo.clone(),
        app.context.bank_account_service.clone(),
        app.context.gateways.clone(),
        app.context.notifications.clone(),
        policy(),
    )
}

#[tokio::test]
async fn transfer_sends_the_amount_left_after_a_late_clawback() -> anyhow::Result<()> {
    let app = setup_with(policy()).await?;
    let (_, payout_id) = pending_payout(&app, 100_000).await?;
    assert_eq!(app.context.payout_service.get_payout(payout_id).await?.net_payout, 70_000);

    let service = service_with_clawback(&app, 8_000);
    let payout = service.process_payout(payout_id, true).await?;

    assert_eq!(payout.status, PayoutStatus::Processing);
    assert_eq!(payout.refund_deductions, 8_000);
    assert_eq!(payout.net_payout, 62_000);
    let transfers = app.paystack.transfers();
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].amount, 62_000);
    Ok(())
}

#[tokio::test]
async fn late_clawback_below_minimum_releases_the_claim() -> anyhow::Result<()> {
    let app = setup_with(policy()).await?;
    let (_, payout_id) = pending_payout(&app, 10_000).await?;

    let service = service_with_clawback(&app, 6_500);
    let err = service.process_payout(payout_id, true).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(ref msg) if msg.contains("minimum")));

    let payout = app.context.payout_service.get_payout(payout_id).await?;
    assert_eq!(payout.status, PayoutStatus::Pending);
    assert_eq!(payout.net_payout, 500);
    assert!(app.paystack.transfers().is_empty());
    Ok(())
}
