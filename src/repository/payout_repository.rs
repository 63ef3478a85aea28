use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::{
        plan_debt_recovery, plan_refund_deduction, DebtBalance, DeductionOutcome, GatewayName,
        InstructorPayout, PayoutBalance, PayoutDraft, PayoutKind, PayoutStatus,
    },
    error::{AppError, Result},
    repository::{parse_gateway, parse_uuid, to_utc, PayoutRepository},
};

const PAYOUT_COLUMNS: &str = r#"
    id, instructor_id, kind, period_start, period_end, total_revenue, gateway_fees,
    instructor_share, platform_fee, previous_advance, refund_deductions, net_payout,
    minimum_payout, debt_recovered, status, source_refund_id, gateway,
    transfer_reference, gateway_transfer_code, failure_reason,
    processed_at, completed_at, created_at, updated_at
"#;

#[derive(FromRow)]
struct PayoutRow {
    id: String,
    instructor_id: String,
    kind: String,
    period_start: NaiveDate,
    period_end: NaiveDate,
    total_revenue: i64,
    gateway_fees: i64,
    instructor_share: i64,
    platform_fee: i64,
    previous_advance: i64,
    refund_deductions: i64,
    net_payout: i64,
    minimum_payout: i64,
    debt_recovered: i64,
    status: String,
    source_refund_id: Option<String>,
    gateway: Option<String>,
    transfer_reference: Option<String>,
    gateway_transfer_code: Option<String>,
    failure_reason: Option<String>,
    processed_at: Option<NaiveDateTime>,
    completed_at: Option<NaiveDateTime>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

pub struct SqlitePayoutRepository {
    pool: SqlitePool,
}

impl SqlitePayoutRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_payout(row: PayoutRow) -> Result<InstructorPayout> {
        Ok(InstructorPayout {
            id: parse_uuid(&row.id)?,
            instructor_id: parse_uuid(&row.instructor_id)?,
            kind: PayoutKind::parse(&row.kind)
                .ok_or_else(|| AppError::Database(format!("Invalid payout kind: {}", row.kind)))?,
            period_start: row.period_start,
            period_end: row.period_end,
            total_revenue: row.total_revenue,
            gateway_fees: row.gateway_fees,
            instructor_share: row.instructor_share,
            platform_fee: row.platform_fee,
            previous_advance: row.previous_advance,
            refund_deductions: row.refund_deductions,
            net_payout: row.net_payout,
            minimum_payout: row.minimum_payout,
            debt_recovered: row.debt_recovered,
            status: PayoutStatus::parse(&row.status).ok_or_else(|| {
                AppError::Database(format!("Invalid payout status: {}", row.status))
            })?,
            source_refund_id: row.source_refund_id.as_deref().map(parse_uuid).transpose()?,
            gateway: row.gateway.as_deref().map(parse_gateway).transpose()?,
            transfer_reference: row.transfer_reference,
            gateway_transfer_code: row.gateway_transfer_code,
            failure_reason: row.failure_reason,
            processed_at: row.processed_at.map(to_utc),
            completed_at: row.completed_at.map(to_utc),
            created_at: to_utc(row.created_at),
            updated_at: to_utc(row.updated_at),
        })
    }

    async fn fetch_many(&self, clause: &str, value: &str) -> Result<Vec<InstructorPayout>> {
        let sql = format!("SELECT {} FROM instructor_payouts WHERE {}", PAYOUT_COLUMNS, clause);
        let rows = sqlx::query_as::<_, PayoutRow>(&sql)
            .bind(value)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        rows.into_iter().map(Self::row_to_payout).collect()
    }

    async fn transition(&self, sql: &str, id: Uuid, text: Option<&str>) -> Result<bool> {
        let now = Utc::now().naive_utc();
        let mut query = sqlx::query(sql).bind(now);
        if let Some(text) = text {
            query = query.bind(text);
        }
        let result = query
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}

pub(crate) async fn fetch_payout(
    conn: &mut SqliteConnection,
    id: Uuid,
) -> Result<Option<InstructorPayout>> {
    let sql = format!("SELECT {} FROM instructor_payouts WHERE id = ?", PAYOUT_COLUMNS);
    let row = sqlx::query_as::<_, PayoutRow>(&sql)
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

    row.map(SqlitePayoutRepository::row_to_payout).transpose()
}

/// Runs the instructor deduction cascade on an open transaction: claws
/// `amount` back from pending earnings payouts, oldest first, and records
/// whatever is left as a refund debt row.
pub(crate) async fn deduct_in_tx(
    conn: &mut SqliteConnection,
    instructor_id: Uuid,
    refund_id: Uuid,
    amount: i64,
) -> Result<DeductionOutcome> {
    let now = Utc::now().naive_utc();

    let balances = sqlx::query_as::<_, (String, i64)>(
        r#"
        SELECT id, net_payout
        FROM instructor_payouts
        WHERE instructor_id = ? AND kind = 'earnings' AND status = 'pending'
        ORDER BY period_start ASC, created_at ASC
        "#,
    )
    .bind(instructor_id.to_string())
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| AppError::Database(e.to_string()))?
    .into_iter()
    .map(|(id, net_payout)| {
        Ok(PayoutBalance {
            payout_id: parse_uuid(&id)?,
            net_payout,
        })
    })
    .collect::<Result<Vec<_>>>()?;

    let plan = plan_refund_deduction(&balances, amount);

    for (payout_id, deduction) in &plan.applied {
        sqlx::query(
            r#"
            UPDATE instructor_payouts
            SET refund_deductions = refund_deductions + ?,
                net_payout = net_payout - ?,
                updated_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(deduction)
        .bind(deduction)
        .bind(now)
        .bind(payout_id.to_string())
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;
    }

    let mut debt_payout_id = None;
    if plan.remaining > 0 {
        let debt_id = Uuid::new_v4();
        let today = now.date();
        sqlx::query(
            r#"
            INSERT INTO instructor_payouts (
                id, instructor_id, kind, period_start, period_end,
                instructor_share, previous_advance, refund_deductions, net_payout,
                status, source_refund_id, created_at, updated_at
            ) VALUES (?, ?, 'refund_debt', ?, ?, 0, 0, ?, ?, 'debt_created', ?, ?, ?)
            "#,
        )
        .bind(debt_id.to_string())
        .bind(instructor_id.to_string())
        .bind(today)
        .bind(today)
        .bind(plan.remaining)
        .bind(-plan.remaining)
        .bind(refund_id.to_string())
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;
        debt_payout_id = Some(debt_id);
    }

    Ok(DeductionOutcome {
        instructor_id,
        requested: amount,
        deducted_from_pending: plan.deducted(),
        debt_payout_id,
        debt_amount: plan.remaining,
    })
}

/// Nets a pending payout against the instructor's outstanding refund debt,
/// oldest debt first. Fully recovered debts move to `debt_settled`.
pub(crate) async fn absorb_debts_in_tx(
    conn: &mut SqliteConnection,
    payout_id: Uuid,
) -> Result<()> {
    let payout = fetch_payout(&mut *conn, payout_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Payout {} not found", payout_id)))?;
    if payout.status != PayoutStatus::Pending || payout.net_payout <= 0 {
        return Ok(());
    }

    let debts = sqlx::query_as::<_, (String, i64, i64)>(
        r#"
        SELECT id, net_payout, debt_recovered
        FROM instructor_payouts
        WHERE instructor_id = ? AND status = 'debt_created' AND id != ?
        ORDER BY created_at ASC
        "#,
    )
    .bind(payout.instructor_id.to_string())
    .bind(payout_id.to_string())
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| AppError::Database(e.to_string()))?
    .into_iter()
    .map(|(id, net_payout, recovered)| {
        Ok(DebtBalance {
            payout_id: parse_uuid(&id)?,
            outstanding: (-net_payout - recovered).max(0),
        })
    })
    .collect::<Result<Vec<_>>>()?;

    let plan = plan_debt_recovery(&debts, payout.net_payout);
    if plan.applied.is_empty() {
        return Ok(());
    }

    let now = Utc::now().naive_utc();
    for (debt_id, recovered) in &plan.applied {
        sqlx::query(
            r#"
            UPDATE instructor_payouts
            SET debt_recovered = debt_recovered + ?,
                status = CASE WHEN debt_recovered + ? >= -net_payout
                              THEN 'debt_settled' ELSE status END,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(recovered)
        .bind(recovered)
        .bind(now)
        .bind(debt_id.to_string())
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;
    }

    let total = plan.total();
    sqlx::query(
        r#"
        UPDATE instructor_payouts
        SET previous_advance = previous_advance + ?,
            net_payout = net_payout - ?,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(total)
    .bind(total)
    .bind(now)
    .bind(payout_id.to_string())
    .execute(&mut *conn)
    .await
    .map_err(|e| AppError::Database(e.to_string()))?;

    tracing::info!(
        "Recovered {} of refund debt into payout {} for instructor {}",
        total,
        payout_id,
        payout.instructor_id
    );
    Ok(())
}

#[async_trait]
impl PayoutRepository for SqlitePayoutRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<InstructorPayout>> {
        Ok(self.fetch_many("id = ?", &id.to_string()).await?.into_iter().next())
    }

    async fn find_by_transfer_reference(&self, reference: &str) -> Result<Option<InstructorPayout>> {
        Ok(self
            .fetch_many("transfer_reference = ?", reference)
            .await?
            .into_iter()
            .next())
    }

    async fn list_for_instructor(&self, instructor_id: Uuid) -> Result<Vec<InstructorPayout>> {
        self.fetch_many(
            "instructor_id = ? ORDER BY period_start DESC, created_at DESC",
            &instructor_id.to_string(),
        )
        .await
    }

    async fn list_pending(&self) -> Result<Vec<InstructorPayout>> {
        self.fetch_many(
            "status = ? AND kind = 'earnings' ORDER BY period_start ASC, created_at ASC",
            PayoutStatus::Pending.as_str(),
        )
        .await
    }

    async fn exists_for_period(
        &self,
        instructor_id: Uuid,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM instructor_payouts
            WHERE instructor_id = ? AND period_start = ? AND period_end = ? AND kind = 'earnings'
            "#,
        )
        .bind(instructor_id.to_string())
        .bind(period_start)
        .bind(period_end)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(count > 0)
    }

    async fn create_earnings(&self, draft: &PayoutDraft) -> Result<InstructorPayout> {
        let id = Uuid::new_v4();
        let now = Utc::now().naive_utc();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO instructor_payouts (
                id, instructor_id, kind, period_start, period_end, total_revenue, gateway_fees,
                instructor_share, platform_fee, previous_advance, refund_deductions, net_payout,
                minimum_payout, status, created_at, updated_at
            ) VALUES (?, ?, 'earnings', ?, ?, ?, ?, ?, ?, 0, 0, ?, ?, 'pending', ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(draft.instructor_id.to_string())
        .bind(draft.period_start)
        .bind(draft.period_end)
        .bind(draft.total_revenue)
        .bind(draft.gateway_fees)
        .bind(draft.instructor_share)
        .bind(draft.platform_fee)
        .bind(draft.instructor_share)
        .bind(draft.minimum_payout)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                AppError::ReconciliationConflict(format!(
                    "payout for instructor {} already exists for {} to {}",
                    draft.instructor_id, draft.period_start, draft.period_end
                ))
            }
            other => AppError::Database(other.to_string()),
        })?;

        absorb_debts_in_tx(&mut *tx, id).await?;

        tx.commit()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        self.find_by_id(id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve created payout".to_string())
        })
    }

    async fn absorb_outstanding_debt(&self, id: Uuid) -> Result<InstructorPayout> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        sqlx::query("UPDATE instructor_payouts SET updated_at = updated_at WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        absorb_debts_in_tx(&mut *tx, id).await?;

        tx.commit()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Payout {} not found", id)))
    }

    async fn outstanding_debt(&self, instructor_id: Uuid) -> Result<i64> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(-net_payout - debt_recovered), 0)
            FROM instructor_payouts
            WHERE instructor_id = ? AND status = 'debt_created'
            "#,
        )
        .bind(instructor_id.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(total)
    }

    async fn claim_for_disbursement(&self, id: Uuid) -> Result<Option<InstructorPayout>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        // Write lock first: deductions must not land between read and claim.
        sqlx::query("UPDATE instructor_payouts SET updated_at = updated_at WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        absorb_debts_in_tx(&mut *tx, id).await?;

        let now = Utc::now().naive_utc();
        let claimed = sqlx::query(
            r#"
            UPDATE instructor_payouts
            SET status = 'processing', processed_at = ?1, failure_reason = NULL, updated_at = ?1
            WHERE id = ?2 AND status = 'pending'
            "#,
        )
        .bind(now)
        .bind(id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?
        .rows_affected()
            > 0;

        let payout = if claimed {
            fetch_payout(&mut *tx, id).await?
        } else {
            None
        };

        tx.commit()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(payout)
    }

    async fn record_transfer_attempt(
        &self,
        id: Uuid,
        gateway: GatewayName,
        transfer_reference: &str,
        gateway_transfer_code: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE instructor_payouts
            SET gateway = ?,
                transfer_reference = ?,
                gateway_transfer_code = COALESCE(?, gateway_transfer_code),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(gateway.as_str())
        .bind(transfer_reference)
        .bind(gateway_transfer_code)
        .bind(Utc::now().naive_utc())
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }

    async fn mark_completed(&self, id: Uuid, gateway_transfer_code: Option<&str>) -> Result<bool> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query(
            r#"
            UPDATE instructor_payouts
            SET status = 'completed',
                gateway_transfer_code = COALESCE(?, gateway_transfer_code),
                completed_at = ?,
                failure_reason = NULL,
                updated_at = ?
            WHERE id = ? AND status = 'processing'
            "#,
        )
        .bind(gateway_transfer_code)
        .bind(now)
        .bind(now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<bool> {
        self.transition(
            r#"
            UPDATE instructor_payouts
            SET status = 'failed', updated_at = ?1, failure_reason = ?2
            WHERE id = ?3 AND status = 'processing'
            "#,
            id,
            Some(reason),
        )
        .await
    }

    async fn release_claim(&self, id: Uuid, reason: &str) -> Result<bool> {
        self.transition(
            r#"
            UPDATE instructor_payouts
            SET status = 'pending', updated_at = ?1, failure_reason = ?2, processed_at = NULL
            WHERE id = ?3 AND status = 'processing'
            "#,
            id,
            Some(reason),
        )
        .await
    }

    async fn reset_for_retry(&self, id: Uuid) -> Result<bool> {
        self.transition(
            r#"
            UPDATE instructor_payouts
            SET status = 'pending',
                updated_at = ?1,
                gateway = NULL,
                transfer_reference = NULL,
                gateway_transfer_code = NULL,
                processed_at = NULL
            WHERE id = ?2 AND status = 'failed'
            "#,
            id,
            None,
        )
        .await
    }
}
