use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::{check_refund_eligibility, status_after_refunds, PaymentRefund, RefundStatus, RevenueSplit},
    error::{AppError, Result},
    repository::{
        payment_repository::{fetch_payment, lock_payment, set_payment_status},
        payout_repository::deduct_in_tx,
        parse_uuid, to_utc, RefundRepository, RefundSettlement,
    },
};

const REFUND_COLUMNS: &str = r#"
    id, reference, payment_id, amount, reason, status, gateway_refund_reference,
    failure_reason, requested_by, reviewed_by, review_note,
    requested_at, reviewed_at, processed_at, completed_at, created_at, updated_at
"#;

#[derive(FromRow)]
struct RefundRow {
    id: String,
    reference: String,
    payment_id: String,
    amount: i64,
    reason: String,
    status: String,
    gateway_refund_reference: Option<String>,
    failure_reason: Option<String>,
    requested_by: String,
    reviewed_by: Option<String>,
    review_note: Option<String>,
    requested_at: NaiveDateTime,
    reviewed_at: Option<NaiveDateTime>,
    processed_at: Option<NaiveDateTime>,
    completed_at: Option<NaiveDateTime>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

pub struct SqliteRefundRepository {
    pool: SqlitePool,
}

impl SqliteRefundRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_refund(row: RefundRow) -> Result<PaymentRefund> {
        Ok(PaymentRefund {
            id: parse_uuid(&row.id)?,
            reference: row.reference,
            payment_id: parse_uuid(&row.payment_id)?,
            amount: row.amount,
            reason: row.reason,
            status: RefundStatus::parse(&row.status).ok_or_else(|| {
                AppError::Database(format!("Invalid refund status: {}", row.status))
            })?,
            gateway_refund_reference: row.gateway_refund_reference,
            failure_reason: row.failure_reason,
            requested_by: parse_uuid(&row.requested_by)?,
            reviewed_by: row.reviewed_by.as_deref().map(parse_uuid).transpose()?,
            review_note: row.review_note,
            requested_at: to_utc(row.requested_at),
            reviewed_at: row.reviewed_at.map(to_utc),
            processed_at: row.processed_at.map(to_utc),
            completed_at: row.completed_at.map(to_utc),
            created_at: to_utc(row.created_at),
            updated_at: to_utc(row.updated_at),
        })
    }

    async fn fetch_many(&self, clause: &str, value: &str) -> Result<Vec<PaymentRefund>> {
        let sql = format!("SELECT {} FROM payment_refunds WHERE {}", REFUND_COLUMNS, clause);
        let rows = sqlx::query_as::<_, RefundRow>(&sql)
            .bind(value)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        rows.into_iter().map(Self::row_to_refund).collect()
    }

    async fn review(
        &self,
        id: Uuid,
        status: RefundStatus,
        reviewer: Uuid,
        note: Option<&str>,
    ) -> Result<bool> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query(
            r#"
            UPDATE payment_refunds
            SET status = ?, reviewed_by = ?, review_note = ?, reviewed_at = ?, updated_at = ?
            WHERE id = ? AND status = 'pending_review'
            "#,
        )
        .bind(status.as_str())
        .bind(reviewer.to_string())
        .bind(note)
        .bind(now)
        .bind(now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}

async fn fetch_refund(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<PaymentRefund>> {
    let sql = format!("SELECT {} FROM payment_refunds WHERE id = ?", REFUND_COLUMNS);
    let row = sqlx::query_as::<_, RefundRow>(&sql)
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

    row.map(SqliteRefundRepository::row_to_refund).transpose()
}

async fn completed_total_on(conn: &mut SqliteConnection, payment_id: Uuid) -> Result<i64> {
    sqlx::query_scalar::<_, i64>(
        "SELECT COALESCE(SUM(amount), 0) FROM payment_refunds WHERE payment_id = ? AND status = 'completed'",
    )
    .bind(payment_id.to_string())
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| AppError::Database(e.to_string()))
}

async fn has_open_refund(conn: &mut SqliteConnection, payment_id: Uuid) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM payment_refunds
        WHERE payment_id = ? AND status IN ('pending_review', 'approved', 'processing')
        "#,
    )
    .bind(payment_id.to_string())
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| AppError::Database(e.to_string()))?;

    Ok(count > 0)
}

#[async_trait]
impl RefundRepository for SqliteRefundRepository {
    async fn create_checked(
        &self,
        refund: PaymentRefund,
        window_days: i64,
    ) -> Result<PaymentRefund> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if !lock_payment(&mut *tx, refund.payment_id).await? {
            return Err(AppError::NotFound(format!(
                "Payment {} not found",
                refund.payment_id
            )));
        }
        let payment = fetch_payment(&mut *tx, refund.payment_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Payment {} not found", refund.payment_id)))?;
        let completed_total = completed_total_on(&mut *tx, payment.id).await?;
        let open = has_open_refund(&mut *tx, payment.id).await?;

        check_refund_eligibility(
            &payment,
            refund.amount,
            completed_total,
            open,
            window_days,
            Utc::now(),
        )?;

        let now = Utc::now().naive_utc();
        sqlx::query(
            r#"
            INSERT INTO payment_refunds (
                id, reference, payment_id, amount, reason, status, gateway_refund_reference,
                failure_reason, requested_by, reviewed_by, review_note,
                requested_at, reviewed_at, processed_at, completed_at, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(refund.id.to_string())
        .bind(&refund.reference)
        .bind(refund.payment_id.to_string())
        .bind(refund.amount)
        .bind(&refund.reason)
        .bind(refund.status.as_str())
        .bind(&refund.gateway_refund_reference)
        .bind(&refund.failure_reason)
        .bind(refund.requested_by.to_string())
        .bind(refund.reviewed_by.map(|id| id.to_string()))
        .bind(&refund.review_note)
        .bind(refund.requested_at.naive_utc())
        .bind(refund.reviewed_at.map(|dt| dt.naive_utc()))
        .bind(refund.processed_at.map(|dt| dt.naive_utc()))
        .bind(refund.completed_at.map(|dt| dt.naive_utc()))
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        self.find_by_id(refund.id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve created refund".to_string())
        })
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<PaymentRefund>> {
        Ok(self.fetch_many("id = ?", &id.to_string()).await?.into_iter().next())
    }

    async fn find_by_gateway_reference(&self, gateway_reference: &str) -> Result<Option<PaymentRefund>> {
        Ok(self
            .fetch_many("gateway_refund_reference = ?", gateway_reference)
            .await?
            .into_iter()
            .next())
    }

    async fn find_open_for_payment(&self, payment_id: Uuid) -> Result<Option<PaymentRefund>> {
        Ok(self
            .fetch_many(
                "payment_id = ? AND status IN ('pending_review', 'approved', 'processing') ORDER BY created_at DESC",
                &payment_id.to_string(),
            )
            .await?
            .into_iter()
            .next())
    }

    async fn list_for_payment(&self, payment_id: Uuid) -> Result<Vec<PaymentRefund>> {
        self.fetch_many("payment_id = ? ORDER BY created_at ASC", &payment_id.to_string())
            .await
    }

    async fn completed_total(&self, payment_id: Uuid) -> Result<i64> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        completed_total_on(&mut *conn, payment_id).await
    }

    async fn mark_approved(&self, id: Uuid, reviewer: Uuid, note: Option<&str>) -> Result<bool> {
        self.review(id, RefundStatus::Approved, reviewer, note).await
    }

    async fn mark_cancelled(&self, id: Uuid, reviewer: Uuid, note: Option<&str>) -> Result<bool> {
        self.review(id, RefundStatus::Cancelled, reviewer, note).await
    }

    async fn claim_for_execution(&self, id: Uuid) -> Result<bool> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query(
            r#"
            UPDATE payment_refunds
            SET status = 'processing', processed_at = ?, updated_at = ?
            WHERE id = ? AND status = 'approved'
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_processing(&self, id: Uuid, gateway_reference: Option<&str>) -> Result<bool> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query(
            r#"
            UPDATE payment_refunds
            SET status = 'processing',
                gateway_refund_reference = COALESCE(?, gateway_refund_reference),
                processed_at = COALESCE(processed_at, ?),
                updated_at = ?
            WHERE id = ? AND status IN ('approved', 'processing')
            "#,
        )
        .bind(gateway_reference)
        .bind(now)
        .bind(now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE payment_refunds
            SET status = 'failed', failure_reason = ?, updated_at = ?
            WHERE id = ? AND status IN ('pending_review', 'approved', 'processing')
            "#,
        )
        .bind(reason)
        .bind(Utc::now().naive_utc())
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn complete_with_deduction(
        &self,
        id: Uuid,
        gateway_reference: Option<&str>,
        split: &RevenueSplit,
    ) -> Result<Option<RefundSettlement>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        let now = Utc::now().naive_utc();

        let result = sqlx::query(
            r#"
            UPDATE payment_refunds
            SET status = 'completed',
                gateway_refund_reference = COALESCE(?, gateway_refund_reference),
                failure_reason = NULL,
                processed_at = COALESCE(processed_at, ?),
                completed_at = ?,
                updated_at = ?
            WHERE id = ? AND status IN ('approved', 'processing')
            "#,
        )
        .bind(gateway_reference)
        .bind(now)
        .bind(now)
        .bind(now)
        .bind(id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;
            return Ok(None);
        }

        let refund = fetch_refund(&mut *tx, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Refund {} not found", id)))?;
        let payment = fetch_payment(&mut *tx, refund.payment_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Payment {} not found", refund.payment_id)))?;

        let refunded_total = completed_total_on(&mut *tx, payment.id).await?;
        if refunded_total > payment.amount {
            tx.rollback()
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;
            return Err(AppError::ReconciliationConflict(format!(
                "refunds on {} would total {} against a payment of {}",
                payment.reference, refunded_total, payment.amount
            )));
        }
        let new_status = status_after_refunds(payment.amount, refunded_total);
        set_payment_status(&mut *tx, payment.id, new_status).await?;

        let clawback = split.instructor_portion(refund.amount);
        let deduction = deduct_in_tx(&mut *tx, payment.instructor_id, refund.id, clawback).await?;

        let payment = fetch_payment(&mut *tx, payment.id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Payment {} not found", refund.payment_id)))?;

        tx.commit()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(Some(RefundSettlement {
            refund,
            payment,
            deduction,
        }))
    }
}
