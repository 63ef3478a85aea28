use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::{GatewayName, InstructorRevenue, Payment, PaymentStatus},
    error::{AppError, Result},
    integrations::enrollment::{EnrollmentActivation, EnrollmentService},
    repository::{parse_gateway, parse_json, parse_uuid, to_utc, PaymentCompletion, PaymentRepository},
};

const PAYMENT_COLUMNS: &str = r#"
    id, reference, gateway, gateway_reference, user_id, course_id, instructor_id,
    amount, currency, gateway_fee, platform_fee, net_amount, status,
    customer_email, customer_name, customer_phone, authorization_url,
    gateway_response, enrollment_id, failure_reason,
    initiated_at, paid_at, failed_at, created_at, updated_at
"#;

#[derive(FromRow)]
struct PaymentRow {
    id: String,
    reference: String,
    gateway: String,
    gateway_reference: Option<String>,
    user_id: String,
    course_id: String,
    instructor_id: String,
    amount: i64,
    currency: String,
    gateway_fee: i64,
    platform_fee: i64,
    net_amount: i64,
    status: String,
    customer_email: String,
    customer_name: Option<String>,
    customer_phone: Option<String>,
    authorization_url: Option<String>,
    gateway_response: Option<String>,
    enrollment_id: Option<String>,
    failure_reason: Option<String>,
    initiated_at: NaiveDateTime,
    paid_at: Option<NaiveDateTime>,
    failed_at: Option<NaiveDateTime>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

pub struct SqlitePaymentRepository {
    pool: SqlitePool,
}

impl SqlitePaymentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_payment(row: PaymentRow) -> Result<Payment> {
        Ok(Payment {
            id: parse_uuid(&row.id)?,
            reference: row.reference,
            gateway: parse_gateway(&row.gateway)?,
            gateway_reference: row.gateway_reference,
            user_id: parse_uuid(&row.user_id)?,
            course_id: parse_uuid(&row.course_id)?,
            instructor_id: parse_uuid(&row.instructor_id)?,
            amount: row.amount,
            currency: row.currency,
            gateway_fee: row.gateway_fee,
            platform_fee: row.platform_fee,
            net_amount: row.net_amount,
            status: Self::parse_payment_status(&row.status)?,
            customer_email: row.customer_email,
            customer_name: row.customer_name,
            customer_phone: row.customer_phone,
            authorization_url: row.authorization_url,
            gateway_response: parse_json(row.gateway_response),
            enrollment_id: row.enrollment_id,
            failure_reason: row.failure_reason,
            initiated_at: to_utc(row.initiated_at),
            paid_at: row.paid_at.map(to_utc),
            failed_at: row.failed_at.map(to_utc),
            created_at: to_utc(row.created_at),
            updated_at: to_utc(row.updated_at),
        })
    }

    fn parse_payment_status(s: &str) -> Result<PaymentStatus> {
        PaymentStatus::parse(s)
            .ok_or_else(|| AppError::Database(format!("Invalid payment status: {}", s)))
    }

    async fn fetch_one_where(&self, clause: &str, value: &str) -> Result<Option<Payment>> {
        let sql = format!("SELECT {} FROM payments WHERE {}", PAYMENT_COLUMNS, clause);
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        row.map(Self::row_to_payment).transpose()
    }
}

/// Reads a payment on an open connection, typically inside a transaction.
pub(crate) async fn fetch_payment(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<Payment>> {
    let sql = format!("SELECT {} FROM payments WHERE id = ?", PAYMENT_COLUMNS);
    let row = sqlx::query_as::<_, PaymentRow>(&sql)
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

    row.map(SqlitePaymentRepository::row_to_payment).transpose()
}

/// A no-op write that makes the transaction take SQLite's write lock before it
/// reads anything, so concurrent writers on the same payment queue up instead
/// of both reading a stale balance.
pub(crate) async fn lock_payment(conn: &mut SqliteConnection, id: Uuid) -> Result<bool> {
    let result = sqlx::query("UPDATE payments SET updated_at = updated_at WHERE id = ?")
        .bind(id.to_string())
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;
    Ok(result.rows_affected() > 0)
}

pub(crate) async fn set_payment_status(
    conn: &mut SqliteConnection,
    id: Uuid,
    status: PaymentStatus,
) -> Result<()> {
    sqlx::query("UPDATE payments SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(Utc::now().naive_utc())
        .bind(id.to_string())
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;
    Ok(())
}

#[async_trait]
impl PaymentRepository for SqlitePaymentRepository {
    async fn create(&self, payment: Payment) -> Result<Payment> {
        let now = Utc::now().naive_utc();
        let gateway_response = payment.gateway_response.as_ref().map(|v| v.to_string());

        sqlx::query(
            r#"
            INSERT INTO payments (
                id, reference, gateway, gateway_reference, user_id, course_id, instructor_id,
                amount, currency, gateway_fee, platform_fee, net_amount, status,
                customer_email, customer_name, customer_phone, authorization_url,
                gateway_response, enrollment_id, failure_reason,
                initiated_at, paid_at, failed_at, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(payment.id.to_string())
        .bind(&payment.reference)
        .bind(payment.gateway.as_str())
        .bind(&payment.gateway_reference)
        .bind(payment.user_id.to_string())
        .bind(payment.course_id.to_string())
        .bind(payment.instructor_id.to_string())
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(payment.gateway_fee)
        .bind(payment.platform_fee)
        .bind(payment.net_amount)
        .bind(payment.status.as_str())
        .bind(&payment.customer_email)
        .bind(&payment.customer_name)
        .bind(&payment.customer_phone)
        .bind(&payment.authorization_url)
        .bind(gateway_response)
        .bind(&payment.enrollment_id)
        .bind(&payment.failure_reason)
        .bind(payment.initiated_at.naive_utc())
        .bind(payment.paid_at.map(|dt| dt.naive_utc()))
        .bind(payment.failed_at.map(|dt| dt.naive_utc()))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        self.find_by_id(payment.id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve created payment".to_string())
        })
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>> {
        self.fetch_one_where("id = ?", &id.to_string()).await
    }

    async fn find_by_reference(&self, reference: &str) -> Result<Option<Payment>> {
        self.fetch_one_where("reference = ?", reference).await
    }

    async fn find_by_gateway_reference(
        &self,
        gateway: GatewayName,
        gateway_reference: &str,
    ) -> Result<Option<Payment>> {
        let sql = format!(
            "SELECT {} FROM payments WHERE gateway = ? AND gateway_reference = ?",
            PAYMENT_COLUMNS
        );
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(gateway.as_str())
            .bind(gateway_reference)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        row.map(Self::row_to_payment).transpose()
    }

    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<Payment>> {
        let sql = format!(
            "SELECT {} FROM payments WHERE user_id = ? ORDER BY created_at DESC",
            PAYMENT_COLUMNS
        );
        let rows = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(user_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        rows.into_iter().map(Self::row_to_payment).collect()
    }

    async fn record_initialization(
        &self,
        id: Uuid,
        gateway_reference: Option<&str>,
        authorization_url: &str,
    ) -> Result<Payment> {
        sqlx::query(
            r#"
            UPDATE payments
            SET gateway_reference = COALESCE(?, gateway_reference),
                authorization_url = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(gateway_reference)
        .bind(authorization_url)
        .bind(Utc::now().naive_utc())
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        self.find_by_id(id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve updated payment".to_string())
        })
    }

    async fn mark_processing(&self, id: Uuid, note: Option<&str>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = 'processing',
                failure_reason = COALESCE(?, failure_reason),
                updated_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(note)
        .bind(Utc::now().naive_utc())
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        reason: &str,
        raw: Option<&serde_json::Value>,
    ) -> Result<bool> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = 'failed',
                failure_reason = ?,
                gateway_response = COALESCE(?, gateway_response),
                failed_at = ?,
                updated_at = ?
            WHERE id = ? AND status IN ('pending', 'processing')
            "#,
        )
        .bind(reason)
        .bind(raw.map(|v| v.to_string()))
        .bind(now)
        .bind(now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_cancelled(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE payments SET status = 'cancelled', updated_at = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(Utc::now().naive_utc())
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn complete_and_activate(
        &self,
        id: Uuid,
        completion: &PaymentCompletion,
        enrollments: &dyn EnrollmentService,
    ) -> Result<Option<Payment>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        let now = Utc::now().naive_utc();

        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = 'completed',
                gateway_fee = ?,
                platform_fee = ?,
                net_amount = ?,
                gateway_reference = COALESCE(?, gateway_reference),
                gateway_response = ?,
                failure_reason = NULL,
                paid_at = ?,
                updated_at = ?
            WHERE id = ? AND status IN ('pending', 'processing')
            "#,
        )
        .bind(completion.fees.gateway_fee)
        .bind(completion.fees.platform_fee)
        .bind(completion.fees.net_amount)
        .bind(&completion.gateway_reference)
        .bind(completion.raw.to_string())
        .bind(completion.paid_at.naive_utc())
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

        let payment = fetch_payment(&mut *tx, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Payment {} not found", id)))?;

        let activation = EnrollmentActivation::for_payment(&payment);
        let enrollment_id = match enrollments.activate_enrollment(&activation).await {
            Ok(enrollment_id) => enrollment_id,
            Err(e) => {
                tx.rollback()
                    .await
                    .map_err(|e| AppError::Database(e.to_string()))?;
                return Err(e);
            }
        };

        sqlx::query("UPDATE payments SET enrollment_id = ? WHERE id = ?")
            .bind(&enrollment_id)
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        self.find_by_id(id).await
    }

    async fn revenue_by_instructor(
        &self,
        from: NaiveDateTime,
        until: NaiveDateTime,
    ) -> Result<Vec<InstructorRevenue>> {
        let rows = sqlx::query_as::<_, (String, i64, i64, i64)>(
            r#"
            SELECT instructor_id,
                   COALESCE(SUM(amount), 0),
                   COALESCE(SUM(gateway_fee), 0),
                   COUNT(*)
            FROM payments
            WHERE status IN ('completed', 'partially_refunded', 'refunded')
              AND paid_at >= ? AND paid_at < ?
            GROUP BY instructor_id
            ORDER BY instructor_id
            "#,
        )
        .bind(from)
        .bind(until)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        rows.into_iter()
            .map(|(instructor_id, total_revenue, gateway_fees, payment_count)| {
                Ok(InstructorRevenue {
                    instructor_id: parse_uuid(&instructor_id)?,
                    total_revenue,
                    gateway_fees,
                    payment_count,
                })
            })
            .collect()
    }
}
