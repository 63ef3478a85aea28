use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::{BankAccountRequest, GatewayName, InstructorBankAccount, VerificationStatus},
    error::{AppError, Result},
    repository::{parse_uuid, to_utc, BankAccountRepository},
};

#[derive(FromRow)]
struct BankAccountRow {
    id: String,
    instructor_id: String,
    bank_code: String,
    bank_name: Option<String>,
    account_number: String,
    account_name: String,
    verified_account_name: Option<String>,
    verification_status: String,
    verification_attempts: i64,
    last_verification_attempt: Option<NaiveDateTime>,
    verification_error: Option<String>,
    verified_at: Option<NaiveDateTime>,
    paystack_recipient_code: Option<String>,
    flutterwave_beneficiary_id: Option<String>,
    auto_payout_enabled: bool,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

pub struct SqliteBankAccountRepository {
    pool: SqlitePool,
}

impl SqliteBankAccountRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_account(row: BankAccountRow) -> Result<InstructorBankAccount> {
        Ok(InstructorBankAccount {
            id: parse_uuid(&row.id)?,
            instructor_id: parse_uuid(&row.instructor_id)?,
            bank_code: row.bank_code,
            bank_name: row.bank_name,
            account_number: row.account_number,
            account_name: row.account_name,
            verified_account_name: row.verified_account_name,
            verification_status: VerificationStatus::parse(&row.verification_status).ok_or_else(
                || {
                    AppError::Database(format!(
                        "Invalid verification status: {}",
                        row.verification_status
                    ))
                },
            )?,
            verification_attempts: row.verification_attempts,
            last_verification_attempt: row.last_verification_attempt.map(to_utc),
            verification_error: row.verification_error,
            verified_at: row.verified_at.map(to_utc),
            paystack_recipient_code: row.paystack_recipient_code,
            flutterwave_beneficiary_id: row.flutterwave_beneficiary_id,
            auto_payout_enabled: row.auto_payout_enabled,
            created_at: to_utc(row.created_at),
            updated_at: to_utc(row.updated_at),
        })
    }

    async fn find_by_id(&self, id: Uuid) -> Result<InstructorBankAccount> {
        let row = sqlx::query_as::<_, BankAccountRow>(
            "SELECT * FROM instructor_bank_accounts WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        row.map(Self::row_to_account)
            .transpose()?
            .ok_or_else(|| AppError::NotFound(format!("Bank account {} not found", id)))
    }
}

#[async_trait]
impl BankAccountRepository for SqliteBankAccountRepository {
    async fn find_by_instructor(&self, instructor_id: Uuid) -> Result<Option<InstructorBankAccount>> {
        let row = sqlx::query_as::<_, BankAccountRow>(
            "SELECT * FROM instructor_bank_accounts WHERE instructor_id = ?",
        )
        .bind(instructor_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        row.map(Self::row_to_account).transpose()
    }

    async fn upsert(
        &self,
        instructor_id: Uuid,
        request: &BankAccountRequest,
    ) -> Result<InstructorBankAccount> {
        let now = Utc::now().naive_utc();

        sqlx::query(
            r#"
            INSERT INTO instructor_bank_accounts (
                id, instructor_id, bank_code, bank_name, account_number, account_name,
                verification_status, verification_attempts, auto_payout_enabled,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, 'unverified', 0, 0, ?, ?)
            ON CONFLICT(instructor_id) DO UPDATE SET
                bank_code = excluded.bank_code,
                bank_name = excluded.bank_name,
                account_number = excluded.account_number,
                account_name = excluded.account_name,
                verified_account_name = NULL,
                verification_status = 'unverified',
                verification_attempts = 0,
                last_verification_attempt = NULL,
                verification_error = NULL,
                verified_at = NULL,
                paystack_recipient_code = NULL,
                flutterwave_beneficiary_id = NULL,
                auto_payout_enabled = 0,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(instructor_id.to_string())
        .bind(&request.bank_code)
        .bind(&request.bank_name)
        .bind(&request.account_number)
        .bind(request.account_name.trim())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        self.find_by_instructor(instructor_id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve saved bank account".to_string())
        })
    }

    async fn record_attempt(&self, id: Uuid) -> Result<InstructorBankAccount> {
        let now = Utc::now().naive_utc();
        sqlx::query(
            r#"
            UPDATE instructor_bank_accounts
            SET verification_attempts = verification_attempts + 1,
                last_verification_attempt = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        self.find_by_id(id).await
    }

    async fn mark_verified(&self, id: Uuid, verified_name: &str) -> Result<InstructorBankAccount> {
        let now = Utc::now().naive_utc();
        sqlx::query(
            r#"
            UPDATE instructor_bank_accounts
            SET verification_status = 'verified',
                verified_account_name = ?,
                verification_error = NULL,
                verified_at = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(verified_name)
        .bind(now)
        .bind(now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        self.find_by_id(id).await
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        status: VerificationStatus,
        error: &str,
        resolved_name: Option<&str>,
    ) -> Result<InstructorBankAccount> {
        sqlx::query(
            r#"
            UPDATE instructor_bank_accounts
            SET verification_status = ?,
                verification_error = ?,
                verified_account_name = COALESCE(?, verified_account_name),
                verified_at = NULL,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(error)
        .bind(resolved_name)
        .bind(Utc::now().naive_utc())
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        self.find_by_id(id).await
    }

    async fn set_recipient(&self, id: Uuid, gateway: GatewayName, recipient_id: &str) -> Result<()> {
        let column = match gateway {
            GatewayName::Paystack => "paystack_recipient_code",
            GatewayName::Flutterwave => "flutterwave_beneficiary_id",
            GatewayName::Stripe => {
                return Err(AppError::Configuration(
                    "stripe does not support bank transfers".to_string(),
                ))
            }
        };
        let sql = format!(
            "UPDATE instructor_bank_accounts SET {} = ?, updated_at = ? WHERE id = ?",
            column
        );
        sqlx::query(&sql)
            .bind(recipient_id)
            .bind(Utc::now().naive_utc())
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }

    async fn set_auto_payout(&self, id: Uuid, enabled: bool) -> Result<InstructorBankAccount> {
        sqlx::query(
            "UPDATE instructor_bank_accounts SET auto_payout_enabled = ?, updated_at = ? WHERE id = ?",
        )
        .bind(enabled)
        .bind(Utc::now().naive_utc())
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        self.find_by_id(id).await
    }
}
