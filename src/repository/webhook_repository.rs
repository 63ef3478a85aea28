use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::PaymentWebhook,
    error::{AppError, Result},
    repository::{parse_gateway, parse_uuid, to_utc, WebhookRepository},
};

#[derive(FromRow)]
struct WebhookRow {
    id: String,
    gateway: String,
    event_type: String,
    reference: Option<String>,
    payload: String,
    signature_valid: bool,
    processed: bool,
    success: bool,
    error_message: Option<String>,
    received_at: NaiveDateTime,
    processed_at: Option<NaiveDateTime>,
}

pub struct SqliteWebhookRepository {
    pool: SqlitePool,
}

impl SqliteWebhookRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_webhook(row: WebhookRow) -> Result<PaymentWebhook> {
        Ok(PaymentWebhook {
            id: parse_uuid(&row.id)?,
            gateway: parse_gateway(&row.gateway)?,
            event_type: row.event_type,
            reference: row.reference,
            payload: row.payload,
            signature_valid: row.signature_valid,
            processed: row.processed,
            success: row.success,
            error_message: row.error_message,
            received_at: to_utc(row.received_at),
            processed_at: row.processed_at.map(to_utc),
        })
    }
}

#[async_trait]
impl WebhookRepository for SqliteWebhookRepository {
    async fn record(&self, webhook: &PaymentWebhook) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO payment_webhooks (
                id, gateway, event_type, reference, payload, signature_valid,
                processed, success, error_message, received_at, processed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(webhook.id.to_string())
        .bind(webhook.gateway.as_str())
        .bind(&webhook.event_type)
        .bind(&webhook.reference)
        .bind(&webhook.payload)
        .bind(webhook.signature_valid)
        .bind(webhook.processed)
        .bind(webhook.success)
        .bind(&webhook.error_message)
        .bind(webhook.received_at.naive_utc())
        .bind(webhook.processed_at.map(|dt| dt.naive_utc()))
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }

    async fn mark_processed(&self, id: Uuid, success: bool, error: Option<&str>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE payment_webhooks
            SET processed = 1, success = ?, error_message = ?, processed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(success)
        .bind(error)
        .bind(Utc::now().naive_utc())
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<PaymentWebhook>> {
        let row = sqlx::query_as::<_, WebhookRow>("SELECT * FROM payment_webhooks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        row.map(Self::row_to_webhook).transpose()
    }

    async fn list_by_reference(&self, reference: &str) -> Result<Vec<PaymentWebhook>> {
        let rows = sqlx::query_as::<_, WebhookRow>(
            "SELECT * FROM payment_webhooks WHERE reference = ? ORDER BY received_at ASC",
        )
        .bind(reference)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        rows.into_iter().map(Self::row_to_webhook).collect()
    }
}
