use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// Refund exceeds the refundable balance, an open refund already exists,
    /// a payout period was already calculated, or gateway data disagrees with
    /// the ledger. Always raised before anything is mutated.
    #[error("Reconciliation conflict: {0}")]
    ReconciliationConflict(String),

    #[error("Account name mismatch: claimed '{claimed}', bank returned '{resolved}'")]
    NameMismatch { claimed: String, resolved: String },

    /// Network failure, timeout or 5xx from a provider. The outcome of the
    /// call is unknown, so callers must leave state unresolved.
    #[error("Gateway unavailable: {0}")]
    GatewayUnavailable(String),

    /// The provider answered and explicitly refused the operation.
    #[error("Gateway rejected: {0}")]
    GatewayRejected(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("External service error: {0}")]
    External(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, AppError::GatewayUnavailable(_))
    }

    /// Failures a redelivery of the same request may get past.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Database(_) | AppError::External(_) | AppError::GatewayUnavailable(_)
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Database(ref msg) => {
                tracing::error!("Database error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error occurred".to_string())
            }
            AppError::NotFound(ref msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            AppError::BadRequest(ref msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Validation(ref msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            AppError::ReconciliationConflict(ref msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::NameMismatch { .. } => (StatusCode::UNPROCESSABLE_ENTITY, self.to_string()),
            AppError::GatewayUnavailable(ref msg) => {
                tracing::warn!("Gateway unavailable: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Payment provider is unavailable; the operation may still complete".to_string(),
                )
            }
            AppError::GatewayRejected(ref msg) => (StatusCode::PAYMENT_REQUIRED, msg.clone()),
            AppError::Configuration(ref msg) => {
                tracing::error!("Configuration error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Service misconfigured".to_string())
            }
            AppError::External(ref msg) => {
                tracing::error!("External service error: {}", msg);
                (StatusCode::BAD_GATEWAY, msg.clone())
            }
            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        AppError::Database(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        // Anything short of a decoded provider answer is indeterminate.
        if err.is_status() {
            match err.status() {
                Some(status) if status.is_client_error() => {
                    AppError::GatewayRejected(err.to_string())
                }
                _ => AppError::GatewayUnavailable(err.to_string()),
            }
        } else {
            AppError::GatewayUnavailable(err.to_string())
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: Vec<String> = errors
            .field_errors()
            .iter()
            .map(|(field, errs)| {
                let detail = errs
                    .iter()
                    .filter_map(|e| e.message.as_ref().map(|m| m.to_string()))
                    .next()
                    .unwrap_or_else(|| "is invalid".to_string());
                format!("{} {}", field, detail)
            })
            .collect();
        fields.sort();
        AppError::Validation(fields.join("; "))
    }
}
