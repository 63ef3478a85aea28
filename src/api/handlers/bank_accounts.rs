use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    api::state::AppState,
    domain::{BankAccountRequest, InstructorBankAccount, VerificationStatus},
    error::Result,
};

#[derive(Debug, Serialize)]
pub struct BankAccountDto {
    id: Uuid,
    instructor_id: Uuid,
    bank_code: String,
    bank_name: Option<String>,
    account_number: String,
    account_name: String,
    verified_account_name: Option<String>,
    verification_status: VerificationStatus,
    verification_attempts: i64,
    verification_error: Option<String>,
    verified_at: Option<String>,
    auto_payout_enabled: bool,
}

impl From<InstructorBankAccount> for BankAccountDto {
    fn from(account: InstructorBankAccount) -> Self {
        Self {
            id: account.id,
            instructor_id: account.instructor_id,
            account_number: account.masked_account_number(),
            bank_code: account.bank_code,
            bank_name: account.bank_name,
            account_name: account.account_name,
            verified_account_name: account.verified_account_name,
            verification_status: account.verification_status,
            verification_attempts: account.verification_attempts,
            verification_error: account.verification_error,
            verified_at: account.verified_at.map(|dt| dt.to_rfc3339()),
            auto_payout_enabled: account.auto_payout_enabled,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AutoPayoutRequest {
    pub enabled: bool,
}

pub async fn get(
    State(state): State<AppState>,
    Path(instructor_id): Path<Uuid>,
) -> Result<Json<BankAccountDto>> {
    let account = state
        .service_context
        .bank_account_service
        .get_bank_account(instructor_id)
        .await?;

    Ok(Json(account.into()))
}

pub async fn save(
    State(state): State<AppState>,
    Path(instructor_id): Path<Uuid>,
    Json(request): Json<BankAccountRequest>,
) -> Result<Json<BankAccountDto>> {
    let account = state
        .service_context
        .bank_account_service
        .save_bank_account(instructor_id, request)
        .await?;

    Ok(Json(account.into()))
}

pub async fn verify(
    State(state): State<AppState>,
    Path(instructor_id): Path<Uuid>,
) -> Result<Json<BankAccountDto>> {
    let account = state
        .service_context
        .bank_account_service
        .verify_bank_account(instructor_id)
        .await?;

    Ok(Json(account.into()))
}

pub async fn set_auto_payout(
    State(state): State<AppState>,
    Path(instructor_id): Path<Uuid>,
    Json(request): Json<AutoPayoutRequest>,
) -> Result<Json<BankAccountDto>> {
    let account = state
        .service_context
        .bank_account_service
        .set_auto_payout(instructor_id, request.enabled)
        .await?;

    Ok(Json(account.into()))
}
