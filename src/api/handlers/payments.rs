use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    api::state::AppState,
    domain::{ChargeOutcome, CheckoutRequest, CheckoutSession, Payment, PaymentRefund},
    error::Result,
};

#[derive(Debug, Serialize)]
pub struct VerificationResponse {
    outcome: &'static str,
    payment: Payment,
}

impl From<ChargeOutcome> for VerificationResponse {
    fn from(outcome: ChargeOutcome) -> Self {
        let label = match &outcome {
            ChargeOutcome::Completed(_) => "completed",
            ChargeOutcome::Failed(_) => "failed",
            ChargeOutcome::StillPending(_) => "pending",
            ChargeOutcome::AlreadySettled(_) => "already_settled",
        };
        Self {
            outcome: label,
            payment: outcome.into_payment(),
        }
    }
}

pub async fn checkout(
    State(state): State<AppState>,
    Json(request): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<CheckoutSession>)> {
    let session = state
        .service_context
        .payment_service
        .initiate_checkout(request)
        .await?;

    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn get(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<Json<Payment>> {
    let payment = state
        .service_context
        .payment_service
        .get_payment(&reference)
        .await?;

    Ok(Json(payment))
}

pub async fn verify(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<Json<VerificationResponse>> {
    let outcome = state
        .service_context
        .payment_service
        .verify_payment(&reference)
        .await?;

    Ok(Json(outcome.into()))
}

pub async fn cancel(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<Json<Payment>> {
    let payment = state
        .service_context
        .payment_service
        .cancel_payment(&reference)
        .await?;

    Ok(Json(payment))
}

pub async fn list_by_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<Payment>>> {
    let payments = state
        .service_context
        .payment_service
        .list_payments_for_user(user_id)
        .await?;

    Ok(Json(payments))
}

pub async fn list_refunds(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<Json<Vec<PaymentRefund>>> {
    let refunds = state
        .service_context
        .refund_service
        .list_refunds_for_payment(&reference)
        .await?;

    Ok(Json(refunds))
}
