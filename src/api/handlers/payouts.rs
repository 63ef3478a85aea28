use axum::{
    extract::{Path, State},
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    api::state::AppState,
    domain::{InstructorPayout, PayoutBatchSummary},
    error::Result,
};

#[derive(Debug, Deserialize)]
pub struct CalculateRequest {
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    /// Limits the calculation to one instructor.
    pub instructor_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum CalculationResponse {
    Batch(PayoutBatchSummary),
    Single(InstructorPayout),
}

#[derive(Debug, Deserialize)]
pub struct BulkProcessRequest {
    /// Every pending payout when omitted.
    pub payout_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Serialize)]
pub struct InstructorPayoutsResponse {
    payouts: Vec<InstructorPayout>,
    outstanding_debt: i64,
}

pub async fn calculate(
    State(state): State<AppState>,
    Json(request): Json<CalculateRequest>,
) -> Result<Json<CalculationResponse>> {
    let service = &state.service_context.payout_service;
    let response = match request.instructor_id {
        Some(instructor_id) => CalculationResponse::Single(
            service
                .calculate_for_instructor(instructor_id, request.period_start, request.period_end)
                .await?,
        ),
        None => CalculationResponse::Batch(
            service
                .calculate_period(request.period_start, request.period_end)
                .await?,
        ),
    };

    Ok(Json(response))
}

pub async fn process_bulk(
    State(state): State<AppState>,
    Json(request): Json<BulkProcessRequest>,
) -> Result<Json<PayoutBatchSummary>> {
    let ids = match request.payout_ids {
        Some(ids) => ids,
        None => state
            .service_context
            .payout_repo
            .list_pending()
            .await?
            .into_iter()
            .map(|payout| payout.id)
            .collect(),
    };

    let summary = state
        .service_context
        .payout_service
        .process_bulk(&ids)
        .await?;

    Ok(Json(summary))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<InstructorPayout>> {
    let payout = state.service_context.payout_service.get_payout(id).await?;
    Ok(Json(payout))
}

pub async fn process(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<InstructorPayout>> {
    let payout = state
        .service_context
        .payout_service
        .process_payout(id, true)
        .await?;

    Ok(Json(payout))
}

pub async fn retry(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<InstructorPayout>> {
    let payout = state.service_context.payout_service.retry_payout(id).await?;
    Ok(Json(payout))
}

pub async fn list_by_instructor(
    State(state): State<AppState>,
    Path(instructor_id): Path<Uuid>,
) -> Result<Json<InstructorPayoutsResponse>> {
    let service = &state.service_context.payout_service;
    let payouts = service.list_payouts_for_instructor(instructor_id).await?;
    let outstanding_debt = service.outstanding_debt(instructor_id).await?;

    Ok(Json(InstructorPayoutsResponse {
        payouts,
        outstanding_debt,
    }))
}
