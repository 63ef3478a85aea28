use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::{
    api::state::AppState,
    domain::{PaymentRefund, RefundRequest, RefundReview, RefundStatus},
    error::Result,
};

pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<RefundRequest>,
) -> Result<(StatusCode, Json<PaymentRefund>)> {
    let refund = state
        .service_context
        .refund_service
        .request_refund(request)
        .await?;

    // Refunds parked for review have not been acted on yet.
    let status = if refund.status == RefundStatus::PendingReview {
        StatusCode::ACCEPTED
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(refund)))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PaymentRefund>> {
    let refund = state.service_context.refund_service.get_refund(id).await?;
    Ok(Json(refund))
}

pub async fn approve(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(review): Json<RefundReview>,
) -> Result<Json<PaymentRefund>> {
    let refund = state
        .service_context
        .refund_service
        .approve_refund(id, review)
        .await?;

    Ok(Json(refund))
}

pub async fn reject(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(review): Json<RefundReview>,
) -> Result<Json<PaymentRefund>> {
    let refund = state
        .service_context
        .refund_service
        .reject_refund(id, review)
        .await?;

    Ok(Json(refund))
}
