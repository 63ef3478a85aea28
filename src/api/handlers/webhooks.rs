use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
};

use crate::{
    api::state::AppState,
    error::{AppError, Result},
};

/// Provider callback endpoint. Answers 200 whatever happened to the event,
/// so the response never tells a caller whether its signature was accepted.
/// Retryable failures answer 5xx and the provider redelivers.
pub async fn receive(
    State(state): State<AppState>,
    Path(gateway): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode> {
    let service = &state.service_context.webhook_service;
    let header = match service.signature_header(&gateway) {
        Ok(header) => header,
        Err(AppError::Configuration(_)) => {
            return Err(AppError::NotFound("Unknown webhook endpoint".to_string()))
        }
        Err(e) => return Err(e),
    };
    let signature = headers.get(header).and_then(|value| value.to_str().ok());

    service.ingest(&gateway, &body, signature).await?;
    Ok(StatusCode::OK)
}
