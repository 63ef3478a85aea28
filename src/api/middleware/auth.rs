use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::{api::state::AppState, error::AppError};

/// Bearer-token gate for the operator and course-platform API. Open when no
/// token is configured.
pub async fn require_api_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let expected = match state.settings.auth.api_token.as_deref() {
        Some(token) if !token.is_empty() => token,
        _ => return Ok(next.run(request).await),
    };

    let presented = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(AppError::Unauthorized)?;

    if !bool::from(presented.as_bytes().ct_eq(expected.as_bytes())) {
        tracing::warn!("Rejected API call with a bad token");
        return Err(AppError::Unauthorized);
    }

    Ok(next.run(request).await)
}
