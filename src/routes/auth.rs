//! Auth API endpoints.

use super::AppState;
use crate::error::AppError;
use crate::models::{NonceResponse, VerifyRequest, VerifyResponse};
use axum::{body::Bytes, extract::State, response::IntoResponse, Json};

/// POST /api/auth/nonce: issue a single-use nonce
pub async fn issue_nonce(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let issued = state
        .verifier
        .nonces()
        .issue(state.config.nonce_ttl())
        .await?;

    tracing::debug!(action = "nonce_issued", expires_at = %issued.expires_at, "Nonce issued");

    Ok(Json(NonceResponse {
        nonce: issued.nonce,
        exp: issued.expires_at.timestamp_millis(),
    }))
}

/// POST /api/auth/verify: check a signed challenge and mint a session token
///
/// The body is parsed by hand so that malformed JSON maps to a plain-text 400.
pub async fn verify(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let req: VerifyRequest = serde_json::from_slice(&body)
        .map_err(|_| AppError::BadRequest("Bad JSON".to_string()))?;

    let token = state.verifier.verify(&req).await?;

    Ok(Json(VerifyResponse { ok: true, token }))
}
