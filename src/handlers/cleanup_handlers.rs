//! `/cleanup`: manual or cron trigger for the expiration sweeper.

use crate::{
    errors::AppError,
    services::sweeper::{self, SweepReport},
    state::AppState,
};
use axum::{
    Json,
    extract::State,
    http::{HeaderMap, header},
};
use chrono::Utc;
use tracing::warn;

/// Sweep expired shares. Answers 200 however many were evicted; a failed
/// query is logged and reported as an empty sweep.
pub async fn cleanup(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SweepReport>, AppError> {
    if let Some(token) = state.admin_token.as_deref() {
        if !is_admin(&headers, token) {
            return Err(AppError::forbidden("cleanup is restricted to administrators"));
        }
    }

    let now = Utc::now().timestamp_millis();
    match sweeper::sweep(&state.shares, now).await {
        Ok(report) => Ok(Json(report)),
        Err(err) => {
            warn!("Error during cleanup: {}", err);
            Ok(Json(SweepReport::default()))
        }
    }
}

/// The single admin capability: a bearer token matching the configured one.
fn is_admin(headers: &HeaderMap, token: &str) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .is_some_and(|presented| presented.trim() == token)
}
