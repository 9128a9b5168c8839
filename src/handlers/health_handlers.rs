//! Health & readiness handlers.
//!
//! - GET /healthz  -> liveness ("ok")
//! - GET /readyz   -> readiness: SQLite answers and the blob directory is writable

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::{collections::HashMap, path::Path};
use tokio::fs;
use uuid::Uuid;

/// `GET /healthz`: never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// HTTP 200 when every check passes, HTTP 503 otherwise. The body lists
/// each check with its error, if any.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let sqlite = match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&*state.db)
        .await
    {
        Ok(1) => CheckStatus::ok(),
        Ok(v) => CheckStatus::failed(format!("unexpected result: {}", v)),
        Err(e) => CheckStatus::failed(format!("error: {}", e)),
    };
    let disk = check_blob_dir(&state.storage_dir).await;

    let overall_ok = sqlite.ok && disk.ok;
    let mut checks = HashMap::new();
    checks.insert("sqlite", sqlite);
    checks.insert("disk", disk);

    let body = ReadyResponse {
        status: if overall_ok { "ok" } else { "error" }.into(),
        checks,
    };
    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

/// Write, read back and remove a probe file.
async fn check_blob_dir(dir: &Path) -> CheckStatus {
    let probe = dir.join(format!(".readyz-{}", Uuid::new_v4()));
    if let Err(e) = fs::write(&probe, b"readyz").await {
        return CheckStatus::failed(format!("could not write probe file: {}", e));
    }
    let read = fs::read(&probe).await;
    let removed = fs::remove_file(&probe).await;
    match (read, removed) {
        (Ok(bytes), Ok(())) if bytes == b"readyz" => CheckStatus::ok(),
        (Ok(bytes), Err(e)) if bytes == b"readyz" => CheckStatus {
            ok: true,
            error: Some(format!("could not remove probe file: {}", e)),
        },
        (Ok(_), _) => CheckStatus::failed("probe file content mismatch".into()),
        (Err(e), _) => CheckStatus::failed(format!("could not read probe file: {}", e)),
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn ok() -> Self {
        Self { ok: true, error: None }
    }

    fn failed(error: String) -> Self {
        Self {
            ok: false,
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn blob_dir_probe_leaves_nothing_behind() {
        let dir = tempfile::TempDir::new().unwrap();
        let status = check_blob_dir(dir.path()).await;
        assert!(status.ok);
        assert!(status.error.is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn missing_blob_dir_is_not_ready() {
        let dir = tempfile::TempDir::new().unwrap();
        let status = check_blob_dir(&dir.path().join("missing")).await;
        assert!(!status.ok);
    }
}
