//! Shared handler state.

use crate::services::{session_store::SessionStore, share_service::ShareService};
use sqlx::SqlitePool;
use std::{path::PathBuf, sync::Arc};

#[derive(Clone)]
pub struct AppState {
    pub shares: ShareService,
    pub sessions: SessionStore,

    /// Pool shared by all SQLite-backed stores, used by readiness checks.
    pub db: Arc<SqlitePool>,

    /// Blob payload directory, used by readiness checks.
    pub storage_dir: PathBuf,

    /// When set, `/cleanup` requires `Authorization: Bearer <token>`.
    pub admin_token: Option<String>,
}
