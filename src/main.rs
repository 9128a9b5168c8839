use anyhow::Result;
use axum::Router;
use std::{fs, io::ErrorKind, path::Path, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use crate::services::{
    metadata_service::SqliteMetadataStore,
    session_store::SessionStore,
    share_service::{INTERFACE_NAME, ShareService, ShareSettings},
    storage_service::LocalBlobStore,
    sweeper,
};

mod config;
mod db;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting shareme with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection ---
    let db = Arc::new(db::connect(&cfg.database_url).await?);
    db::run_migrations(&db).await?;
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    // --- Wire the share engine ---
    let upload_base = format!("{}/{}/HandleUpload", cfg.public_url, INTERFACE_NAME);
    let storage = LocalBlobStore::new(db.clone(), &cfg.storage_dir, upload_base);
    let metadata = SqliteMetadataStore::new(db.clone());
    let settings = ShareSettings::new(&cfg.public_url).with_valid_period(cfg.valid_period_ms);
    let shares = ShareService::new(Arc::new(storage), Arc::new(metadata), settings);

    if cfg.sweep_interval_secs > 0 {
        sweeper::spawn_periodic(shares.clone(), Duration::from_secs(cfg.sweep_interval_secs));
        tracing::info!("Expiration sweep every {}s", cfg.sweep_interval_secs);
    } else {
        tracing::info!("Background sweeper disabled; use /cleanup");
    }

    let state = state::AppState {
        shares,
        sessions: SessionStore::new(db.clone()),
        db,
        storage_dir: cfg.storage_dir.clone().into(),
        admin_token: cfg.admin_token.clone(),
    };

    // --- Build router ---
    let app: Router = routes::routes::routes(cfg.max_upload_bytes).with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
