//! Defines routes for the share service.
//!
//! ## Structure
//! - **Share interface** (mounted under `/Shareme`)
//!   - `GET         /UploadURL`           : direct-upload target (plain text)
//!   - `POST        /HandleUpload/{ticket}`: upload completion (multipart)
//!   - `GET         /Get/{key}`           : payload
//!   - `GET         /Stat/{key}`          : share descriptor
//!   - `POST|DELETE /Delete/{key}`        : delete (session-scoped)
//!   - `GET         /MyShares`            : caller's shares (session-scoped)
//!   - `POST        /Add/{key}`           : add a share to the caller's session
//!   - `GET         /Thumbnail/{key}`, `GET /ImageURL/{key}`: previews
//!
//! - **Operations**
//!   - `GET|POST /cleanup`: expiration sweep
//!   - `GET /healthz`, `GET /readyz`

use crate::{
    handlers::{
        cleanup_handlers::cleanup,
        health_handlers::{healthz, readyz},
        share_handlers::{
            add_share, delete_share, get_share, handle_upload, image_url, my_shares, stat_share,
            thumbnail, upload_url,
        },
    },
    services::share_service::INTERFACE_NAME,
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build the router. The router carries `AppState` to all handlers;
/// uploads accept bodies up to `max_upload_bytes`.
pub fn routes(max_upload_bytes: usize) -> Router<AppState> {
    let shares = Router::new()
        .route("/UploadURL", get(upload_url))
        .route(
            "/HandleUpload/{ticket}",
            post(handle_upload).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/Get/{key}", get(get_share))
        .route("/Stat/{key}", get(stat_share))
        .route("/Delete/{key}", post(delete_share).delete(delete_share))
        .route("/MyShares", get(my_shares))
        .route("/Add/{key}", post(add_share))
        .route("/Thumbnail/{key}", get(thumbnail))
        .route("/ImageURL/{key}", get(image_url));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/cleanup", get(cleanup).post(cleanup))
        .nest(&format!("/{}", INTERFACE_NAME), shares)
}
