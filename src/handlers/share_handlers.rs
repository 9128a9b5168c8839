//! HTTP handlers for the share operations.
//! Error sentinels are mapped to a status here and nowhere else.

use crate::{
    errors::{AppError, ShareError, ShareErrorKind},
    handlers::session::CallerSession,
    models::share::Share,
    services::storage_service::{UploadPart, UploadRequest, now_millis},
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::DateTime;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use tracing::{debug, warn};

/// Share JSON with the status implied by its error kind.
fn share_response(share: Share) -> Response {
    let status = share
        .error_kind()
        .map(ShareErrorKind::status)
        .unwrap_or(StatusCode::OK);
    match share.encode() {
        Ok(body) => (status, [(header::CONTENT_TYPE, "application/json")], body).into_response(),
        Err(err) => AppError::internal(format!("could not encode share: {}", err)).into_response(),
    }
}

/// Shares past their deadline read as absent. Eviction is left to the sweeper.
fn unexpired(share: Share, now_ms: i64) -> Share {
    if share.is_expired(now_ms) {
        return Share::failed(&ShareError::NotFound(format!(
            "Share '{}' expired at {}",
            share.key, share.expires
        )));
    }
    share
}

fn text_response(text: String) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        text,
    )
        .into_response()
}

/// `GET /Shareme/UploadURL`: direct-upload target as plain text.
pub async fn upload_url(State(state): State<AppState>) -> Result<Response, AppError> {
    let url = state.shares.upload_url().await?;
    Ok(text_response(url))
}

/// `POST /Shareme/HandleUpload/{ticket}`: multipart upload completion.
/// Every file part becomes a share owned by the caller's session.
pub async fn handle_upload(
    State(state): State<AppState>,
    Path(ticket): Path<String>,
    mut caller: CallerSession,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let mut parts = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(format!("malformed upload: {}", err)))?
    {
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let content_type = field.content_type().map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|err| AppError::bad_request(format!("malformed upload: {}", err)))?;
        parts.push(UploadPart {
            file_name,
            content_type,
            data,
        });
    }

    let outcome = state
        .shares
        .handle_upload(UploadRequest { ticket, parts }, &mut caller.session)
        .await;
    if !outcome.reaped.is_empty() || !outcome.orphaned.is_empty() {
        warn!(
            "upload for session {}: {} blobs reaped, {} orphaned",
            caller.id,
            outcome.reaped.len(),
            outcome.orphaned.len()
        );
    }
    caller.commit(&state).await?;
    Ok(caller.attach(Json(outcome.shares).into_response()))
}

/// `GET /Shareme/Get/{key}`: the payload, streamed.
pub async fn get_share(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    let now = now_millis();
    match state.shares.get(&key).await {
        Ok(fetched) if fetched.share.is_expired(now) => share_response(unexpired(fetched.share, now)),
        Ok(fetched) => {
            let mut response = Response::new(Body::from_stream(fetched.body));
            set_share_headers(response.headers_mut(), &fetched.share);
            response
        }
        Err(sentinel) => share_response(sentinel),
    }
}

/// `GET /Shareme/Stat/{key}`
pub async fn stat_share(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    share_response(unexpired(state.shares.stat(&key).await, now_millis()))
}

/// `POST|DELETE /Shareme/Delete/{key}`: deleting something already gone
/// answers like a successful delete.
pub async fn delete_share(
    State(state): State<AppState>,
    Path(key): Path<String>,
    mut caller: CallerSession,
) -> Result<Response, AppError> {
    let share = state.shares.delete(&mut caller.session, &key).await;
    caller.commit(&state).await?;

    let response = match share.error_kind() {
        Some(ShareErrorKind::NotFound) => Json(Share::summary(key)).into_response(),
        _ => share_response(share),
    };
    Ok(caller.attach(response))
}

/// `GET /Shareme/MyShares`
pub async fn my_shares(
    State(state): State<AppState>,
    mut caller: CallerSession,
) -> Result<Response, AppError> {
    let listing = state.shares.my_shares(&mut caller.session).await;
    if !listing.dropped.is_empty() {
        debug!("dropped {} stale keys from session {}", listing.dropped.len(), caller.id);
    }
    if !listing.unresolved.is_empty() {
        warn!("{} shares of session {} could not be resolved", listing.unresolved.len(), caller.id);
    }
    caller.commit(&state).await?;

    let now = now_millis();
    let live: Vec<Share> = listing
        .shares
        .into_iter()
        .filter(|share| !share.is_expired(now))
        .collect();
    Ok(caller.attach(Json(live).into_response()))
}

/// `POST /Shareme/Add/{key}`: put a share received by URL into "my shares".
pub async fn add_share(
    State(state): State<AppState>,
    Path(key): Path<String>,
    mut caller: CallerSession,
) -> Result<Response, AppError> {
    let share = state.shares.add(&mut caller.session, &key).await;
    let now = now_millis();
    if share.is_expired(now) {
        caller.session.revoke(&key);
    }
    let share = unexpired(share, now);
    caller.commit(&state).await?;
    Ok(caller.attach(share_response(share)))
}

/// `GET /Shareme/Thumbnail/{key}`
pub async fn thumbnail(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    text_response(state.shares.thumbnail_url(&key, now_millis()).await)
}

/// `GET /Shareme/ImageURL/{key}`
pub async fn image_url(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    text_response(state.shares.image_url(&key, now_millis()).await)
}

fn set_share_headers(headers: &mut HeaderMap, share: &Share) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&share.mime_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );

    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&share.size.max(0).to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );

    headers.insert(header::CONTENT_DISPOSITION, content_disposition(&share.name));

    if let Some(created) = DateTime::from_timestamp_millis(share.created) {
        let imf_fixdate = created.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        if let Ok(value) = HeaderValue::from_str(&imf_fixdate) {
            headers.insert(header::LAST_MODIFIED, value);
        }
    }
}

/// `inline` with an ASCII `filename` fallback and the exact name as
/// `filename*` (RFC 6266).
fn content_disposition(name: &str) -> HeaderValue {
    let fallback: String = name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '_',
        })
        .collect();
    let encoded = utf8_percent_encode(name, NON_ALPHANUMERIC);
    let value = format!(
        "inline; filename=\"{}\"; filename*=UTF-8''{}",
        fallback, encoded
    );
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("inline"))
}
