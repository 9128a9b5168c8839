//! Cookie-identified caller session.
//!
//! The cookie only carries a random id; the properties live in the
//! session store.

use crate::{errors::AppError, models::session::Session, state::AppState};
use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, HeaderValue, header, request::Parts},
    response::Response,
};
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "shareme_session";

pub struct CallerSession {
    pub id: Uuid,
    /// No usable cookie came with the request; one is set on the response.
    pub fresh: bool,
    pub session: Session,
}

impl FromRequestParts<AppState> for CallerSession {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match session_id_from_headers(&parts.headers) {
            Some(id) => Ok(Self {
                id,
                fresh: false,
                session: state.sessions.load(&id).await?,
            }),
            None => Ok(Self {
                id: Uuid::new_v4(),
                fresh: true,
                session: Session::default(),
            }),
        }
    }
}

impl CallerSession {
    /// Persist any changes made while handling the request.
    pub async fn commit(&self, state: &AppState) -> Result<(), AppError> {
        state.sessions.save(&self.id, &self.session).await?;
        Ok(())
    }

    /// Set the session cookie on `response` for new sessions.
    pub fn attach(&self, mut response: Response) -> Response {
        if self.fresh {
            let cookie = format!(
                "{}={}; Path=/; HttpOnly; SameSite=Lax",
                SESSION_COOKIE, self.id
            );
            if let Ok(value) = HeaderValue::from_str(&cookie) {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
        }
        response
    }
}

/// Session id from the `Cookie` headers; malformed ids are ignored.
pub fn session_id_from_headers(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .and_then(|(_, value)| Uuid::parse_str(value.trim()).ok())
}
