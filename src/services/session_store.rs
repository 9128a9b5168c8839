//! Per-caller session properties persisted in SQLite, keyed by session id.

use crate::models::session::Session;
use sqlx::SqlitePool;
use std::{collections::BTreeMap, sync::Arc};
use uuid::Uuid;

#[derive(Clone)]
pub struct SessionStore {
    db: Arc<SqlitePool>,
}

impl SessionStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Load a session. Unknown ids yield an empty session.
    pub async fn load(&self, session_id: &Uuid) -> sqlx::Result<Session> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM session_properties WHERE session_id = ?")
                .bind(session_id.to_string())
                .fetch_all(&*self.db)
                .await?;
        Ok(Session::from_properties(
            rows.into_iter().collect::<BTreeMap<_, _>>(),
        ))
    }

    /// Apply the properties `session` set or removed since it was loaded.
    /// Rows written by other requests for the same session are left as they
    /// are. Clean sessions are not written.
    pub async fn save(&self, session_id: &Uuid, session: &Session) -> sqlx::Result<()> {
        if !session.is_dirty() {
            return Ok(());
        }

        let id = session_id.to_string();
        let mut tx = self.db.begin().await?;
        for (key, change) in session.changes() {
            match change {
                Some(value) => {
                    sqlx::query(
                        "INSERT INTO session_properties (session_id, key, value) VALUES (?, ?, ?) \
                         ON CONFLICT(session_id, key) DO UPDATE SET value = excluded.value",
                    )
                    .bind(&id)
                    .bind(key)
                    .bind(value)
                    .execute(&mut *tx)
                    .await?;
                }
                None => {
                    sqlx::query("DELETE FROM session_properties WHERE session_id = ? AND key = ?")
                        .bind(&id)
                        .bind(key)
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }
        tx.commit().await?;

        tracing::debug!("saved {} property changes for session {}", session.changes().len(), id);
        Ok(())
    }
}
