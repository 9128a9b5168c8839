//! Metadata capability: share records keyed by [`MetadataKey`].

use crate::models::record::{MetadataKey, ShareRecord};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("entity not found for key '{0}'")]
    NotFound(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

impl MetadataError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, MetadataError::NotFound(_))
    }
}

pub type MetadataResult<T> = Result<T, MetadataError>;

#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Persist a new record under a freshly generated key.
    async fn put(&self, record: &ShareRecord) -> MetadataResult<MetadataKey>;

    async fn get(&self, key: &MetadataKey) -> MetadataResult<ShareRecord>;

    /// `NotFound` when no record exists.
    async fn delete(&self, key: &MetadataKey) -> MetadataResult<()>;

    /// Records whose expiry lies strictly before `before_ms`.
    async fn query_expired(&self, before_ms: i64) -> MetadataResult<Vec<(MetadataKey, ShareRecord)>>;
}

/// `shares` table in SQLite.
#[derive(Clone)]
pub struct SqliteMetadataStore {
    db: Arc<SqlitePool>,
}

impl SqliteMetadataStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn put(&self, record: &ShareRecord) -> MetadataResult<MetadataKey> {
        let key = MetadataKey::generate();
        sqlx::query(
            "INSERT INTO shares (id, storage_key, size, name, created, expires, mime_type, storage_type)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(key.row_id())
        .bind(&record.storage_key)
        .bind(record.size)
        .bind(&record.name)
        .bind(record.created)
        .bind(record.expires)
        .bind(&record.mime_type)
        .bind(record.storage_type)
        .execute(&*self.db)
        .await?;

        debug!("stored share record {} for blob {}", key, record.storage_key);
        Ok(key)
    }

    async fn get(&self, key: &MetadataKey) -> MetadataResult<ShareRecord> {
        sqlx::query_as::<_, ShareRecord>(
            "SELECT id, storage_key, size, name, created, expires, mime_type, storage_type
             FROM shares WHERE id = ?",
        )
        .bind(key.row_id())
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => MetadataError::NotFound(key.to_string()),
            other => MetadataError::Sqlx(other),
        })
    }

    async fn delete(&self, key: &MetadataKey) -> MetadataResult<()> {
        let result = sqlx::query("DELETE FROM shares WHERE id = ?")
            .bind(key.row_id())
            .execute(&*self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(MetadataError::NotFound(key.to_string()));
        }
        Ok(())
    }

    async fn query_expired(&self, before_ms: i64) -> MetadataResult<Vec<(MetadataKey, ShareRecord)>> {
        let rows = sqlx::query_as::<_, ShareRecord>(
            "SELECT id, storage_key, size, name, created, expires, mime_type, storage_type
             FROM shares WHERE expires < ? ORDER BY expires ASC",
        )
        .bind(before_ms)
        .fetch_all(&*self.db)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| match MetadataKey::from_row_id(&row.id) {
                Some(key) => Some((key, row)),
                None => {
                    warn!("skipping share row with malformed id '{}'", row.id);
                    None
                }
            })
            .collect())
    }
}
