//! src/services/storage_service.rs
//!
//! Blob storage capability. The engine only sees the `BlobStore` trait;
//! `LocalBlobStore` keeps payloads on local disk sharded beneath
//! `base_path/{shard}/{shard}/{blob_key}` and blob info in SQLite.

use crate::{models::record::BlobDescriptor, services::thumbnail};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::Stream;
use sqlx::SqlitePool;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    pin::Pin,
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Streamed blob payload.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Storage type tag persisted with each share for the local disk backend.
pub const STORAGE_TYPE_LOCAL: i32 = 1;

/// Upload tickets older than this are refused.
const UPLOAD_TICKET_TTL_MS: i64 = 60 * 60 * 1000;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("blob `{0}` not found")]
    NotFound(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// One file part of a completed direct upload.
#[derive(Debug, Clone)]
pub struct UploadPart {
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// A completed direct-upload notification: the ticket from the upload URL
/// plus the file parts that arrived with it.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub ticket: String,
    pub parts: Vec<UploadPart>,
}

/// Capability set the share engine needs from a blob backend.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Tag persisted with share records so the backend variant is known.
    fn storage_type(&self) -> i32;

    /// Address a client can upload bytes to directly.
    async fn upload_url(&self) -> StorageResult<String>;

    /// Turn a finished direct upload into freshly stored blob descriptors.
    /// Rejected tickets and failing parts shorten the list.
    async fn handle_upload(&self, request: UploadRequest) -> Vec<BlobDescriptor>;

    async fn get(&self, key: &str) -> StorageResult<ByteStream>;

    async fn read_bytes(&self, key: &str) -> StorageResult<Bytes>;

    async fn stat(&self, key: &str) -> StorageResult<BlobDescriptor>;

    /// Not idempotent: deleting an unknown key is `NotFound`.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Preview of the blob scaled into `width`×`height`. Empty on any failure.
    async fn thumbnail(&self, key: &str, width: u32, height: u32) -> String {
        let blob = match self.stat(key).await {
            Ok(blob) => blob,
            Err(err) => {
                debug!("thumbnail '{}': {}", key, err);
                return String::new();
            }
        };
        if !thumbnail::is_previewable(&blob.content_type) {
            return String::new();
        }
        let data = match self.read_bytes(key).await {
            Ok(data) => data,
            Err(err) => {
                debug!("thumbnail '{}': {}", key, err);
                return String::new();
            }
        };
        thumbnail::preview(data, blob.content_type, width, height)
            .await
            .unwrap_or_default()
    }
}

/// Current wall clock in ms since epoch.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Local disk blob backend.
///
/// Upload URLs carry a one-shot ticket recorded in `upload_tickets`; the
/// upload endpoint consumes it, so a replayed upload stores nothing.
#[derive(Clone)]
pub struct LocalBlobStore {
    /// Shared SQLite pool holding blob info and upload tickets.
    db: Arc<SqlitePool>,

    /// Base directory on disk where blob payloads are stored.
    base_path: PathBuf,

    /// Upload endpoint prefix, e.g. `http://host/Shareme/HandleUpload`.
    upload_base: String,

    clock: fn() -> i64,
}

impl LocalBlobStore {
    pub fn new(
        db: Arc<SqlitePool>,
        base_path: impl Into<PathBuf>,
        upload_base: impl Into<String>,
    ) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            upload_base: upload_base.into().trim_end_matches('/').to_string(),
            clock: now_millis,
        }
    }

    /// Replace the creation-time clock.
    #[cfg(test)]
    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    /// Blob keys are simple-form UUIDs; anything else cannot exist.
    fn ensure_key_safe(key: &str) -> StorageResult<()> {
        if key.len() == 32 && key.bytes().all(|b| b.is_ascii_hexdigit()) {
            Ok(())
        } else {
            Err(StorageError::NotFound(key.to_string()))
        }
    }

    /// Two-level shard identifiers from MD5(key), as lowercase hex (00–ff).
    fn blob_shards(key: &str) -> (String, String) {
        let digest = md5::compute(key);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::blob_shards(key);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    async fn consume_ticket(&self, ticket: &str) -> StorageResult<bool> {
        let oldest = (self.clock)() - UPLOAD_TICKET_TTL_MS;
        let result = sqlx::query("DELETE FROM upload_tickets WHERE token = ? AND created >= ?")
            .bind(ticket)
            .bind(oldest)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Write a payload to disk and record its blob info.
    ///
    /// Bytes go to a temp file that is fsynced and renamed into place; the
    /// file is removed again if the info row cannot be written.
    pub async fn put_blob(
        &self,
        file_name: &str,
        content_type: Option<&str>,
        data: &[u8],
    ) -> StorageResult<BlobDescriptor> {
        let blob_key = Uuid::new_v4().simple().to_string();
        let file_path = self.blob_path(&blob_key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::new(
                ErrorKind::Other,
                "blob path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let written = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(data).await?;
            file.flush().await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, &file_path).await
        }
        .await;
        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }

        let blob = BlobDescriptor {
            blob_key,
            filename: display_name(file_name),
            content_type: content_type
                .filter(|ct| !ct.is_empty())
                .unwrap_or(DEFAULT_CONTENT_TYPE)
                .to_string(),
            size: data.len() as i64,
            created: (self.clock)(),
        };

        let inserted = sqlx::query(
            "INSERT INTO blobs (blob_key, filename, content_type, size, created)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&blob.blob_key)
        .bind(&blob.filename)
        .bind(&blob.content_type)
        .bind(blob.size)
        .bind(blob.created)
        .execute(&*self.db)
        .await;

        match inserted {
            Ok(_) => {
                debug!(
                    "stored {} bytes as blob {} at {}",
                    blob.size,
                    blob.blob_key,
                    file_path.display()
                );
                Ok(blob)
            }
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(StorageError::Sqlx(err))
            }
        }
    }

    /// Remove empty shard directories up to `base_path`.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.base_path) && current != self.base_path {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    fn storage_type(&self) -> i32 {
        STORAGE_TYPE_LOCAL
    }

    async fn upload_url(&self) -> StorageResult<String> {
        let now = (self.clock)();
        sqlx::query("DELETE FROM upload_tickets WHERE created < ?")
            .bind(now - UPLOAD_TICKET_TTL_MS)
            .execute(&*self.db)
            .await?;

        let ticket = Uuid::new_v4().simple().to_string();
        sqlx::query("INSERT INTO upload_tickets (token, created) VALUES (?, ?)")
            .bind(&ticket)
            .bind(now)
            .execute(&*self.db)
            .await?;

        Ok(format!("{}/{}", self.upload_base, ticket))
    }

    async fn handle_upload(&self, request: UploadRequest) -> Vec<BlobDescriptor> {
        match self.consume_ticket(&request.ticket).await {
            Ok(true) => {}
            Ok(false) => {
                warn!("upload with unknown or used ticket '{}' ignored", request.ticket);
                return Vec::new();
            }
            Err(err) => {
                warn!("could not check upload ticket '{}': {}", request.ticket, err);
                return Vec::new();
            }
        }

        let mut stored = Vec::with_capacity(request.parts.len());
        for part in request.parts {
            match self
                .put_blob(&part.file_name, part.content_type.as_deref(), &part.data)
                .await
            {
                Ok(blob) => {
                    info!("created {} bytes [{}]", blob.size, blob.blob_key);
                    stored.push(blob);
                }
                Err(err) => warn!("could not store upload part '{}': {}", part.file_name, err),
            }
        }
        stored
    }

    async fn get(&self, key: &str) -> StorageResult<ByteStream> {
        self.stat(key).await?;
        let file = File::open(self.blob_path(key)).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::Io(err)
            }
        })?;
        Ok(Box::pin(ReaderStream::new(file)))
    }

    async fn read_bytes(&self, key: &str) -> StorageResult<Bytes> {
        Self::ensure_key_safe(key)?;
        match fs::read(self.blob_path(key)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    async fn stat(&self, key: &str) -> StorageResult<BlobDescriptor> {
        Self::ensure_key_safe(key)?;
        sqlx::query_as::<_, BlobDescriptor>(
            "SELECT blob_key, filename, content_type, size, created
             FROM blobs WHERE blob_key = ?",
        )
        .bind(key)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::NotFound(key.to_string()),
            other => StorageError::Sqlx(other),
        })
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.stat(key).await?;

        let file_path = self.blob_path(key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StorageError::Io(err)),
        }

        let result = sqlx::query("DELETE FROM blobs WHERE blob_key = ?")
            .bind(key)
            .execute(&*self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(key.to_string()));
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }
}

/// Last path segment of an uploaded filename, or `upload` when empty.
fn display_name(file_name: &str) -> String {
    let name = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_name)
        .trim();
    if name.is_empty() {
        "upload".to_string()
    } else {
        name.to_string()
    }
}
