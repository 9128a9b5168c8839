//! Persisted share metadata and the identifiers that address it.

use crate::errors::ShareError;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Opaque identifier of a share record, exposed in URLs and sessions.
///
/// Rendered as URL-safe unpadded base64 of a random UUID, so a key is never
/// reused after its record is deleted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MetadataKey(Uuid);

impl MetadataKey {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Decode an externally presented key. Anything that does not decode to
    /// exactly sixteen bytes is reported as `NotFound`.
    pub fn parse(raw: &str) -> Result<Self, ShareError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(raw.trim())
            .map_err(|err| ShareError::NotFound(format!("Error decoding key '{}': {}", raw, err)))?;
        Uuid::from_slice(&bytes)
            .map(Self)
            .map_err(|err| ShareError::NotFound(format!("Error decoding key '{}': {}", raw, err)))
    }

    /// Row id used by the metadata table.
    pub fn row_id(&self) -> String {
        self.0.to_string()
    }

    pub fn from_row_id(id: &str) -> Option<Self> {
        Uuid::parse_str(id).ok().map(Self)
    }
}

impl fmt::Display for MetadataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&URL_SAFE_NO_PAD.encode(self.0.as_bytes()))
    }
}

/// A freshly stored blob as reported by the storage backend.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct BlobDescriptor {
    /// Backend key of the payload. Never shown to clients.
    pub blob_key: String,

    /// Original filename from the upload.
    pub filename: String,

    /// MIME type from the upload part.
    pub content_type: String,

    /// Size in bytes.
    pub size: i64,

    /// Creation time, ms since epoch.
    pub created: i64,
}

/// One row of the `shares` table.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct ShareRecord {
    /// Row id (hyphenated UUID). Empty until the metadata store assigns one.
    pub id: String,

    /// Blob key inside the storage backend.
    pub storage_key: String,

    pub size: i64,

    /// Display filename captured at registration.
    pub name: String,

    /// ms since epoch.
    pub created: i64,

    /// `created + valid period`, ms since epoch.
    pub expires: i64,

    pub mime_type: String,

    /// Tag of the storage backend variant holding the blob.
    pub storage_type: i32,
}

impl ShareRecord {
    /// Build the record for a blob, fixing its expiry once.
    pub fn for_blob(blob: &BlobDescriptor, valid_period_ms: i64, storage_type: i32) -> Self {
        Self {
            id: String::new(),
            storage_key: blob.blob_key.clone(),
            size: blob.size,
            name: blob.filename.clone(),
            created: blob.created,
            expires: blob.created + valid_period_ms,
            mime_type: blob.content_type.clone(),
            storage_type,
        }
    }
}
