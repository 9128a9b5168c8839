//! The share descriptor handed to clients and its JSON codec.

use crate::{
    errors::{ShareError, ShareErrorKind},
    models::record::{MetadataKey, ShareRecord},
};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// One shared blob as seen from outside: identity, size, mime type,
/// timestamps, and the derived fetch URL and preview.
///
/// A share with a non-empty `error` is an error sentinel. Check
/// [`Share::is_error`] before reading any other field; a zero `size` or
/// `expires` on a sentinel means nothing.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Share {
    /// Metadata key (externally addressable).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key: String,

    /// Blob key inside the storage backend.
    #[serde(skip)]
    pub storage_key: String,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub size: i64,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// ms since epoch.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub created: i64,

    /// ms since epoch.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub expires: i64,

    #[serde(rename = "mimetype", default, skip_serializing_if = "String::is_empty")]
    pub mime_type: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,

    /// Preview reference (data URL), computed on demand.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub thumbnail: String,

    #[serde(rename = "storage", default, skip_serializing_if = "is_zero_i32")]
    pub storage_type: i32,

    #[serde(skip)]
    pub failure: Option<ShareErrorKind>,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

fn is_zero_i32(v: &i32) -> bool {
    *v == 0
}

impl Share {
    /// Build the error sentinel for a failed resolution.
    pub fn failed(err: &ShareError) -> Self {
        warn!("could not resolve share: {}", err);
        Self {
            error: err.to_string(),
            failure: Some(err.kind()),
            ..Self::default()
        }
    }

    /// Key with zeroed size and expiry, returned after a delete.
    pub fn summary(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    /// Populate a share from its metadata row. URL and thumbnail are left
    /// for the caller to derive.
    pub fn from_record(key: &MetadataKey, record: ShareRecord) -> Self {
        Self {
            key: key.to_string(),
            storage_key: record.storage_key,
            size: record.size,
            name: record.name,
            created: record.created,
            expires: record.expires,
            mime_type: record.mime_type,
            storage_type: record.storage_type,
            ..Self::default()
        }
    }

    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }

    /// Kind of failure carried by a sentinel. Sentinels decoded from JSON
    /// lose their kind and are reported as `NotFound`.
    pub fn error_kind(&self) -> Option<ShareErrorKind> {
        if !self.is_error() {
            return None;
        }
        Some(self.failure.unwrap_or(ShareErrorKind::NotFound))
    }

    /// Expiry is derived, never stored: a share past its deadline still
    /// resolves until the sweeper evicts it. Expired means the deadline lies
    /// strictly before `now_ms`, the same cut the sweeper queries with.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        !self.is_error() && self.expires < now_ms
    }

    /// Decode a share from JSON. Malformed payloads are logged and yield `None`.
    #[cfg(test)]
    pub fn decode(payload: &[u8]) -> Option<Self> {
        match serde_json::from_slice(payload) {
            Ok(share) => Some(share),
            Err(err) => {
                warn!("could not decode share: {}", err);
                None
            }
        }
    }

    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}
