//! Share lifecycle engine.
//!
//! Reconciles the blob store and the metadata store, which fail
//! independently. Expected failures never escape as errors: they become
//! error-sentinel [`Share`] values, and stale references found on read paths
//! are reported back to the caller so the reconciliation is observable.
//!
//! Ordering within one call is always blob store first, then metadata, so
//! the only inconsistency a crash can leave is "record exists, blob gone",
//! which [`ShareService::stat`] already reports as `NotFound`.

use crate::{
    errors::{ShareError, ShareErrorKind},
    models::{
        record::{BlobDescriptor, MetadataKey, ShareRecord},
        session::Session,
        share::Share,
    },
    services::{
        metadata_service::{MetadataError, MetadataStore},
        storage_service::{BlobStore, ByteStream, StorageError, UploadRequest},
        thumbnail,
    },
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Seven days in ms.
pub const DEFAULT_VALID_PERIOD_MS: i64 = 7 * 24 * 60 * 60 * 1000;

/// Path segment under which the share operations are exposed.
pub const INTERFACE_NAME: &str = "Shareme";

#[derive(Clone, Debug)]
pub struct ShareSettings {
    /// Externally reachable base URL, without trailing slash.
    pub public_url: String,
    pub valid_period_ms: i64,
    pub thumbnail_box: (u32, u32),
}

impl ShareSettings {
    pub fn new(public_url: impl Into<String>) -> Self {
        Self {
            public_url: public_url.into().trim_end_matches('/').to_string(),
            valid_period_ms: DEFAULT_VALID_PERIOD_MS,
            thumbnail_box: thumbnail::DEFAULT_BOX,
        }
    }

    pub fn with_valid_period(mut self, valid_period_ms: i64) -> Self {
        self.valid_period_ms = valid_period_ms;
        self
    }
}

/// Result of registering a batch of uploaded blobs.
#[derive(Debug, Default)]
pub struct RegisterOutcome {
    pub shares: Vec<Share>,
    /// Blob keys whose metadata write failed and that were deleted again.
    pub reaped: Vec<String>,
    /// Blob keys whose metadata write failed and that could not be deleted.
    pub orphaned: Vec<String>,
}

/// Result of listing a session's shares.
#[derive(Debug, Default)]
pub struct Listing {
    pub shares: Vec<Share>,
    /// Keys that no longer resolve and were removed from the session.
    pub dropped: Vec<String>,
    /// Keys skipped because a backend was unavailable; kept in the session.
    pub unresolved: Vec<String>,
}

/// A resolved share together with its payload.
pub struct FetchedBlob {
    pub share: Share,
    pub body: ByteStream,
}

impl From<StorageError> for ShareError {
    fn from(err: StorageError) -> Self {
        if err.is_not_found() {
            ShareError::NotFound(err.to_string())
        } else {
            ShareError::BackendUnavailable(err.to_string())
        }
    }
}

impl From<MetadataError> for ShareError {
    fn from(err: MetadataError) -> Self {
        if err.is_not_found() {
            ShareError::NotFound(err.to_string())
        } else {
            ShareError::BackendUnavailable(err.to_string())
        }
    }
}

/// The engine. Holds no locks and no caches; cloning is cheap.
#[derive(Clone)]
pub struct ShareService {
    storage: Arc<dyn BlobStore>,
    metadata: Arc<dyn MetadataStore>,
    settings: ShareSettings,
}

impl ShareService {
    pub fn new(
        storage: Arc<dyn BlobStore>,
        metadata: Arc<dyn MetadataStore>,
        settings: ShareSettings,
    ) -> Self {
        Self {
            storage,
            metadata,
            settings,
        }
    }

    /// `<public_url>/Shareme/Get/<key>`
    pub fn share_url(&self, key: &str) -> String {
        format!(
            "{}/{}/Get/{}",
            self.settings.public_url, INTERFACE_NAME, key
        )
    }

    pub async fn upload_url(&self) -> Result<String, ShareError> {
        let url = self.storage.upload_url().await.map_err(|err| {
            error!("could not generate upload URL: {}", err);
            ShareError::BackendUnavailable(format!("could not generate upload URL: {}", err))
        })?;
        debug!("generated upload url '{}'", url);
        Ok(url)
    }

    /// Ingest a completed direct upload and register every stored blob.
    pub async fn handle_upload(
        &self,
        request: UploadRequest,
        session: &mut Session,
    ) -> RegisterOutcome {
        let blobs = self.storage.handle_upload(request).await;
        self.register(blobs, session).await
    }

    /// Write a metadata record per blob and grant it to `session`.
    ///
    /// One failing blob does not abort the batch. Its payload is deleted
    /// again right away so it cannot linger without a record; if that
    /// delete fails too the blob key is reported in `orphaned`.
    pub async fn register(
        &self,
        blobs: Vec<BlobDescriptor>,
        session: &mut Session,
    ) -> RegisterOutcome {
        let mut outcome = RegisterOutcome::default();
        let storage_type = self.storage.storage_type();

        for blob in blobs {
            let record =
                ShareRecord::for_blob(&blob, self.settings.valid_period_ms, storage_type);
            let key = match self.metadata.put(&record).await {
                Ok(key) => key.to_string(),
                Err(err) => {
                    let failure = ShareError::PartialUploadFailure(format!(
                        "could not register '{}': {}",
                        blob.filename, err
                    ));
                    warn!("{}", failure);
                    self.reap(blob.blob_key, &mut outcome).await;
                    continue;
                }
            };

            session.grant(&key, &record.name);
            info!("registered share {} ({} bytes, {})", key, record.size, record.name);
            outcome.shares.push(self.stat(&key).await);
        }
        outcome
    }

    async fn reap(&self, blob_key: String, outcome: &mut RegisterOutcome) {
        match self.storage.delete(&blob_key).await {
            Ok(()) => {
                info!("reaped unregistered blob {}", blob_key);
                outcome.reaped.push(blob_key);
            }
            Err(err) if err.is_not_found() => outcome.reaped.push(blob_key),
            Err(err) => {
                error!("blob {} is orphaned without metadata: {}", blob_key, err);
                outcome.orphaned.push(blob_key);
            }
        }
    }

    /// Resolve a key into its share descriptor, or an error sentinel.
    ///
    /// Any valid key resolves regardless of which session created it.
    /// Expired shares still resolve until the sweeper evicts them.
    pub async fn stat(&self, key: &str) -> Share {
        let key = match MetadataKey::parse(key) {
            Ok(key) => key,
            Err(err) => return Share::failed(&err),
        };
        match self.resolve(&key, true).await {
            Ok(share) => share,
            Err(err) => Share::failed(&err),
        }
    }

    async fn resolve(&self, key: &MetadataKey, with_preview: bool) -> Result<Share, ShareError> {
        let record = self.metadata.get(key).await.map_err(|err| match err {
            MetadataError::NotFound(_) => {
                ShareError::NotFound(format!("Entity not found for key '{}'", key))
            }
            other => ShareError::BackendUnavailable(format!(
                "Error retrieving data for key '{}': {}",
                key, other
            )),
        })?;

        if let Err(err) = self.storage.stat(&record.storage_key).await {
            if err.is_not_found() {
                warn!("share {} references missing blob {}", key, record.storage_key);
                return Err(ShareError::NotFound(format!("No storage key for '{}'", key)));
            }
            return Err(ShareError::BackendUnavailable(format!(
                "Error checking storage for key '{}': {}",
                key, err
            )));
        }

        let mut share = Share::from_record(key, record);
        share.url = self.share_url(&share.key);
        if with_preview {
            let (w, h) = self.settings.thumbnail_box;
            share.thumbnail = self.storage.thumbnail(&share.storage_key, w, h).await;
        }
        Ok(share)
    }

    /// Resolve, then open the payload. Sentinels come back in `Err` without
    /// the payload being touched.
    pub async fn get(&self, key: &str) -> Result<FetchedBlob, Share> {
        let key = MetadataKey::parse(key).map_err(|err| Share::failed(&err))?;
        let share = self
            .resolve(&key, false)
            .await
            .map_err(|err| Share::failed(&err))?;

        match self.storage.get(&share.storage_key).await {
            Ok(body) => Ok(FetchedBlob { share, body }),
            Err(err) => Err(Share::failed(&ShareError::from(err))),
        }
    }

    /// Delete a share and drop it from `session`.
    ///
    /// A key that no longer resolves returns its `NotFound` sentinel
    /// unchanged, so repeating a delete is harmless.
    pub async fn delete(&self, session: &mut Session, key: &str) -> Share {
        let parsed = match MetadataKey::parse(key) {
            Ok(parsed) => parsed,
            Err(err) => {
                session.revoke(key);
                return Share::failed(&err);
            }
        };
        let share = match self.resolve(&parsed, false).await {
            Ok(share) => share,
            Err(err) => {
                if err.kind() == ShareErrorKind::NotFound {
                    session.revoke(key);
                }
                return Share::failed(&err);
            }
        };

        if let Err(err) = self.delete_record(&parsed, &share.storage_key).await {
            return Share::failed(&err);
        }

        session.revoke(key);
        info!("share {} deleted", key);
        Share::summary(key)
    }

    /// Remove a blob and then its record. Absent blobs or records count as
    /// already deleted. When the blob delete fails the record is kept so the
    /// delete can be retried.
    pub async fn delete_record(&self, key: &MetadataKey, blob_key: &str) -> Result<(), ShareError> {
        match self.storage.delete(blob_key).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => debug!("blob {} already gone", blob_key),
            Err(err) => {
                return Err(ShareError::BackendUnavailable(format!(
                    "could not delete blob of '{}': {}",
                    key, err
                )));
            }
        }

        match self.metadata.delete(key).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => {
                debug!("record {} already gone", key);
                Ok(())
            }
            Err(err) => Err(ShareError::BackendUnavailable(format!(
                "could not delete record '{}': {}",
                key, err
            ))),
        }
    }

    /// Records past their expiry at `now_ms`.
    pub async fn expired(&self, now_ms: i64) -> Result<Vec<(MetadataKey, ShareRecord)>, ShareError> {
        Ok(self.metadata.query_expired(now_ms).await?)
    }

    /// Shares owned by `session`, in session order. Keys that no longer
    /// resolve are removed from the session and listed in `dropped`.
    pub async fn my_shares(&self, session: &mut Session) -> Listing {
        let mut listing = Listing::default();

        for (key, name) in session.owned() {
            let mut share = self.stat(&key).await;
            match share.error_kind() {
                None => {
                    share.name = name;
                    listing.shares.push(share);
                }
                Some(ShareErrorKind::NotFound) => {
                    warn!("dropping stale share key '{}' from session: {}", key, share.error);
                    session.revoke(&key);
                    listing.dropped.push(key);
                }
                Some(_) => {
                    warn!("could not resolve '{}', keeping it: {}", key, share.error);
                    listing.unresolved.push(key);
                }
            }
        }
        listing
    }

    /// Register an existing share in `session`, e.g. one received by URL.
    pub async fn add(&self, session: &mut Session, key: &str) -> Share {
        let share = self.stat(key).await;
        if !share.is_error() {
            session.grant(&share.key, &share.name);
        }
        share
    }

    /// Preview data URL; empty for unknown, expired or non-image shares.
    pub async fn thumbnail_url(&self, key: &str, now_ms: i64) -> String {
        let share = self.stat(key).await;
        if share.is_expired(now_ms) {
            return String::new();
        }
        share.thumbnail
    }

    /// Full-size data URL of a live image share; empty for anything else.
    pub async fn image_url(&self, key: &str, now_ms: i64) -> String {
        let Ok(parsed) = MetadataKey::parse(key) else {
            return String::new();
        };
        let share = match self.resolve(&parsed, false).await {
            Ok(share) if share.is_expired(now_ms) => return String::new(),
            Ok(share) if thumbnail::is_previewable(&share.mime_type) => share,
            _ => return String::new(),
        };
        match self.storage.read_bytes(&share.storage_key).await {
            Ok(data) => thumbnail::preview(data, share.mime_type, 0, 0)
                .await
                .unwrap_or_default(),
            Err(err) => {
                debug!("image url '{}': {}", key, err);
                String::new()
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        db::memory_pool,
        services::{
            metadata_service::{MetadataResult, SqliteMetadataStore},
            storage_service::{LocalBlobStore, StorageResult, UploadPart},
            thumbnail::sample_png,
        },
    };
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Blob store wrapper that counts calls and can be told to fail deletes.
    pub(crate) struct ScriptedBlobs {
        pub inner: LocalBlobStore,
        pub calls: AtomicUsize,
        pub fail_delete: AtomicBool,
    }

    #[async_trait]
    impl BlobStore for ScriptedBlobs {
        fn storage_type(&self) -> i32 {
            self.inner.storage_type()
        }
        async fn upload_url(&self) -> StorageResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.upload_url().await
        }
        async fn handle_upload(&self, request: UploadRequest) -> Vec<BlobDescriptor> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.handle_upload(request).await
        }
        async fn get(&self, key: &str) -> StorageResult<ByteStream> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.get(key).await
        }
        async fn read_bytes(&self, key: &str) -> StorageResult<Bytes> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.read_bytes(key).await
        }
        async fn stat(&self, key: &str) -> StorageResult<BlobDescriptor> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.stat(key).await
        }
        async fn delete(&self, key: &str) -> StorageResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_delete.load(Ordering::SeqCst) {
                return Err(StorageError::Io(std::io::Error::other("disk on fire")));
            }
            self.inner.delete(key).await
        }
    }

    /// Metadata store wrapper that counts calls, can refuse puts by name and
    /// can be told to fail reads or deletes.
    pub(crate) struct ScriptedMetadata {
        pub inner: SqliteMetadataStore,
        pub calls: AtomicUsize,
        pub fail_put_named: std::sync::Mutex<Option<String>>,
        pub fail_get: AtomicBool,
        pub fail_delete: AtomicBool,
    }

    #[async_trait]
    impl MetadataStore for ScriptedMetadata {
        async fn put(&self, record: &ShareRecord) -> MetadataResult<MetadataKey> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let refuse = self.fail_put_named.lock().unwrap().clone();
            if refuse.as_deref() == Some(record.name.as_str()) {
                return Err(MetadataError::Sqlx(sqlx::Error::PoolTimedOut));
            }
            self.inner.put(record).await
        }
        async fn get(&self, key: &MetadataKey) -> MetadataResult<ShareRecord> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_get.load(Ordering::SeqCst) {
                return Err(MetadataError::Sqlx(sqlx::Error::PoolTimedOut));
            }
            self.inner.get(key).await
        }
        async fn delete(&self, key: &MetadataKey) -> MetadataResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_delete.load(Ordering::SeqCst) {
                return Err(MetadataError::Sqlx(sqlx::Error::PoolTimedOut));
            }
            self.inner.delete(key).await
        }
        async fn query_expired(&self, before_ms: i64) -> MetadataResult<Vec<(MetadataKey, ShareRecord)>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.query_expired(before_ms).await
        }
    }

    pub(crate) struct Fixture {
        pub shares: ShareService,
        pub blobs: Arc<ScriptedBlobs>,
        pub meta: Arc<ScriptedMetadata>,
        pub _dir: TempDir,
    }

    pub(crate) async fn fixture_with_clock(clock: fn() -> i64) -> Fixture {
        let dir = TempDir::new().unwrap();
        let pool = Arc::new(memory_pool().await);
        let local = LocalBlobStore::new(
            pool.clone(),
            dir.path(),
            "http://localhost:3000/Shareme/HandleUpload",
        )
        .with_clock(clock);
        let blobs = Arc::new(ScriptedBlobs {
            inner: local,
            calls: AtomicUsize::new(0),
            fail_delete: AtomicBool::new(false),
        });
        let meta = Arc::new(ScriptedMetadata {
            inner: SqliteMetadataStore::new(pool),
            calls: AtomicUsize::new(0),
            fail_put_named: std::sync::Mutex::new(None),
            fail_get: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
        });
        let shares = ShareService::new(
            blobs.clone(),
            meta.clone(),
            ShareSettings::new("http://localhost:3000/"),
        );
        Fixture {
            shares,
            blobs,
            meta,
            _dir: dir,
        }
    }

    pub(crate) async fn fixture() -> Fixture {
        fixture_with_clock(|| 1000).await
    }

    pub(crate) fn text_part(name: &str, data: &'static [u8]) -> UploadPart {
        UploadPart {
            file_name: name.into(),
            content_type: Some("text/plain".into()),
            data: Bytes::from_static(data),
        }
    }

    pub(crate) async fn upload(
        fx: &Fixture,
        session: &mut Session,
        parts: Vec<UploadPart>,
    ) -> RegisterOutcome {
        let url = fx.shares.upload_url().await.unwrap();
        let ticket = url.rsplit('/').next().unwrap().to_string();
        fx.shares
            .handle_upload(UploadRequest { ticket, parts }, session)
            .await
    }

    #[tokio::test]
    async fn uploaded_blob_resolves_with_its_attributes() {
        let fx = fixture().await;
        let mut session = Session::default();
        let outcome = upload(&fx, &mut session, vec![text_part("a.txt", b"0123456789")]).await;
        assert_eq!(outcome.shares.len(), 1);

        let key = outcome.shares[0].key.clone();
        let share = fx.shares.stat(&key).await;
        assert!(!share.is_error());
        assert_eq!(share.name, "a.txt");
        assert_eq!(share.size, 10);
        assert_eq!(share.mime_type, "text/plain");
        assert_eq!(share.created, 1000);
        assert_eq!(share.expires, 604_801_000);
        assert_eq!(share.url, format!("http://localhost:3000/Shareme/Get/{}", key));
        assert_eq!(share.thumbnail, "");
        assert!(session.owns(&key));
    }

    #[tokio::test]
    async fn expiry_uses_the_configured_period() {
        let mut fx = fixture().await;
        fx.shares.settings = fx.shares.settings.clone().with_valid_period(5_000);
        let mut session = Session::default();
        let outcome = upload(&fx, &mut session, vec![text_part("a.txt", b"x")]).await;
        assert_eq!(outcome.shares[0].expires, 6_000);
    }

    #[tokio::test]
    async fn image_shares_carry_a_thumbnail() {
        let fx = fixture().await;
        let mut session = Session::default();
        let outcome = upload(
            &fx,
            &mut session,
            vec![UploadPart {
                file_name: "p.png".into(),
                content_type: Some("image/png".into()),
                data: Bytes::from(sample_png(120, 60)),
            }],
        )
        .await;
        let key = &outcome.shares[0].key;
        assert!(outcome.shares[0].thumbnail.starts_with("data:image/png;base64,"));
        assert_eq!(fx.shares.thumbnail_url(key, 2_000).await, outcome.shares[0].thumbnail);
        assert!(fx.shares.image_url(key, 2_000).await.starts_with("data:image/png;base64,"));

        let after_deadline = outcome.shares[0].expires + 1;
        assert_eq!(fx.shares.thumbnail_url(key, after_deadline).await, "");
        assert_eq!(fx.shares.image_url(key, after_deadline).await, "");
    }

    #[tokio::test]
    async fn invalid_key_makes_no_backend_calls() {
        let fx = fixture().await;
        let share = fx.shares.stat("definitely not a key").await;
        assert_eq!(share.error_kind(), Some(ShareErrorKind::NotFound));
        assert!(share.error.contains("Error decoding key"));

        assert!(fx.shares.get("%%%").await.is_err());
        assert_eq!(fx.blobs.calls.load(Ordering::SeqCst), 0);
        assert_eq!(fx.meta.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_key_is_not_found_without_touching_storage() {
        let fx = fixture().await;
        let share = fx.shares.stat(&MetadataKey::generate().to_string()).await;
        assert_eq!(share.error_kind(), Some(ShareErrorKind::NotFound));
        assert_eq!(fx.blobs.calls.load(Ordering::SeqCst), 0);
        assert_eq!(fx.meta.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn get_streams_the_payload() {
        let fx = fixture().await;
        let mut session = Session::default();
        let outcome = upload(&fx, &mut session, vec![text_part("a.txt", b"payload")]).await;

        let fetched = fx.shares.get(&outcome.shares[0].key).await.ok().unwrap();
        assert_eq!(fetched.share.mime_type, "text/plain");
        let mut body = Vec::new();
        let mut stream = fetched.body;
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(body, b"payload");
    }

    #[tokio::test]
    async fn delete_twice_is_not_found_tolerant() {
        let fx = fixture().await;
        let mut session = Session::default();
        let outcome = upload(&fx, &mut session, vec![text_part("a.txt", b"abc")]).await;
        let key = outcome.shares[0].key.clone();

        let first = fx.shares.delete(&mut session, &key).await;
        assert!(!first.is_error());
        assert_eq!(first.key, key);
        assert_eq!((first.size, first.expires), (0, 0));

        let second = fx.shares.delete(&mut session, &key).await;
        assert_eq!(second.error_kind(), Some(ShareErrorKind::NotFound));

        assert_eq!(fx.shares.stat(&key).await.error_kind(), Some(ShareErrorKind::NotFound));
        assert!(fx.shares.my_shares(&mut session).await.shares.is_empty());
        assert!(!session.owns(&key));
    }

    #[tokio::test]
    async fn failed_blob_delete_keeps_the_record() {
        let fx = fixture().await;
        let mut session = Session::default();
        let outcome = upload(&fx, &mut session, vec![text_part("a.txt", b"abc")]).await;
        let key = outcome.shares[0].key.clone();

        fx.blobs.fail_delete.store(true, Ordering::SeqCst);
        let failed = fx.shares.delete(&mut session, &key).await;
        assert_eq!(failed.error_kind(), Some(ShareErrorKind::BackendUnavailable));
        assert!(session.owns(&key));
        assert!(!fx.shares.stat(&key).await.is_error());

        fx.blobs.fail_delete.store(false, Ordering::SeqCst);
        assert!(!fx.shares.delete(&mut session, &key).await.is_error());
        assert!(!session.owns(&key));
    }

    #[tokio::test]
    async fn failed_record_delete_self_heals_on_next_stat() {
        let fx = fixture().await;
        let mut session = Session::default();
        let outcome = upload(&fx, &mut session, vec![text_part("a.txt", b"abc")]).await;
        let key = outcome.shares[0].key.clone();

        fx.meta.fail_delete.store(true, Ordering::SeqCst);
        let failed = fx.shares.delete(&mut session, &key).await;
        assert_eq!(failed.error_kind(), Some(ShareErrorKind::BackendUnavailable));
        assert!(session.owns(&key));

        // the blob is gone, the record lingers and now reads as absent
        fx.meta.fail_delete.store(false, Ordering::SeqCst);
        assert!(fx.meta.inner.get(&MetadataKey::parse(&key).unwrap()).await.is_ok());
        assert_eq!(fx.shares.stat(&key).await.error_kind(), Some(ShareErrorKind::NotFound));

        let listing = fx.shares.my_shares(&mut session).await;
        assert_eq!(listing.dropped, vec![key.clone()]);
        assert!(!session.owns(&key));
    }

    #[tokio::test]
    async fn listing_keeps_keys_while_metadata_is_unavailable() {
        let fx = fixture().await;
        let mut session = Session::default();
        let outcome = upload(&fx, &mut session, vec![text_part("a.txt", b"abc")]).await;
        let key = outcome.shares[0].key.clone();

        fx.meta.fail_get.store(true, Ordering::SeqCst);
        let listing = fx.shares.my_shares(&mut session).await;
        assert!(listing.shares.is_empty());
        assert!(listing.dropped.is_empty());
        assert_eq!(listing.unresolved, vec![key.clone()]);
        assert!(session.owns(&key));

        fx.meta.fail_get.store(false, Ordering::SeqCst);
        let listing = fx.shares.my_shares(&mut session).await;
        assert_eq!(listing.shares.len(), 1);
        assert!(listing.unresolved.is_empty());
    }

    #[tokio::test]
    async fn record_without_blob_resolves_to_not_found() {
        let fx = fixture().await;
        let mut session = Session::default();
        let outcome = upload(&fx, &mut session, vec![text_part("a.txt", b"abc")]).await;
        let key = outcome.shares[0].key.clone();
        let record = fx.meta.inner.get(&MetadataKey::parse(&key).unwrap()).await.unwrap();

        fx.blobs.inner.delete(&record.storage_key).await.unwrap();

        let share = fx.shares.stat(&key).await;
        assert_eq!(share.error_kind(), Some(ShareErrorKind::NotFound));
        assert!(fx.shares.get(&key).await.is_err());
        // the record is left for the sweeper
        assert!(fx.meta.inner.get(&MetadataKey::parse(&key).unwrap()).await.is_ok());
    }

    #[tokio::test]
    async fn listing_drops_keys_whose_blob_vanished() {
        let fx = fixture().await;
        let mut session = Session::default();
        let outcome = upload(
            &fx,
            &mut session,
            vec![text_part("keep.txt", b"k"), text_part("lose.txt", b"l")],
        )
        .await;
        let keep = outcome.shares[0].key.clone();
        let lose = outcome.shares[1].key.clone();
        let record = fx.meta.inner.get(&MetadataKey::parse(&lose).unwrap()).await.unwrap();
        fx.blobs.inner.delete(&record.storage_key).await.unwrap();
        session.grant("garbage", "junk");

        let listing = fx.shares.my_shares(&mut session).await;
        assert_eq!(listing.shares.len(), 1);
        assert_eq!(listing.shares[0].key, keep);
        assert_eq!(listing.shares[0].name, "keep.txt");
        let mut dropped = listing.dropped.clone();
        dropped.sort();
        let mut expected = vec![lose.clone(), "garbage".to_string()];
        expected.sort();
        assert_eq!(dropped, expected);
        assert!(!session.owns(&lose));
        assert!(!session.owns("garbage"));
        assert!(session.owns(&keep));
    }

    #[tokio::test]
    async fn listing_only_shows_own_keys_but_any_key_resolves() {
        let fx = fixture().await;
        let mut alice = Session::default();
        let mut bob = Session::default();
        let outcome = upload(&fx, &mut alice, vec![text_part("a.txt", b"abc")]).await;
        let key = outcome.shares[0].key.clone();

        assert!(fx.shares.my_shares(&mut bob).await.shares.is_empty());
        assert!(!fx.shares.stat(&key).await.is_error());

        let added = fx.shares.add(&mut bob, &key).await;
        assert!(!added.is_error());
        assert_eq!(fx.shares.my_shares(&mut bob).await.shares.len(), 1);
    }

    #[tokio::test]
    async fn failed_registration_reaps_the_blob_and_keeps_the_rest() {
        let fx = fixture().await;
        *fx.meta.fail_put_named.lock().unwrap() = Some("bad.txt".into());
        let mut session = Session::default();
        let outcome = upload(
            &fx,
            &mut session,
            vec![text_part("good.txt", b"g"), text_part("bad.txt", b"b")],
        )
        .await;

        assert_eq!(outcome.shares.len(), 1);
        assert_eq!(outcome.shares[0].name, "good.txt");
        assert_eq!(outcome.reaped.len(), 1);
        assert!(outcome.orphaned.is_empty());
        assert!(fx.blobs.inner.stat(&outcome.reaped[0]).await.unwrap_err().is_not_found());
        assert_eq!(session.owned().len(), 1);
    }

    #[tokio::test]
    async fn unreapable_blob_is_reported_as_orphaned() {
        let fx = fixture().await;
        *fx.meta.fail_put_named.lock().unwrap() = Some("bad.txt".into());
        fx.blobs.fail_delete.store(true, Ordering::SeqCst);
        let mut session = Session::default();
        let outcome = upload(&fx, &mut session, vec![text_part("bad.txt", b"b")]).await;

        assert!(outcome.shares.is_empty());
        assert!(outcome.reaped.is_empty());
        assert_eq!(outcome.orphaned.len(), 1);
        assert!(fx.blobs.inner.stat(&outcome.orphaned[0]).await.is_ok());
    }

    #[tokio::test]
    async fn expired_shares_still_resolve() {
        let fx = fixture().await;
        let mut session = Session::default();
        let outcome = upload(&fx, &mut session, vec![text_part("a.txt", b"abc")]).await;
        let share = fx.shares.stat(&outcome.shares[0].key).await;
        assert!(share.is_expired(i64::MAX));
        assert!(!share.is_error());
    }
}
