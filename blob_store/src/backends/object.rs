use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use data_model::{
    BlobAttributes,
    BlobHeaders,
    BlobId,
    BlobMetrics,
    BlobStoreConfiguration,
    BlobStoreMetrics,
    BLOB_NAME_HEADER,
};
use futures::StreamExt;
use object_store::{path::Path, ObjectStore, PutPayload};
use sha2::{Digest, Sha256};
use state_store::{SoftDeletedBlobIndex, StateStore};
use tracing::{debug, info, warn};

use super::build_object_store;
use crate::{Blob, BlobStore, BlobStoreError, BlobStoreResult};

const CONTENT_DIR: &str = "content";
const TEMP_DIR: &str = "tmp";
const BYTES_EXTENSION: &str = "bytes";
const PROPERTIES_EXTENSION: &str = "properties";
const VOLUMES: u32 = 43;
const CHAPTERS: u32 = 47;

/// Leaf blob store over an object store.
///
/// Content lives at `content/vol-NN/chap-NN/<id>.bytes` with the blob's
/// attributes in a JSON `<id>.properties` sidecar. The sidecar is written
/// last and removed last, so a blob is readable only while both exist.
pub struct ObjectBlobStore {
    config: BlobStoreConfiguration,
    object_store: Arc<dyn ObjectStore>,
    root: Path,
    index: Arc<SoftDeletedBlobIndex>,
    io_timeout: Duration,
    started: AtomicBool,
    writable: AtomicBool,
    blob_count: AtomicU64,
    total_size: AtomicU64,
}

impl ObjectBlobStore {
    pub fn new(
        config: BlobStoreConfiguration,
        object_store: Arc<dyn ObjectStore>,
        root: Path,
        index: Arc<SoftDeletedBlobIndex>,
        io_timeout: Duration,
    ) -> Self {
        let writable = config.attributes.writable;
        Self {
            config,
            object_store,
            root,
            index,
            io_timeout,
            started: AtomicBool::new(false),
            writable: AtomicBool::new(writable),
            blob_count: AtomicU64::new(0),
            total_size: AtomicU64::new(0),
        }
    }

    /// Builds the backend named by `config` with a fresh soft-delete index
    /// over `state`.
    pub fn from_configuration(
        config: BlobStoreConfiguration,
        state: &Arc<StateStore>,
        io_timeout: Duration,
    ) -> BlobStoreResult<Self> {
        let (object_store, root) = build_object_store(&config)?;
        let index = Arc::new(state.soft_deleted_blob_index());
        Ok(Self::new(config, object_store, root, index, io_timeout))
    }

    pub fn soft_deleted_blob_index(&self) -> Arc<SoftDeletedBlobIndex> {
        self.index.clone()
    }

    fn ensure_started(&self) -> BlobStoreResult<()> {
        if !self.is_started() {
            return Err(BlobStoreError::NotStarted {
                store: self.config.name.clone(),
            });
        }
        Ok(())
    }

    fn content_path(&self, blob_id: &BlobId, extension: &str) -> Path {
        let digest = Sha256::digest(blob_id.get().as_bytes());
        let hash = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
        let volume = hash % VOLUMES + 1;
        let chapter = (hash / VOLUMES) % CHAPTERS + 1;
        self.root
            .child(CONTENT_DIR)
            .child(format!("vol-{:02}", volume))
            .child(format!("chap-{:02}", chapter))
            .child(format!("{}.{}", blob_id, extension))
    }

    fn bytes_path(&self, blob_id: &BlobId) -> Path {
        self.content_path(blob_id, BYTES_EXTENSION)
    }

    fn properties_path(&self, blob_id: &BlobId) -> Path {
        self.content_path(blob_id, PROPERTIES_EXTENSION)
    }

    fn temp_path(&self, blob_id: &BlobId) -> Path {
        self.root
            .child(TEMP_DIR)
            .child(format!("tmp${}.{}", blob_id, BYTES_EXTENSION))
    }

    async fn with_timeout<T>(
        &self,
        operation: &str,
        fut: impl Future<Output = object_store::Result<T>>,
    ) -> BlobStoreResult<T> {
        match tokio::time::timeout(self.io_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(BlobStoreError::Timeout {
                operation: format!("{} on blob store {}", operation, self.config.name),
                after: self.io_timeout,
            }),
        }
    }

    async fn read_attributes(&self, blob_id: &BlobId) -> BlobStoreResult<Option<BlobAttributes>> {
        let path = self.properties_path(blob_id);
        let read = self
            .with_timeout("read properties", async {
                self.object_store.get(&path).await?.bytes().await
            })
            .await;
        match read {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if is_not_found(&err) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn write_attributes(
        &self,
        blob_id: &BlobId,
        attributes: &BlobAttributes,
    ) -> BlobStoreResult<()> {
        let path = self.properties_path(blob_id);
        let payload = PutPayload::from(serde_json::to_vec(attributes)?);
        self.with_timeout("write properties", self.object_store.put(&path, payload))
            .await?;
        Ok(())
    }

    /// Deletes one object and returns its size, or `None` if it was absent.
    async fn remove_object(&self, path: &Path) -> BlobStoreResult<Option<u64>> {
        let meta = match self.with_timeout("head", self.object_store.head(path)).await {
            Ok(meta) => meta,
            Err(err) if is_not_found(&err) => return Ok(None),
            Err(err) => return Err(err),
        };
        match self.with_timeout("delete", self.object_store.delete(path)).await {
            Ok(()) => Ok(Some(meta.size as u64)),
            Err(err) if is_not_found(&err) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Claims `size` bytes of the store's capacity for a new blob.
    fn reserve(&self, size: u64) -> BlobStoreResult<()> {
        let capacity = self.config.attributes.capacity_bytes;
        self.total_size
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                let after = used.saturating_add(size);
                match capacity {
                    Some(capacity) if after > capacity => None,
                    _ => Some(after),
                }
            })
            .map(|_| ())
            .map_err(|used| BlobStoreError::Full {
                store: self.config.name.clone(),
                requested: size,
                available: capacity.unwrap_or_default().saturating_sub(used),
            })
    }

    /// Stages the content under `tmp/`, then publishes it. Nothing of the
    /// blob is left behind when any step fails.
    async fn write_blob(
        &self,
        blob_id: &BlobId,
        content: Bytes,
        attributes: &BlobAttributes,
    ) -> BlobStoreResult<()> {
        let temp_path = self.temp_path(blob_id);
        let staged = self
            .with_timeout(
                "write content",
                self.object_store.put(&temp_path, PutPayload::from(content)),
            )
            .await;
        if let Err(err) = staged {
            self.discard(&[temp_path]).await;
            return Err(err);
        }
        if let Err(err) = self.publish(&temp_path, blob_id, attributes).await {
            self.discard(&[temp_path, self.bytes_path(blob_id)]).await;
            return Err(err);
        }
        Ok(())
    }

    async fn publish(
        &self,
        temp_path: &Path,
        blob_id: &BlobId,
        attributes: &BlobAttributes,
    ) -> BlobStoreResult<()> {
        let bytes_path = self.bytes_path(blob_id);
        self.with_timeout("rename", self.object_store.rename(temp_path, &bytes_path))
            .await?;
        self.write_attributes(blob_id, attributes).await
    }

    /// Best effort removal of the leftovers of a failed create.
    async fn discard(&self, paths: &[Path]) {
        for path in paths {
            if let Err(err) = self.remove_object(path).await {
                warn!(
                    blob_store = %self.config.name,
                    path = %path,
                    "failed to clean up partial write: {}",
                    err
                );
            }
        }
    }

    /// Rebuilds the usage counters from the content listing.
    async fn recompute_metrics(&self) -> BlobStoreResult<()> {
        let prefix = self.root.child(CONTENT_DIR);
        let mut listing = self.object_store.list(Some(&prefix));
        let mut blob_count = 0;
        let mut total_size = 0;
        while let Some(meta) = self.with_timeout("list", async {
            listing.next().await.transpose()
        })
        .await?
        {
            if meta.location.extension() == Some(BYTES_EXTENSION) {
                blob_count += 1;
                total_size += meta.size as u64;
            }
        }
        self.blob_count.store(blob_count, Ordering::SeqCst);
        self.total_size.store(total_size, Ordering::SeqCst);
        info!(
            blob_store = %self.config.name,
            blob_count,
            total_size,
            "recomputed blob store metrics"
        );
        Ok(())
    }

    fn release(&self, size: u64) {
        saturating_decrement(&self.blob_count, 1);
        saturating_decrement(&self.total_size, size);
    }
}

fn saturating_decrement(counter: &AtomicU64, by: u64) {
    let _ = counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
        Some(current.saturating_sub(by))
    });
}

fn is_not_found(err: &BlobStoreError) -> bool {
    matches!(
        err,
        BlobStoreError::Backend {
            source: object_store::Error::NotFound { .. }
        }
    )
}

#[async_trait]
impl BlobStore for ObjectBlobStore {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn configuration(&self) -> &BlobStoreConfiguration {
        &self.config
    }

    async fn start(&self) -> BlobStoreResult<()> {
        if self.is_started() {
            return Ok(());
        }
        self.index
            .init(&self.config.name)
            .map_err(|source| BlobStoreError::Index { source })?;
        self.recompute_metrics().await?;
        self.started.store(true, Ordering::SeqCst);
        info!(blob_store = %self.config.name, "started blob store");
        Ok(())
    }

    async fn stop(&self) -> BlobStoreResult<()> {
        if self.started.swap(false, Ordering::SeqCst) {
            info!(blob_store = %self.config.name, "stopped blob store");
        }
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn is_writable(&self) -> bool {
        self.is_started() && self.writable.load(Ordering::SeqCst)
    }

    fn set_writable(&self, writable: bool) {
        self.writable.store(writable, Ordering::SeqCst);
    }

    async fn create(&self, content: Bytes, headers: BlobHeaders) -> BlobStoreResult<Blob> {
        self.ensure_started()?;
        if !self.is_writable() {
            return Err(BlobStoreError::Unwritable {
                store: self.config.name.clone(),
            });
        }
        if !headers.contains_key(BLOB_NAME_HEADER) {
            return Err(BlobStoreError::MissingHeader {
                header: BLOB_NAME_HEADER.to_string(),
            });
        }

        let blob_id = BlobId::random();
        let metrics = BlobMetrics {
            created_at: Utc::now(),
            content_size: content.len() as u64,
            sha256_hash: hex::encode(Sha256::digest(&content)),
        };
        let attributes = BlobAttributes::new(headers, metrics);

        let size = attributes.metrics.content_size;
        self.reserve(size)?;
        if let Err(err) = self.write_blob(&blob_id, content.clone(), &attributes).await {
            saturating_decrement(&self.total_size, size);
            return Err(err);
        }
        self.blob_count.fetch_add(1, Ordering::SeqCst);
        debug!(
            blob_store = %self.config.name,
            blob_id = %blob_id,
            size = attributes.metrics.content_size,
            "created blob"
        );
        Ok(Blob {
            id: blob_id,
            headers: attributes.headers,
            metrics: attributes.metrics,
            content,
        })
    }

    async fn get(&self, blob_id: &BlobId) -> BlobStoreResult<Option<Blob>> {
        self.ensure_started()?;
        let Some(attributes) = self.read_attributes(blob_id).await? else {
            return Ok(None);
        };
        if attributes.deleted {
            return Ok(None);
        }
        let path = self.bytes_path(blob_id);
        let read = self
            .with_timeout("read content", async {
                self.object_store.get(&path).await?.bytes().await
            })
            .await;
        let content = match read {
            Ok(content) => content,
            Err(err) if is_not_found(&err) => {
                warn!(
                    blob_store = %self.config.name,
                    blob_id = %blob_id,
                    "blob has properties but no content"
                );
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        Ok(Some(Blob {
            id: blob_id.clone(),
            headers: attributes.headers,
            metrics: attributes.metrics,
            content,
        }))
    }

    async fn exists(&self, blob_id: &BlobId) -> BlobStoreResult<bool> {
        self.ensure_started()?;
        Ok(self
            .read_attributes(blob_id)
            .await?
            .is_some_and(|attributes| !attributes.deleted))
    }

    async fn get_blob_attributes(
        &self,
        blob_id: &BlobId,
    ) -> BlobStoreResult<Option<BlobAttributes>> {
        self.ensure_started()?;
        self.read_attributes(blob_id).await
    }

    async fn delete(&self, blob_id: &BlobId, reason: &str) -> BlobStoreResult<bool> {
        self.ensure_started()?;
        let Some(mut attributes) = self.read_attributes(blob_id).await? else {
            return Ok(false);
        };
        if attributes.deleted {
            return Ok(false);
        }

        let deleted_at = Utc::now();
        attributes.mark_deleted(reason, deleted_at);
        self.write_attributes(blob_id, &attributes).await?;

        // An unrecorded soft delete would never be reclaimed, so undo it.
        if let Err(source) = self.index.create_record_at(blob_id, deleted_at) {
            attributes.deleted = false;
            attributes.deleted_reason = None;
            attributes.deleted_at = None;
            if let Err(err) = self.write_attributes(blob_id, &attributes).await {
                warn!(
                    blob_store = %self.config.name,
                    blob_id = %blob_id,
                    "failed to revert soft delete: {}",
                    err
                );
            }
            return Err(BlobStoreError::Index { source });
        }
        debug!(
            blob_store = %self.config.name,
            blob_id = %blob_id,
            reason,
            "soft deleted blob"
        );
        Ok(true)
    }

    async fn delete_hard(&self, blob_id: &BlobId) -> BlobStoreResult<bool> {
        self.ensure_started()?;
        let removed_bytes = self.remove_object(&self.bytes_path(blob_id)).await?;
        let removed_properties = self.remove_object(&self.properties_path(blob_id)).await?;
        if let Some(size) = removed_bytes {
            self.release(size);
        }
        let removed = removed_bytes.is_some() || removed_properties.is_some();
        if removed {
            debug!(blob_store = %self.config.name, blob_id = %blob_id, "hard deleted blob");
        }
        Ok(removed)
    }

    fn metrics(&self) -> BlobStoreMetrics {
        let total_size = self.total_size.load(Ordering::SeqCst);
        BlobStoreMetrics {
            blob_count: self.blob_count.load(Ordering::SeqCst),
            total_size,
            available_space: self
                .config
                .attributes
                .capacity_bytes
                .map(|capacity| capacity.saturating_sub(total_size)),
        }
    }
}
