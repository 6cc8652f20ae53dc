//! Core blob store trait.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use data_model::{
    BlobAttributes,
    BlobHeaders,
    BlobId,
    BlobMetrics,
    BlobStoreConfiguration,
    BlobStoreMetrics,
    OperationMetrics,
    OperationType,
};

use crate::BlobStoreResult;

/// A live blob: its content plus the metadata recorded at creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub id: BlobId,
    pub headers: BlobHeaders,
    pub metrics: BlobMetrics,
    pub content: Bytes,
}

/// Content-addressed blob storage with soft-delete semantics.
///
/// A blob moves through `ABSENT -> LIVE` on [`create`](BlobStore::create),
/// `LIVE -> SOFT_DELETED` on [`delete`](BlobStore::delete) and back to
/// `ABSENT` on [`delete_hard`](BlobStore::delete_hard). Soft-deleted blobs
/// are invisible to `get` and `exists` but keep occupying storage until the
/// reconciliation sweep hard deletes them.
#[async_trait]
pub trait BlobStore: Send + Sync {
    fn name(&self) -> &str;

    fn configuration(&self) -> &BlobStoreConfiguration;

    /// Starting an already started store is a no-op.
    async fn start(&self) -> BlobStoreResult<()>;

    async fn stop(&self) -> BlobStoreResult<()>;

    fn is_started(&self) -> bool;

    /// Whether the store currently accepts new blobs.
    fn is_writable(&self) -> bool;

    fn set_writable(&self, writable: bool);

    /// Whether a blob of `size` bytes would be accepted: the store is
    /// writable and has at least `size` bytes of available space. Stores
    /// without a capacity always have room.
    fn has_capacity_for(&self, size: u64) -> bool {
        self.is_writable()
            && self
                .metrics()
                .available_space
                .is_none_or(|available| available >= size)
    }

    /// Stores `content` under a new blob id.
    ///
    /// Requires the [`BLOB_NAME_HEADER`](data_model::BLOB_NAME_HEADER)
    /// header. A write that fails midway never leaves a readable blob.
    async fn create(&self, content: Bytes, headers: BlobHeaders) -> BlobStoreResult<Blob>;

    /// Returns the blob unless it is absent or soft deleted.
    async fn get(&self, blob_id: &BlobId) -> BlobStoreResult<Option<Blob>>;

    async fn exists(&self, blob_id: &BlobId) -> BlobStoreResult<bool>;

    /// Attributes of a live or soft-deleted blob.
    async fn get_blob_attributes(&self, blob_id: &BlobId)
        -> BlobStoreResult<Option<BlobAttributes>>;

    /// Soft deletes a live blob and records it in the soft-delete index.
    /// Returns false if there is no live blob with this id.
    async fn delete(&self, blob_id: &BlobId, reason: &str) -> BlobStoreResult<bool>;

    /// Physically removes the blob, bypassing the soft-delete index.
    /// Returns false if nothing was stored under this id.
    async fn delete_hard(&self, blob_id: &BlobId) -> BlobStoreResult<bool>;

    fn metrics(&self) -> BlobStoreMetrics;

    /// Cumulative per-operation counters. Bare stores don't record any; see
    /// [`MeteredBlobStore`](crate::MeteredBlobStore).
    fn operation_metrics(&self) -> HashMap<OperationType, OperationMetrics> {
        HashMap::new()
    }

    /// Counters accumulated since the previous call.
    fn operation_metrics_delta(&self) -> HashMap<OperationType, OperationMetrics> {
        HashMap::new()
    }
}
