use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
        Mutex,
        PoisonError,
    },
    time::Instant,
};

use async_trait::async_trait;
use bytes::Bytes;
use data_model::{
    BlobAttributes,
    BlobHeaders,
    BlobId,
    BlobStoreConfiguration,
    BlobStoreMetrics,
    OperationMetrics,
    OperationType,
};
use metrics::blob_store_stats;
use opentelemetry::KeyValue;
use strum::IntoEnumIterator;
use tracing::debug;

use crate::{Blob, BlobStore, BlobStoreResult};

#[derive(Default)]
struct OperationCounters {
    successful_requests: AtomicU64,
    error_requests: AtomicU64,
    time_on_requests_ms: AtomicU64,
    blob_size: AtomicU64,
}

impl OperationCounters {
    fn snapshot(&self) -> OperationMetrics {
        OperationMetrics {
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            error_requests: self.error_requests.load(Ordering::Relaxed),
            time_on_requests_ms: self.time_on_requests_ms.load(Ordering::Relaxed),
            blob_size: self.blob_size.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.successful_requests.store(0, Ordering::Relaxed);
        self.error_requests.store(0, Ordering::Relaxed);
        self.time_on_requests_ms.store(0, Ordering::Relaxed);
        self.blob_size.store(0, Ordering::Relaxed);
    }
}

/// Records per-operation counters around another blob store.
///
/// Results pass through untouched: errors are counted and returned as is.
/// Counters are reset when the store is (re)started.
pub struct MeteredBlobStore {
    inner: Arc<dyn BlobStore>,
    counters: HashMap<OperationType, OperationCounters>,
    last_delta: Mutex<HashMap<OperationType, OperationMetrics>>,
    metrics: blob_store_stats::Metrics,
}

impl MeteredBlobStore {
    pub fn new(inner: Arc<dyn BlobStore>) -> Self {
        Self {
            inner,
            counters: OperationType::iter()
                .map(|operation| (operation, OperationCounters::default()))
                .collect(),
            last_delta: Mutex::new(HashMap::new()),
            metrics: blob_store_stats::Metrics::new(),
        }
    }

    pub fn inner(&self) -> &Arc<dyn BlobStore> {
        &self.inner
    }

    async fn observe<T>(
        &self,
        operation: OperationType,
        fut: impl Future<Output = BlobStoreResult<T>>,
        size: impl Fn(&T) -> u64,
    ) -> BlobStoreResult<T> {
        let start = Instant::now();
        let result = fut.await;
        let elapsed = start.elapsed();

        let labels = [
            KeyValue::new("blob_store", self.inner.name().to_string()),
            KeyValue::new("operation", operation.as_ref().to_string()),
        ];
        self.metrics
            .operation_duration
            .record(elapsed.as_secs_f64(), &labels);
        let Some(counters) = self.counters.get(&operation) else {
            return result;
        };
        counters
            .time_on_requests_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
        match &result {
            Ok(value) => {
                let bytes = size(value);
                counters.successful_requests.fetch_add(1, Ordering::Relaxed);
                counters.blob_size.fetch_add(bytes, Ordering::Relaxed);
                self.metrics.operations.add(1, &labels);
                if bytes > 0 {
                    self.metrics.operation_bytes.add(bytes, &labels);
                }
            }
            Err(err) => {
                counters.error_requests.fetch_add(1, Ordering::Relaxed);
                self.metrics.operation_errors.add(1, &labels);
                debug!(
                    blob_store = self.inner.name(),
                    operation = %operation,
                    "blob store operation failed: {}",
                    err
                );
            }
        }
        result
    }
}

fn no_bytes<T>(_: &T) -> u64 {
    0
}

#[async_trait]
impl BlobStore for MeteredBlobStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn configuration(&self) -> &BlobStoreConfiguration {
        self.inner.configuration()
    }

    async fn start(&self) -> BlobStoreResult<()> {
        if !self.inner.is_started() {
            self.counters.values().for_each(OperationCounters::reset);
            self.last_delta
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
        }
        self.inner.start().await
    }

    async fn stop(&self) -> BlobStoreResult<()> {
        self.inner.stop().await
    }

    fn is_started(&self) -> bool {
        self.inner.is_started()
    }

    fn is_writable(&self) -> bool {
        self.inner.is_writable()
    }

    fn set_writable(&self, writable: bool) {
        self.inner.set_writable(writable)
    }

    fn has_capacity_for(&self, size: u64) -> bool {
        self.inner.has_capacity_for(size)
    }

    async fn create(&self, content: Bytes, headers: BlobHeaders) -> BlobStoreResult<Blob> {
        self.observe(
            OperationType::Put,
            self.inner.create(content, headers),
            |blob: &Blob| blob.metrics.content_size,
        )
        .await
    }

    async fn get(&self, blob_id: &BlobId) -> BlobStoreResult<Option<Blob>> {
        self.observe(
            OperationType::Get,
            self.inner.get(blob_id),
            |blob: &Option<Blob>| blob.as_ref().map_or(0, |blob| blob.metrics.content_size),
        )
        .await
    }

    async fn exists(&self, blob_id: &BlobId) -> BlobStoreResult<bool> {
        self.observe(OperationType::Exists, self.inner.exists(blob_id), no_bytes)
            .await
    }

    async fn get_blob_attributes(
        &self,
        blob_id: &BlobId,
    ) -> BlobStoreResult<Option<BlobAttributes>> {
        self.observe(
            OperationType::Attributes,
            self.inner.get_blob_attributes(blob_id),
            no_bytes,
        )
        .await
    }

    async fn delete(&self, blob_id: &BlobId, reason: &str) -> BlobStoreResult<bool> {
        self.observe(
            OperationType::SoftDelete,
            self.inner.delete(blob_id, reason),
            no_bytes,
        )
        .await
    }

    async fn delete_hard(&self, blob_id: &BlobId) -> BlobStoreResult<bool> {
        self.observe(OperationType::Delete, self.inner.delete_hard(blob_id), no_bytes)
            .await
    }

    fn metrics(&self) -> BlobStoreMetrics {
        self.inner.metrics()
    }

    fn operation_metrics(&self) -> HashMap<OperationType, OperationMetrics> {
        self.counters
            .iter()
            .map(|(operation, counters)| (*operation, counters.snapshot()))
            .collect()
    }

    fn operation_metrics_delta(&self) -> HashMap<OperationType, OperationMetrics> {
        let current = self.operation_metrics();
        let mut last = self.last_delta.lock().unwrap_or_else(PoisonError::into_inner);
        let delta = current
            .iter()
            .map(|(operation, metrics)| {
                let earlier = last.get(operation).copied().unwrap_or_default();
                (*operation, metrics.since(&earlier))
            })
            .collect();
        *last = current;
        delta
    }
}
