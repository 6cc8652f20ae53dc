//! Hard deletion of soft-deleted blobs once their retention has passed.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use blob_store::BlobStore;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics::{jobs_stats, Timer};
use opentelemetry::KeyValue;
use serde::Serialize;
use state_store::SoftDeletedBlobIndex;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::PeriodicJob;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub examined: usize,
    pub hard_deleted: usize,
    /// Records whose blob was already gone; the record is still removed.
    pub already_absent: usize,
    /// Records kept for the next sweep because the hard delete failed.
    pub failed: usize,
}

/// Converts soft-delete records older than a cutoff into hard deletes.
///
/// At most one sweep runs per store at a time. A sweep started while another
/// is running for the same store is skipped rather than queued.
pub struct SoftDeleteReconciler {
    guards: DashMap<String, Arc<Mutex<()>>>,
    metrics: jobs_stats::Metrics,
}

impl Default for SoftDeleteReconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftDeleteReconciler {
    pub fn new() -> Self {
        Self {
            guards: DashMap::new(),
            metrics: jobs_stats::Metrics::new(),
        }
    }

    fn guard(&self, blob_store_name: &str) -> Arc<Mutex<()>> {
        self.guards
            .entry(blob_store_name.to_string())
            .or_default()
            .clone()
    }

    /// Hard deletes every blob recorded in `index` strictly before `cutoff`,
    /// oldest first. Returns `None` if a sweep of this store is already
    /// running.
    pub async fn sweep(
        &self,
        store: &dyn BlobStore,
        index: &SoftDeletedBlobIndex,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<SweepSummary>> {
        let guard = self.guard(store.name());
        let Ok(_running) = guard.try_lock() else {
            debug!(blob_store = store.name(), "sweep already running, skipping");
            return Ok(None);
        };
        let labels = [KeyValue::new("blob_store", store.name().to_string())];
        let _timer = Timer::start_with_labels(&self.metrics.sweep_duration, &labels);

        let mut summary = SweepSummary::default();
        let records = index
            .get_records_before(cutoff)
            .with_context(|| format!("failed to scan soft delete index of {}", store.name()))?;
        for blob_id in records {
            let blob_id = blob_id?;
            summary.examined += 1;
            match store.delete_hard(&blob_id).await {
                Ok(removed) => {
                    index.delete_record(&blob_id).with_context(|| {
                        format!("failed to remove soft delete record of {}", blob_id)
                    })?;
                    if removed {
                        summary.hard_deleted += 1;
                    } else {
                        summary.already_absent += 1;
                    }
                }
                Err(err) => {
                    summary.failed += 1;
                    warn!(
                        blob_store = store.name(),
                        blob_id = %blob_id,
                        retryable = err.is_retryable(),
                        "failed to hard delete blob, keeping record: {}",
                        err
                    );
                }
            }
        }

        self.metrics.sweeps.add(1, &labels);
        self.metrics
            .sweep_hard_deletes
            .add(summary.hard_deleted as u64, &labels);
        self.metrics.sweep_failures.add(summary.failed as u64, &labels);
        if summary.examined > 0 {
            info!(
                blob_store = store.name(),
                examined = summary.examined,
                hard_deleted = summary.hard_deleted,
                already_absent = summary.already_absent,
                failed = summary.failed,
                "reconciliation sweep finished"
            );
        }
        Ok(Some(summary))
    }

    /// Waits until no sweep of `blob_store_name` is running.
    pub async fn wait_for_sweep(&self, blob_store_name: &str) {
        let guard = self.guard(blob_store_name);
        let _idle = guard.lock().await;
    }
}

/// Periodic sweep of one store with a fixed retention.
pub struct ReconciliationJob {
    reconciler: Arc<SoftDeleteReconciler>,
    store: Arc<dyn BlobStore>,
    index: Arc<SoftDeletedBlobIndex>,
    retention: Duration,
}

impl ReconciliationJob {
    pub fn new(
        reconciler: Arc<SoftDeleteReconciler>,
        store: Arc<dyn BlobStore>,
        index: Arc<SoftDeletedBlobIndex>,
        retention: Duration,
    ) -> Self {
        Self {
            reconciler,
            store,
            index,
            retention,
        }
    }
}

#[async_trait]
impl PeriodicJob for ReconciliationJob {
    fn name(&self) -> String {
        format!("reconciliation-{}", self.store.name())
    }

    async fn run(&self) -> Result<()> {
        if !self.store.is_started() {
            debug!(blob_store = self.store.name(), "store not started, skipping sweep");
            return Ok(());
        }
        let cutoff = Utc::now() - chrono::Duration::from_std(self.retention)?;
        self.reconciler
            .sweep(self.store.as_ref(), &self.index, cutoff)
            .await?;
        Ok(())
    }
}
