use std::{
    sync::{Arc, Mutex, OnceLock, PoisonError},
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use blob_store::{BlobStore, BlobStoreQuotaResult, QuotaService};
use metrics::jobs_stats;
use opentelemetry::KeyValue;
use tracing::{debug, error, info, warn};

use crate::{JobHandle, PeriodicJob, PeriodicJobService};

pub const DEFAULT_QUOTA_CHECK_INTERVAL: Duration = Duration::from_secs(60);

struct CheckerState {
    blob_store: OnceLock<Arc<dyn BlobStore>>,
    quota_service: Arc<dyn QuotaService>,
    latest: Mutex<Option<BlobStoreQuotaResult>>,
    metrics: jobs_stats::Metrics,
}

impl CheckerState {
    /// One quota check. Failures are logged and never stop the schedule.
    fn check(&self) {
        let Some(store) = self.blob_store.get() else {
            return;
        };
        let labels = [KeyValue::new("blob_store", store.name().to_string())];
        self.metrics.quota_checks.add(1, &labels);
        match self.quota_service.check_quota(store.as_ref()) {
            Ok(Some(result)) => {
                if result.violation {
                    self.metrics.quota_violations.add(1, &labels);
                    warn!(
                        blob_store = %result.blob_store_name,
                        "blob store quota violated: {}",
                        result.message
                    );
                } else {
                    debug!(
                        blob_store = %result.blob_store_name,
                        "blob store quota ok: {}",
                        result.message
                    );
                }
                *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(result);
            }
            Ok(None) => {}
            Err(err) => {
                self.metrics.quota_check_errors.add(1, &labels);
                error!(blob_store = store.name(), "quota check failed: {}", err);
            }
        }
    }
}

struct QuotaCheckJob {
    state: Arc<CheckerState>,
}

#[async_trait]
impl PeriodicJob for QuotaCheckJob {
    fn name(&self) -> String {
        match self.state.blob_store.get() {
            Some(store) => format!("quota-check-{}", store.name()),
            None => "quota-check".to_string(),
        }
    }

    async fn run(&self) -> Result<()> {
        self.state.check();
        Ok(())
    }
}

/// Periodically checks one blob store against its quota.
///
/// [`set_blob_store`](Self::set_blob_store) must be called exactly once
/// before [`start`](Self::start), which refuses a store with an invalid
/// quota. Start and stop are idempotent.
pub struct BlobStoreQuotaUsageChecker {
    scheduler: Arc<PeriodicJobService>,
    interval: Duration,
    state: Arc<CheckerState>,
    handle: Mutex<Option<JobHandle>>,
}

impl BlobStoreQuotaUsageChecker {
    pub fn new(
        scheduler: Arc<PeriodicJobService>,
        quota_service: Arc<dyn QuotaService>,
        interval: Duration,
    ) -> Self {
        Self {
            scheduler,
            interval,
            state: Arc::new(CheckerState {
                blob_store: OnceLock::new(),
                quota_service,
                latest: Mutex::new(None),
                metrics: jobs_stats::Metrics::new(),
            }),
            handle: Mutex::new(None),
        }
    }

    pub fn set_blob_store(&self, blob_store: Arc<dyn BlobStore>) -> Result<()> {
        let name = blob_store.name().to_string();
        self.state.blob_store.set(blob_store).map_err(|_| {
            anyhow!(
                "quota checker already has a blob store, can't set {}",
                name
            )
        })
    }

    pub fn start(&self) -> Result<()> {
        let mut handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        if handle.is_some() {
            return Ok(());
        }
        let store = self
            .state
            .blob_store
            .get()
            .ok_or_else(|| anyhow!("quota checker started without a blob store"))?;
        let store_name = store.name().to_string();
        self.state
            .quota_service
            .validate(store.as_ref())
            .map_err(|err| anyhow!("can't check quota of blob store {}: {}", store_name, err))?;

        self.scheduler.start_using();
        let job = Arc::new(QuotaCheckJob {
            state: self.state.clone(),
        });
        match self.scheduler.schedule(job, self.interval) {
            Ok(job_handle) => {
                *handle = Some(job_handle);
                info!(
                    blob_store = %store_name,
                    interval_secs = self.interval.as_secs(),
                    "started quota checker"
                );
                Ok(())
            }
            Err(err) => {
                self.scheduler.stop_using();
                Err(err)
            }
        }
    }

    /// Stops scheduling checks and waits for a check in flight.
    pub async fn stop(&self) {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.cancel_and_wait().await;
            self.scheduler.stop_using();
            debug!("stopped quota checker");
        }
    }

    pub fn is_started(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Runs one check now, outside the schedule.
    pub fn check_now(&self) {
        self.state.check();
    }

    /// Result of the most recent successful check.
    pub fn latest_result(&self) -> Option<BlobStoreQuotaResult> {
        self.state
            .latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use blob_store::{
        BlobStoreError,
        BlobStoreQuotaService,
        BlobStoreResult,
        ObjectBlobStore,
    };
    use bytes::Bytes;
    use data_model::{
        test_objects::tests::{mock_headers, TEST_BLOB_STORE},
        BlobStoreConfiguration,
        QuotaType,
    };
    use state_store::test_state_store::TestStateStore;

    use super::*;

    async fn store_with_usage(
        test_state: &TestStateStore,
        used: usize,
    ) -> Arc<dyn BlobStore> {
        let config = BlobStoreConfiguration::memory(TEST_BLOB_STORE)
            .with_quota(QuotaType::SpaceUsed, 100);
        let store =
            ObjectBlobStore::from_configuration(config, &test_state.state, Duration::from_secs(5))
                .unwrap();
        store.start().await.unwrap();
        if used > 0 {
            store
                .create(Bytes::from(vec![0u8; used]), mock_headers("usage"))
                .await
                .unwrap();
        }
        Arc::new(store)
    }

    fn checker(quota_service: Arc<dyn QuotaService>) -> BlobStoreQuotaUsageChecker {
        BlobStoreQuotaUsageChecker::new(
            Arc::new(PeriodicJobService::new()),
            quota_service,
            DEFAULT_QUOTA_CHECK_INTERVAL,
        )
    }

    #[tokio::test]
    async fn test_reports_violation() -> Result<()> {
        let test_state = TestStateStore::new()?;
        let checker = checker(Arc::new(BlobStoreQuotaService::new()));
        checker.set_blob_store(store_with_usage(&test_state, 101).await)?;

        checker.check_now();
        let result = checker.latest_result().unwrap();
        assert!(result.violation);
        assert_eq!(result.blob_store_name, TEST_BLOB_STORE);
        Ok(())
    }

    #[tokio::test]
    async fn test_no_violation_under_quota() -> Result<()> {
        let test_state = TestStateStore::new()?;
        let checker = checker(Arc::new(BlobStoreQuotaService::new()));
        checker.set_blob_store(store_with_usage(&test_state, 50).await)?;

        checker.check_now();
        assert!(!checker.latest_result().unwrap().violation);
        Ok(())
    }

    #[tokio::test]
    async fn test_set_blob_store_twice_fails() -> Result<()> {
        let test_state = TestStateStore::new()?;
        let checker = checker(Arc::new(BlobStoreQuotaService::new()));
        let store = store_with_usage(&test_state, 0).await;

        checker.set_blob_store(store.clone())?;
        assert!(checker.set_blob_store(store).is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_start_requires_blob_store() {
        let checker = checker(Arc::new(BlobStoreQuotaService::new()));
        assert!(checker.start().is_err());
        assert!(!checker.is_started());
        assert!(!checker.scheduler.is_running());
    }

    /// Fails every other call.
    struct FlakyQuotaService {
        calls: AtomicUsize,
    }

    impl QuotaService for FlakyQuotaService {
        fn check_quota(
            &self,
            store: &dyn BlobStore,
        ) -> BlobStoreResult<Option<BlobStoreQuotaResult>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call % 2 == 0 {
                return Err(std::io::Error::other("usage unavailable").into());
            }
            Ok(Some(BlobStoreQuotaResult {
                violation: false,
                blob_store_name: store.name().to_string(),
                message: "ok".to_string(),
            }))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_check_does_not_stop_schedule() -> Result<()> {
        let test_state = TestStateStore::new()?;
        let quota_service = Arc::new(FlakyQuotaService {
            calls: AtomicUsize::new(0),
        });
        let checker = checker(quota_service.clone());
        checker.set_blob_store(store_with_usage(&test_state, 0).await)?;
        checker.start()?;
        // idempotent
        checker.start()?;

        tokio::time::sleep(DEFAULT_QUOTA_CHECK_INTERVAL * 2 + Duration::from_secs(1)).await;
        assert_eq!(quota_service.calls.load(Ordering::SeqCst), 2);
        // the second tick succeeded after the first failed
        assert!(checker.latest_result().is_some());

        checker.stop().await;
        checker.stop().await;
        assert!(!checker.is_started());
        assert!(!checker.scheduler.is_running());

        tokio::time::sleep(DEFAULT_QUOTA_CHECK_INTERVAL * 2).await;
        assert_eq!(quota_service.calls.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_quota_config_fails_start() -> Result<()> {
        let test_state = TestStateStore::new()?;
        let config = BlobStoreConfiguration::memory(TEST_BLOB_STORE)
            .with_quota(QuotaType::SpaceRemaining, 10);
        let store =
            ObjectBlobStore::from_configuration(config, &test_state.state, Duration::from_secs(5))?;
        store.start().await?;
        let store: Arc<dyn BlobStore> = Arc::new(store);
        assert!(matches!(
            BlobStoreQuotaService::new().check_quota(store.as_ref()),
            Err(BlobStoreError::InvalidConfiguration { .. })
        ));

        let checker = checker(Arc::new(BlobStoreQuotaService::new()));
        checker.set_blob_store(store)?;
        let err = checker.start().unwrap_err();
        assert!(err.to_string().contains("requires capacity_bytes"));
        assert!(!checker.is_started());
        assert!(!checker.scheduler.is_running());

        // a manual check still reports the problem without recording a result
        checker.check_now();
        assert!(checker.latest_result().is_none());
        Ok(())
    }
}
