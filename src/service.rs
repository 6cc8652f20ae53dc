use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{Context, Result};
use blob_store::{BlobStoreQuotaService, QuotaService};
use metrics::init_provider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use processor::{
    BlobStoreQuotaUsageChecker,
    JobHandle,
    PeriodicJobService,
    ReconciliationJob,
    SoftDeleteReconciler,
};
use state_store::StateStore;
use tokio::{
    self,
    signal,
    sync::{watch, Mutex},
};
use tracing::{error, info};

use crate::{config::ServerConfig, manager::BlobStoreManager};

pub struct Service {
    pub config: ServerConfig,
    pub shutdown_tx: watch::Sender<()>,
    pub shutdown_rx: watch::Receiver<()>,
    pub state: Arc<StateStore>,
    pub manager: Arc<BlobStoreManager>,
    pub scheduler: Arc<PeriodicJobService>,
    pub reconciler: Arc<SoftDeleteReconciler>,
    pub quota_service: Arc<dyn QuotaService>,
    quota_checkers: Mutex<HashMap<String, Arc<BlobStoreQuotaUsageChecker>>>,
    reconciliation_jobs: Mutex<HashMap<String, JobHandle>>,
    jobs_started: AtomicBool,
}

impl Service {
    pub async fn new(config: ServerConfig) -> Result<Self> {
        config.validate().context("invalid server config")?;
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let state = StateStore::new(config.state_store_path.parse()?)
            .context("error initializing state store")?;
        let reconciler = Arc::new(SoftDeleteReconciler::new());
        let manager = Arc::new(BlobStoreManager::new(
            state.clone(),
            reconciler.clone(),
            config.io_timeout(),
        ));
        manager
            .start_all(&config.blob_stores)
            .await
            .context("error starting blob stores")?;

        Ok(Self {
            config,
            shutdown_tx,
            shutdown_rx,
            state,
            manager,
            scheduler: Arc::new(PeriodicJobService::new()),
            reconciler,
            quota_service: Arc::new(BlobStoreQuotaService::new()),
            quota_checkers: Mutex::new(HashMap::new()),
            reconciliation_jobs: Mutex::new(HashMap::new()),
            jobs_started: AtomicBool::new(false),
        })
    }

    /// Schedules reconciliation of every leaf store and a quota checker for
    /// every store with a quota.
    pub async fn start_jobs(&self) -> Result<()> {
        if self.jobs_started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.scheduler.start_using();

        let mut jobs = self.reconciliation_jobs.lock().await;
        for (store, index) in self.manager.leaf_stores() {
            let retention = self.config.retention_for(store.configuration());
            let name = store.name().to_string();
            let job = Arc::new(ReconciliationJob::new(
                self.reconciler.clone(),
                store,
                index,
                retention,
            ));
            jobs.insert(
                name,
                self.scheduler
                    .schedule(job, self.config.reconciliation_interval())?,
            );
        }

        let mut checkers = self.quota_checkers.lock().await;
        for store in self.manager.stores() {
            if store.configuration().attributes.quota.is_none() {
                continue;
            }
            let checker = Arc::new(BlobStoreQuotaUsageChecker::new(
                self.scheduler.clone(),
                self.quota_service.clone(),
                self.config.quota_check_interval(),
            ));
            checker.set_blob_store(store.clone())?;
            checker.start()?;
            checkers.insert(store.name().to_string(), checker);
        }
        info!(
            reconciliation_jobs = jobs.len(),
            quota_checkers = checkers.len(),
            "started background jobs"
        );
        Ok(())
    }

    pub async fn quota_checker(&self, name: &str) -> Option<Arc<BlobStoreQuotaUsageChecker>> {
        self.quota_checkers.lock().await.get(name).cloned()
    }

    pub async fn has_reconciliation_job(&self, name: &str) -> bool {
        self.reconciliation_jobs.lock().await.contains_key(name)
    }

    /// Decommissions a store at runtime. Its quota checker and reconciliation
    /// job are stopped, waiting for any run in flight, before the store is
    /// stopped and its soft-delete index cleared.
    pub async fn remove_store(&self, name: &str) -> Result<()> {
        self.manager.ensure_removable(name)?;
        let checker = self.quota_checkers.lock().await.remove(name);
        if let Some(checker) = checker {
            checker.stop().await;
        }
        let job = self.reconciliation_jobs.lock().await.remove(name);
        if let Some(job) = job {
            job.cancel_and_wait().await;
        }
        self.manager.remove(name).await?;
        info!(blob_store = name, "decommissioned blob store");
        Ok(())
    }

    /// Runs until a shutdown signal, then stops everything.
    pub async fn start(&self) -> Result<()> {
        let meter_provider = init_provider(
            self.config.telemetry.enable_metrics,
            self.config.telemetry.endpoint.as_ref(),
            Duration::from_secs(self.config.telemetry.metrics_interval),
            Some(&self.config.instance_id()),
            env!("CARGO_PKG_VERSION"),
        )?;

        if let Err(err) = self.start_jobs().await {
            self.shutdown().await;
            flush_metrics(meter_provider);
            return Err(err);
        }

        let shutdown_tx = self.shutdown_tx.clone();
        tokio::spawn(async move {
            shutdown_signal(shutdown_tx).await;
        });
        let mut shutdown_rx = self.shutdown_rx.clone();
        if shutdown_rx.changed().await.is_err() {
            error!("shutdown channel closed");
        }
        info!("graceful shutdown signal received, shutting down server gracefully");

        self.shutdown().await;
        flush_metrics(meter_provider);
        Ok(())
    }

    /// Stops background jobs, waiting for any in flight, then the stores.
    pub async fn shutdown(&self) {
        for (_, checker) in self.quota_checkers.lock().await.drain() {
            checker.stop().await;
        }
        let jobs: Vec<JobHandle> = self
            .reconciliation_jobs
            .lock()
            .await
            .drain()
            .map(|(_, job)| job)
            .collect();
        for job in jobs {
            job.cancel_and_wait().await;
        }
        if self.jobs_started.swap(false, Ordering::SeqCst) {
            self.scheduler.stop_using();
        }
        self.manager.stop_all().await;
        info!("service stopped");
    }
}

fn flush_metrics(meter_provider: Option<SdkMeterProvider>) {
    let Some(provider) = meter_provider else {
        return;
    };
    if let Err(err) = provider.force_flush() {
        error!("Error flushing metrics: {:?}", err);
    }
    if let Err(err) = provider.shutdown() {
        error!("Error shutting down meter provider: {:?}", err);
    }
}

async fn shutdown_signal(shutdown_tx: watch::Sender<()>) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {:?}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!("failed to install signal handler: {:?}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
        },
        _ = terminate => {
        },
    }
    if shutdown_tx.send(()).is_err() {
        error!("no shutdown listeners");
    }
    info!("signal received, shutting down server gracefully");
}
