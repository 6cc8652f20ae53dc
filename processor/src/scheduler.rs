use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::{
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Work run on every tick of a schedule.
#[async_trait]
pub trait PeriodicJob: Send + Sync {
    fn name(&self) -> String;
    async fn run(&self) -> Result<()>;
}

#[derive(Default)]
struct Usage {
    users: usize,
    token: Option<CancellationToken>,
}

/// Shared runner for periodic jobs.
///
/// Components call [`start_using`](Self::start_using) before scheduling and
/// [`stop_using`](Self::stop_using) when done; when the last user leaves,
/// every job still scheduled is cancelled.
#[derive(Default)]
pub struct PeriodicJobService {
    usage: Mutex<Usage>,
}

impl PeriodicJobService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_using(&self) {
        let mut usage = self.usage.lock().unwrap_or_else(PoisonError::into_inner);
        if usage.users == 0 {
            usage.token = Some(CancellationToken::new());
            info!("periodic job service started");
        }
        usage.users += 1;
    }

    pub fn stop_using(&self) {
        let mut usage = self.usage.lock().unwrap_or_else(PoisonError::into_inner);
        if usage.users == 0 {
            warn!("stop_using called on an unused periodic job service");
            return;
        }
        usage.users -= 1;
        if usage.users == 0 {
            if let Some(token) = usage.token.take() {
                token.cancel();
            }
            info!("periodic job service stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.usage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .token
            .is_some()
    }

    /// Runs `job` every `interval`, first one interval from now.
    pub fn schedule(&self, job: Arc<dyn PeriodicJob>, interval: Duration) -> Result<JobHandle> {
        if interval.is_zero() {
            return Err(anyhow!("job {} needs a positive interval", job.name()));
        }
        let token = self
            .usage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .token
            .as_ref()
            .map(CancellationToken::child_token)
            .ok_or_else(|| anyhow!("periodic job service is not in use"))?;

        let name = job.name();
        info!(job = %name, interval_secs = interval.as_secs(), "scheduled periodic job");
        let task = tokio::spawn(run_job(job, interval, token.clone()));
        Ok(JobHandle { name, token, task })
    }
}

async fn run_job(job: Arc<dyn PeriodicJob>, interval: Duration, token: CancellationToken) {
    let name = job.name();
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        // a tick in flight runs to completion even if cancelled meanwhile
        if let Err(err) = job.run().await {
            error!(job = %name, "periodic job failed: {:?}", err);
        }
    }
    debug!(job = %name, "periodic job cancelled");
}

/// Handle to a scheduled job.
pub struct JobHandle {
    name: String,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl JobHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stops future ticks; a tick already running completes.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancels and waits for a tick in flight to complete.
    pub async fn cancel_and_wait(self) {
        self.cancel();
        if let Err(err) = self.task.await {
            error!(job = %self.name, "periodic job task failed: {:?}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct CountingJob {
        runs: AtomicUsize,
        fail: bool,
        run_time: Duration,
    }

    impl CountingJob {
        fn new(fail: bool, run_time: Duration) -> Arc<Self> {
            Arc::new(Self {
                runs: AtomicUsize::new(0),
                fail,
                run_time,
            })
        }

        fn runs(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PeriodicJob for CountingJob {
        fn name(&self) -> String {
            "counting".to_string()
        }

        async fn run(&self) -> Result<()> {
            if !self.run_time.is_zero() {
                time::sleep(self.run_time).await;
            }
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(anyhow!("tick failed"));
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_every_interval() -> Result<()> {
        let service = PeriodicJobService::new();
        service.start_using();
        let job = CountingJob::new(false, Duration::ZERO);
        let handle = service.schedule(job.clone(), Duration::from_secs(10))?;

        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(job.runs(), 0);
        time::sleep(Duration::from_secs(31)).await;
        assert_eq!(job.runs(), 3);

        handle.cancel_and_wait().await;
        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(job.runs(), 3);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_job_keeps_running() -> Result<()> {
        let service = PeriodicJobService::new();
        service.start_using();
        let job = CountingJob::new(true, Duration::ZERO);
        let _handle = service.schedule(job.clone(), Duration::from_secs(1))?;

        time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(job.runs(), 3);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_lets_tick_in_flight_finish() -> Result<()> {
        let service = PeriodicJobService::new();
        service.start_using();
        let job = CountingJob::new(false, Duration::from_secs(5));
        let handle = service.schedule(job.clone(), Duration::from_secs(1))?;

        // the first tick is now sleeping inside run()
        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(job.runs(), 0);
        handle.cancel_and_wait().await;
        assert_eq!(job.runs(), 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_reference_counting() -> Result<()> {
        let service = PeriodicJobService::new();
        let job = CountingJob::new(false, Duration::ZERO);
        assert!(service.schedule(job.clone(), Duration::from_secs(1)).is_err());

        service.start_using();
        service.start_using();
        let handle = service.schedule(job.clone(), Duration::from_secs(1))?;

        service.stop_using();
        assert!(service.is_running());
        assert!(!handle.is_cancelled());

        service.stop_using();
        assert!(!service.is_running());
        assert!(handle.is_cancelled());
        handle.cancel_and_wait().await;

        // extra stop is tolerated
        service.stop_using();
        assert!(service.schedule(job, Duration::ZERO).is_err());
        Ok(())
    }
}
