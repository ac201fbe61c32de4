use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::IngestError;
use crate::ingest::{Ingester, RetentionStats, RunStats};

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// A periodic background job.
#[async_trait]
pub trait SchedulerJob: Send + Sync {
    fn name(&self) -> &'static str;

    fn interval(&self) -> Duration;

    /// Wait before the first run.
    fn initial_delay(&self) -> Duration {
        Duration::ZERO
    }

    async fn execute(&self) -> anyhow::Result<()>;
}

/// Runs a full ingestion pass every `interval`.
pub struct IngestionJob {
    ingester: Arc<Ingester>,
    interval: Duration,
    startup_delay: Duration,
}

impl IngestionJob {
    pub fn new(ingester: Arc<Ingester>, interval: Duration, startup_delay: Duration) -> Self {
        Self {
            ingester,
            interval,
            startup_delay,
        }
    }
}

#[async_trait]
impl SchedulerJob for IngestionJob {
    fn name(&self) -> &'static str {
        "ingestion"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn initial_delay(&self) -> Duration {
        self.startup_delay
    }

    async fn execute(&self) -> anyhow::Result<()> {
        match self.ingester.ingest_all().await {
            Ok(_) => Ok(()),
            Err(IngestError::RunInProgress) => {
                info!("Scheduled ingestion skipped, a manual run is active");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Daily retention sweep at a fixed UTC hour.
pub struct RetentionJob {
    ingester: Arc<Ingester>,
    hour: u32,
}

impl RetentionJob {
    pub fn new(ingester: Arc<Ingester>, hour: u32) -> Self {
        Self { ingester, hour }
    }
}

#[async_trait]
impl SchedulerJob for RetentionJob {
    fn name(&self) -> &'static str {
        "retention"
    }

    fn interval(&self) -> Duration {
        DAY
    }

    fn initial_delay(&self) -> Duration {
        delay_until_hour(Utc::now(), self.hour)
    }

    async fn execute(&self) -> anyhow::Result<()> {
        self.ingester.retention_sweep().await?;
        Ok(())
    }
}

/// Time from `now` until the next occurrence of `hour:00` UTC.
pub fn delay_until_hour(now: DateTime<Utc>, hour: u32) -> Duration {
    let Some(today) = now.date_naive().and_hms_opt(hour, 0, 0) else {
        return Duration::ZERO;
    };

    let mut next = today.and_utc();
    if next <= now {
        next += chrono::Duration::days(1);
    }

    (next - now).to_std().unwrap_or_default()
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    /// Whether the job loops have been started.
    pub is_running: bool,
    /// Names of the active jobs; empty while stopped.
    pub jobs: Vec<&'static str>,
    pub ingestion_in_progress: bool,
}

/// Owns the job loops and exposes manual triggers.
///
/// Each job runs in its own task, so a slow ingestion never delays the
/// retention sweep.
pub struct Scheduler {
    ingester: Arc<Ingester>,
    jobs: Vec<Arc<dyn SchedulerJob>>,
    cancel_tx: broadcast::Sender<()>,
    /// `Some` while started.
    handles: Mutex<Option<Vec<JoinHandle<()>>>>,
}

impl Scheduler {
    pub fn new(ingester: Arc<Ingester>) -> Self {
        let (cancel_tx, _) = broadcast::channel(1);
        Self {
            ingester,
            jobs: Vec::new(),
            cancel_tx,
            handles: Mutex::new(None),
        }
    }

    /// Scheduler with the ingestion and retention jobs from `config`.
    pub fn from_config(ingester: Arc<Ingester>, config: &Config) -> Self {
        let ingestion = IngestionJob::new(
            ingester.clone(),
            config.refresh_period(),
            Duration::from_secs(config.startup_delay),
        );
        let retention = RetentionJob::new(ingester.clone(), config.cleanup_hour);

        Self::new(ingester).with_job(ingestion).with_job(retention)
    }

    pub fn with_job<J: SchedulerJob + 'static>(mut self, job: J) -> Self {
        self.jobs.push(Arc::new(job));
        self
    }

    /// Spawn one loop per job. Returns immediately; a second call is a no-op.
    pub async fn start(&self) {
        let mut started = self.handles.lock().await;
        if started.is_some() {
            warn!("Scheduler is already running");
            return;
        }

        let mut handles = Vec::with_capacity(self.jobs.len());
        for job in &self.jobs {
            info!(
                "Scheduling job '{}' every {:?} (first run in {:?})",
                job.name(),
                job.interval(),
                job.initial_delay()
            );
            let job = Arc::clone(job);
            let cancel_rx = self.cancel_tx.subscribe();
            handles.push(tokio::spawn(Self::run_job_loop(job, cancel_rx)));
        }
        *started = Some(handles);
        info!("Scheduler started with {} jobs", self.jobs.len());
    }

    async fn run_job_loop(job: Arc<dyn SchedulerJob>, mut cancel_rx: broadcast::Receiver<()>) {
        let name = job.name();
        let mut timer = tokio::time::interval_at(Instant::now() + job.initial_delay(), job.interval());
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            // Only the wait is cancellable; a running job finishes first.
            tokio::select! {
                _ = cancel_rx.recv() => {
                    info!("Job '{}' stopped", name);
                    break;
                }
                _ = timer.tick() => {}
            }

            match job.execute().await {
                Ok(()) => debug!("Job '{}' completed successfully", name),
                Err(e) => error!("Job '{}' failed: {:#}", name, e),
            }
        }
    }

    /// Signal every loop and wait for them to exit.
    pub async fn stop(&self) {
        let Some(handles) = self.handles.lock().await.take() else {
            debug!("Scheduler is not running");
            return;
        };

        let _ = self.cancel_tx.send(());
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Scheduler task panicked: {}", e);
            }
        }
        info!("Scheduler stopped");
    }

    pub async fn status(&self) -> SchedulerStatus {
        let started = self.handles.lock().await.is_some();
        SchedulerStatus {
            is_running: started,
            jobs: if started {
                self.jobs.iter().map(|job| job.name()).collect()
            } else {
                Vec::new()
            },
            ingestion_in_progress: self.ingester.is_running(),
        }
    }

    pub async fn trigger_ingestion_now(&self) -> Result<RunStats, IngestError> {
        info!("Manual ingestion triggered");
        self.ingester.ingest_all().await
    }

    pub async fn trigger_cleanup_now(&self) -> anyhow::Result<RetentionStats> {
        info!("Manual retention sweep triggered");
        self.ingester.retention_sweep().await
    }
}
