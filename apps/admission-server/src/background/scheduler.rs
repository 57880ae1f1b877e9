//! Cron-style job scheduler using tokio-cron-scheduler.

use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use turnstile_admission::TtlSweeper;

use crate::config::SweepConfig;

/// Cron job scheduler wrapper.
pub struct Scheduler {
    inner: JobScheduler,
}

impl Scheduler {
    pub async fn new() -> Result<Self, JobSchedulerError> {
        let inner = JobScheduler::new().await?;
        Ok(Self { inner })
    }

    /// Add a cron job. Schedules take six fields, seconds first.
    pub async fn add_cron<F, Fut>(&self, schedule: &str, task: F) -> Result<(), JobSchedulerError>
    where
        F: Fn() -> Fut + Send + Sync + Clone + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let job = Job::new_async(schedule, move |_uuid, _lock| {
            let task = task.clone();
            Box::pin(async move {
                task().await;
            })
        })?;

        let id = self.inner.add(job).await?;
        tracing::info!(schedule = %schedule, job_id = %id, "Cron job registered");
        Ok(())
    }

    pub async fn start(&self) -> Result<(), JobSchedulerError> {
        self.inner.start().await?;
        tracing::info!("Scheduler started");
        Ok(())
    }
}

/// Schedule the TTL sweep. Returns the running scheduler, or `None` when
/// sweeping is disabled.
pub async fn start_sweeper(
    config: &SweepConfig,
    sweeper: Arc<TtlSweeper>,
) -> Result<Option<Scheduler>, JobSchedulerError> {
    if !config.enabled {
        tracing::info!("TTL sweep disabled");
        return Ok(None);
    }

    let scheduler = Scheduler::new().await?;
    scheduler
        .add_cron(&config.schedule, move || {
            let sweeper = sweeper.clone();
            async move {
                if let Err(e) = sweeper.sweep().await {
                    tracing::warn!(error = %e, "TTL sweep failed, will retry on next run");
                }
            }
        })
        .await?;
    scheduler.start().await?;

    Ok(Some(scheduler))
}
