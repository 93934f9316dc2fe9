//! Background job scheduler.
//!
//! Initialises a [`JobScheduler`] at server startup and registers the
//! recurring stale-edge sweep.

use std::sync::Arc;

use tgnet_engine::AnalysisEngine;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

/// Builds and starts the background job scheduler.
///
/// Returns the running [`JobScheduler`] handle, which must be kept alive for
/// the lifetime of the process. Dropping it shuts down all scheduled jobs.
///
/// # Errors
///
/// Returns [`JobSchedulerError`] if the scheduler cannot be initialised,
/// `prune_schedule` is not a valid cron expression, or the scheduler fails
/// to start.
pub async fn build_scheduler(
    engine: Arc<AnalysisEngine>,
    prune_schedule: &str,
) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;
    register_prune_job(&scheduler, engine, prune_schedule).await?;
    scheduler.start().await?;
    Ok(scheduler)
}

/// Register the stale-connection sweep on `schedule` (six-field cron, UTC).
async fn register_prune_job(
    scheduler: &JobScheduler,
    engine: Arc<AnalysisEngine>,
    schedule: &str,
) -> Result<(), JobSchedulerError> {
    let job = Job::new_async(schedule, move |_uuid, _lock| {
        let engine = Arc::clone(&engine);
        Box::pin(async move {
            tracing::info!("scheduler: starting stale connection sweep");
            match engine.prune_stale().await {
                Ok(removed) => {
                    tracing::info!(removed, "scheduler: stale connection sweep complete");
                }
                Err(e) => {
                    tracing::error!(error = %e, "scheduler: stale connection sweep failed");
                }
            }
        })
    })?;

    scheduler.add(job).await?;
    tracing::info!(schedule, "scheduler: registered stale connection sweep");
    Ok(())
}
