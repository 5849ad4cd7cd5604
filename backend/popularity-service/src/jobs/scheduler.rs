//! Interval triggers for the recompute jobs
//!
//! - fixed interval via `tokio::time::interval` (first tick fires immediately)
//! - every tick goes through `PopularityJob::execute`, so its outcome is cached
//! - a failed run never stops the loop; consecutive failures add backoff
//! - an overlapping trigger is skipped, not queued
//! - stops on the shutdown broadcast

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use super::PopularityJob;
use crate::error::PopularityError;
use crate::models::EntityClass;

pub async fn run_schedule_loop(
    job: Arc<PopularityJob>,
    class: EntityClass,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut interval_timer = interval(period);
    interval_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut consecutive_failures = 0u32;

    info!(
        class = %class,
        interval_secs = period.as_secs(),
        "Starting popularity schedule"
    );

    loop {
        tokio::select! {
            _ = interval_timer.tick() => {
                match job.execute(class).await {
                    Ok(outcome) if outcome.success => {
                        if consecutive_failures > 0 {
                            info!(
                                class = %class,
                                recovered_after = consecutive_failures,
                                "Popularity schedule recovered after failures"
                            );
                            consecutive_failures = 0;
                        }
                    }
                    Err(PopularityError::AlreadyRunning(_)) => {
                        warn!(class = %class, "Previous run still active, skipping tick");
                    }
                    failed => {
                        let reason = match failed {
                            Ok(outcome) => outcome.message,
                            Err(e) => e.to_string(),
                        };
                        consecutive_failures += 1;
                        error!(
                            class = %class,
                            error = %reason,
                            consecutive_failures = consecutive_failures,
                            "Scheduled recompute failed, will retry on next interval"
                        );

                        if consecutive_failures >= 3 {
                            let backoff_secs = 2u64.pow(consecutive_failures.min(5));
                            info!(
                                class = %class,
                                backoff_secs = backoff_secs,
                                "Applying backoff due to consecutive failures"
                            );
                            tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                        }
                    }
                }
            }
            _ = shutdown.recv() => {
                info!(class = %class, "Received shutdown signal, stopping schedule");
                break;
            }
        }
    }

    info!(class = %class, "Popularity schedule stopped");
}

/// One loop per entity class, all tied to the same shutdown channel.
pub fn spawn_schedules(
    job: Arc<PopularityJob>,
    period: Duration,
    shutdown: &broadcast::Sender<()>,
) -> Vec<JoinHandle<()>> {
    EntityClass::ALL
        .into_iter()
        .map(|class| {
            let job = job.clone();
            let shutdown_rx = shutdown.subscribe();
            tokio::spawn(run_schedule_loop(job, class, period, shutdown_rx))
        })
        .collect()
}
