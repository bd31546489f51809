use crate::orchestrator::{SyncOrchestrator, SyncOutcome};
use crate::resources::pause;
use chrono::{Local, NaiveTime};
use mindfeed_core::{CoreError, ScheduleConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Runs syncs at fixed local times of day, one at a time.
pub struct BackgroundService {
    orchestrator: Arc<SyncOrchestrator>,
    times: Vec<NaiveTime>,
    retry_base: Duration,
    max_retries: u32,
    running: Mutex<()>,
    shutdown: CancellationToken,
}

impl BackgroundService {
    pub fn new(
        orchestrator: Arc<SyncOrchestrator>,
        schedule: &ScheduleConfig,
    ) -> Result<Self, CoreError> {
        Ok(Self {
            orchestrator,
            times: schedule.parsed_times()?,
            retry_base: Duration::from_secs(schedule.retry_base_minutes * 60),
            max_retries: schedule.max_retries,
            running: Mutex::new(()),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Runs a sync unless one is already in progress, in which case `None` is returned.
    pub async fn run_now(&self) -> Option<SyncOutcome> {
        let _guard = match self.running.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                info!("Sync already running, skipping request");
                return None;
            }
        };
        let cancel = self.shutdown.child_token();
        Some(self.orchestrator.run(&cancel).await)
    }

    /// Loops until `stop` is called.
    pub async fn start(&self) -> Result<(), CoreError> {
        if self.times.is_empty() {
            warn!("No sync times configured, running once a day from now");
        }
        loop {
            let delay = next_run_delay(Local::now().time(), &self.times);
            info!("Next sync in {} minutes", delay.as_secs() / 60);
            if pause(delay, &self.shutdown).await.is_err() {
                break;
            }
            if !self.run_with_retries().await {
                break;
            }
        }
        info!("Background service stopped");
        Ok(())
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// False once the service is shutting down.
    async fn run_with_retries(&self) -> bool {
        let mut attempt = 0;
        loop {
            match self.run_now().await {
                Some(SyncOutcome::Retry { reason }) if attempt < self.max_retries => {
                    let delay = backoff_delay(attempt, self.retry_base);
                    warn!(
                        "Sync failed ({}), retry {}/{} in {:?}",
                        reason,
                        attempt + 1,
                        self.max_retries,
                        delay
                    );
                    if pause(delay, &self.shutdown).await.is_err() {
                        return false;
                    }
                    attempt += 1;
                }
                Some(SyncOutcome::Failure(reason)) => {
                    warn!("Sync ended: {:?}", reason);
                    return !self.shutdown.is_cancelled();
                }
                _ => return !self.shutdown.is_cancelled(),
            }
        }
    }
}

/// Time from `now` until the next of `times`, wrapping past midnight.
pub fn next_run_delay(now: NaiveTime, times: &[NaiveTime]) -> Duration {
    times
        .iter()
        .map(|&at| {
            let diff = at - now;
            let diff = if diff <= chrono::Duration::zero() {
                diff + chrono::Duration::days(1)
            } else {
                diff
            };
            diff.to_std().unwrap_or(DAY)
        })
        .min()
        .unwrap_or(DAY)
}

/// `base * 2^attempt`.
pub fn backoff_delay(attempt: u32, base: Duration) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}
