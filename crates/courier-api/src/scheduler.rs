//! Periodic replay and retention jobs.
//!
//! Each job runs on its own tokio interval; a tick that falls due while the
//! previous run is still going is skipped rather than queued. The first tick
//! fires immediately, so unprocessed events left by a previous process are
//! replayed at startup.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use courier_pipeline::application::pipeline::EventPipeline;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Job periods. A zero period disables that job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Period of `replay_unprocessed_events`.
    pub replay_interval: Duration,
    /// Period of `cleanup_old_events`.
    pub cleanup_interval: Duration,
    /// Age in days passed to `cleanup_old_events`.
    pub retention_days: i64,
}

/// Running background jobs.
#[derive(Debug)]
pub struct Scheduler {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawns the replay and cleanup jobs against `pipeline`.
    #[must_use]
    pub fn start(pipeline: Arc<EventPipeline>, config: SchedulerConfig) -> Self {
        let token = CancellationToken::new();
        let mut tasks = Vec::new();

        if config.replay_interval.is_zero() {
            info!("replay job disabled");
        } else {
            let pipeline = Arc::clone(&pipeline);
            tasks.push(spawn_periodic(token.clone(), config.replay_interval, move || {
                let pipeline = Arc::clone(&pipeline);
                async move {
                    if let Err(err) = pipeline.store().replay_unprocessed_events().await {
                        error!(error = %err, "scheduled replay failed");
                    }
                }
            }));
        }

        if config.cleanup_interval.is_zero() {
            info!("cleanup job disabled");
        } else {
            let retention_days = config.retention_days;
            tasks.push(spawn_periodic(token.clone(), config.cleanup_interval, move || {
                let pipeline = Arc::clone(&pipeline);
                async move {
                    if let Err(err) = pipeline.store().cleanup_old_events(retention_days).await {
                        error!(error = %err, "scheduled cleanup failed");
                    }
                }
            }));
        }

        info!(
            replay_interval_secs = config.replay_interval.as_secs(),
            cleanup_interval_secs = config.cleanup_interval.as_secs(),
            retention_days = config.retention_days,
            "scheduler started"
        );
        Self { token, tasks }
    }

    /// Stops both jobs, waiting for a run in progress to finish.
    pub async fn shutdown(self) {
        self.token.cancel();
        for task in self.tasks {
            if let Err(err) = task.await {
                error!(error = %err, "scheduler job ended abnormally");
            }
        }
        info!("scheduler stopped");
    }
}

fn spawn_periodic<F, Fut>(token: CancellationToken, interval: Duration, mut f: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => f().await,
            }
        }
    })
}
