//! Background jobs: expiry sweep, view rebuild, recording upload retry.

use std::sync::Arc;

use tokio::sync::Notify;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{error, info};

use super::Engine;
use super::recording::{RecordingFetcher, RecordingSink};
use crate::error::Result;
use crate::model::Domain;

/// One loop driving the periodic jobs until shutdown. A failing job is
/// logged and retried on its next tick.
pub struct BackgroundJobs {
    engine: Arc<Engine>,
    fetcher: Arc<dyn RecordingFetcher>,
    sink: Arc<dyn RecordingSink>,
    shutdown: Arc<Notify>,
}

impl Clone for BackgroundJobs {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            fetcher: Arc::clone(&self.fetcher),
            sink: Arc::clone(&self.sink),
            shutdown: Arc::clone(&self.shutdown),
        }
    }
}

impl BackgroundJobs {
    pub fn new(
        engine: Arc<Engine>,
        fetcher: Arc<dyn RecordingFetcher>,
        sink: Arc<dyn RecordingSink>,
    ) -> Self {
        Self {
            engine,
            fetcher,
            sink,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Signal the loop to stop.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Run until [`shutdown`](Self::shutdown) is called.
    pub async fn run(&self) -> Result<()> {
        let policy = self.engine.policy();
        let mut sweep = ticker(policy.sweep_interval());
        let mut view = ticker(policy.view_refresh_interval());
        let mut uploads = ticker(policy.upload_retry_interval());

        info!("background jobs started");

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("background jobs shutting down");
                    return Ok(());
                }
                _ = sweep.tick() => {
                    if let Err(e) = self.engine.reclaim_expired().await {
                        error!("expiry sweep failed: {e}");
                    }
                }
                _ = view.tick() => {
                    for domain in [Domain::Review, Domain::Call] {
                        if let Err(e) = self.engine.rebuild_view(domain, None).await {
                            error!(%domain, "view rebuild failed: {e}");
                        }
                    }
                }
                _ = uploads.tick() => {
                    if let Err(e) = self
                        .engine
                        .process_recording_uploads(self.fetcher.as_ref(), self.sink.as_ref())
                        .await
                    {
                        error!("recording upload pass failed: {e}");
                    }
                }
            }
        }
    }
}

fn ticker(period: std::time::Duration) -> Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}
