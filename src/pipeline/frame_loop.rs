//! Fixed-period live frame loop.
//!
//! Polls a [`FrameSource`] on its own timer and submits whatever it gets to
//! the shared [`Pipeline`]. The timer is independent of the cooldown gate;
//! the gate decides which of the submitted frames actually run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::orchestrator::{Pipeline, PipelineStats};
use super::source::FrameSource;

pub struct FrameLoop {
    pipeline: Arc<Pipeline>,
    interval: Duration,
    cancel_token: CancellationToken,
    active: Arc<AtomicBool>,
}

impl FrameLoop {
    pub fn new(pipeline: Arc<Pipeline>, interval: Duration, cancel_token: CancellationToken) -> Self {
        Self {
            pipeline,
            interval,
            cancel_token,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share a flag that is true while the loop runs.
    pub fn with_active_flag(mut self, active: Arc<AtomicBool>) -> Self {
        self.active = active;
        self
    }

    /// Run until cancelled, then shut the source down. A run already in
    /// flight when the token fires is completed first.
    ///
    /// Each tick submits at most one frame and waits for its run to finish
    /// before the next poll, so a slow run delays ticks instead of stacking.
    pub async fn run<S: FrameSource + ?Sized>(self, source: &mut S) -> PipelineStats {
        info!(
            "📹 Polling {} every {:?}",
            source.source_name(),
            self.interval
        );
        self.active.store(true, Ordering::Relaxed);

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut frames_submitted = 0u64;

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("[FrameLoop] Shutdown signal received");
                    break;
                }
                _ = ticker.tick() => {}
            }

            let Some(frame) = source.poll().await else {
                continue;
            };
            frames_submitted += 1;
            debug!(bytes = frame.len(), "[FrameLoop] Submitting frame");

            // Not raced against the token: a run in flight finishes (every
            // call in it is bounded by a timeout) before shutdown proceeds.
            self.pipeline.submit(frame).await;
        }

        self.active.store(false, Ordering::Relaxed);
        source.shutdown().await;

        let stats = self.pipeline.stats();
        info!(
            "[FrameLoop] Stopped after {} live frames. {}",
            frames_submitted, stats
        );
        stats
    }
}
