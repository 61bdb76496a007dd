//! Cooldown Gate - at most one admitted pipeline run per interval
//!
//! Every frame, live or uploaded, asks the same gate. Rejected frames are
//! dropped on the floor; nothing is queued for later.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Source of "now" for the gate. Injected so tests can drive time by hand.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

/// Monotonic runtime clock. Follows tokio's paused clock under `test-util`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Shared admission timer.
///
/// `last_admitted` is the only state shared between concurrent submissions.
/// Compare and update happen under one lock, so a burst of callers inside a
/// single window sees exactly one admission.
pub struct CooldownGate {
    interval: Duration,
    last_admitted: Mutex<Option<Instant>>,
    clock: Arc<dyn Clock>,
}

impl CooldownGate {
    pub fn new(interval: Duration) -> Self {
        Self::with_clock(interval, Arc::new(SystemClock))
    }

    pub fn with_clock(interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            interval,
            last_admitted: Mutex::new(None),
            clock,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Admit using the gate's own clock.
    pub fn admit(&self) -> bool {
        self.try_admit(self.clock.now())
    }

    /// Admit if at least `interval` has passed since the last admission.
    ///
    /// A rejected call leaves the gate untouched. A `now` earlier than the
    /// last admission counts as zero elapsed time.
    pub fn try_admit(&self, now: Instant) -> bool {
        let mut last = self.last_admitted.lock().unwrap_or_else(|e| e.into_inner());
        match *last {
            Some(prev) if now.saturating_duration_since(prev) < self.interval => {
                debug!(
                    remaining_ms = (self.interval - now.saturating_duration_since(prev)).as_millis(),
                    "Frame dropped by cooldown"
                );
                false
            }
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    /// Time left before the next frame can be admitted; zero when clear.
    pub fn remaining(&self) -> Duration {
        let last = self.last_admitted.lock().unwrap_or_else(|e| e.into_inner());
        match *last {
            Some(prev) => self
                .interval
                .saturating_sub(self.clock.now().saturating_duration_since(prev)),
            None => Duration::ZERO,
        }
    }
}
