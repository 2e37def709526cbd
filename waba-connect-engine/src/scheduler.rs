//! Poll scheduling
//!
//! [`PollScheduler`] drives the periodic refresh cycle. Ticks are spawned,
//! never awaited inline, so a slow fetch does not delay or serialize
//! subsequent cycles; ordering of results is enforced downstream by the
//! engine's sequence-number guard. `stop` cancels the timer only: a tick
//! already in flight runs to completion and its result becomes inert.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Fixed-interval refresh driver with an explicit start/stop lifecycle.
pub struct PollScheduler {
    interval: Duration,
    handle: Option<JoinHandle<()>>,
}

impl PollScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            handle: None,
        }
    }

    /// Start ticking. The first tick fires immediately (initial load).
    /// Calling `start` while already running is a no-op.
    pub fn start<F, Fut>(&mut self, tick: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.is_running() {
            debug!("poll scheduler already running");
            return;
        }

        let interval = self.interval;
        self.handle = Some(tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                timer.tick().await;
                // Fire and forget: overlapping refreshes are tolerated.
                tokio::spawn(tick());
            }
        }));
        debug!(interval_ms = interval.as_millis() as u64, "poll scheduler started");
    }

    /// Cancel the timer. Idempotent; in-flight ticks are not cancelled.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            debug!("poll scheduler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
