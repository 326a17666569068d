//! Resettable send-side keep-alive timer.
//!
//! The timer fires after `interval` of send inactivity. Every send resets it,
//! so keep-alive units only go out on an otherwise idle connection.

use std::future::Future;
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

pub(crate) struct KeepAliveTimer {
    interval: Duration,
    reset: Notify,
}

impl KeepAliveTimer {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval,
            reset: Notify::new(),
        }
    }

    /// Restart the countdown from now
    pub(crate) fn reset(&self) {
        self.reset.notify_one();
    }

    pub(crate) fn interval(&self) -> Duration {
        self.interval
    }

    /// Call `on_elapsed` every time the interval passes without a reset,
    /// until `shutdown` is cancelled.
    pub(crate) async fn run<F, Fut>(&self, shutdown: CancellationToken, mut on_elapsed: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = self.reset.notified() => continue,
                _ = tokio::time::sleep(self.interval) => on_elapsed().await,
            }
        }
    }
}
