//! Timer primitives that survive failing callbacks.
//!
//! Both primitives spawn one tokio task and hand back a [`TimerHandle`] that
//! aborts it. A callback returning an error is logged with the caller's
//! message and never terminates the loop; a repeating callback that overruns
//! its period causes the intervening ticks to be skipped rather than stacked.

use tokio::{task::JoinHandle, time::MissedTickBehavior};

use std::{future::Future, time::Duration};

use crate::error::MomoError;

/// Owns a spawned timer task. Dropping the handle cancels the timer.
pub(crate) struct TimerHandle(Option<JoinHandle<()>>);

impl TimerHandle {
    pub(crate) fn new(inner: JoinHandle<()>) -> Self {
        Self(Some(inner))
    }

    /// Synchronously prevent any future fire. Idempotent; does not wait for an
    /// in-flight callback.
    pub(crate) fn stop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Fire `callback` once after `delay`. A stop that races the fire drops it.
#[allow(dead_code)]
pub(crate) fn schedule_once<F, Fut>(
    delay: Duration,
    error_message: &'static str,
    callback: F,
) -> TimerHandle
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), MomoError>> + Send,
{
    TimerHandle::new(tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if let Err(e) = callback().await {
            tracing::error!(error = %e, "{error_message}");
        }
    }))
}

/// Fire `callback` first after `initial_delay`, then every `interval`.
///
/// The callback is awaited in place, so ticks arriving while it still runs
/// are dropped; the cadence stays aligned to the original grid (no drift, no
/// catch-up burst).
pub(crate) fn schedule_repeating<F, Fut>(
    interval: Duration,
    initial_delay: Duration,
    error_message: &'static str,
    mut callback: F,
) -> TimerHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), MomoError>> + Send,
{
    TimerHandle::new(tokio::spawn(async move {
        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + initial_delay, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(e) = callback().await {
                tracing::error!(error = %e, "{error_message}");
            }
        }
    }))
}
