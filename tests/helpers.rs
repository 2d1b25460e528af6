//! Shared helper functions for integration tests.
#![allow(dead_code)]

use momo::{JobHandler, handler_fn};

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration;

pub fn setup_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Handler that counts its invocations and succeeds immediately.
pub fn counting_handler(counter: Arc<AtomicUsize>) -> Arc<dyn JobHandler> {
    handler_fn(move || {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
    })
}

/// Handler that records launch and completion separately, sleeping in
/// between to simulate slow work.
pub fn slow_handler(
    launched: Arc<AtomicUsize>,
    completed: Arc<AtomicUsize>,
    duration: Duration,
) -> Arc<dyn JobHandler> {
    handler_fn(move || {
        let launched = Arc::clone(&launched);
        let completed = Arc::clone(&completed);
        async move {
            launched.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(duration).await;
            completed.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
    })
}

/// Handler that returns a fixed payload.
pub fn payload_handler(payload: &'static str) -> Arc<dyn JobHandler> {
    handler_fn(move || async move { Ok(Some(payload.to_string())) })
}
