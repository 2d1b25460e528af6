//! The invocation contract for user job logic.

use async_trait::async_trait;

use std::{future::Future, sync::Arc};

/// Result returned by a job handler: an optional payload persisted as the
/// last execution's `handler_result`.
pub type HandlerResult = Result<Option<String>, Box<dyn std::error::Error>>;

#[async_trait]
/// Implemented by job handlers that perform the actual work.
///
/// Handlers run with no timeout; long-running work is responsible for its own
/// deadlines. A returned error (or a panic) is captured into the job's last
/// result, it never propagates to the scheduler loop.
pub trait JobHandler: Send + Sync + 'static {
    async fn run(&self) -> HandlerResult;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn run(&self) -> HandlerResult {
        (self.0)().await
    }
}

/// Wrap an async closure into a [`JobHandler`].
///
/// # Examples
///
/// ```
/// use momo::handler_fn;
///
/// let handler = handler_fn(|| async { Ok(Some("done".to_string())) });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn JobHandler>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(FnHandler(f))
}
