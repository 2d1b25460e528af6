//! Per-instance heartbeat: liveness, leadership arbitration, and cleanup.

use futures::future::BoxFuture;

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

use crate::{
    entity::ScheduleId,
    repo::ExecutionsRepository,
    timer::{self, TimerHandle},
};

/// Invoked exactly once per passive-to-active transition.
pub(crate) type StartAllJobs = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Keeps one instance visible in the datastore and arbitrates which instance
/// of a schedule name is the active one.
///
/// Every tick refreshes the liveness row, removes state left behind by dead
/// instances, and, while passive, retries the leadership claim. Datastore
/// errors are logged and swallowed so the heartbeat never dies.
pub(crate) struct SchedulePing {
    inner: Arc<PingInner>,
    timer: Mutex<Option<TimerHandle>>,
}

struct PingInner {
    schedule_id: ScheduleId,
    schedule_name: String,
    ping_interval: Duration,
    executions_repo: Arc<dyn ExecutionsRepository>,
    start_all_jobs: StartAllJobs,
    active: AtomicBool,
}

impl SchedulePing {
    pub fn new(
        schedule_id: ScheduleId,
        schedule_name: impl Into<String>,
        ping_interval: Duration,
        executions_repo: Arc<dyn ExecutionsRepository>,
        start_all_jobs: StartAllJobs,
    ) -> Self {
        Self {
            inner: Arc::new(PingInner {
                schedule_id,
                schedule_name: schedule_name.into(),
                ping_interval,
                executions_repo,
                start_all_jobs,
                active: AtomicBool::new(false),
            }),
            timer: Mutex::new(None),
        }
    }

    /// Write the first liveness row, arbitrate once, and install the
    /// heartbeat timer. Idempotent.
    pub async fn start(&self) {
        {
            let timer = self.timer.lock().expect("Couldn't lock SchedulePing timer");
            if timer.is_some() {
                return;
            }
        }

        self.inner.ping_liveness().await;
        PingInner::try_activate(&self.inner).await;

        let inner = Arc::clone(&self.inner);
        let handle = timer::schedule_repeating(
            self.inner.ping_interval,
            self.inner.ping_interval,
            "schedule ping failed",
            move || {
                let inner = Arc::clone(&inner);
                async move {
                    PingInner::tick(&inner).await;
                    Ok(())
                }
            },
        );
        *self.timer.lock().expect("Couldn't lock SchedulePing timer") = Some(handle);
    }

    /// Cancel the heartbeat and delete this instance's liveness row,
    /// best-effort. Idempotent.
    pub async fn stop(&self) {
        {
            let mut timer = self.timer.lock().expect("Couldn't lock SchedulePing timer");
            if let Some(mut handle) = timer.take() {
                handle.stop();
            }
        }
        if let Err(e) = self
            .inner
            .executions_repo
            .delete_one(self.inner.schedule_id)
            .await
        {
            tracing::error!(
                error_type = "internalError",
                schedule_name = %self.inner.schedule_name,
                schedule_id = %self.inner.schedule_id,
                error = %e,
                "failed to delete liveness row"
            );
        }
    }

    /// Whether this instance currently holds the active claim.
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }
}

impl PingInner {
    async fn tick(inner: &Arc<Self>) {
        inner.ping_liveness().await;
        inner.clean_stale_state().await;
        if !inner.active.load(Ordering::SeqCst) {
            Self::try_activate(inner).await;
        }
    }

    async fn ping_liveness(&self) {
        if let Err(e) = self.executions_repo.ping(self.schedule_id).await {
            tracing::error!(
                error_type = "internalError",
                schedule_name = %self.schedule_name,
                schedule_id = %self.schedule_id,
                error = %e,
                "failed to refresh liveness row"
            );
        }
    }

    async fn clean_stale_state(&self) {
        match self.executions_repo.clean(self.ping_interval).await {
            Ok(removed) if removed > 0 => {
                tracing::debug!(
                    schedule_name = %self.schedule_name,
                    schedule_id = %self.schedule_id,
                    removed,
                    "removed execution records of dead instances"
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(
                    error_type = "internalError",
                    schedule_name = %self.schedule_name,
                    schedule_id = %self.schedule_id,
                    error = %e,
                    "failed to clean stale schedule state"
                );
            }
        }
    }

    async fn try_activate(inner: &Arc<Self>) {
        let claimed = inner.arbitrate().await;
        match claimed {
            Ok(true) => {
                // One invocation per passive-to-active transition, even when
                // the claim is re-affirmed on later ticks.
                if !inner.active.swap(true, Ordering::SeqCst) {
                    tracing::debug!(
                        schedule_name = %inner.schedule_name,
                        schedule_id = %inner.schedule_id,
                        "took over as active schedule"
                    );
                    (inner.start_all_jobs)().await;
                }
            }
            Ok(false) => {}
            Err(e) => {
                tracing::error!(
                    error_type = "internalError",
                    schedule_name = %inner.schedule_name,
                    schedule_id = %inner.schedule_id,
                    error = %e,
                    "leadership arbitration failed"
                );
            }
        }
    }

    async fn arbitrate(&self) -> Result<bool, crate::error::RepositoryError> {
        if !self
            .executions_repo
            .is_active_schedule(&self.schedule_name, self.schedule_id, self.ping_interval)
            .await?
        {
            return Ok(false);
        }
        self.executions_repo
            .set_active_schedule(&self.schedule_name, self.schedule_id, self.ping_interval)
            .await
    }
}
