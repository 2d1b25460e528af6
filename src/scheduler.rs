//! Per-job scheduling: one timer, one budget, many execution attempts.

use chrono::Utc;
use tracing::instrument;

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU64, Ordering},
};

use crate::{
    delay,
    entity::{JobDescription, JobResult, Schedule, ScheduleId, SchedulerStatus},
    error::MomoError,
    executor::JobExecutor,
    handler::JobHandler,
    repo::{ExecutionsRepository, JobRepository},
    timer::{self, TimerHandle},
};

/// Owns the timer of one defined job.
///
/// Each tick reloads the definition, asks the datastore how many executions
/// are already running across all instances, and launches the remaining
/// budget as concurrent attempts. Errors inside a tick are counted and
/// logged; the timer itself survives them.
pub struct JobScheduler {
    inner: Arc<SchedulerInner>,
    state: Mutex<SchedulerState>,
}

struct SchedulerInner {
    job_name: String,
    schedule_id: ScheduleId,
    executor: JobExecutor,
    job_repo: Arc<dyn JobRepository>,
    executions_repo: Arc<dyn ExecutionsRepository>,
    unexpected_errors: AtomicU64,
}

#[derive(Default)]
struct SchedulerState {
    timer: Option<TimerHandle>,
    /// The schedule the current timer was installed from; cleared on stop.
    schedule: Option<Schedule>,
}

impl JobScheduler {
    pub fn new(
        job_name: impl Into<String>,
        handler: Arc<dyn JobHandler>,
        schedule_id: ScheduleId,
        job_repo: Arc<dyn JobRepository>,
        executions_repo: Arc<dyn ExecutionsRepository>,
    ) -> Self {
        let job_name = job_name.into();
        let executor = JobExecutor::new(
            handler,
            schedule_id,
            Arc::clone(&job_repo),
            Arc::clone(&executions_repo),
        );
        Self {
            inner: Arc::new(SchedulerInner {
                job_name,
                schedule_id,
                executor,
                job_repo,
                executions_repo,
                unexpected_errors: AtomicU64::new(0),
            }),
            state: Mutex::new(SchedulerState::default()),
        }
    }

    pub fn job_name(&self) -> &str {
        &self.inner.job_name
    }

    /// Install the timer for this job.
    ///
    /// Idempotent: an already started scheduler is stopped first, so there is
    /// never more than one active timer. A missing definition is logged and
    /// skipped; a stored schedule that no longer parses is a definition-time
    /// contract violation and surfaces as an error.
    #[instrument(name = "momo.schedule_job", skip(self), fields(job_name = %self.inner.job_name), err)]
    pub async fn start(&self) -> Result<(), MomoError> {
        self.stop().await?;
        self.inner.executor.resume();

        let Some(job) = self.inner.job_repo.find_one(&self.inner.job_name).await? else {
            tracing::error!(
                error_type = "scheduleJob",
                job_name = %self.inner.job_name,
                "job not found, not scheduling"
            );
            return Ok(());
        };

        let timer = match &job.schedule {
            Schedule::Interval {
                interval,
                first_run_after,
            } => {
                let period = delay::parse_interval(interval)?;
                let last_started = job.execution_info.as_ref().map(|info| info.last_started);
                let initial_delay =
                    delay::interval_delay(period, *first_run_after, last_started, Utc::now());
                tracing::debug!(
                    job_name = %job.name,
                    interval_ms = period.as_millis() as u64,
                    initial_delay_ms = initial_delay.as_millis() as u64,
                    "scheduling interval job"
                );
                let inner = Arc::clone(&self.inner);
                timer::schedule_repeating(period, initial_delay, "job tick failed", move || {
                    let inner = Arc::clone(&inner);
                    async move {
                        SchedulerInner::tick(&inner).await;
                        Ok(())
                    }
                })
            }
            Schedule::Cron { cron_schedule } => {
                let schedule = delay::parse_cron(cron_schedule)?;
                tracing::debug!(job_name = %job.name, cron_schedule = %cron_schedule, "scheduling cron job");
                // Cron instants are irregular, so each fire arms the next
                // one-shot instead of using the repeating primitive. The
                // cursor is the fired instant itself, so one instant fires at
                // most once regardless of clock jitter.
                let inner = Arc::clone(&self.inner);
                TimerHandle::new(tokio::spawn(async move {
                    let mut after = Utc::now();
                    loop {
                        let Some(target) = delay::next_cron_fire(&schedule, after) else {
                            tracing::debug!(
                                job_name = %inner.job_name,
                                "cron schedule yields no further fire times"
                            );
                            break;
                        };
                        tokio::time::sleep(delay::until(target, Utc::now())).await;
                        SchedulerInner::tick(&inner).await;
                        after = target;
                    }
                }))
            }
        };

        let mut state = self.state.lock().expect("Couldn't lock JobScheduler state");
        state.timer = Some(timer);
        state.schedule = Some(job.schedule);
        Ok(())
    }

    /// Run one tick now: count running executions and launch the remaining
    /// budget. Failures are routed into the unexpected-error counter.
    pub async fn execute_concurrently(&self) {
        SchedulerInner::tick(&self.inner).await;
    }

    /// Run a single attempt synchronously, bypassing the tick budget. The
    /// executor's own admission check still applies.
    pub async fn execute_once(&self) -> Result<JobResult, MomoError> {
        match self.inner.job_repo.find_one(&self.inner.job_name).await? {
            Some(job) => self.inner.executor.execute(&job).await,
            None => Ok(JobResult::not_found()),
        }
    }

    /// Cancel the timer, block new executor attempts, and drop this
    /// instance's running records for the job. Idempotent.
    #[instrument(name = "momo.stop_job", skip(self), fields(job_name = %self.inner.job_name), err)]
    pub async fn stop(&self) -> Result<(), MomoError> {
        {
            let mut state = self.state.lock().expect("Couldn't lock JobScheduler state");
            if let Some(mut timer) = state.timer.take() {
                timer.stop();
            }
            state.schedule = None;
        }
        self.inner.executor.stop();
        self.inner
            .executions_repo
            .remove_job(self.inner.schedule_id, &self.inner.job_name)
            .await?;
        Ok(())
    }

    /// The persisted description plus, when started, the live
    /// [`SchedulerStatus`].
    pub async fn get_job_description(&self) -> Result<Option<JobDescription>, MomoError> {
        let Some(job) = self.inner.job_repo.find_one(&self.inner.job_name).await? else {
            return Ok(None);
        };
        let active_schedule = {
            let state = self.state.lock().expect("Couldn't lock JobScheduler state");
            state.schedule.clone()
        };
        let scheduler_status = match active_schedule {
            Some(schedule) => Some(SchedulerStatus {
                schedule,
                running: self
                    .inner
                    .executions_repo
                    .count_running_executions(&job.name)
                    .await?,
            }),
            None => None,
        };
        Ok(Some(JobDescription::from_entity(job, scheduler_status)))
    }

    /// Errors caught inside ticks since this scheduler was created.
    pub fn unexpected_error_count(&self) -> u64 {
        self.inner.unexpected_errors.load(Ordering::SeqCst)
    }

    /// Whether a timer is currently installed.
    pub fn started(&self) -> bool {
        self.state
            .lock()
            .expect("Couldn't lock JobScheduler state")
            .timer
            .is_some()
    }
}

impl SchedulerInner {
    /// One fire of the timer. Never propagates an error to the timer loop.
    async fn tick(inner: &Arc<Self>) {
        if let Err(e) = Self::dispatch(inner).await {
            inner.handle_unexpected_error(e);
        }
    }

    async fn dispatch(inner: &Arc<Self>) -> Result<(), MomoError> {
        // The definition is reloaded on every tick so concurrency changes
        // take effect without a restart.
        let Some(job) = inner.job_repo.find_one(&inner.job_name).await? else {
            tracing::error!(
                error_type = "executeJob",
                job_name = %inner.job_name,
                "job not found, skipping tick"
            );
            return Ok(());
        };

        let running = inner
            .executions_repo
            .count_running_executions(&job.name)
            .await?;
        let num_to_execute = if job.max_running == 0 {
            job.concurrency
        } else {
            job.concurrency.min(job.max_running.saturating_sub(running))
        };
        tracing::debug!(
            job_name = %job.name,
            running,
            num_to_execute,
            "launching executions"
        );

        for _ in 0..num_to_execute {
            let inner = Arc::clone(inner);
            let job = job.clone();
            tokio::spawn(async move {
                if let Err(e) = inner.executor.execute(&job).await {
                    inner.handle_unexpected_error(e);
                }
            });
        }
        Ok(())
    }

    fn handle_unexpected_error(&self, error: MomoError) {
        self.unexpected_errors.fetch_add(1, Ordering::SeqCst);
        tracing::error!(
            error_type = "executeJob",
            job_name = %self.job_name,
            schedule_id = %self.schedule_id,
            error = %error,
            "unexpected error while executing job"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        entity::{ExecutionStatus, JobEntity},
        handler::handler_fn,
        repo::MemoryRepository,
    };

    use std::time::Duration;

    fn scheduler_for(repo: &Arc<MemoryRepository>, name: &str) -> JobScheduler {
        JobScheduler::new(
            name,
            handler_fn(|| async { Ok(None) }),
            ScheduleId::new(),
            Arc::clone(repo) as Arc<dyn JobRepository>,
            Arc::clone(repo) as Arc<dyn ExecutionsRepository>,
        )
    }

    #[tokio::test]
    async fn start_without_definition_installs_no_timer() {
        let repo = Arc::new(MemoryRepository::new());
        let scheduler = scheduler_for(&repo, "ghost");
        scheduler.start().await.unwrap();
        assert!(!scheduler.started());
    }

    #[tokio::test]
    async fn start_rejects_unparsable_stored_interval() {
        let repo = Arc::new(MemoryRepository::new());
        JobRepository::save(
            repo.as_ref(),
            JobEntity {
                name: "broken".to_string(),
                schedule: Schedule::Interval {
                    interval: "not a duration".to_string(),
                    first_run_after: Duration::ZERO,
                },
                concurrency: 1,
                max_running: 0,
                execution_info: None,
            },
        )
        .await
        .unwrap();

        let scheduler = scheduler_for(&repo, "broken");
        let err = scheduler.start().await.unwrap_err();
        assert!(matches!(err, MomoError::NonParsableInterval(_)));
        assert!(!scheduler.started());
    }

    #[tokio::test]
    async fn start_rejects_unparsable_stored_cron() {
        let repo = Arc::new(MemoryRepository::new());
        JobRepository::save(
            repo.as_ref(),
            JobEntity {
                name: "broken-cron".to_string(),
                schedule: Schedule::Cron {
                    cron_schedule: "99 * * * *".to_string(),
                },
                concurrency: 1,
                max_running: 0,
                execution_info: None,
            },
        )
        .await
        .unwrap();

        let scheduler = scheduler_for(&repo, "broken-cron");
        let err = scheduler.start().await.unwrap_err();
        assert!(matches!(err, MomoError::NonParsableCronSchedule(_)));
        assert!(!scheduler.started());
    }

    #[tokio::test]
    async fn execute_once_without_definition_reports_not_found() {
        let repo = Arc::new(MemoryRepository::new());
        let scheduler = scheduler_for(&repo, "missing");
        let result = scheduler.execute_once().await.unwrap();
        assert_eq!(result.status, ExecutionStatus::NotFound);
    }

    #[tokio::test]
    async fn missing_job_on_tick_is_skipped_not_counted() {
        let repo = Arc::new(MemoryRepository::new());
        let scheduler = scheduler_for(&repo, "missing");
        scheduler.execute_concurrently().await;
        assert_eq!(scheduler.unexpected_error_count(), 0);
    }
}
