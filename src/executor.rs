//! Runs single execution attempts of a job handler.

use chrono::Utc;
use futures::FutureExt;
use tracing::{Span, instrument};

use std::{
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use crate::{
    entity::{ExecutionInfo, JobEntity, JobPatch, JobResult, ScheduleId},
    error::MomoError,
    handler::JobHandler,
    repo::{ExecutionsRepository, JobRepository},
};

/// Executes one attempt of a job: admission against the global running count,
/// handler invocation, and result bookkeeping.
pub(crate) struct JobExecutor {
    handler: Arc<dyn JobHandler>,
    schedule_id: ScheduleId,
    job_repo: Arc<dyn JobRepository>,
    executions_repo: Arc<dyn ExecutionsRepository>,
    stopped: AtomicBool,
}

impl JobExecutor {
    pub fn new(
        handler: Arc<dyn JobHandler>,
        schedule_id: ScheduleId,
        job_repo: Arc<dyn JobRepository>,
        executions_repo: Arc<dyn ExecutionsRepository>,
    ) -> Self {
        Self {
            handler,
            schedule_id,
            job_repo,
            executions_repo,
            stopped: AtomicBool::new(false),
        }
    }

    /// Prevent new attempts from starting. In-flight attempts run to
    /// completion.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Allow attempts again after a [`stop`](Self::stop).
    pub fn resume(&self) {
        self.stopped.store(false, Ordering::SeqCst);
    }

    #[instrument(
        name = "momo.execute",
        skip(self, job),
        fields(job_name = %job.name, schedule_id = %self.schedule_id, status),
        err
    )]
    pub async fn execute(&self, job: &JobEntity) -> Result<JobResult, MomoError> {
        let span = Span::current();
        if self.stopped.load(Ordering::SeqCst) {
            span.record("status", "stopped");
            return Ok(JobResult::stopped());
        }

        let admission = self
            .executions_repo
            .add_execution(self.schedule_id, &job.name, job.max_running)
            .await?;
        if !admission.added {
            span.record("status", "maxRunningReached");
            tracing::debug!(
                job_name = %job.name,
                running = admission.running,
                max_running = job.max_running,
                "skipping execution, global running cap reached"
            );
            return Ok(JobResult::max_running_reached());
        }

        let result = self.run_attempt(job).await;

        // The running record must go away no matter how the attempt ended.
        if let Err(e) = self
            .executions_repo
            .remove_execution(self.schedule_id, &job.name)
            .await
        {
            tracing::error!(
                error_type = "executeJob",
                job_name = %job.name,
                error = %e,
                "failed to remove running execution record"
            );
        }

        let result = result?;
        span.record("status", tracing::field::debug(result.status));
        Ok(result)
    }

    async fn run_attempt(&self, job: &JobEntity) -> Result<JobResult, MomoError> {
        let started_at = Utc::now();
        self.job_repo
            .update_job(
                &job.name,
                JobPatch::execution_info(ExecutionInfo::started(started_at)),
            )
            .await?;

        let result = match AssertUnwindSafe(self.handler.run()).catch_unwind().await {
            Ok(Ok(handler_result)) => JobResult::finished(handler_result),
            Ok(Err(e)) => {
                let error = e.to_string();
                tracing::error!(
                    error_type = "executeJob",
                    job_name = %job.name,
                    error = %error,
                    "job handler returned an error"
                );
                JobResult::failed(error)
            }
            Err(panic) => {
                let message = if let Some(s) = panic.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic payload".to_string()
                };
                tracing::error!(
                    error_type = "executeJob",
                    job_name = %job.name,
                    panic_message = %message,
                    "job handler panicked"
                );
                JobResult::failed(format!("Handler panicked: {message}"))
            }
        };

        self.job_repo
            .update_job(
                &job.name,
                JobPatch::execution_info(ExecutionInfo {
                    last_started: started_at,
                    last_finished: Some(Utc::now()),
                    last_result: Some(result.clone()),
                }),
            )
            .await?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        entity::{ExecutionStatus, Schedule},
        handler::handler_fn,
        repo::MemoryRepository,
    };

    use std::time::Duration;

    fn job(name: &str, max_running: u32) -> JobEntity {
        JobEntity {
            name: name.to_string(),
            schedule: Schedule::Interval {
                interval: "1 minute".to_string(),
                first_run_after: Duration::ZERO,
            },
            concurrency: 1,
            max_running,
            execution_info: None,
        }
    }

    async fn seeded_repo(job: &JobEntity) -> Arc<MemoryRepository> {
        let repo = Arc::new(MemoryRepository::new());
        JobRepository::save(repo.as_ref(), job.clone()).await.unwrap();
        repo
    }

    fn executor(repo: &Arc<MemoryRepository>, handler: Arc<dyn JobHandler>) -> JobExecutor {
        JobExecutor::new(
            handler,
            ScheduleId::new(),
            Arc::clone(repo) as Arc<dyn JobRepository>,
            Arc::clone(repo) as Arc<dyn ExecutionsRepository>,
        )
    }

    #[tokio::test]
    async fn records_finished_result() {
        let job = job("ok", 0);
        let repo = seeded_repo(&job).await;
        let executor = executor(&repo, handler_fn(|| async { Ok(Some("42".to_string())) }));

        let result = executor.execute(&job).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Finished);
        assert_eq!(result.handler_result.as_deref(), Some("42"));

        let info = JobRepository::check(repo.as_ref(), "ok").await.unwrap().unwrap();
        assert!(info.last_finished.is_some());
        assert_eq!(info.last_result, Some(result));
        assert_eq!(repo.count_running_executions("ok").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn records_failed_result_on_handler_error() {
        let job = job("fails", 0);
        let repo = seeded_repo(&job).await;
        let executor = executor(&repo, handler_fn(|| async { Err("boom".into()) }));

        let result = executor.execute(&job).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("boom"));
        assert_eq!(repo.count_running_executions("fails").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn captures_handler_panics() {
        let job = job("panics", 0);
        let repo = seeded_repo(&job).await;
        let executor = executor(
            &repo,
            handler_fn(|| async {
                panic!("handler exploded");
                #[allow(unreachable_code)]
                Ok(None)
            }),
        );

        let result = executor.execute(&job).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Failed);
        assert!(result.error.unwrap().contains("handler exploded"));
        assert_eq!(repo.count_running_executions("panics").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn refuses_admission_at_the_cap() {
        let job = job("capped", 1);
        let repo = seeded_repo(&job).await;
        let other_instance = ScheduleId::new();
        repo.add_execution(other_instance, "capped", 1).await.unwrap();

        let executor = executor(&repo, handler_fn(|| async { Ok(None) }));
        let result = executor.execute(&job).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::MaxRunningReached);
        // Nothing was started, so nothing was recorded.
        assert!(JobRepository::check(repo.as_ref(), "capped").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stopped_executor_refuses_new_attempts() {
        let job = job("stoppable", 0);
        let repo = seeded_repo(&job).await;
        let executor = executor(&repo, handler_fn(|| async { Ok(None) }));

        executor.stop();
        let result = executor.execute(&job).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Stopped);

        executor.resume();
        let result = executor.execute(&job).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Finished);
    }
}
