//! User-facing job definitions and their validation.

use tracing::instrument;

use std::{sync::Arc, time::Duration};

use crate::{
    delay,
    entity::{JobEntity, Schedule},
    error::MomoError,
    handler::JobHandler,
};

#[derive(Clone)]
/// A validated job definition together with its handler.
///
/// Construct with [`MomoJob::builder`]; a value of this type has already
/// passed validation and canonicalizes losslessly into its stored form.
///
/// # Examples
///
/// ```
/// use momo::{MomoJob, handler_fn};
/// use std::time::Duration;
///
/// let job = MomoJob::builder()
///     .name("reconcile")
///     .interval("5 minutes")
///     .first_run_after(Duration::from_secs(1))
///     .handler(handler_fn(|| async { Ok(None) }))
///     .build()
///     .unwrap();
/// assert_eq!(job.concurrency, 1);
/// assert_eq!(job.max_running, 0);
/// ```
pub struct MomoJob {
    pub name: String,
    pub schedule: Schedule,
    pub concurrency: u32,
    pub max_running: u32,
    handler: Arc<dyn JobHandler>,
}

impl MomoJob {
    pub fn builder() -> MomoJobBuilder {
        MomoJobBuilder::default()
    }

    pub(crate) fn handler(&self) -> Arc<dyn JobHandler> {
        Arc::clone(&self.handler)
    }

    /// The stored form of this job. `execution_info` starts empty; only the
    /// executor ever writes it.
    pub fn to_entity(&self) -> JobEntity {
        JobEntity {
            name: self.name.clone(),
            schedule: self.schedule.clone(),
            concurrency: self.concurrency,
            max_running: self.max_running,
            execution_info: None,
        }
    }
}

impl std::fmt::Debug for MomoJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MomoJob")
            .field("name", &self.name)
            .field("schedule", &self.schedule)
            .field("concurrency", &self.concurrency)
            .field("max_running", &self.max_running)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
/// Builder for [`MomoJob`]. Validation happens in [`build`](Self::build).
pub struct MomoJobBuilder {
    name: Option<String>,
    interval: Option<String>,
    first_run_after: Option<Duration>,
    cron_schedule: Option<String>,
    concurrency: Option<u32>,
    max_running: Option<u32>,
    handler: Option<Arc<dyn JobHandler>>,
}

impl MomoJobBuilder {
    /// Unique name of the job. Required.
    pub fn name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = Some(name.into());
        self
    }

    /// Run on a fixed interval given as a human-readable duration, e.g.
    /// `"30 seconds"`. Mutually exclusive with [`cron_schedule`](Self::cron_schedule).
    pub fn interval(&mut self, interval: impl Into<String>) -> &mut Self {
        self.interval = Some(interval.into());
        self
    }

    /// Delay before the first run of an interval job. Defaults to zero.
    pub fn first_run_after(&mut self, first_run_after: Duration) -> &mut Self {
        self.first_run_after = Some(first_run_after);
        self
    }

    /// Run on a cron expression. Mutually exclusive with
    /// [`interval`](Self::interval).
    pub fn cron_schedule(&mut self, cron_schedule: impl Into<String>) -> &mut Self {
        self.cron_schedule = Some(cron_schedule.into());
        self
    }

    /// Attempts launched per tick on the active instance. Defaults to 1.
    pub fn concurrency(&mut self, concurrency: u32) -> &mut Self {
        self.concurrency = Some(concurrency);
        self
    }

    /// Global cap of simultaneous executions across all instances. Defaults
    /// to 0, which disables the cap.
    pub fn max_running(&mut self, max_running: u32) -> &mut Self {
        self.max_running = Some(max_running);
        self
    }

    /// The job's handler. Required.
    pub fn handler(&mut self, handler: Arc<dyn JobHandler>) -> &mut Self {
        self.handler = Some(handler);
        self
    }

    /// Validate and construct the [`MomoJob`].
    #[instrument(name = "momo.build_job", skip(self), fields(job_name = self.name.as_deref()), err)]
    pub fn build(&mut self) -> Result<MomoJob, MomoError> {
        let name = match self.name.as_deref() {
            Some(name) if !name.trim().is_empty() => name.to_string(),
            _ => {
                return Err(MomoError::InvalidJobDefinition(
                    "name is required and must not be empty".to_string(),
                ));
            }
        };

        let schedule = match (self.interval.clone(), self.cron_schedule.clone()) {
            (Some(interval), None) => {
                delay::parse_interval(&interval)?;
                Schedule::Interval {
                    interval,
                    first_run_after: self.first_run_after.unwrap_or(Duration::ZERO),
                }
            }
            (None, Some(cron_schedule)) => {
                delay::parse_cron(&cron_schedule)?;
                if self.first_run_after.is_some() {
                    return Err(MomoError::InvalidJobDefinition(
                        "first_run_after only applies to interval schedules".to_string(),
                    ));
                }
                Schedule::Cron { cron_schedule }
            }
            (Some(_), Some(_)) => {
                return Err(MomoError::InvalidJobDefinition(
                    "interval and cron_schedule are mutually exclusive".to_string(),
                ));
            }
            (None, None) => {
                return Err(MomoError::InvalidJobDefinition(
                    "either interval or cron_schedule is required".to_string(),
                ));
            }
        };

        let concurrency = self.concurrency.unwrap_or(1);
        if concurrency == 0 {
            return Err(MomoError::InvalidJobDefinition(
                "concurrency must be at least 1".to_string(),
            ));
        }
        let max_running = self.max_running.unwrap_or(0);
        if max_running > 0 && concurrency > max_running {
            tracing::warn!(
                job_name = %name,
                concurrency,
                max_running,
                "concurrency exceeds max_running, ticks will never launch the full fan-out"
            );
        }

        let handler = self.handler.clone().ok_or_else(|| {
            MomoError::InvalidJobDefinition("handler is required".to_string())
        })?;

        Ok(MomoJob {
            name,
            schedule,
            concurrency,
            max_running,
            handler,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;

    fn noop_handler() -> Arc<dyn JobHandler> {
        handler_fn(|| async { Ok(None) })
    }

    #[test]
    fn builds_interval_job_with_defaults() {
        let job = MomoJob::builder()
            .name("defaults")
            .interval("2 minutes")
            .handler(noop_handler())
            .build()
            .unwrap();
        assert_eq!(job.concurrency, 1);
        assert_eq!(job.max_running, 0);
        assert_eq!(
            job.schedule,
            Schedule::Interval {
                interval: "2 minutes".to_string(),
                first_run_after: Duration::ZERO,
            }
        );
    }

    #[test]
    fn entity_canonicalization_is_lossless() {
        let job = MomoJob::builder()
            .name("canonical")
            .cron_schedule("0 9 * * 1-5")
            .concurrency(2)
            .max_running(5)
            .handler(noop_handler())
            .build()
            .unwrap();
        let entity = job.to_entity();
        assert_eq!(entity.name, job.name);
        assert_eq!(entity.schedule, job.schedule);
        assert_eq!(entity.concurrency, job.concurrency);
        assert_eq!(entity.max_running, job.max_running);
        assert_eq!(entity.execution_info, None);
    }

    #[test]
    fn rejects_missing_or_empty_name() {
        let err = MomoJob::builder()
            .interval("1 minute")
            .handler(noop_handler())
            .build()
            .unwrap_err();
        assert!(matches!(err, MomoError::InvalidJobDefinition(_)));

        let err = MomoJob::builder()
            .name("   ")
            .interval("1 minute")
            .handler(noop_handler())
            .build()
            .unwrap_err();
        assert!(matches!(err, MomoError::InvalidJobDefinition(_)));
    }

    #[test]
    fn rejects_ambiguous_or_missing_schedule() {
        let err = MomoJob::builder()
            .name("both")
            .interval("1 minute")
            .cron_schedule("* * * * *")
            .handler(noop_handler())
            .build()
            .unwrap_err();
        assert!(matches!(err, MomoError::InvalidJobDefinition(_)));

        let err = MomoJob::builder()
            .name("neither")
            .handler(noop_handler())
            .build()
            .unwrap_err();
        assert!(matches!(err, MomoError::InvalidJobDefinition(_)));
    }

    #[test]
    fn rejects_unparsable_schedules() {
        let err = MomoJob::builder()
            .name("bad-interval")
            .interval("soonish")
            .handler(noop_handler())
            .build()
            .unwrap_err();
        assert!(matches!(err, MomoError::NonParsableInterval(_)));

        let err = MomoJob::builder()
            .name("bad-cron")
            .cron_schedule("every tuesday")
            .handler(noop_handler())
            .build()
            .unwrap_err();
        assert!(matches!(err, MomoError::NonParsableCronSchedule(_)));
    }

    #[test]
    fn rejects_zero_concurrency_and_missing_handler() {
        let err = MomoJob::builder()
            .name("zero")
            .interval("1 minute")
            .concurrency(0)
            .handler(noop_handler())
            .build()
            .unwrap_err();
        assert!(matches!(err, MomoError::InvalidJobDefinition(_)));

        let err = MomoJob::builder()
            .name("no-handler")
            .interval("1 minute")
            .build()
            .unwrap_err();
        assert!(matches!(err, MomoError::InvalidJobDefinition(_)));
    }

    #[test]
    fn accepts_concurrency_above_max_running_with_warning() {
        let job = MomoJob::builder()
            .name("warned")
            .interval("1 minute")
            .concurrency(5)
            .max_running(2)
            .handler(noop_handler())
            .build()
            .unwrap();
        assert_eq!(job.concurrency, 5);
        assert_eq!(job.max_running, 2);
    }
}
