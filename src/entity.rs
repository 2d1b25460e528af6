//! Core job entities persisted through the repository contracts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use std::time::Duration;

use uuid::Uuid;

#[derive(Clone, Copy, Eq, Hash, PartialEq, Debug, Serialize, Deserialize)]
#[serde(transparent)]
/// Identifier of one scheduler instance, random per process.
///
/// All running-execution records and the schedule liveness row written by an
/// instance are keyed by its `ScheduleId`, so peers can attribute state to a
/// live or dead instance.
pub struct ScheduleId(Uuid);

impl ScheduleId {
    /// Generate a fresh identifier for this process.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ScheduleId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ScheduleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[serde_with::serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
/// When a job fires: either on a fixed interval or on a cron expression.
///
/// Exactly one variant is stored per job; the discriminator travels with the
/// persisted document.
pub enum Schedule {
    #[serde(rename_all = "camelCase")]
    Interval {
        /// Human-readable duration, e.g. `"5 minutes"`. Parsed at definition
        /// time; a stored value is guaranteed parsable.
        interval: String,
        /// Delay between a scheduler's `start` and the first fire.
        #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
        first_run_after: Duration,
    },
    #[serde(rename_all = "camelCase")]
    Cron {
        /// Cron expression, e.g. `"0 9 * * 1-5"`. Five-field expressions are
        /// interpreted with seconds pinned to `0`.
        cron_schedule: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Non-exceptional outcome of a single execution attempt.
pub enum ExecutionStatus {
    /// The handler ran and returned.
    Finished,
    /// The handler returned an error or panicked.
    Failed,
    /// Admission was refused because the global running cap was reached.
    MaxRunningReached,
    /// The job definition was missing when the attempt started.
    NotFound,
    /// The executor had been stopped before the attempt started.
    Stopped,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Discriminated result of one execution attempt.
pub struct JobResult {
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handler_result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobResult {
    pub fn finished(handler_result: Option<String>) -> Self {
        Self {
            status: ExecutionStatus::Finished,
            handler_result,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            handler_result: None,
            error: Some(error.into()),
        }
    }

    pub fn max_running_reached() -> Self {
        Self {
            status: ExecutionStatus::MaxRunningReached,
            handler_result: None,
            error: None,
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: ExecutionStatus::NotFound,
            handler_result: None,
            error: None,
        }
    }

    pub fn stopped() -> Self {
        Self {
            status: ExecutionStatus::Stopped,
            handler_result: None,
            error: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Bookkeeping of the most recent execution attempt.
///
/// Written exclusively by the executor; definition updates must leave it
/// untouched.
pub struct ExecutionInfo {
    pub last_started: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_finished: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_result: Option<JobResult>,
}

impl ExecutionInfo {
    pub(crate) fn started(last_started: DateTime<Utc>) -> Self {
        Self {
            last_started,
            last_finished: None,
            last_result: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// The persisted form of a job definition.
pub struct JobEntity {
    /// Unique identifier of the job.
    pub name: String,
    #[serde(flatten)]
    pub schedule: Schedule,
    /// How many attempts one tick launches on this instance.
    pub concurrency: u32,
    /// Global cap of simultaneously running executions across all instances.
    /// `0` disables the cap.
    pub max_running: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_info: Option<ExecutionInfo>,
}

#[derive(Clone, Debug, Default)]
/// Partial update applied by [`JobRepository::update_job`](crate::repo::JobRepository::update_job).
///
/// Fields left `None` keep their stored value. `max_running` in particular
/// distinguishes "unset" from an explicit `0`.
pub struct JobPatch {
    pub schedule: Option<Schedule>,
    pub concurrency: Option<u32>,
    pub max_running: Option<u32>,
    pub execution_info: Option<ExecutionInfo>,
}

impl JobPatch {
    pub(crate) fn execution_info(info: ExecutionInfo) -> Self {
        Self {
            execution_info: Some(info),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Runtime state reported for a started job.
pub struct SchedulerStatus {
    /// The schedule the running timer was installed from.
    #[serde(flatten)]
    pub schedule: Schedule,
    /// Executions of this job currently running across all instances.
    pub running: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Description of a defined job: the persisted fields plus, when the local
/// scheduler has been started, a [`SchedulerStatus`].
pub struct JobDescription {
    pub name: String,
    #[serde(flatten)]
    pub schedule: Schedule,
    pub concurrency: u32,
    pub max_running: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_info: Option<ExecutionInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduler_status: Option<SchedulerStatus>,
}

impl JobDescription {
    pub(crate) fn from_entity(entity: JobEntity, scheduler_status: Option<SchedulerStatus>) -> Self {
        Self {
            name: entity.name,
            schedule: entity.schedule,
            concurrency: entity.concurrency,
            max_running: entity.max_running,
            execution_info: entity.execution_info,
            scheduler_status,
        }
    }
}
