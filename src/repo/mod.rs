//! Datastore contracts the scheduler coordinates through.
//!
//! The scheduler never talks to a concrete datastore; it is written against
//! these two traits. Any document store with atomic per-key upserts can back
//! them. The crate ships [`MemoryRepository`] for embedding without an
//! external store and for tests.

mod memory;

use async_trait::async_trait;

use std::time::Duration;

use crate::{
    entity::{ExecutionInfo, JobEntity, JobPatch, ScheduleId},
    error::RepositoryError,
};

pub use memory::MemoryRepository;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Outcome of an atomic execution-admission attempt.
pub struct ExecutionAdmission {
    /// Whether a running record was added.
    pub added: bool,
    /// The global running count after the attempt.
    pub running: u32,
}

#[async_trait]
/// Tracks live scheduler instances and running executions.
///
/// The implementation must make every mutation atomic per row so concurrent
/// instances cannot observe partial state.
pub trait ExecutionsRepository: Send + Sync + 'static {
    /// Atomically admit one execution of `job_name` for `schedule_id`.
    ///
    /// When `max_running > 0` and the global running count is already at the
    /// cap, nothing is recorded and `added` is `false`.
    async fn add_execution(
        &self,
        schedule_id: ScheduleId,
        job_name: &str,
        max_running: u32,
    ) -> Result<ExecutionAdmission, RepositoryError>;

    /// Remove one running record for `(schedule_id, job_name)`, flooring at 0.
    async fn remove_execution(
        &self,
        schedule_id: ScheduleId,
        job_name: &str,
    ) -> Result<(), RepositoryError>;

    /// Sum the running count of `job_name` across all instances.
    async fn count_running_executions(&self, job_name: &str) -> Result<u32, RepositoryError>;

    /// Delete all running records of `job_name` belonging to `schedule_id`.
    async fn remove_job(
        &self,
        schedule_id: ScheduleId,
        job_name: &str,
    ) -> Result<(), RepositoryError>;

    /// Upsert the liveness row of `schedule_id` with the current time.
    async fn ping(&self, schedule_id: ScheduleId) -> Result<(), RepositoryError>;

    /// Delete liveness rows whose timestamp is older than `2 * ping_interval`
    /// together with the execution records of those dead instances.
    ///
    /// Returns the number of execution records removed.
    async fn clean(&self, ping_interval: Duration) -> Result<usize, RepositoryError>;

    /// Whether `schedule_id` may claim `schedule_name`: true iff no non-stale
    /// row holds the name, or the row holding it belongs to `schedule_id`.
    async fn is_active_schedule(
        &self,
        schedule_name: &str,
        schedule_id: ScheduleId,
        ping_interval: Duration,
    ) -> Result<bool, RepositoryError>;

    /// Conditionally claim `schedule_name` for `schedule_id`.
    ///
    /// Succeeds only if no other non-stale row holds the name. Returns whether
    /// the claim was won.
    async fn set_active_schedule(
        &self,
        schedule_name: &str,
        schedule_id: ScheduleId,
        ping_interval: Duration,
    ) -> Result<bool, RepositoryError>;

    /// Remove the liveness row of `schedule_id`.
    async fn delete_one(&self, schedule_id: ScheduleId) -> Result<(), RepositoryError>;
}

#[async_trait]
/// Stores job definitions and their last-execution bookkeeping.
pub trait JobRepository: Send + Sync + 'static {
    async fn find_one(&self, name: &str) -> Result<Option<JobEntity>, RepositoryError>;

    /// Upsert `entity` wholesale, keyed by name.
    async fn save(&self, entity: JobEntity) -> Result<(), RepositoryError>;

    /// Idempotently store a definition.
    ///
    /// If rows with the same name already exist (legacy duplicates included),
    /// the one with the most recent `execution_info.last_finished` survives,
    /// the rest are deleted, and the new schedule fields are merged into the
    /// survivor without touching its `execution_info`.
    async fn define(&self, definition: JobEntity) -> Result<(), RepositoryError>;

    /// Apply a partial update to the row named `name`.
    ///
    /// Fields left unset in the patch keep their stored values; in particular
    /// `execution_info` is preserved unless the patch carries one, and an
    /// explicit `max_running = 0` is applied.
    async fn update_job(&self, name: &str, patch: JobPatch) -> Result<(), RepositoryError>;

    /// Fetch only the execution bookkeeping of `name`.
    async fn check(&self, name: &str) -> Result<Option<ExecutionInfo>, RepositoryError>;

    async fn list(&self) -> Result<Vec<JobEntity>, RepositoryError>;

    /// Delete the row named `name`; returns whether a row existed.
    async fn delete(&self, name: &str) -> Result<bool, RepositoryError>;

    /// Delete every job definition. Returns the number of rows removed.
    async fn delete_all(&self) -> Result<usize, RepositoryError>;
}
