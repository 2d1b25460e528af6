//! In-memory implementation of the repository contracts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use std::{
    collections::HashMap,
    sync::Mutex,
    time::Duration,
};

use super::{ExecutionAdmission, ExecutionsRepository, JobRepository};
use crate::{
    entity::{ExecutionInfo, JobEntity, JobPatch, ScheduleId},
    error::RepositoryError,
};

#[derive(Debug, Clone)]
struct LivenessRow {
    /// The schedule name this instance has claimed, if it is the leader.
    claimed_name: Option<String>,
    last_alive: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    /// Job definitions. A `Vec` so that legacy duplicate rows are
    /// representable; `define` collapses them.
    jobs: Vec<JobEntity>,
    /// Running counts keyed by `(schedule_id, job_name)`.
    executions: HashMap<(ScheduleId, String), u32>,
    /// One liveness row per instance, keyed by its schedule id.
    schedules: HashMap<ScheduleId, LivenessRow>,
}

/// A process-local datastore implementing both repository contracts.
///
/// Every operation takes one lock over the whole state, which trivially gives
/// the per-row atomicity the contracts require. Useful for tests and for
/// embedding the scheduler without an external datastore (coordination is
/// then limited to the current process).
#[derive(Debug, Default)]
pub struct MemoryRepository {
    state: Mutex<State>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("Couldn't lock MemoryRepository state")
    }
}

fn is_stale(row: &LivenessRow, now: DateTime<Utc>, ping_interval: Duration) -> bool {
    let threshold = chrono::Duration::from_std(ping_interval * 2)
        .unwrap_or_else(|_| chrono::Duration::MAX);
    now.signed_duration_since(row.last_alive) > threshold
}

#[async_trait]
impl ExecutionsRepository for MemoryRepository {
    async fn add_execution(
        &self,
        schedule_id: ScheduleId,
        job_name: &str,
        max_running: u32,
    ) -> Result<ExecutionAdmission, RepositoryError> {
        let mut state = self.lock();
        let running: u32 = state
            .executions
            .iter()
            .filter(|((_, name), _)| name == job_name)
            .map(|(_, count)| *count)
            .sum();
        if max_running > 0 && running >= max_running {
            return Ok(ExecutionAdmission {
                added: false,
                running,
            });
        }
        *state
            .executions
            .entry((schedule_id, job_name.to_string()))
            .or_insert(0) += 1;
        Ok(ExecutionAdmission {
            added: true,
            running: running + 1,
        })
    }

    async fn remove_execution(
        &self,
        schedule_id: ScheduleId,
        job_name: &str,
    ) -> Result<(), RepositoryError> {
        let mut state = self.lock();
        if let Some(count) = state
            .executions
            .get_mut(&(schedule_id, job_name.to_string()))
        {
            *count = count.saturating_sub(1);
        }
        Ok(())
    }

    async fn count_running_executions(&self, job_name: &str) -> Result<u32, RepositoryError> {
        let state = self.lock();
        Ok(state
            .executions
            .iter()
            .filter(|((_, name), _)| name == job_name)
            .map(|(_, count)| *count)
            .sum())
    }

    async fn remove_job(
        &self,
        schedule_id: ScheduleId,
        job_name: &str,
    ) -> Result<(), RepositoryError> {
        let mut state = self.lock();
        state.executions.remove(&(schedule_id, job_name.to_string()));
        Ok(())
    }

    async fn ping(&self, schedule_id: ScheduleId) -> Result<(), RepositoryError> {
        let mut state = self.lock();
        let now = Utc::now();
        state
            .schedules
            .entry(schedule_id)
            .and_modify(|row| row.last_alive = now)
            .or_insert(LivenessRow {
                claimed_name: None,
                last_alive: now,
            });
        Ok(())
    }

    async fn clean(&self, ping_interval: Duration) -> Result<usize, RepositoryError> {
        let mut state = self.lock();
        let now = Utc::now();
        state
            .schedules
            .retain(|_, row| !is_stale(row, now, ping_interval));
        let alive: Vec<ScheduleId> = state.schedules.keys().copied().collect();
        let before = state.executions.len();
        state
            .executions
            .retain(|(schedule_id, _), _| alive.contains(schedule_id));
        Ok(before - state.executions.len())
    }

    async fn is_active_schedule(
        &self,
        schedule_name: &str,
        schedule_id: ScheduleId,
        ping_interval: Duration,
    ) -> Result<bool, RepositoryError> {
        let state = self.lock();
        let now = Utc::now();
        let holder = state.schedules.iter().find(|(_, row)| {
            row.claimed_name.as_deref() == Some(schedule_name)
                && !is_stale(row, now, ping_interval)
        });
        Ok(match holder {
            None => true,
            Some((id, _)) => *id == schedule_id,
        })
    }

    async fn set_active_schedule(
        &self,
        schedule_name: &str,
        schedule_id: ScheduleId,
        ping_interval: Duration,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.lock();
        let now = Utc::now();
        let other_holder = state.schedules.iter().any(|(id, row)| {
            *id != schedule_id
                && row.claimed_name.as_deref() == Some(schedule_name)
                && !is_stale(row, now, ping_interval)
        });
        if other_holder {
            return Ok(false);
        }
        // Stale claims of the same name must not resurrect later.
        for row in state.schedules.values_mut() {
            if row.claimed_name.as_deref() == Some(schedule_name) {
                row.claimed_name = None;
            }
        }
        state
            .schedules
            .entry(schedule_id)
            .and_modify(|row| {
                row.claimed_name = Some(schedule_name.to_string());
                row.last_alive = now;
            })
            .or_insert(LivenessRow {
                claimed_name: Some(schedule_name.to_string()),
                last_alive: now,
            });
        Ok(true)
    }

    async fn delete_one(&self, schedule_id: ScheduleId) -> Result<(), RepositoryError> {
        let mut state = self.lock();
        state.schedules.remove(&schedule_id);
        Ok(())
    }
}

#[async_trait]
impl JobRepository for MemoryRepository {
    async fn find_one(&self, name: &str) -> Result<Option<JobEntity>, RepositoryError> {
        let state = self.lock();
        Ok(state.jobs.iter().find(|job| job.name == name).cloned())
    }

    async fn save(&self, entity: JobEntity) -> Result<(), RepositoryError> {
        let mut state = self.lock();
        if let Some(existing) = state.jobs.iter_mut().find(|job| job.name == entity.name) {
            *existing = entity;
        } else {
            state.jobs.push(entity);
        }
        Ok(())
    }

    async fn define(&self, definition: JobEntity) -> Result<(), RepositoryError> {
        let mut state = self.lock();
        let mut duplicates: Vec<JobEntity> = Vec::new();
        state.jobs.retain_mut(|job| {
            if job.name == definition.name {
                duplicates.push(job.clone());
                false
            } else {
                true
            }
        });
        if duplicates.is_empty() {
            state.jobs.push(definition);
            return Ok(());
        }
        // The row with the freshest finish survives; its execution history is
        // kept while the schedule fields take the new definition.
        let mut survivor = duplicates
            .into_iter()
            .max_by_key(|job| {
                job.execution_info
                    .as_ref()
                    .and_then(|info| info.last_finished)
            })
            .expect("at least one duplicate");
        survivor.schedule = definition.schedule;
        survivor.concurrency = definition.concurrency;
        survivor.max_running = definition.max_running;
        state.jobs.push(survivor);
        Ok(())
    }

    async fn update_job(&self, name: &str, patch: JobPatch) -> Result<(), RepositoryError> {
        let mut state = self.lock();
        let job = state
            .jobs
            .iter_mut()
            .find(|job| job.name == name)
            .ok_or_else(|| RepositoryError::JobNotFound(name.to_string()))?;
        if let Some(schedule) = patch.schedule {
            job.schedule = schedule;
        }
        if let Some(concurrency) = patch.concurrency {
            job.concurrency = concurrency;
        }
        if let Some(max_running) = patch.max_running {
            job.max_running = max_running;
        }
        if let Some(execution_info) = patch.execution_info {
            job.execution_info = Some(execution_info);
        }
        Ok(())
    }

    async fn check(&self, name: &str) -> Result<Option<ExecutionInfo>, RepositoryError> {
        let state = self.lock();
        Ok(state
            .jobs
            .iter()
            .find(|job| job.name == name)
            .and_then(|job| job.execution_info.clone()))
    }

    async fn list(&self) -> Result<Vec<JobEntity>, RepositoryError> {
        let state = self.lock();
        Ok(state.jobs.clone())
    }

    async fn delete(&self, name: &str) -> Result<bool, RepositoryError> {
        let mut state = self.lock();
        let before = state.jobs.len();
        state.jobs.retain(|job| job.name != name);
        Ok(state.jobs.len() < before)
    }

    async fn delete_all(&self) -> Result<usize, RepositoryError> {
        let mut state = self.lock();
        let removed = state.jobs.len();
        state.jobs.clear();
        Ok(removed)
    }
}
