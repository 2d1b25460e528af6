//! `momo` is an async, datastore-backed job scheduler for Rust applications.
//! It runs user-defined jobs on interval or cron schedules and coordinates
//! peer instances through a shared datastore so that only one instance per
//! logical schedule is active at a time. The crate is written against two
//! small repository traits and forbids `unsafe`.
//!
//! ## Highlights
//! - Interval schedules in plain language (`"30 seconds"`, `"5 minutes"`) and
//!   cron expressions, both validated when the job is defined.
//! - Timer loops that survive handler errors, panics, and overruns: a tick
//!   that arrives while the previous handler still runs is skipped, never
//!   stacked.
//! - Per-tick fan-out (`concurrency`) and a global running cap enforced
//!   across all instances (`max_running`), counted in the shared datastore.
//! - Leader election per schedule name: redundant instances stand by and one
//!   of them takes over within two ping intervals of the leader's death.
//! - Execution bookkeeping on the job itself: last start, last finish, and a
//!   discriminated last result.
//!
//! ## Core Concepts
//! - **Service** – [`Momo`] owns job definitions, the per-job schedulers, and
//!   the instance heartbeat.
//! - **Job** – [`MomoJob`] pairs a validated definition with its handler.
//! - **Handler** – [`JobHandler`] (or [`handler_fn`]) performs the work and
//!   reports an optional result payload.
//! - **Repositories** – [`repo::JobRepository`] and
//!   [`repo::ExecutionsRepository`] are the datastore boundary;
//!   [`repo::MemoryRepository`] backs both for single-process use and tests.
//!
//! ## Lifecycle
//!
//! 1. Create the service with [`Momo::new`] (or [`Momo::in_memory`])
//! 2. Register jobs with [`Momo::define`]
//! 3. Call [`Momo::start`] – the instance begins pinging and, once it is the
//!    active instance for its schedule name, starts every job
//! 4. Shut down gracefully with [`Momo::stop`]
//!
//! ## Example
//!
//! ```no_run
//! use momo::{Momo, MomoConfig, MomoJob, handler_fn};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let momo = Momo::in_memory(MomoConfig::default());
//!
//!     momo.define(
//!         MomoJob::builder()
//!             .name("cleanup")
//!             .interval("30 seconds")
//!             .first_run_after(Duration::from_secs(5))
//!             .handler(handler_fn(|| async {
//!                 // do the work
//!                 Ok(Some("removed 3 rows".to_string()))
//!             }))
//!             .build()?,
//!     )
//!     .await?;
//!
//!     momo.start().await;
//!
//!     // ... application runs ...
//!
//!     momo.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Clustering
//!
//! Instances constructed with the same `schedule_name` against the same
//! datastore form a cluster. Each instance refreshes a liveness row every
//! [`ping_interval`](MomoConfig::ping_interval); the row also carries the
//! active claim. Standby instances retry the claim on every ping, so when the
//! active instance stops pinging its jobs move to a standby within two ping
//! intervals, and execution records it left behind are cleaned up.
//!
//! ## Concurrency control
//!
//! On every tick a job's scheduler counts the executions currently running
//! across the whole cluster and launches at most
//! `min(concurrency, max_running - running)` new attempts (`max_running = 0`
//! disables the cap). The executor re-checks the cap atomically when an
//! attempt starts, so the cap holds even when ticks race; a brief overshoot
//! bounded by the tick fan-out is possible and accepted.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![cfg_attr(feature = "fail-on-warnings", deny(clippy::all))]
#![forbid(unsafe_code)]

mod config;
mod delay;
mod entity;
mod executor;
mod handler;
mod job;
mod ping;
mod scheduler;
mod timer;

pub mod error;
pub mod repo;

use futures::FutureExt;
use tracing::instrument;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

pub use config::*;
pub use entity::*;
pub use handler::{HandlerResult, JobHandler, handler_fn};
pub use job::{MomoJob, MomoJobBuilder};
pub use scheduler::JobScheduler;

use error::*;
use ping::{SchedulePing, StartAllJobs};
use repo::{ExecutionsRepository, JobRepository, MemoryRepository};

type SchedulerMap = Arc<tokio::sync::RwLock<HashMap<String, Arc<JobScheduler>>>>;

#[derive(Clone)]
/// Primary entry point. Registers jobs, owns their schedulers, and keeps this
/// instance coordinated with its peers.
pub struct Momo {
    config: MomoConfig,
    schedule_id: ScheduleId,
    job_repo: Arc<dyn JobRepository>,
    executions_repo: Arc<dyn ExecutionsRepository>,
    schedulers: SchedulerMap,
    ping: Arc<Mutex<Option<Arc<SchedulePing>>>>,
}

impl Momo {
    /// Create a service instance on top of user-provided repositories.
    pub fn new(
        config: MomoConfig,
        job_repo: Arc<dyn JobRepository>,
        executions_repo: Arc<dyn ExecutionsRepository>,
    ) -> Self {
        Self {
            config,
            schedule_id: ScheduleId::new(),
            job_repo,
            executions_repo,
            schedulers: Arc::new(tokio::sync::RwLock::new(HashMap::new())),
            ping: Arc::new(Mutex::new(None)),
        }
    }

    /// Create a service instance backed by an in-process
    /// [`MemoryRepository`]. Coordination is then limited to this process.
    pub fn in_memory(config: MomoConfig) -> Self {
        let repo = Arc::new(MemoryRepository::new());
        Self::new(
            config,
            Arc::clone(&repo) as Arc<dyn JobRepository>,
            repo as Arc<dyn ExecutionsRepository>,
        )
    }

    /// The random identifier of this instance.
    pub fn schedule_id(&self) -> ScheduleId {
        self.schedule_id
    }

    /// Register a job: the definition is persisted idempotently (existing
    /// execution history is preserved) and a scheduler for it is created.
    ///
    /// Defining a job again replaces its handler and schedule. When this
    /// instance is currently the active one, the new scheduler is started
    /// right away.
    #[instrument(name = "momo.define", skip(self, job), fields(job_name = %job.name), err)]
    pub async fn define(&self, job: MomoJob) -> Result<(), MomoError> {
        self.job_repo.define(job.to_entity()).await?;

        let scheduler = Arc::new(JobScheduler::new(
            &job.name,
            job.handler(),
            self.schedule_id,
            Arc::clone(&self.job_repo),
            Arc::clone(&self.executions_repo),
        ));
        let previous = {
            let mut schedulers = self.schedulers.write().await;
            schedulers.insert(job.name.clone(), Arc::clone(&scheduler))
        };
        if let Some(previous) = previous {
            previous.stop().await?;
        }
        if self.is_active() {
            scheduler.start().await?;
        }
        Ok(())
    }

    /// Begin coordinating with peer instances.
    ///
    /// The instance writes its liveness row, arbitrates for the active claim
    /// of its schedule name, and keeps both up on every ping. As soon as the
    /// claim is won - immediately if there is no live peer - all defined jobs
    /// are started. Idempotent.
    pub async fn start(&self) {
        let ping = {
            let mut guard = self.ping.lock().expect("Couldn't lock Momo ping");
            if let Some(existing) = guard.as_ref() {
                Arc::clone(existing)
            } else {
                let ping = Arc::new(SchedulePing::new(
                    self.schedule_id,
                    self.config.schedule_name.clone(),
                    self.config.ping_interval,
                    Arc::clone(&self.executions_repo),
                    self.start_all_jobs_hook(),
                ));
                *guard = Some(Arc::clone(&ping));
                ping
            }
        };
        ping.start().await;
    }

    /// Stop the heartbeat and every job scheduler. Best-effort and
    /// idempotent; the active claim is released so a standby can take over
    /// immediately.
    pub async fn stop(&self) {
        let ping = self.ping.lock().expect("Couldn't lock Momo ping").take();
        if let Some(ping) = ping {
            ping.stop().await;
        }
        for scheduler in self.snapshot().await {
            if let Err(e) = scheduler.stop().await {
                tracing::error!(
                    error_type = "internalError",
                    job_name = %scheduler.job_name(),
                    error = %e,
                    "failed to stop job scheduler"
                );
            }
        }
    }

    /// Start one job's scheduler on this instance, regardless of the active
    /// claim.
    pub async fn start_job(&self, name: &str) -> Result<(), MomoError> {
        self.scheduler(name)
            .await
            .ok_or_else(|| MomoError::JobNotDefined(name.to_string()))?
            .start()
            .await
    }

    /// Stop one job's scheduler on this instance.
    pub async fn stop_job(&self, name: &str) -> Result<(), MomoError> {
        self.scheduler(name)
            .await
            .ok_or_else(|| MomoError::JobNotDefined(name.to_string()))?
            .stop()
            .await
    }

    /// Run a single attempt of a job right now, outside its schedule. The
    /// global running cap still applies.
    pub async fn run_job(&self, name: &str) -> Result<JobResult, MomoError> {
        match self.scheduler(name).await {
            Some(scheduler) => scheduler.execute_once().await,
            None => Ok(JobResult::not_found()),
        }
    }

    /// Stop a job and delete its definition together with this instance's
    /// running records for it.
    #[instrument(name = "momo.remove_job", skip(self), err)]
    pub async fn remove_job(&self, name: &str) -> Result<(), MomoError> {
        let scheduler = self.schedulers.write().await.remove(name);
        if let Some(scheduler) = scheduler {
            scheduler.stop().await?;
        }
        self.job_repo.delete(name).await?;
        Ok(())
    }

    /// Descriptions of all defined jobs, including scheduler state for jobs
    /// started on this instance.
    pub async fn list(&self) -> Result<Vec<JobDescription>, MomoError> {
        let schedulers = self.schedulers.read().await.clone();
        let mut descriptions = Vec::new();
        for entity in self.job_repo.list().await? {
            let description = match schedulers.get(&entity.name) {
                Some(scheduler) => scheduler
                    .get_job_description()
                    .await?
                    .unwrap_or_else(|| JobDescription::from_entity(entity, None)),
                None => JobDescription::from_entity(entity, None),
            };
            descriptions.push(description);
        }
        Ok(descriptions)
    }

    /// The execution bookkeeping of one job, if any attempt ever ran.
    pub async fn check(&self, name: &str) -> Result<Option<ExecutionInfo>, MomoError> {
        Ok(self.job_repo.check(name).await?)
    }

    /// Stop all schedulers and delete every job definition.
    pub async fn clear(&self) -> Result<(), MomoError> {
        let schedulers = {
            let mut guard = self.schedulers.write().await;
            std::mem::take(&mut *guard)
        };
        for scheduler in schedulers.into_values() {
            scheduler.stop().await?;
        }
        self.job_repo.delete_all().await?;
        Ok(())
    }

    /// Sum of errors caught inside job ticks on this instance.
    pub async fn unexpected_error_count(&self) -> u64 {
        self.snapshot()
            .await
            .iter()
            .map(|scheduler| scheduler.unexpected_error_count())
            .sum()
    }

    /// The scheduler of one defined job, for direct control.
    pub async fn scheduler(&self, name: &str) -> Option<Arc<JobScheduler>> {
        self.schedulers.read().await.get(name).cloned()
    }

    fn is_active(&self) -> bool {
        self.ping
            .lock()
            .expect("Couldn't lock Momo ping")
            .as_ref()
            .is_some_and(|ping| ping.is_active())
    }

    async fn snapshot(&self) -> Vec<Arc<JobScheduler>> {
        self.schedulers.read().await.values().cloned().collect()
    }

    fn start_all_jobs_hook(&self) -> StartAllJobs {
        let schedulers = Arc::clone(&self.schedulers);
        Arc::new(move || {
            let schedulers = Arc::clone(&schedulers);
            async move {
                let all: Vec<Arc<JobScheduler>> =
                    schedulers.read().await.values().cloned().collect();
                for scheduler in all {
                    if let Err(e) = scheduler.start().await {
                        tracing::error!(
                            error_type = "scheduleJob",
                            job_name = %scheduler.job_name(),
                            error = %e,
                            "failed to start job"
                        );
                    }
                }
            }
            .boxed()
        })
    }
}
