//! Error types returned by the scheduler and the repository contracts.

use thiserror::Error;

#[derive(Error, Debug)]
/// Errors surfaced by the public scheduler API.
pub enum MomoError {
    #[error("Could not parse interval '{0}'")]
    NonParsableInterval(String),
    #[error("Could not parse cron schedule '{0}'")]
    NonParsableCronSchedule(String),
    #[error("Invalid job definition: {0}")]
    InvalidJobDefinition(String),
    #[error("Job '{0}' is not defined on this instance")]
    JobNotDefined(String),
    #[error("RepositoryError: {0}")]
    Repository(#[from] RepositoryError),
}

#[derive(Error, Debug)]
/// Errors produced by [`JobRepository`](crate::repo::JobRepository) and
/// [`ExecutionsRepository`](crate::repo::ExecutionsRepository) implementations.
pub enum RepositoryError {
    #[error("Job '{0}' not found")]
    JobNotFound(String),
    #[error("CouldNotSerializeEntity - {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Datastore backend error: {0}")]
    Backend(String),
}
