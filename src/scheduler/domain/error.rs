//! Error types for scheduler domain validation and parsing.

use super::{IntentionId, JobId, WorkerId};
use thiserror::Error;

/// Errors returned while constructing or mutating scheduler domain values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchedulerDomainError {
    /// A required text value was empty after trimming.
    #[error("{0} must not be empty")]
    EmptyValue(&'static str),

    /// A text value contained whitespace where none is allowed.
    #[error("{field} must not contain whitespace: '{value}'")]
    UnexpectedWhitespace {
        /// Name of the offending field.
        field: &'static str,
        /// Rejected value.
        value: String,
    },

    /// A token concurrency cap of zero would make the token unusable.
    #[error("token concurrency cap must be at least 1")]
    InvalidTokenCap,

    /// An intention cannot depend on itself.
    #[error("intention {0} cannot depend on itself")]
    SelfDependency(IntentionId),

    /// The job already has a worker attached.
    #[error("job {job_id} is already claimed by worker {worker_id}")]
    JobAlreadyClaimed {
        /// Claimed job.
        job_id: JobId,
        /// Worker holding the claim.
        worker_id: WorkerId,
    },
}

/// Error returned while parsing archive statuses from persistence.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown archive status: {0}")]
pub struct ParseArchiveStatusError(pub String);

/// Error returned while parsing intention kind tags.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown intention kind: {0}")]
pub struct ParseIntentionKindTagError(pub String);

/// Error returned while parsing backend identifiers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown backend: {0}")]
pub struct ParseBackendError(pub String);
