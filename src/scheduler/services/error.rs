//! Errors shared by the scheduler services.

use crate::scheduler::{
    domain::{ParseBackendError, SchedulerDomainError},
    ports::{JobLogError, SchedulerStoreError},
};
use thiserror::Error;

/// Service-level errors for scheduling operations.
#[derive(Debug, Error)]
pub enum SchedulingError {
    /// Domain validation failed.
    #[error(transparent)]
    Domain(#[from] SchedulerDomainError),
    /// A backend name did not parse.
    #[error(transparent)]
    Backend(#[from] ParseBackendError),
    /// Store operation failed.
    #[error(transparent)]
    Store(#[from] SchedulerStoreError),
    /// Job log operation failed.
    #[error(transparent)]
    JobLog(#[from] JobLogError),
}

/// Result type for scheduler service operations.
pub type SchedulingResult<T> = Result<T, SchedulingError>;
