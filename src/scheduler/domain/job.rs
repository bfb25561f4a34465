//! Jobs and the workers that claim them.

use super::{JobId, SchedulerDomainError, TokenId, WorkerId};
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Execution handle shared by every intention requesting equivalent work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    id: JobId,
    worker: Option<WorkerId>,
    tokens: BTreeSet<TokenId>,
    created_by: Option<WorkerId>,
    created_at: DateTime<Utc>,
}

/// Parameter object for reconstructing a persisted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedJobData {
    /// Persisted job identifier.
    pub id: JobId,
    /// Claiming worker, if running.
    pub worker: Option<WorkerId>,
    /// Tokens bound to the job.
    pub tokens: BTreeSet<TokenId>,
    /// Worker that created the job, if any.
    pub created_by: Option<WorkerId>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Creates an unclaimed job without tokens.
    ///
    /// Jobs are only ever created inside a store operation, which supplies
    /// the timestamp it admitted the job at.
    #[must_use]
    pub fn new(created_by: Option<WorkerId>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: JobId::new(),
            worker: None,
            tokens: BTreeSet::new(),
            created_by,
            created_at,
        }
    }

    /// Reconstructs a job from persisted storage.
    #[must_use]
    pub fn from_persisted(data: PersistedJobData) -> Self {
        Self {
            id: data.id,
            worker: data.worker,
            tokens: data.tokens,
            created_by: data.created_by,
            created_at: data.created_at,
        }
    }

    /// Returns the job identifier.
    #[must_use]
    pub const fn id(&self) -> JobId {
        self.id
    }

    /// Returns the claiming worker, if any.
    #[must_use]
    pub const fn worker(&self) -> Option<WorkerId> {
        self.worker
    }

    /// Returns the tokens bound to the job.
    #[must_use]
    pub const fn tokens(&self) -> &BTreeSet<TokenId> {
        &self.tokens
    }

    /// Returns the worker that created the job.
    #[must_use]
    pub const fn created_by(&self) -> Option<WorkerId> {
        self.created_by
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns whether a worker currently runs the job.
    #[must_use]
    pub const fn is_claimed(&self) -> bool {
        self.worker.is_some()
    }

    /// Binds tokens to the job; already bound tokens are ignored.
    pub fn attach_tokens(&mut self, tokens: impl IntoIterator<Item = TokenId>) {
        self.tokens.extend(tokens);
    }

    /// Unbinds a revoked token.
    pub fn detach_token(&mut self, token: TokenId) {
        self.tokens.remove(&token);
    }

    /// Attaches a worker.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerDomainError::JobAlreadyClaimed`] when another
    /// worker holds the job.
    pub fn claim(&mut self, worker: WorkerId) -> Result<(), SchedulerDomainError> {
        if let Some(current) = self.worker {
            return Err(SchedulerDomainError::JobAlreadyClaimed {
                job_id: self.id,
                worker_id: current,
            });
        }
        self.worker = Some(worker);
        Ok(())
    }

    /// Detaches the worker so the job can be claimed again.
    pub const fn release(&mut self) {
        self.worker = None;
    }
}

/// Validated display name of a worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerName(String);

impl WorkerName {
    /// Creates a validated worker name.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerDomainError::EmptyValue`] when the name is blank.
    pub fn new(value: impl Into<String>) -> Result<Self, SchedulerDomainError> {
        let raw = value.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(SchedulerDomainError::EmptyValue("worker name"));
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the name as `str`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Execution agent allowed to claim jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    id: WorkerId,
    name: WorkerName,
    registered_at: DateTime<Utc>,
}

impl Worker {
    /// Registers a new worker identity.
    #[must_use]
    pub fn new(name: WorkerName, clock: &impl Clock) -> Self {
        Self {
            id: WorkerId::new(),
            name,
            registered_at: clock.utc(),
        }
    }

    /// Reconstructs a worker from persisted storage.
    #[must_use]
    pub const fn from_persisted(id: WorkerId, name: WorkerName, registered_at: DateTime<Utc>) -> Self {
        Self {
            id,
            name,
            registered_at,
        }
    }

    /// Returns the worker identifier.
    #[must_use]
    pub const fn id(&self) -> WorkerId {
        self.id
    }

    /// Returns the display name.
    #[must_use]
    pub const fn name(&self) -> &WorkerName {
        &self.name
    }

    /// Returns the registration timestamp.
    #[must_use]
    pub const fn registered_at(&self) -> DateTime<Utc> {
        self.registered_at
    }
}
