//! Intention aggregate: one user's request for one unit of work.

use super::{IntentionId, IntentionKind, Job, JobId, SchedulerDomainError, UserId};
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Lifecycle state of a live intention.
///
/// Archived intentions no longer exist as intentions; see
/// [`super::ArchivedIntention`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentionState {
    /// No job bound yet.
    Unscheduled,
    /// Bound to a job that no worker holds.
    Pending,
    /// Bound to a job a worker is running.
    Running,
}

impl IntentionState {
    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unscheduled => "unscheduled",
            Self::Pending => "pending",
            Self::Running => "running",
        }
    }

    /// Derives the state from the bound job, if any.
    #[must_use]
    pub const fn of(job: Option<&Job>) -> Self {
        match job {
            None => Self::Unscheduled,
            Some(bound) if bound.is_claimed() => Self::Running,
            Some(_) => Self::Pending,
        }
    }
}

/// Live request for work on behalf of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intention {
    id: IntentionId,
    user: UserId,
    kind: IntentionKind,
    job: Option<JobId>,
    previous: BTreeSet<IntentionId>,
    scheduled: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

/// Parameter object for reconstructing a persisted intention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedIntentionData {
    /// Persisted intention identifier.
    pub id: IntentionId,
    /// Requesting user.
    pub user: UserId,
    /// Requested work.
    pub kind: IntentionKind,
    /// Bound job, if scheduled.
    pub job: Option<JobId>,
    /// Unarchived prerequisites.
    pub previous: BTreeSet<IntentionId>,
    /// Earliest run instant for periodic intentions.
    pub scheduled: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Intention {
    /// Creates an unscheduled intention without prerequisites.
    #[must_use]
    pub fn new(user: UserId, kind: IntentionKind, clock: &impl Clock) -> Self {
        Self {
            id: IntentionId::new(),
            user,
            kind,
            job: None,
            previous: BTreeSet::new(),
            scheduled: None,
            created_at: clock.utc(),
        }
    }

    /// Sets the earliest instant the intention may be selected.
    #[must_use]
    pub const fn with_scheduled(mut self, scheduled: DateTime<Utc>) -> Self {
        self.scheduled = Some(scheduled);
        self
    }

    /// Reconstructs an intention from persisted storage.
    #[must_use]
    pub fn from_persisted(data: PersistedIntentionData) -> Self {
        Self {
            id: data.id,
            user: data.user,
            kind: data.kind,
            job: data.job,
            previous: data.previous,
            scheduled: data.scheduled,
            created_at: data.created_at,
        }
    }

    /// Returns the intention identifier.
    #[must_use]
    pub const fn id(&self) -> IntentionId {
        self.id
    }

    /// Returns the requesting user.
    #[must_use]
    pub const fn user(&self) -> UserId {
        self.user
    }

    /// Returns the requested work.
    #[must_use]
    pub const fn kind(&self) -> &IntentionKind {
        &self.kind
    }

    /// Returns the bound job, if any.
    #[must_use]
    pub const fn job(&self) -> Option<JobId> {
        self.job
    }

    /// Returns the unarchived prerequisites.
    #[must_use]
    pub const fn previous(&self) -> &BTreeSet<IntentionId> {
        &self.previous
    }

    /// Returns the earliest run instant, if any.
    #[must_use]
    pub const fn scheduled(&self) -> Option<DateTime<Utc>> {
        self.scheduled
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns whether no job is bound.
    #[must_use]
    pub const fn is_unscheduled(&self) -> bool {
        self.job.is_none()
    }

    /// Returns whether the intention may be picked up at `now`: unscheduled,
    /// no remaining prerequisite, and due.
    #[must_use]
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.is_unscheduled()
            && self.previous.is_empty()
            && self.scheduled.is_none_or(|scheduled| scheduled <= now)
    }

    /// Records a prerequisite that must be archived before this intention
    /// runs. Returns `false` when the link already existed.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerDomainError::SelfDependency`] when `prerequisite`
    /// is this intention.
    pub fn add_prerequisite(
        &mut self,
        prerequisite: IntentionId,
    ) -> Result<bool, SchedulerDomainError> {
        if prerequisite == self.id {
            return Err(SchedulerDomainError::SelfDependency(self.id));
        }
        Ok(self.previous.insert(prerequisite))
    }

    /// Drops an archived prerequisite.
    pub fn remove_prerequisite(&mut self, prerequisite: IntentionId) {
        self.previous.remove(&prerequisite);
    }

    /// Binds the intention to a job.
    pub const fn bind_job(&mut self, job: JobId) {
        self.job = Some(job);
    }

    /// Returns the intention to the unscheduled state.
    pub const fn unbind_job(&mut self) {
        self.job = None;
    }
}
