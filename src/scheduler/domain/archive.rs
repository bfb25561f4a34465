//! Immutable records of finished intentions.

use super::{ArchiveId, Intention, IntentionId, IntentionKind, JobId, ParseArchiveStatusError, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Final status written with an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArchiveStatus {
    /// The work completed.
    Ok,
    /// The work failed or was removed.
    Error,
}

impl ArchiveStatus {
    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for ArchiveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ArchiveStatus {
    type Error = ParseArchiveStatusError;

    fn try_from(value: &str) -> Result<Self, ParseArchiveStatusError> {
        let normalized = value.trim().to_ascii_uppercase();
        match normalized.as_str() {
            "OK" => Ok(Self::Ok),
            "ERROR" => Ok(Self::Error),
            _ => Err(ParseArchiveStatusError(value.to_owned())),
        }
    }
}

/// Terminal record of an intention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedIntention {
    id: ArchiveId,
    intention: IntentionId,
    user: UserId,
    kind: IntentionKind,
    created_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
    status: ArchiveStatus,
    job: Option<JobId>,
}

/// Parameter object for reconstructing a persisted archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedArchiveData {
    /// Archive identifier.
    pub id: ArchiveId,
    /// Identifier the intention had while live.
    pub intention: IntentionId,
    /// Requesting user.
    pub user: UserId,
    /// Requested work.
    pub kind: IntentionKind,
    /// When the intention was created.
    pub created_at: DateTime<Utc>,
    /// When the intention was archived.
    pub completed_at: DateTime<Utc>,
    /// Final status.
    pub status: ArchiveStatus,
    /// Job that executed the intention, if any.
    pub job: Option<JobId>,
}

impl ArchivedIntention {
    /// Captures a live intention at the moment it is archived.
    #[must_use]
    pub fn capture(
        intention: &Intention,
        status: ArchiveStatus,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ArchiveId::new(),
            intention: intention.id(),
            user: intention.user(),
            kind: intention.kind().clone(),
            created_at: intention.created_at(),
            completed_at,
            status,
            job: intention.job(),
        }
    }

    /// Reconstructs an archive from persisted storage.
    #[must_use]
    pub fn from_persisted(data: PersistedArchiveData) -> Self {
        Self {
            id: data.id,
            intention: data.intention,
            user: data.user,
            kind: data.kind,
            created_at: data.created_at,
            completed_at: data.completed_at,
            status: data.status,
            job: data.job,
        }
    }

    /// Returns the archive identifier.
    #[must_use]
    pub const fn id(&self) -> ArchiveId {
        self.id
    }

    /// Returns the identifier the intention had while live.
    #[must_use]
    pub const fn intention(&self) -> IntentionId {
        self.intention
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

    /// Returns when the intention was created.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns when the intention was archived.
    #[must_use]
    pub const fn completed_at(&self) -> DateTime<Utc> {
        self.completed_at
    }

    /// Returns the final status.
    #[must_use]
    pub const fn status(&self) -> ArchiveStatus {
        self.status
    }

    /// Returns the executing job, if the intention was ever scheduled.
    #[must_use]
    pub const fn job(&self) -> Option<JobId> {
        self.job
    }
}
