//! Results reported by collectors and by job runs.

use super::ArchiveStatus;
use serde::{Deserialize, Serialize};

/// What a collector reports after one call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CollectorOutcome {
    /// All data was collected.
    Success,
    /// The work cannot succeed; a new request is needed.
    FatalError {
        /// Human-readable cause.
        reason: String,
    },
    /// The token hit its rate limit; retry after this many minutes.
    CooldownMinutes {
        /// Minutes until the token may be used again.
        minutes: u32,
    },
}

/// How a claimed job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every bound intention was archived `OK`.
    Completed,
    /// The job was released for a later retry; intentions stay pending.
    Deferred,
    /// Every bound intention was archived `ERROR`.
    Fatal {
        /// Human-readable cause.
        reason: String,
    },
}

impl RunOutcome {
    /// Returns the archive status for terminal outcomes.
    #[must_use]
    pub const fn archive_status(&self) -> Option<ArchiveStatus> {
        match self {
            Self::Completed => Some(ArchiveStatus::Ok),
            Self::Fatal { .. } => Some(ArchiveStatus::Error),
            Self::Deferred => None,
        }
    }
}
