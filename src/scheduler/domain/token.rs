//! API tokens and their rate-limit cooldown.

use super::{SchedulerDomainError, TokenId, TokenScope, UserId};
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Secret credential string. Never printed; see [`TokenSecret::fingerprint`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenSecret(String);

impl TokenSecret {
    /// Creates a validated secret.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerDomainError::EmptyValue`] when the secret is blank.
    pub fn new(value: impl Into<String>) -> Result<Self, SchedulerDomainError> {
        let raw = value.into();
        if raw.trim().is_empty() {
            return Err(SchedulerDomainError::EmptyValue("token secret"));
        }
        Ok(Self(raw))
    }

    /// Returns the secret for handing to a collector.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Short SHA-256 fingerprint that identifies the secret in logs.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        digest
            .iter()
            .take(6)
            .map(|byte| format!("{byte:02x}"))
            .collect()
    }
}

impl fmt::Debug for TokenSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenSecret({})", self.fingerprint())
    }
}

/// Per-user credential for one backend scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    id: TokenId,
    user: UserId,
    scope: TokenScope,
    secret: TokenSecret,
    reset: DateTime<Utc>,
    max_concurrent_jobs: u32,
    created_at: DateTime<Utc>,
}

/// Parameter object for reconstructing a persisted token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedTokenData {
    /// Persisted token identifier.
    pub id: TokenId,
    /// Owning user.
    pub user: UserId,
    /// Backend scope.
    pub scope: TokenScope,
    /// Secret credential.
    pub secret: TokenSecret,
    /// Cooldown instant.
    pub reset: DateTime<Utc>,
    /// Concurrency cap.
    pub max_concurrent_jobs: u32,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Token {
    /// Creates a token that is usable immediately, with the backend's
    /// default concurrency cap.
    #[must_use]
    pub fn new(user: UserId, scope: TokenScope, secret: TokenSecret, clock: &impl Clock) -> Self {
        let timestamp = clock.utc();
        let max_concurrent_jobs = scope.backend_kind().default_max_concurrent_jobs();
        Self {
            id: TokenId::new(),
            user,
            scope,
            secret,
            reset: timestamp,
            max_concurrent_jobs,
            created_at: timestamp,
        }
    }

    /// Overrides the concurrency cap.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerDomainError::InvalidTokenCap`] for a cap of zero.
    pub fn with_max_concurrent_jobs(mut self, cap: u32) -> Result<Self, SchedulerDomainError> {
        if cap == 0 {
            return Err(SchedulerDomainError::InvalidTokenCap);
        }
        self.max_concurrent_jobs = cap;
        Ok(self)
    }

    /// Reconstructs a token from persisted storage.
    #[must_use]
    pub fn from_persisted(data: PersistedTokenData) -> Self {
        Self {
            id: data.id,
            user: data.user,
            scope: data.scope,
            secret: data.secret,
            reset: data.reset,
            max_concurrent_jobs: data.max_concurrent_jobs,
            created_at: data.created_at,
        }
    }

    /// Returns the token identifier.
    #[must_use]
    pub const fn id(&self) -> TokenId {
        self.id
    }

    /// Returns the owning user.
    #[must_use]
    pub const fn user(&self) -> UserId {
        self.user
    }

    /// Returns the backend scope.
    #[must_use]
    pub const fn scope(&self) -> &TokenScope {
        &self.scope
    }

    /// Returns the secret credential.
    #[must_use]
    pub const fn secret(&self) -> &TokenSecret {
        &self.secret
    }

    /// Returns the instant before which the token must not be used.
    #[must_use]
    pub const fn reset(&self) -> DateTime<Utc> {
        self.reset
    }

    /// Returns the number of jobs that may hold this token at once.
    #[must_use]
    pub const fn max_concurrent_jobs(&self) -> u32 {
        self.max_concurrent_jobs
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns whether the cooldown has elapsed at `now`.
    #[must_use]
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.reset <= now
    }

    /// Returns whether the token may be bound to one more job.
    ///
    /// `attached_jobs` is the number of jobs currently holding the token.
    #[must_use]
    pub fn is_admissible(&self, now: DateTime<Utc>, attached_jobs: usize, enforce_cap: bool) -> bool {
        let below_cap = u64::try_from(attached_jobs)
            .is_ok_and(|jobs| jobs < u64::from(self.max_concurrent_jobs));
        self.is_ready(now) && (!enforce_cap || below_cap)
    }

    /// Blocks the token until `reset`.
    pub const fn cool_down_until(&mut self, reset: DateTime<Utc>) {
        self.reset = reset;
    }
}
