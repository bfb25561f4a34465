//! Store port for intentions, jobs, tokens, workers, and archives.
//!
//! Every method is one atomic step. Multiple workers share a store with no
//! coordinator, so anything that must change together (a job and the
//! tokens it admits, a completed job and the archives replacing its
//! intentions) is a single call here rather than a sequence of calls made by
//! a service.

use crate::scheduler::domain::{
    ArchiveStatus, ArchivedIntention, Intention, IntentionId, IntentionKind, IntentionKindTag,
    Job, JobId, Token, TokenId, TokenPolicy, TokenScope, UserId, Worker, WorkerId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

/// Result type for scheduler store operations.
pub type SchedulerStoreResult<T> = Result<T, SchedulerStoreError>;

/// Result of trying to bind an unscheduled intention to a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobBinding {
    /// The intention is bound to this job (it may already have been).
    Bound(Job),
    /// No live intention requesting equivalent work holds a job.
    NoEquivalentJob,
    /// The variant is token-gated and none of the user's tokens is
    /// admissible; nothing was changed.
    NoTokenAvailable,
}

/// A job a worker has just claimed, with the intentions bound to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedJob {
    /// The claimed job, worker already set.
    pub job: Job,
    /// Bound intentions, oldest first.
    pub intentions: Vec<Intention>,
}

/// Cooldown applied to one token while a job is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenCooldown {
    /// Token that hit its rate limit.
    pub token: TokenId,
    /// Instant the token becomes usable again.
    pub reset: DateTime<Utc>,
}

/// Scheduler persistence contract.
#[async_trait]
pub trait SchedulerStore: Send + Sync {
    /// Records a worker identity.
    async fn register_worker(&self, worker: &Worker) -> SchedulerStoreResult<()>;

    /// Returns all registered workers, oldest first.
    async fn list_workers(&self) -> SchedulerStoreResult<Vec<Worker>>;

    /// Stores a new token.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerStoreError::DuplicateToken`] when the identifier
    /// is taken.
    async fn store_token(&self, token: &Token) -> SchedulerStoreResult<()>;

    /// Deletes a user's token and detaches it from every job. An unclaimed
    /// job of a gated variant left without tokens is deleted and its
    /// intentions return to unscheduled.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerStoreError::TokenNotFound`] when the user holds no
    /// such token.
    async fn revoke_token(&self, user: UserId, token: TokenId) -> SchedulerStoreResult<()>;

    /// Returns a user's tokens, oldest first.
    async fn list_tokens(&self, user: UserId) -> SchedulerStoreResult<Vec<Token>>;

    /// Returns the tokens bound to a job.
    async fn job_tokens(&self, job: JobId) -> SchedulerStoreResult<Vec<Token>>;

    /// Returns the user's tokens for `scope` that are ready at `now` and,
    /// when `enforce_cap` holds, below their concurrency cap.
    async fn admissible_tokens(
        &self,
        user: UserId,
        scope: &TokenScope,
        now: DateTime<Utc>,
        enforce_cap: bool,
    ) -> SchedulerStoreResult<Vec<Token>>;

    /// Stores a new intention together with its prerequisite links.
    /// Prerequisites that are no longer live are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerStoreError::DuplicateIntention`] when the user
    /// already has a live non-periodic intention of the same kind, or the
    /// periodic series already has a live member.
    async fn insert_intention(&self, intention: &Intention) -> SchedulerStoreResult<()>;

    /// Finds a live intention by identifier.
    async fn find_intention(&self, id: IntentionId) -> SchedulerStoreResult<Option<Intention>>;

    /// Finds the user's live intention of exactly this kind.
    async fn find_live(
        &self,
        user: UserId,
        kind: &IntentionKind,
    ) -> SchedulerStoreResult<Option<Intention>>;

    /// Returns every user's live intentions of exactly this kind, newest
    /// first.
    async fn find_live_by_kind(&self, kind: &IntentionKind) -> SchedulerStoreResult<Vec<Intention>>;

    /// Returns the live members of a periodic series, oldest first.
    async fn find_series(&self, series_key: &str) -> SchedulerStoreResult<Vec<Intention>>;

    /// Returns whether a member of the series is bound to a claimed job.
    async fn is_series_running(&self, series_key: &str) -> SchedulerStoreResult<bool>;

    /// Makes `dependent` wait for `prerequisite`. Returns `false` when the
    /// edge already existed.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerStoreError::DependencyCycle`] when the edge would
    /// close a cycle, including a self edge.
    async fn link_dependency(
        &self,
        dependent: IntentionId,
        prerequisite: IntentionId,
    ) -> SchedulerStoreResult<bool>;

    /// Returns up to `limit` of the user's intentions of `tag` that are
    /// unscheduled, have no remaining prerequisite, and are due at `now`,
    /// oldest first.
    async fn find_unscheduled(
        &self,
        tag: IntentionKindTag,
        user: UserId,
        now: DateTime<Utc>,
        limit: usize,
    ) -> SchedulerStoreResult<Vec<Intention>>;

    /// Returns the users owning at least one eligible intention of `tag`.
    async fn users_with_unscheduled(
        &self,
        tag: IntentionKindTag,
        now: DateTime<Utc>,
    ) -> SchedulerStoreResult<Vec<UserId>>;

    /// Finds a job held by a live intention of an equal kind and binds
    /// `intention` to it, adding the user's admissible tokens to the job.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerStoreError::IntentionNotFound`] when the intention
    /// is no longer live.
    async fn attach_to_equivalent_job(
        &self,
        intention: IntentionId,
        policy: &TokenPolicy,
        now: DateTime<Utc>,
    ) -> SchedulerStoreResult<JobBinding>;

    /// Creates an unclaimed job for `intention` and binds every admissible
    /// token of the user. Token availability is checked in the same step;
    /// for gated variants nothing is created when no token is admissible.
    /// When an equivalent intention already holds a job, `intention` is
    /// bound to that job instead.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerStoreError::IntentionNotFound`] when the intention
    /// is no longer live.
    async fn create_job(
        &self,
        intention: IntentionId,
        created_by: Option<WorkerId>,
        policy: &TokenPolicy,
        now: DateTime<Utc>,
    ) -> SchedulerStoreResult<JobBinding>;

    /// Finds a job by identifier.
    async fn find_job(&self, id: JobId) -> SchedulerStoreResult<Option<Job>>;

    /// Claims the oldest unclaimed job bound to an intention of `tag`. A
    /// job qualifies only when none of its intentions waits for a
    /// prerequisite. Jobs of token-gated variants qualify only while one of
    /// their tokens is ready at `now`.
    async fn claim_next_job(
        &self,
        tag: IntentionKindTag,
        worker: WorkerId,
        now: DateTime<Utc>,
    ) -> SchedulerStoreResult<Option<ClaimedJob>>;

    /// Detaches the worker from a job, applying the token cooldown if any.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerStoreError::JobNotHeld`] when the worker does not
    /// hold the job.
    async fn release_job(
        &self,
        job: JobId,
        worker: WorkerId,
        cooldown: Option<TokenCooldown>,
    ) -> SchedulerStoreResult<()>;

    /// Archives every intention bound to the job with `status`, removes
    /// them from their dependents' prerequisites, deletes the job, and
    /// inserts `successors`.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerStoreError::JobNotHeld`] when the worker does not
    /// hold the job.
    async fn finish_job(
        &self,
        job: JobId,
        worker: WorkerId,
        status: ArchiveStatus,
        completed_at: DateTime<Utc>,
        successors: &[Intention],
    ) -> SchedulerStoreResult<Vec<ArchivedIntention>>;

    /// Archives one intention that no worker is running. A job left without
    /// intentions is deleted.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerStoreError::IntentionRunning`] when its job is
    /// claimed, or [`SchedulerStoreError::IntentionNotFound`] when it is not
    /// live.
    async fn archive_intention(
        &self,
        intention: IntentionId,
        status: ArchiveStatus,
        completed_at: DateTime<Utc>,
    ) -> SchedulerStoreResult<ArchivedIntention>;

    /// Returns up to `limit` archives of exactly this kind (any user),
    /// latest completion first.
    async fn find_archives(
        &self,
        kind: &IntentionKind,
        limit: usize,
    ) -> SchedulerStoreResult<Vec<ArchivedIntention>>;
}

/// Errors returned by scheduler store implementations.
#[derive(Debug, Clone, Error)]
pub enum SchedulerStoreError {
    /// The user already has a live intention for this work.
    #[error("user {user} already requested {kind}")]
    DuplicateIntention {
        /// Requesting user.
        user: UserId,
        /// Requested work.
        kind: Box<IntentionKind>,
    },

    /// A token with the same identifier already exists.
    #[error("duplicate token identifier: {0}")]
    DuplicateToken(TokenId),

    /// A worker with the same identifier already exists.
    #[error("duplicate worker identifier: {0}")]
    DuplicateWorker(WorkerId),

    /// The intention is not live.
    #[error("intention not found: {0}")]
    IntentionNotFound(IntentionId),

    /// The user holds no such token.
    #[error("token not found: {0}")]
    TokenNotFound(TokenId),

    /// The job is not claimed by the worker.
    #[error("job {job} is not held by worker {worker}")]
    JobNotHeld {
        /// Job identifier.
        job: JobId,
        /// Worker that tried to act on it.
        worker: WorkerId,
    },

    /// Linking the prerequisite would close a cycle.
    #[error("intention {dependent} cannot wait for {prerequisite}: dependency cycle")]
    DependencyCycle {
        /// Intention that would wait.
        dependent: IntentionId,
        /// Intention it would wait for.
        prerequisite: IntentionId,
    },

    /// A worker is running the intention.
    #[error("intention {0} is running")]
    IntentionRunning(IntentionId),

    /// Persisted data could not be reconstructed into domain types.
    #[error("invalid persisted scheduler data: {0}")]
    InvalidPersistedData(Arc<dyn std::error::Error + Send + Sync>),

    /// Persistence-layer failure.
    #[error("persistence error: {0}")]
    Persistence(Arc<dyn std::error::Error + Send + Sync>),
}

impl SchedulerStoreError {
    /// Wraps persisted-data decoding or validation failures.
    pub fn invalid_persisted_data(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::InvalidPersistedData(Arc::new(err))
    }

    /// Wraps a persistence-layer failure.
    pub fn persistence(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Persistence(Arc::new(err))
    }
}
