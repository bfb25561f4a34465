//! Scheduling side: binding eligible intentions to jobs.
//!
//! Selection is a pure read. Binding goes through store operations that
//! re-check token admission in the same atomic step, so two workers
//! scheduling at once never over-admit a token.

use super::SchedulingResult;
use crate::scheduler::{
    domain::{Intention, IntentionKindTag, TokenPolicy, UserId, WorkerId},
    ports::{JobBinding, SchedulerStore},
};
use mockable::Clock;
use std::sync::Arc;

/// Intention selection and job admission service.
pub struct SchedulingService<S, C>
where
    S: SchedulerStore,
    C: Clock + Send + Sync,
{
    store: Arc<S>,
    clock: Arc<C>,
}

impl<S, C> Clone for SchedulingService<S, C>
where
    S: SchedulerStore,
    C: Clock + Send + Sync,
{
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<S, C> SchedulingService<S, C>
where
    S: SchedulerStore,
    C: Clock + Send + Sync,
{
    /// Creates a new scheduling service.
    #[must_use]
    pub const fn new(store: Arc<S>, clock: Arc<C>) -> Self {
        Self { store, clock }
    }

    /// Returns up to `limit` of the user's intentions of `tag` that could be
    /// bound to a job now, oldest first.
    ///
    /// An intention qualifies when it is unscheduled, has no remaining
    /// prerequisite, is due, belongs to a periodic series with no running
    /// member (for periodic variants), and its user holds an admissible
    /// token (for gated variants).
    ///
    /// # Errors
    ///
    /// Returns [`super::SchedulingError::Store`] when persistence lookup
    /// fails.
    pub async fn selectable(
        &self,
        tag: IntentionKindTag,
        user: UserId,
        limit: usize,
    ) -> SchedulingResult<Vec<Intention>> {
        let now = self.clock.utc();
        let candidates = self.store.find_unscheduled(tag, user, now, limit).await?;
        let mut selected = Vec::with_capacity(candidates.len());
        for intention in candidates {
            if let Some(series_key) = intention.kind().series_key()
                && self.store.is_series_running(&series_key).await?
            {
                continue;
            }
            if let TokenPolicy::Gated { scope, enforce_cap } = intention.kind().token_policy() {
                let tokens = self
                    .store
                    .admissible_tokens(user, &scope, now, enforce_cap)
                    .await?;
                if tokens.is_empty() {
                    continue;
                }
            }
            selected.push(intention);
        }
        Ok(selected)
    }

    /// Binds `intention` to the job of an equivalent live intention, adding
    /// the user's admissible tokens to that job.
    ///
    /// Periodic intentions never share jobs. A gated intention whose user
    /// has no admissible token is left unscheduled with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`super::SchedulingError::Store`] when persistence fails.
    pub async fn find_equivalent_running_job(
        &self,
        intention: &Intention,
    ) -> SchedulingResult<JobBinding> {
        if !intention.kind().shares_jobs() {
            return Ok(JobBinding::NoEquivalentJob);
        }
        let binding = self
            .store
            .attach_to_equivalent_job(
                intention.id(),
                &intention.kind().token_policy(),
                self.clock.utc(),
            )
            .await?;
        match &binding {
            JobBinding::Bound(job) => tracing::info!(
                intention_id = %intention.id(),
                job_id = %job.id(),
                "attached intention to equivalent job"
            ),
            JobBinding::NoTokenAvailable => tracing::warn!(
                intention_id = %intention.id(),
                user_id = %intention.user(),
                kind = %intention.kind(),
                "equivalent job found but no token of the user is admissible"
            ),
            JobBinding::NoEquivalentJob => {}
        }
        Ok(binding)
    }

    /// Creates a job for `intention`, admitting every ready token of its
    /// user in the same atomic step. Nothing is created for a gated
    /// intention when no token is admissible.
    ///
    /// # Errors
    ///
    /// Returns [`super::SchedulingError::Store`] when persistence fails.
    pub async fn acquire_job(
        &self,
        intention: &Intention,
        worker: Option<WorkerId>,
    ) -> SchedulingResult<JobBinding> {
        let binding = self
            .store
            .create_job(
                intention.id(),
                worker,
                &intention.kind().token_policy(),
                self.clock.utc(),
            )
            .await?;
        if let JobBinding::Bound(job) = &binding {
            tracing::info!(
                intention_id = %intention.id(),
                job_id = %job.id(),
                tokens = job.tokens().len(),
                "created job"
            );
        }
        Ok(binding)
    }

    /// Binds one selected intention: an equivalent job first, a new job
    /// otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`super::SchedulingError::Store`] when persistence fails.
    pub async fn schedule(
        &self,
        intention: &Intention,
        worker: Option<WorkerId>,
    ) -> SchedulingResult<JobBinding> {
        match self.find_equivalent_running_job(intention).await? {
            JobBinding::NoEquivalentJob => self.acquire_job(intention, worker).await,
            other => Ok(other),
        }
    }

    /// Binds up to `batch_size` selectable intentions of `tag` per user to
    /// jobs and returns how many were bound.
    ///
    /// # Errors
    ///
    /// Returns [`super::SchedulingError::Store`] when persistence fails.
    pub async fn schedule_pending(
        &self,
        tag: IntentionKindTag,
        worker: Option<WorkerId>,
        batch_size: usize,
    ) -> SchedulingResult<usize> {
        let users = self
            .store
            .users_with_unscheduled(tag, self.clock.utc())
            .await?;
        let mut bound = 0_usize;
        for user in users {
            for intention in self.selectable(tag, user, batch_size).await? {
                if matches!(
                    self.schedule(&intention, worker).await?,
                    JobBinding::Bound(_)
                ) {
                    bound = bound.saturating_add(1);
                }
            }
        }
        Ok(bound)
    }
}
