//! In-memory scheduler store for tests and single-process deployments.
//!
//! All state sits behind one lock, so every port method is atomic with
//! respect to every other.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::scheduler::{
    domain::{
        ArchiveStatus, ArchivedIntention, Intention, IntentionId, IntentionKind, IntentionKindTag,
        Job, JobId, Token, TokenId, TokenPolicy, TokenScope, UserId, Worker, WorkerId,
    },
    ports::{
        ClaimedJob, JobBinding, SchedulerStore, SchedulerStoreError, SchedulerStoreResult,
        TokenCooldown,
    },
};

/// Thread-safe in-memory scheduler store.
#[derive(Debug, Clone, Default)]
pub struct InMemorySchedulerStore {
    state: Arc<RwLock<InMemorySchedulerState>>,
}

#[derive(Debug, Default)]
struct InMemorySchedulerState {
    workers: HashMap<WorkerId, Worker>,
    tokens: HashMap<TokenId, Token>,
    jobs: HashMap<JobId, Job>,
    intentions: HashMap<IntentionId, Intention>,
    // prerequisite -> intentions waiting for it
    dependents: HashMap<IntentionId, BTreeSet<IntentionId>>,
    archives: Vec<ArchivedIntention>,
}

impl InMemorySchedulerStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> SchedulerStoreResult<RwLockReadGuard<'_, InMemorySchedulerState>> {
        self.state.read().map_err(|err| {
            SchedulerStoreError::persistence(std::io::Error::other(err.to_string()))
        })
    }

    fn write(&self) -> SchedulerStoreResult<RwLockWriteGuard<'_, InMemorySchedulerState>> {
        self.state.write().map_err(|err| {
            SchedulerStoreError::persistence(std::io::Error::other(err.to_string()))
        })
    }
}

fn oldest_first(intentions: &mut [Intention]) {
    intentions.sort_by(|a, b| (a.created_at(), a.id()).cmp(&(b.created_at(), b.id())));
}

impl InMemorySchedulerState {
    fn attached_jobs(&self, token: TokenId) -> usize {
        self.jobs
            .values()
            .filter(|job| job.tokens().contains(&token))
            .count()
    }

    fn admissible_tokens(
        &self,
        user: UserId,
        scope: &TokenScope,
        now: DateTime<Utc>,
        enforce_cap: bool,
    ) -> Vec<Token> {
        let mut tokens: Vec<Token> = self
            .tokens
            .values()
            .filter(|token| token.user() == user && token.scope() == scope)
            .filter(|token| token.is_admissible(now, self.attached_jobs(token.id()), enforce_cap))
            .cloned()
            .collect();
        tokens.sort_by_key(|token| (token.created_at(), token.id()));
        tokens
    }

    fn tokens_for_policy(
        &self,
        user: UserId,
        policy: &TokenPolicy,
        now: DateTime<Utc>,
    ) -> Option<Vec<TokenId>> {
        match policy {
            TokenPolicy::Ungated => Some(Vec::new()),
            TokenPolicy::Gated { scope, enforce_cap } => {
                let tokens = self.admissible_tokens(user, scope, now, *enforce_cap);
                (!tokens.is_empty()).then(|| tokens.iter().map(Token::id).collect())
            }
        }
    }

    fn live_intention(&self, id: IntentionId) -> SchedulerStoreResult<&Intention> {
        self.intentions
            .get(&id)
            .ok_or(SchedulerStoreError::IntentionNotFound(id))
    }

    fn bound_job(&self, intention: &Intention) -> Option<Job> {
        intention
            .job()
            .and_then(|job_id| self.jobs.get(&job_id))
            .cloned()
    }

    fn intentions_on_job(&self, job: JobId) -> Vec<Intention> {
        let mut bound: Vec<Intention> = self
            .intentions
            .values()
            .filter(|intention| intention.job() == Some(job))
            .cloned()
            .collect();
        oldest_first(&mut bound);
        bound
    }

    fn bind(
        &mut self,
        intention: IntentionId,
        job: JobId,
        tokens: Vec<TokenId>,
    ) -> SchedulerStoreResult<Job> {
        let bound = self
            .jobs
            .get_mut(&job)
            .ok_or_else(|| SchedulerStoreError::persistence(std::io::Error::other("job vanished")))?;
        bound.attach_tokens(tokens);
        let snapshot = bound.clone();
        self.intentions
            .get_mut(&intention)
            .ok_or(SchedulerStoreError::IntentionNotFound(intention))?
            .bind_job(job);
        Ok(snapshot)
    }

    // A prerequisite-to-be that already waits, directly or not, for the
    // dependent would close a cycle.
    fn waits_for(&self, from: IntentionId, target: IntentionId) -> bool {
        let mut stack = vec![from];
        let mut seen = BTreeSet::new();
        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(intention) = self.intentions.get(&current) {
                stack.extend(intention.previous().iter().copied());
            }
        }
        false
    }

    // Non-periodic work is unique per user and kind; a periodic series has
    // at most one live member across all users.
    fn insert(&mut self, intention: &Intention) -> SchedulerStoreResult<()> {
        let series_key = intention.kind().series_key();
        let duplicate = self.intentions.values().any(|live| match &series_key {
            Some(key) => live.kind().series_key().as_ref() == Some(key),
            None => live.user() == intention.user() && live.kind() == intention.kind(),
        });
        if duplicate || self.intentions.contains_key(&intention.id()) {
            return Err(SchedulerStoreError::DuplicateIntention {
                user: intention.user(),
                kind: Box::new(intention.kind().clone()),
            });
        }
        let mut stored = intention.clone();
        for prerequisite in intention.previous() {
            if self.intentions.contains_key(prerequisite) {
                self.dependents
                    .entry(*prerequisite)
                    .or_default()
                    .insert(intention.id());
            } else {
                stored.remove_prerequisite(*prerequisite);
            }
        }
        self.intentions.insert(intention.id(), stored);
        Ok(())
    }

    fn equivalent_job(&self, requested: &Intention) -> Option<JobId> {
        if !requested.kind().shares_jobs() {
            return None;
        }
        let mut equivalent: Vec<Intention> = self
            .intentions
            .values()
            .filter(|other| other.id() != requested.id() && other.kind() == requested.kind())
            .filter(|other| other.job().is_some())
            .cloned()
            .collect();
        oldest_first(&mut equivalent);
        equivalent.first().and_then(Intention::job)
    }

    // Unclaimed jobs of gated variants that lose their last token go back
    // to unscheduled so a later token can admit them again.
    fn revoke(&mut self, token: TokenId) {
        self.tokens.remove(&token);
        let mut touched = Vec::new();
        for job in self.jobs.values_mut() {
            if job.tokens().contains(&token) {
                job.detach_token(token);
                touched.push(job.id());
            }
        }
        for job_id in touched {
            let stranded = self
                .jobs
                .get(&job_id)
                .is_some_and(|job| !job.is_claimed() && job.tokens().is_empty());
            let gated = self.intentions.values().any(|intention| {
                intention.job() == Some(job_id) && intention.kind().tag().requires_tokens()
            });
            if !(stranded && gated) {
                continue;
            }
            for intention in self.intentions.values_mut() {
                if intention.job() == Some(job_id) {
                    intention.unbind_job();
                }
            }
            self.jobs.remove(&job_id);
        }
    }

    fn archive(
        &mut self,
        id: IntentionId,
        status: ArchiveStatus,
        completed_at: DateTime<Utc>,
    ) -> SchedulerStoreResult<ArchivedIntention> {
        let intention = self
            .intentions
            .remove(&id)
            .ok_or(SchedulerStoreError::IntentionNotFound(id))?;
        for dependent in self.dependents.remove(&id).unwrap_or_default() {
            if let Some(waiting) = self.intentions.get_mut(&dependent) {
                waiting.remove_prerequisite(id);
            }
        }
        for prerequisite in intention.previous() {
            if let Some(waiting) = self.dependents.get_mut(prerequisite) {
                waiting.remove(&id);
            }
        }
        let archived = ArchivedIntention::capture(&intention, status, completed_at);
        self.archives.push(archived.clone());
        Ok(archived)
    }

    fn held_job(&self, job: JobId, worker: WorkerId) -> SchedulerStoreResult<&Job> {
        self.jobs
            .get(&job)
            .filter(|held| held.worker() == Some(worker))
            .ok_or(SchedulerStoreError::JobNotHeld { job, worker })
    }

    fn is_claimable(&self, job: &Job, tag: IntentionKindTag, now: DateTime<Utc>) -> bool {
        if job.is_claimed() {
            return false;
        }
        let bound: Vec<&Intention> = self
            .intentions
            .values()
            .filter(|intention| intention.job() == Some(job.id()))
            .collect();
        let has_tag = bound.iter().any(|intention| intention.kind().tag() == tag);
        let waiting = bound.iter().any(|intention| !intention.previous().is_empty());
        let ready_token = !tag.requires_tokens()
            || job
                .tokens()
                .iter()
                .filter_map(|token| self.tokens.get(token))
                .any(|token| token.is_ready(now));
        has_tag && !waiting && ready_token
    }
}

#[async_trait]
impl SchedulerStore for InMemorySchedulerStore {
    async fn register_worker(&self, worker: &Worker) -> SchedulerStoreResult<()> {
        let mut state = self.write()?;
        if state.workers.contains_key(&worker.id()) {
            return Err(SchedulerStoreError::DuplicateWorker(worker.id()));
        }
        state.workers.insert(worker.id(), worker.clone());
        Ok(())
    }

    async fn list_workers(&self) -> SchedulerStoreResult<Vec<Worker>> {
        let state = self.read()?;
        let mut workers: Vec<Worker> = state.workers.values().cloned().collect();
        workers.sort_by_key(|worker| (worker.registered_at(), worker.id()));
        Ok(workers)
    }

    async fn store_token(&self, token: &Token) -> SchedulerStoreResult<()> {
        let mut state = self.write()?;
        if state.tokens.contains_key(&token.id()) {
            return Err(SchedulerStoreError::DuplicateToken(token.id()));
        }
        state.tokens.insert(token.id(), token.clone());
        Ok(())
    }

    async fn revoke_token(&self, user: UserId, token: TokenId) -> SchedulerStoreResult<()> {
        let mut state = self.write()?;
        let owned = state
            .tokens
            .get(&token)
            .is_some_and(|stored| stored.user() == user);
        if !owned {
            return Err(SchedulerStoreError::TokenNotFound(token));
        }
        state.revoke(token);
        Ok(())
    }

    async fn list_tokens(&self, user: UserId) -> SchedulerStoreResult<Vec<Token>> {
        let state = self.read()?;
        let mut tokens: Vec<Token> = state
            .tokens
            .values()
            .filter(|token| token.user() == user)
            .cloned()
            .collect();
        tokens.sort_by_key(|token| (token.created_at(), token.id()));
        Ok(tokens)
    }

    async fn job_tokens(&self, job: JobId) -> SchedulerStoreResult<Vec<Token>> {
        let state = self.read()?;
        let Some(held) = state.jobs.get(&job) else {
            return Ok(Vec::new());
        };
        let mut tokens: Vec<Token> = held
            .tokens()
            .iter()
            .filter_map(|token| state.tokens.get(token))
            .cloned()
            .collect();
        tokens.sort_by_key(|token| (token.created_at(), token.id()));
        Ok(tokens)
    }

    async fn admissible_tokens(
        &self,
        user: UserId,
        scope: &TokenScope,
        now: DateTime<Utc>,
        enforce_cap: bool,
    ) -> SchedulerStoreResult<Vec<Token>> {
        let state = self.read()?;
        Ok(state.admissible_tokens(user, scope, now, enforce_cap))
    }

    async fn insert_intention(&self, intention: &Intention) -> SchedulerStoreResult<()> {
        let mut state = self.write()?;
        state.insert(intention)
    }

    async fn find_intention(&self, id: IntentionId) -> SchedulerStoreResult<Option<Intention>> {
        let state = self.read()?;
        Ok(state.intentions.get(&id).cloned())
    }

    async fn find_live(
        &self,
        user: UserId,
        kind: &IntentionKind,
    ) -> SchedulerStoreResult<Option<Intention>> {
        let state = self.read()?;
        let mut matching: Vec<Intention> = state
            .intentions
            .values()
            .filter(|intention| intention.user() == user && intention.kind() == kind)
            .cloned()
            .collect();
        oldest_first(&mut matching);
        Ok(matching.into_iter().next())
    }

    async fn find_live_by_kind(&self, kind: &IntentionKind) -> SchedulerStoreResult<Vec<Intention>> {
        let state = self.read()?;
        let mut matching: Vec<Intention> = state
            .intentions
            .values()
            .filter(|intention| intention.kind() == kind)
            .cloned()
            .collect();
        oldest_first(&mut matching);
        matching.reverse();
        Ok(matching)
    }

    async fn find_series(&self, series_key: &str) -> SchedulerStoreResult<Vec<Intention>> {
        let state = self.read()?;
        let mut members: Vec<Intention> = state
            .intentions
            .values()
            .filter(|intention| intention.kind().series_key().as_deref() == Some(series_key))
            .cloned()
            .collect();
        oldest_first(&mut members);
        Ok(members)
    }

    async fn is_series_running(&self, series_key: &str) -> SchedulerStoreResult<bool> {
        let state = self.read()?;
        Ok(state.intentions.values().any(|intention| {
            intention.kind().series_key().as_deref() == Some(series_key)
                && state
                    .bound_job(intention)
                    .is_some_and(|job| job.is_claimed())
        }))
    }

    async fn link_dependency(
        &self,
        dependent: IntentionId,
        prerequisite: IntentionId,
    ) -> SchedulerStoreResult<bool> {
        let mut state = self.write()?;
        state.live_intention(dependent)?;
        state.live_intention(prerequisite)?;
        if state.waits_for(prerequisite, dependent) {
            return Err(SchedulerStoreError::DependencyCycle {
                dependent,
                prerequisite,
            });
        }
        let added = state
            .intentions
            .get_mut(&dependent)
            .ok_or(SchedulerStoreError::IntentionNotFound(dependent))?
            .add_prerequisite(prerequisite)
            .map_err(|_| SchedulerStoreError::DependencyCycle {
                dependent,
                prerequisite,
            })?;
        state
            .dependents
            .entry(prerequisite)
            .or_default()
            .insert(dependent);
        Ok(added)
    }

    async fn find_unscheduled(
        &self,
        tag: IntentionKindTag,
        user: UserId,
        now: DateTime<Utc>,
        limit: usize,
    ) -> SchedulerStoreResult<Vec<Intention>> {
        let state = self.read()?;
        let mut eligible: Vec<Intention> = state
            .intentions
            .values()
            .filter(|intention| {
                intention.kind().tag() == tag
                    && intention.user() == user
                    && intention.is_eligible(now)
            })
            .cloned()
            .collect();
        oldest_first(&mut eligible);
        eligible.truncate(limit);
        Ok(eligible)
    }

    async fn users_with_unscheduled(
        &self,
        tag: IntentionKindTag,
        now: DateTime<Utc>,
    ) -> SchedulerStoreResult<Vec<UserId>> {
        let state = self.read()?;
        let mut eligible: Vec<Intention> = state
            .intentions
            .values()
            .filter(|intention| intention.kind().tag() == tag && intention.is_eligible(now))
            .cloned()
            .collect();
        oldest_first(&mut eligible);
        let mut users = Vec::new();
        for intention in eligible {
            if !users.contains(&intention.user()) {
                users.push(intention.user());
            }
        }
        Ok(users)
    }

    async fn attach_to_equivalent_job(
        &self,
        intention: IntentionId,
        policy: &TokenPolicy,
        now: DateTime<Utc>,
    ) -> SchedulerStoreResult<JobBinding> {
        let mut state = self.write()?;
        let requested = state.live_intention(intention)?.clone();
        if let Some(job) = state.bound_job(&requested) {
            return Ok(JobBinding::Bound(job));
        }
        let Some(job) = state.equivalent_job(&requested) else {
            return Ok(JobBinding::NoEquivalentJob);
        };
        let Some(tokens) = state.tokens_for_policy(requested.user(), policy, now) else {
            return Ok(JobBinding::NoTokenAvailable);
        };
        state.bind(intention, job, tokens).map(JobBinding::Bound)
    }

    async fn create_job(
        &self,
        intention: IntentionId,
        created_by: Option<WorkerId>,
        policy: &TokenPolicy,
        now: DateTime<Utc>,
    ) -> SchedulerStoreResult<JobBinding> {
        let mut state = self.write()?;
        let requested = state.live_intention(intention)?.clone();
        if let Some(job) = state.bound_job(&requested) {
            return Ok(JobBinding::Bound(job));
        }
        let Some(tokens) = state.tokens_for_policy(requested.user(), policy, now) else {
            return Ok(JobBinding::NoTokenAvailable);
        };
        if let Some(job) = state.equivalent_job(&requested) {
            return state.bind(intention, job, tokens).map(JobBinding::Bound);
        }
        let job = Job::new(created_by, now);
        let job_id = job.id();
        state.jobs.insert(job_id, job);
        state.bind(intention, job_id, tokens).map(JobBinding::Bound)
    }

    async fn find_job(&self, id: JobId) -> SchedulerStoreResult<Option<Job>> {
        let state = self.read()?;
        Ok(state.jobs.get(&id).cloned())
    }

    async fn claim_next_job(
        &self,
        tag: IntentionKindTag,
        worker: WorkerId,
        now: DateTime<Utc>,
    ) -> SchedulerStoreResult<Option<ClaimedJob>> {
        let mut state = self.write()?;
        let next = state
            .jobs
            .values()
            .filter(|job| state.is_claimable(job, tag, now))
            .min_by_key(|job| (job.created_at(), job.id()))
            .map(Job::id);
        let Some(job_id) = next else {
            return Ok(None);
        };
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| SchedulerStoreError::persistence(std::io::Error::other("job vanished")))?;
        job.claim(worker)
            .map_err(SchedulerStoreError::invalid_persisted_data)?;
        let claimed = job.clone();
        let intentions = state.intentions_on_job(job_id);
        Ok(Some(ClaimedJob {
            job: claimed,
            intentions,
        }))
    }

    async fn release_job(
        &self,
        job: JobId,
        worker: WorkerId,
        cooldown: Option<TokenCooldown>,
    ) -> SchedulerStoreResult<()> {
        let mut state = self.write()?;
        state.held_job(job, worker)?;
        if let Some(TokenCooldown { token, reset }) = cooldown
            && let Some(stored) = state.tokens.get_mut(&token)
        {
            stored.cool_down_until(reset);
        }
        if let Some(held) = state.jobs.get_mut(&job) {
            held.release();
        }
        Ok(())
    }

    async fn finish_job(
        &self,
        job: JobId,
        worker: WorkerId,
        status: ArchiveStatus,
        completed_at: DateTime<Utc>,
        successors: &[Intention],
    ) -> SchedulerStoreResult<Vec<ArchivedIntention>> {
        let mut state = self.write()?;
        state.held_job(job, worker)?;
        let bound = state.intentions_on_job(job);
        let mut archived = Vec::with_capacity(bound.len());
        for intention in bound {
            archived.push(state.archive(intention.id(), status, completed_at)?);
        }
        state.jobs.remove(&job);
        for successor in successors {
            state.insert(successor)?;
        }
        Ok(archived)
    }

    async fn archive_intention(
        &self,
        intention: IntentionId,
        status: ArchiveStatus,
        completed_at: DateTime<Utc>,
    ) -> SchedulerStoreResult<ArchivedIntention> {
        let mut state = self.write()?;
        let live = state.live_intention(intention)?.clone();
        let job = state.bound_job(&live);
        if job.as_ref().is_some_and(Job::is_claimed) {
            return Err(SchedulerStoreError::IntentionRunning(intention));
        }
        let archived = state.archive(intention, status, completed_at)?;
        if let Some(emptied) = job
            && state.intentions_on_job(emptied.id()).is_empty()
        {
            state.jobs.remove(&emptied.id());
        }
        Ok(archived)
    }

    async fn find_archives(
        &self,
        kind: &IntentionKind,
        limit: usize,
    ) -> SchedulerStoreResult<Vec<ArchivedIntention>> {
        let state = self.read()?;
        let mut matching: Vec<ArchivedIntention> = state
            .archives
            .iter()
            .filter(|archive| archive.kind() == kind)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.completed_at().cmp(&a.completed_at()));
        matching.truncate(limit);
        Ok(matching)
    }
}
