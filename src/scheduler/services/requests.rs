//! Request side of the scheduler: creating intentions and reporting on them.
//!
//! [`IntentionService`] turns user requests into live intentions, creates
//! the prerequisite chain each variant declares, and answers status and
//! history queries for analysis targets.

use super::{SchedulingError, SchedulingResult};
use crate::scheduler::{
    domain::{
        AnalysisTarget, ArchiveStatus, ArchivedIntention, Intention, IntentionId, IntentionKind,
        IntentionState, ResourceStatus, UserId,
    },
    ports::{SchedulerStore, SchedulerStoreError},
};
use chrono::{DateTime, Utc};
use mockable::Clock;
use std::sync::Arc;

/// A live intention together with its current lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveIntention {
    /// The live intention.
    pub intention: Intention,
    /// Its state derived from the bound job.
    pub state: IntentionState,
}

/// Live and archived work recorded for one analysis target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetHistory {
    /// Live intentions of every stage, newest first.
    pub live: Vec<LiveIntention>,
    /// Archives of every stage, latest completion first.
    pub archives: Vec<ArchivedIntention>,
    /// Completion time of the latest enrichment archive.
    pub last_refresh: Option<DateTime<Utc>>,
}

/// Intention request and reporting service.
#[derive(Clone)]
pub struct IntentionService<S, C>
where
    S: SchedulerStore,
    C: Clock + Send + Sync,
{
    store: Arc<S>,
    clock: Arc<C>,
}

impl<S, C> IntentionService<S, C>
where
    S: SchedulerStore,
    C: Clock + Send + Sync,
{
    /// Creates a new intention service.
    #[must_use]
    pub const fn new(store: Arc<S>, clock: Arc<C>) -> Self {
        Self { store, clock }
    }

    /// Requests work on behalf of `user`.
    ///
    /// Returns the user's live intention for the same kind when one exists.
    /// A new intention is stored with its prerequisites already linked, so
    /// no worker can pick it up before them. Periodic kinds are seeded
    /// through [`Self::ensure_periodic`].
    ///
    /// # Errors
    ///
    /// Returns [`SchedulingError::Store`] when persistence fails.
    pub async fn request(&self, user: UserId, kind: IntentionKind) -> SchedulingResult<Intention> {
        match kind.series_key() {
            Some(series_key) => self.seed_series(user, kind, &series_key).await,
            None => self.request_chain(user, kind).await,
        }
    }

    /// Requests the last stage of a target's pipeline, which pulls in every
    /// earlier stage as a prerequisite.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulingError::Store`] when persistence fails.
    pub async fn analyze(
        &self,
        user: UserId,
        target: &AnalysisTarget,
    ) -> SchedulingResult<Intention> {
        self.request_chain(user, target.enrich_kind()).await
    }

    /// Creates the first member of a periodic series unless one is live.
    /// Non-periodic kinds are requested normally.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulingError::Store`] when persistence fails.
    pub async fn ensure_periodic(
        &self,
        user: UserId,
        kind: IntentionKind,
    ) -> SchedulingResult<Intention> {
        self.request(user, kind).await
    }

    /// Finds or creates the prerequisites `intention` declares, links them,
    /// and returns them. Prerequisites created here are stored with their
    /// own prerequisites in turn.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulingError::Store`] when persistence fails or a link
    /// would close a cycle.
    pub async fn create_dependencies(
        &self,
        intention: &Intention,
    ) -> SchedulingResult<Vec<Intention>> {
        let mut direct = Vec::new();
        for prerequisite_kind in intention.kind().prerequisites() {
            let (prerequisite, _) = self
                .find_or_insert(intention.user(), prerequisite_kind)
                .await?;
            if self
                .store
                .link_dependency(intention.id(), prerequisite.id())
                .await?
            {
                tracing::debug!(
                    intention_id = %intention.id(),
                    prerequisite_id = %prerequisite.id(),
                    "linked prerequisite"
                );
            }
            direct.push(prerequisite);
        }
        Ok(direct)
    }

    /// Derives the status of a target from live work of any user and the
    /// latest archive of each stage.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulingError::Store`] when persistence lookup fails.
    pub async fn status(&self, target: &AnalysisTarget) -> SchedulingResult<ResourceStatus> {
        let [raw, enrich] = target.pipeline();
        let mut states = Vec::new();
        for kind in [&raw, &enrich] {
            for intention in self.store.find_live_by_kind(kind).await? {
                states.push(self.state_of(&intention).await?);
            }
        }
        let latest_raw = self.store.find_archives(&raw, 1).await?;
        let latest_enrich = self.store.find_archives(&enrich, 1).await?;
        Ok(ResourceStatus::derive(
            &states,
            latest_raw.first(),
            latest_enrich.first(),
        ))
    }

    /// Derives the status of several targets in order.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulingError::Store`] when persistence lookup fails.
    pub async fn statuses(
        &self,
        targets: &[AnalysisTarget],
    ) -> SchedulingResult<Vec<(AnalysisTarget, ResourceStatus)>> {
        let mut report = Vec::with_capacity(targets.len());
        for target in targets {
            let status = self.status(target).await?;
            report.push((target.clone(), status));
        }
        Ok(report)
    }

    /// Returns live intentions and up to `archive_limit` archives per stage
    /// for a target.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulingError::Store`] when persistence lookup fails.
    pub async fn history(
        &self,
        target: &AnalysisTarget,
        archive_limit: usize,
    ) -> SchedulingResult<TargetHistory> {
        let [raw, enrich] = target.pipeline();
        let mut live = Vec::new();
        let mut archives = Vec::new();
        for kind in [&raw, &enrich] {
            for intention in self.store.find_live_by_kind(kind).await? {
                let state = self.state_of(&intention).await?;
                live.push(LiveIntention { intention, state });
            }
            archives.extend(self.store.find_archives(kind, archive_limit).await?);
        }
        live.sort_by(|a, b| {
            (b.intention.created_at(), b.intention.id())
                .cmp(&(a.intention.created_at(), a.intention.id()))
        });
        archives.sort_by(|a, b| (b.completed_at(), b.id()).cmp(&(a.completed_at(), a.id())));
        let last_refresh = archives
            .iter()
            .find(|archive| archive.kind() == &enrich)
            .map(ArchivedIntention::completed_at);
        Ok(TargetHistory {
            live,
            archives,
            last_refresh,
        })
    }

    /// Archives the user's unscheduled intentions for a target with
    /// `status`, last stage first. Scheduled intentions are left alone.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulingError::Store`] when persistence fails.
    pub async fn remove_intentions(
        &self,
        user: UserId,
        target: &AnalysisTarget,
        status: ArchiveStatus,
    ) -> SchedulingResult<Vec<ArchivedIntention>> {
        let mut removed = Vec::new();
        for kind in [target.enrich_kind(), target.raw_kind()] {
            let Some(live) = self.store.find_live(user, &kind).await? else {
                continue;
            };
            if !live.is_unscheduled() {
                continue;
            }
            let archived = self
                .store
                .archive_intention(live.id(), status, self.clock.utc())
                .await?;
            tracing::info!(
                intention_id = %live.id(),
                user_id = %user,
                status = %status,
                "removed intention"
            );
            removed.push(archived);
        }
        Ok(removed)
    }

    /// Archives one intention that no worker is running.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulingError::Store`] when the intention is running, not
    /// live, or persistence fails.
    pub async fn archive(
        &self,
        intention: IntentionId,
        status: ArchiveStatus,
    ) -> SchedulingResult<ArchivedIntention> {
        Ok(self
            .store
            .archive_intention(intention, status, self.clock.utc())
            .await?)
    }

    async fn request_chain(
        &self,
        user: UserId,
        kind: IntentionKind,
    ) -> SchedulingResult<Intention> {
        let (intention, _) = self.find_or_insert(user, kind).await?;
        Ok(intention)
    }

    async fn seed_series(
        &self,
        user: UserId,
        kind: IntentionKind,
        series_key: &str,
    ) -> SchedulingResult<Intention> {
        if let Some(member) = self.store.find_series(series_key).await?.into_iter().next() {
            return Ok(member);
        }
        let intention = Intention::new(user, kind, &*self.clock);
        match self.store.insert_intention(&intention).await {
            Ok(()) => {
                tracing::info!(
                    intention_id = %intention.id(),
                    series = series_key,
                    "seeded periodic intention"
                );
                Ok(intention)
            }
            // Another worker seeded the series first.
            Err(err @ SchedulerStoreError::DuplicateIntention { .. }) => {
                match self.store.find_series(series_key).await?.into_iter().next() {
                    Some(member) => Ok(member),
                    None => Err(SchedulingError::Store(err)),
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Returns the live intention and whether this call created it. Missing
    /// prerequisites are stored first, so a new intention is inserted
    /// together with its links.
    async fn find_or_insert(
        &self,
        user: UserId,
        kind: IntentionKind,
    ) -> SchedulingResult<(Intention, bool)> {
        if let Some(live) = self.store.find_live(user, &kind).await? {
            return Ok((live, false));
        }
        let mut resolved: Vec<Intention> = Vec::new();
        for step in prerequisite_order(&kind) {
            let prerequisites = direct_ids(&step, &resolved);
            let (prerequisite, _) = self.find_or_insert_linked(user, step, &prerequisites).await?;
            resolved.push(prerequisite);
        }
        let prerequisites = direct_ids(&kind, &resolved);
        self.find_or_insert_linked(user, kind, &prerequisites).await
    }

    async fn find_or_insert_linked(
        &self,
        user: UserId,
        kind: IntentionKind,
        prerequisites: &[IntentionId],
    ) -> SchedulingResult<(Intention, bool)> {
        if let Some(live) = self.store.find_live(user, &kind).await? {
            return Ok((live, false));
        }
        let mut intention = Intention::new(user, kind, &*self.clock);
        for prerequisite in prerequisites {
            intention.add_prerequisite(*prerequisite)?;
        }
        match self.store.insert_intention(&intention).await {
            Ok(()) => {
                tracing::info!(
                    intention_id = %intention.id(),
                    user_id = %user,
                    kind = %intention.kind(),
                    prerequisites = prerequisites.len(),
                    "intention requested"
                );
                Ok((intention, true))
            }
            // A concurrent request for the same work won the insert.
            Err(err @ SchedulerStoreError::DuplicateIntention { .. }) => {
                match self.store.find_live(user, intention.kind()).await? {
                    Some(live) => Ok((live, false)),
                    None => Err(SchedulingError::Store(err)),
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn state_of(&self, intention: &Intention) -> SchedulingResult<IntentionState> {
        let Some(job_id) = intention.job() else {
            return Ok(IntentionState::Unscheduled);
        };
        let job = self.store.find_job(job_id).await?;
        Ok(IntentionState::of(job.as_ref()))
    }
}

/// Every transitive prerequisite of `kind`, each listed after its own
/// prerequisites. `kind` itself is not included.
fn prerequisite_order(kind: &IntentionKind) -> Vec<IntentionKind> {
    let mut ordered: Vec<IntentionKind> = Vec::new();
    let mut stack: Vec<(IntentionKind, bool)> = kind
        .prerequisites()
        .into_iter()
        .map(|prerequisite| (prerequisite, false))
        .collect();
    while let Some((current, expanded)) = stack.pop() {
        if ordered.contains(&current) {
            continue;
        }
        if expanded {
            ordered.push(current);
            continue;
        }
        let nested = current.prerequisites();
        stack.push((current, true));
        stack.extend(nested.into_iter().map(|prerequisite| (prerequisite, false)));
    }
    ordered
}

fn direct_ids(kind: &IntentionKind, resolved: &[Intention]) -> Vec<IntentionId> {
    kind.prerequisites()
        .iter()
        .filter_map(|needed| {
            resolved
                .iter()
                .find(|intention| intention.kind() == needed)
                .map(Intention::id)
        })
        .collect()
}
