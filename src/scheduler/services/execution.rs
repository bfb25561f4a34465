//! Execution side: claiming jobs, running collectors, and recording results.
//!
//! A run ends in exactly one store step. Completed and fatal runs archive
//! every intention on the job (and insert the successor of a periodic
//! intention) through `finish_job`; deferred runs release the job through
//! `release_job`, cooling down the token that hit its rate limit.

use super::{CollectorRegistry, SchedulingResult};
use crate::scheduler::{
    domain::{
        CollectorOutcome, Intention, IntentionKindTag, Job, JobId, RunOutcome, Token, WorkerId,
    },
    ports::{
        ClaimedJob, CollectionRequest, CollectorError, CollectorResult, JobLog, JobLogGuard,
        JobLogSink, SchedulerStore, TokenCooldown,
    },
};
use chrono::{DateTime, TimeDelta, Utc};
use mockable::Clock;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Delay between the runs of each periodic variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodicIntervals {
    auto_refresh: TimeDelta,
    merge_identities: TimeDelta,
}

impl PeriodicIntervals {
    /// Creates intervals for the periodic variants.
    #[must_use]
    pub const fn new(auto_refresh: TimeDelta, merge_identities: TimeDelta) -> Self {
        Self {
            auto_refresh,
            merge_identities,
        }
    }

    /// Returns the interval for a periodic variant.
    #[must_use]
    pub const fn interval_for(&self, tag: IntentionKindTag) -> Option<TimeDelta> {
        match tag {
            IntentionKindTag::AutoRefresh => Some(self.auto_refresh),
            IntentionKindTag::MergeIdentities => Some(self.merge_identities),
            _ => None,
        }
    }
}

impl Default for PeriodicIntervals {
    fn default() -> Self {
        Self::new(TimeDelta::hours(1), TimeDelta::hours(1))
    }
}

enum Admission {
    Ungated,
    Ready(Token),
    CoolingDown,
    Missing,
}

/// Job claiming and execution service.
pub struct ExecutionService<S, C, L>
where
    S: SchedulerStore,
    C: Clock + Send + Sync,
    L: JobLogSink,
{
    store: Arc<S>,
    clock: Arc<C>,
    collectors: Arc<CollectorRegistry>,
    logs: Arc<L>,
    intervals: PeriodicIntervals,
}

impl<S, C, L> Clone for ExecutionService<S, C, L>
where
    S: SchedulerStore,
    C: Clock + Send + Sync,
    L: JobLogSink,
{
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            collectors: Arc::clone(&self.collectors),
            logs: Arc::clone(&self.logs),
            intervals: self.intervals,
        }
    }
}

impl<S, C, L> ExecutionService<S, C, L>
where
    S: SchedulerStore,
    C: Clock + Send + Sync,
    L: JobLogSink,
{
    /// Creates a new execution service with default periodic intervals.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        clock: Arc<C>,
        collectors: Arc<CollectorRegistry>,
        logs: Arc<L>,
    ) -> Self {
        Self {
            store,
            clock,
            collectors,
            logs,
            intervals: PeriodicIntervals::default(),
        }
    }

    /// Sets the periodic intervals.
    #[must_use]
    pub const fn with_intervals(mut self, intervals: PeriodicIntervals) -> Self {
        self.intervals = intervals;
        self
    }

    /// Returns the variants a collector is registered for.
    #[must_use]
    pub fn collector_tags(&self) -> Vec<IntentionKindTag> {
        self.collectors.tags()
    }

    /// Claims the oldest runnable job of `tag` for `worker`.
    ///
    /// # Errors
    ///
    /// Returns [`super::SchedulingError::Store`] when persistence fails.
    pub async fn claim(
        &self,
        tag: IntentionKindTag,
        worker: WorkerId,
    ) -> SchedulingResult<Option<ClaimedJob>> {
        let claimed = self
            .store
            .claim_next_job(tag, worker, self.clock.utc())
            .await?;
        if let Some(found) = &claimed {
            info!(
                job_id = %found.job.id(),
                worker_id = %worker,
                intentions = found.intentions.len(),
                "claimed job"
            );
        }
        Ok(claimed)
    }

    /// Claims and runs the next job of `tag`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`super::SchedulingError::Store`] when persistence fails.
    pub async fn run_next(
        &self,
        tag: IntentionKindTag,
        worker: WorkerId,
    ) -> SchedulingResult<Option<(JobId, RunOutcome)>> {
        let Some(claimed) = self.claim(tag, worker).await? else {
            return Ok(None);
        };
        let job_id = claimed.job.id();
        let outcome = self.run(worker, claimed).await?;
        Ok(Some((job_id, outcome)))
    }

    /// Runs a claimed job once and records the result.
    ///
    /// The collector is called for the oldest bound intention; every
    /// intention on the job shares the outcome. Collector errors and
    /// missing collectors end the run as fatal.
    ///
    /// # Errors
    ///
    /// Returns [`super::SchedulingError::Store`] when recording the result
    /// fails. The job then stays claimed.
    #[instrument(skip(self, claimed), fields(job_id = %claimed.job.id()))]
    pub async fn run(&self, worker: WorkerId, claimed: ClaimedJob) -> SchedulingResult<RunOutcome> {
        let ClaimedJob { job, intentions } = claimed;
        let started_at = self.clock.utc();
        let Some(lead) = intentions.first() else {
            warn!("claimed job has no intentions");
            let outcome = RunOutcome::Fatal {
                reason: "job has no intentions".to_owned(),
            };
            return self.conclude(&job, worker, None, outcome, started_at).await;
        };

        let guard = JobLogGuard::new(self.open_log(job.id()));
        let admission = self.admission(&job, lead).await?;
        let token = match admission {
            Admission::Missing => {
                let outcome = RunOutcome::Fatal {
                    reason: format!("no token bound to job for {}", lead.kind()),
                };
                record(&guard.handle(), &outcome);
                return self
                    .conclude(&job, worker, Some(lead), outcome, started_at)
                    .await;
            }
            Admission::CoolingDown => {
                self.store.release_job(job.id(), worker, None).await?;
                record(&guard.handle(), &RunOutcome::Deferred);
                info!("every token of the job is cooling down; job released");
                return Ok(RunOutcome::Deferred);
            }
            Admission::Ungated => None,
            Admission::Ready(ready) => Some(ready),
        };

        let result = self.invoke(&job, lead, token.as_ref(), guard.handle()).await;
        let outcome = match result {
            Ok(CollectorOutcome::Success) => RunOutcome::Completed,
            Ok(CollectorOutcome::FatalError { reason }) => RunOutcome::Fatal { reason },
            Ok(CollectorOutcome::CooldownMinutes { minutes }) => {
                if let Some(used) = &token {
                    record(&guard.handle(), &RunOutcome::Deferred);
                    return self.cool_down(&job, worker, used, minutes).await;
                }
                RunOutcome::Fatal {
                    reason: CollectorError::UnexpectedResult(format!(
                        "cooldown of {minutes} minutes for a variant without tokens"
                    ))
                    .to_string(),
                }
            }
            Err(err) => {
                error!(error = %err, "collector failed");
                RunOutcome::Fatal {
                    reason: err.to_string(),
                }
            }
        };
        record(&guard.handle(), &outcome);
        self.conclude(&job, worker, Some(lead), outcome, started_at)
            .await
    }

    fn open_log(&self, job: JobId) -> JobLog {
        self.logs.open(job).unwrap_or_else(|err| {
            warn!(job_id = %job, error = %err, "job log unavailable; output discarded");
            JobLog::discard(job)
        })
    }

    async fn admission(&self, job: &Job, lead: &Intention) -> SchedulingResult<Admission> {
        if !lead.kind().tag().requires_tokens() {
            return Ok(Admission::Ungated);
        }
        let tokens = self.store.job_tokens(job.id()).await?;
        if tokens.is_empty() {
            return Ok(Admission::Missing);
        }
        let now = self.clock.utc();
        Ok(tokens
            .into_iter()
            .find(|token| token.is_ready(now))
            .map_or(Admission::CoolingDown, Admission::Ready))
    }

    async fn invoke(
        &self,
        job: &Job,
        lead: &Intention,
        token: Option<&Token>,
        log: JobLog,
    ) -> CollectorResult<CollectorOutcome> {
        let collector = self.collectors.get(lead.kind().tag())?;
        if let Some(used) = token {
            info!(token = %used.secret().fingerprint(), "running collector");
        } else {
            info!("running collector");
        }
        collector
            .collect(CollectionRequest {
                job: job.id(),
                intention: lead.id(),
                user: lead.user(),
                kind: lead.kind().clone(),
                token: token.map(|used| used.secret().clone()),
                log,
            })
            .await
    }

    async fn cool_down(
        &self,
        job: &Job,
        worker: WorkerId,
        token: &Token,
        minutes: u32,
    ) -> SchedulingResult<RunOutcome> {
        let reset = self.clock.utc() + TimeDelta::minutes(i64::from(minutes));
        self.store
            .release_job(
                job.id(),
                worker,
                Some(TokenCooldown {
                    token: token.id(),
                    reset,
                }),
            )
            .await?;
        info!(
            token = %token.secret().fingerprint(),
            reset = %reset,
            "token rate limited; job released"
        );
        Ok(RunOutcome::Deferred)
    }

    async fn conclude(
        &self,
        job: &Job,
        worker: WorkerId,
        lead: Option<&Intention>,
        outcome: RunOutcome,
        started_at: DateTime<Utc>,
    ) -> SchedulingResult<RunOutcome> {
        let Some(status) = outcome.archive_status() else {
            return Ok(outcome);
        };
        let now = self.clock.utc();
        let successors: Vec<Intention> = lead
            .and_then(|periodic| {
                let interval = self.intervals.interval_for(periodic.kind().tag())?;
                let kind = periodic
                    .kind()
                    .rearmed(outcome == RunOutcome::Completed, started_at);
                Some(
                    Intention::new(periodic.user(), kind, &*self.clock)
                        .with_scheduled(now + interval),
                )
            })
            .into_iter()
            .collect();
        let archived = self
            .store
            .finish_job(job.id(), worker, status, now, &successors)
            .await?;
        match &outcome {
            RunOutcome::Fatal { reason } => warn!(
                archived = archived.len(),
                reason = %reason,
                "job failed"
            ),
            _ => info!(archived = archived.len(), "job completed"),
        }
        for successor in &successors {
            info!(
                intention_id = %successor.id(),
                scheduled = ?successor.scheduled(),
                "re-armed periodic intention"
            );
        }
        Ok(outcome)
    }
}

fn record(log: &JobLog, outcome: &RunOutcome) {
    let line = match outcome {
        RunOutcome::Completed => "outcome: completed".to_owned(),
        RunOutcome::Deferred => "outcome: deferred".to_owned(),
        RunOutcome::Fatal { reason } => format!("outcome: fatal: {reason}"),
    };
    if let Err(err) = log.write_line(&line) {
        warn!(job_id = %log.job(), error = %err, "failed to write job log");
    }
}
