//! One worker's polling pass over every variant.

use super::{ExecutionService, SchedulingResult, SchedulingService};
use crate::scheduler::{
    domain::{IntentionKindTag, JobId, RunOutcome, WorkerId},
    ports::{JobLogSink, SchedulerStore},
};
use mockable::Clock;

/// What one polling pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Intentions bound to jobs.
    pub scheduled: usize,
    /// Jobs run, with their outcomes.
    pub runs: Vec<(JobId, RunOutcome)>,
}

impl PollReport {
    /// Returns whether the pass found nothing to do.
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.scheduled == 0 && self.runs.is_empty()
    }
}

/// Schedules and runs work for one worker.
///
/// Each pass visits the variants in order: pending intentions of the variant
/// are bound to jobs, then at most one job of the variant is claimed and
/// run.
pub struct Poller<S, C, L>
where
    S: SchedulerStore,
    C: Clock + Send + Sync,
    L: JobLogSink,
{
    worker: WorkerId,
    scheduling: SchedulingService<S, C>,
    execution: ExecutionService<S, C, L>,
    tags: Vec<IntentionKindTag>,
    batch_size: usize,
}

impl<S, C, L> Poller<S, C, L>
where
    S: SchedulerStore,
    C: Clock + Send + Sync,
    L: JobLogSink,
{
    /// Default number of intentions selected per user and variant.
    pub const DEFAULT_BATCH_SIZE: usize = 10;

    /// Creates a poller covering every variant the execution service has a
    /// collector for. Work of other variants is left for workers that can
    /// run it.
    #[must_use]
    pub fn new(
        worker: WorkerId,
        scheduling: SchedulingService<S, C>,
        execution: ExecutionService<S, C, L>,
    ) -> Self {
        let tags = execution.collector_tags();
        Self {
            worker,
            scheduling,
            execution,
            tags,
            batch_size: Self::DEFAULT_BATCH_SIZE,
        }
    }

    /// Restricts polling to the given variants. Variants without a
    /// registered collector are skipped.
    #[must_use]
    pub fn with_tags(mut self, tags: impl IntoIterator<Item = IntentionKindTag>) -> Self {
        let runnable = self.execution.collector_tags();
        self.tags = tags
            .into_iter()
            .filter(|tag| runnable.contains(tag))
            .collect();
        self
    }

    /// Sets how many intentions are selected per user and variant.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Returns the polling worker.
    #[must_use]
    pub const fn worker(&self) -> WorkerId {
        self.worker
    }

    /// Runs one pass over every polled variant.
    ///
    /// # Errors
    ///
    /// Returns [`super::SchedulingError::Store`] when persistence fails.
    pub async fn poll_once(&self) -> SchedulingResult<PollReport> {
        let mut report = PollReport::default();
        for tag in &self.tags {
            let bound = self
                .scheduling
                .schedule_pending(*tag, Some(self.worker), self.batch_size)
                .await?;
            report.scheduled = report.scheduled.saturating_add(bound);
            if let Some(run) = self.execution.run_next(*tag, self.worker).await? {
                report.runs.push(run);
            }
        }
        Ok(report)
    }
}
