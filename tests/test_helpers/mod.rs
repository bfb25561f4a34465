//! Shared clocks, collectors, and builders for integration tests.

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeDelta, TimeZone, Utc};
use mockable::Clock;
use poolsched::scheduler::{
    adapters::memory::{InMemoryJobLogSink, InMemorySchedulerStore},
    domain::{
        AnalysisTarget, CollectorOutcome, ForgeRepository, InstanceName, IntentionKindTag,
        RepositoryUrl, WorkerId,
    },
    ports::{CollectionRequest, Collector, CollectorResult},
    services::{
        CollectorRegistry, ExecutionService, IntentionService, Poller, SchedulingService,
        TokenService,
    },
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Clock that only moves when a test advances it.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Creates a clock frozen at a fixed morning instant.
    pub fn new() -> Self {
        let start = Utc
            .with_ymd_and_hms(2026, 3, 1, 9, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        Self {
            now: Mutex::new(start),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: TimeDelta) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        self.now.lock().map_or_else(|_| Utc::now(), |now| *now)
    }
}

/// What a [`ScriptedCollector`] saw on one call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub tag: IntentionKindTag,
    pub token_fingerprint: Option<String>,
}

/// Collector replaying queued outcomes; succeeds once the queue is empty.
#[derive(Debug, Default)]
pub struct ScriptedCollector {
    outcomes: Mutex<VecDeque<CollectorOutcome>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the outcome of the next call.
    pub fn push(&self, outcome: CollectorOutcome) {
        if let Ok(mut outcomes) = self.outcomes.lock() {
            outcomes.push_back(outcome);
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Collector for ScriptedCollector {
    async fn collect(&self, request: CollectionRequest) -> CollectorResult<CollectorOutcome> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                tag: request.kind.tag(),
                token_fingerprint: request.token.as_ref().map(|secret| secret.fingerprint()),
            });
        }
        let _written = request.log.write_line(&format!("collecting {}", request.kind));
        let next = self
            .outcomes
            .lock()
            .ok()
            .and_then(|mut outcomes| outcomes.pop_front());
        Ok(next.unwrap_or(CollectorOutcome::Success))
    }
}

pub type Store = InMemorySchedulerStore;
pub type Logs = InMemoryJobLogSink;

/// Every service wired to one in-memory store, one clock, and one
/// scripted collector registered for all variants.
pub struct Engine {
    pub store: Arc<Store>,
    pub clock: Arc<ManualClock>,
    pub logs: Arc<Logs>,
    pub collector: Arc<ScriptedCollector>,
    pub requests: IntentionService<Store, ManualClock>,
    pub tokens: TokenService<Store, ManualClock>,
    pub scheduling: SchedulingService<Store, ManualClock>,
    pub execution: ExecutionService<Store, ManualClock, Logs>,
}

impl Engine {
    pub fn new() -> Self {
        Self::with_collectors(IntentionKindTag::ALL)
    }

    /// Wires the scripted collector for `tags` only.
    pub fn with_collectors(tags: impl IntoIterator<Item = IntentionKindTag>) -> Self {
        let store = Arc::new(InMemorySchedulerStore::new());
        let clock = Arc::new(ManualClock::new());
        let logs = Arc::new(InMemoryJobLogSink::new());
        let collector = Arc::new(ScriptedCollector::new());
        let registry = tags
            .into_iter()
            .fold(CollectorRegistry::new(), |registry, tag| {
                registry.with_collector(tag, Arc::clone(&collector) as Arc<dyn Collector>)
            });
        Self {
            requests: IntentionService::new(Arc::clone(&store), Arc::clone(&clock)),
            tokens: TokenService::new(Arc::clone(&store), Arc::clone(&clock)),
            scheduling: SchedulingService::new(Arc::clone(&store), Arc::clone(&clock)),
            execution: ExecutionService::new(
                Arc::clone(&store),
                Arc::clone(&clock),
                Arc::new(registry),
                Arc::clone(&logs),
            ),
            store,
            clock,
            logs,
            collector,
        }
    }

    /// Returns a poller for `worker` over every variant with a collector.
    pub fn poller(&self, worker: WorkerId) -> Poller<Store, ManualClock, Logs> {
        Poller::new(worker, self.scheduling.clone(), self.execution.clone())
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// Plain git repository target.
pub fn git_target(url: &str) -> Result<AnalysisTarget, eyre::Report> {
    Ok(AnalysisTarget::Git(RepositoryUrl::new(url)?))
}

/// GitHub repository target on the public instance.
pub fn github_target(owner: &str, repo: &str) -> Result<AnalysisTarget, eyre::Report> {
    Ok(AnalysisTarget::GitHub(ForgeRepository::new(
        InstanceName::new("GitHub")?,
        owner,
        repo,
    )?))
}
