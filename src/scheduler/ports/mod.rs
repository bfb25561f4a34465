//! Port contracts for the scheduling engine.
//!
//! Ports define infrastructure-agnostic interfaces used by scheduler
//! services.

pub mod collector;
pub mod job_log;
pub mod store;

pub use collector::{CollectionRequest, Collector, CollectorError, CollectorResult};
pub use job_log::{JobLog, JobLogError, JobLogGuard, JobLogResult, JobLogSink};
pub use store::{
    ClaimedJob, JobBinding, SchedulerStore, SchedulerStoreError, SchedulerStoreResult,
    TokenCooldown,
};
