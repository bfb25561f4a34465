//! Collector port: the backend-specific work an intention stands for.

use crate::scheduler::domain::{
    CollectorOutcome, IntentionId, IntentionKind, IntentionKindTag, JobId, TokenSecret, UserId,
};
use crate::scheduler::ports::JobLog;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Result type for collector operations.
pub type CollectorResult<T> = Result<T, CollectorError>;

/// Everything a collector needs for one run.
#[derive(Debug, Clone)]
pub struct CollectionRequest {
    /// Job being executed.
    pub job: JobId,
    /// Oldest intention bound to the job; its kind drives the run.
    pub intention: IntentionId,
    /// User that requested the intention.
    pub user: UserId,
    /// Requested work.
    pub kind: IntentionKind,
    /// Ready token secret for gated variants.
    pub token: Option<TokenSecret>,
    /// Per-job log the collector writes its output to.
    pub log: JobLog,
}

/// Backend-specific data collection contract.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Performs the work once and reports how it went.
    ///
    /// Returned errors are treated as fatal outcomes by the caller.
    async fn collect(&self, request: CollectionRequest) -> CollectorResult<CollectorOutcome>;
}

/// Errors returned by collector adapters.
#[derive(Debug, Clone, Error)]
pub enum CollectorError {
    /// No collector is registered for the variant.
    #[error("no collector registered for {0}")]
    NotRegistered(IntentionKindTag),

    /// The collector reported something the scheduler cannot interpret.
    #[error("unexpected collector result: {0}")]
    UnexpectedResult(String),

    /// Collector runtime failure.
    #[error("collector runtime error: {0}")]
    Runtime(Arc<dyn std::error::Error + Send + Sync>),
}

impl CollectorError {
    /// Wraps a runtime error from the collector adapter.
    pub fn runtime(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Runtime(Arc::new(err))
    }
}
