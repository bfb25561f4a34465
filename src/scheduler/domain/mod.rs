//! Domain model for the scheduling engine.
//!
//! Intentions are requests for work, jobs are the shared execution handles
//! workers claim, tokens gate admission to rate-limited backends, and
//! archives record how each intention ended. Nothing in this module touches
//! storage or I/O.

mod archive;
mod backend;
mod error;
mod ids;
mod intention;
mod job;
mod kind;
mod outcome;
mod status;
mod target;
mod token;

pub use archive::{ArchiveStatus, ArchivedIntention, PersistedArchiveData};
pub use backend::{Backend, InstanceName, TokenScope};
pub use error::{
    ParseArchiveStatusError, ParseBackendError, ParseIntentionKindTagError, SchedulerDomainError,
};
pub use ids::{ArchiveId, IntentionId, JobId, ProjectId, TokenId, UserId, WorkerId};
pub use intention::{Intention, IntentionState, PersistedIntentionData};
pub use job::{Job, PersistedJobData, Worker, WorkerName};
pub use kind::{IntentionKind, IntentionKindTag, TokenPolicy};
pub use outcome::{CollectorOutcome, RunOutcome};
pub use status::{AnalysisTarget, ResourceStatus};
pub use target::{ForgeRepository, MeetupGroup, OwnerImport, QuestionTag, RefreshTarget, RepositoryUrl};
pub use token::{PersistedTokenData, Token, TokenSecret};
