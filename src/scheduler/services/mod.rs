//! Application services for the scheduling engine.

mod error;
mod execution;
mod poller;
mod registry;
mod requests;
mod scheduling;
mod tokens;
mod workers;

pub use error::{SchedulingError, SchedulingResult};
pub use execution::{ExecutionService, PeriodicIntervals};
pub use poller::{PollReport, Poller};
pub use registry::CollectorRegistry;
pub use requests::{IntentionService, LiveIntention, TargetHistory};
pub use scheduling::SchedulingService;
pub use tokens::{LinkTokenRequest, TokenService};
pub use workers::WorkerRegistryService;
