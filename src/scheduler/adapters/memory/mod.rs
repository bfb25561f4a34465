//! In-memory adapters for tests and single-process runs.

mod job_log;
mod store;

pub use job_log::InMemoryJobLogSink;
pub use store::InMemorySchedulerStore;
