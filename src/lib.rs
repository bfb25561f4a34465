//! Poolsched: a task scheduling engine for rate-limited data collection.
//!
//! The crate turns user requests for backend data collection into
//! background work that runs once, survives worker failures, waits for its
//! prerequisite stages, and is admitted only while the requesting user holds
//! a usable API token for the backend.
//!
//! # Architecture
//!
//! Poolsched follows hexagonal architecture principles:
//!
//! - **Domain**: Pure scheduling rules with no infrastructure dependencies
//! - **Ports**: Abstract trait interfaces for storage, collectors, and logs
//! - **Adapters**: Concrete implementations of ports (memory, `PostgreSQL`,
//!   processes, files)
//!
//! # Modules
//!
//! - [`scheduler`]: Intentions, jobs, tokens, and the services driving them
//! - [`config`]: Worker configuration loading
//! - [`telemetry`]: Tracing subscriber setup

pub mod config;
pub mod scheduler;
pub mod telemetry;
