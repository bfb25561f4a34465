//! Generic task scheduling engine.
//!
//! Users request work as intentions. Equivalent intentions share one job,
//! token-gated variants are admitted only while their user holds a ready
//! token below its concurrency cap, enrichment stages wait for their raw
//! stage, and periodic variants re-arm themselves after every run. Workers
//! claim jobs atomically, run the registered collector, and archive the
//! outcome. The module follows hexagonal architecture:
//!
//! - Domain types in [`domain`]
//! - Port contracts in [`ports`]
//! - Adapter implementations in [`adapters`]
//! - Orchestration services in [`services`]

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod services;

#[cfg(test)]
mod tests;
