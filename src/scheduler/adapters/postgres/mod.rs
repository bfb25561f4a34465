//! `PostgreSQL` adapters for scheduler persistence.

mod models;
mod repository;
mod schema;

pub use repository::{PostgresSchedulerStore, SchedulerPgPool};
