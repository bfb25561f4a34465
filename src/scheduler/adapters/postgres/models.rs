//! Diesel row models for scheduler persistence.

use super::schema::{
    archived_intentions, intention_dependencies, intentions, job_tokens, jobs, tokens, workers,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::Value;

/// Query result row for workers.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = workers)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct WorkerRow {
    /// Worker identifier.
    pub id: uuid::Uuid,
    /// Display name.
    pub name: String,
    /// Registration timestamp.
    pub registered_at: DateTime<Utc>,
}

/// Insert model for workers.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = workers)]
pub struct NewWorkerRow {
    /// Worker identifier.
    pub id: uuid::Uuid,
    /// Display name.
    pub name: String,
    /// Registration timestamp.
    pub registered_at: DateTime<Utc>,
}

/// Query result row for tokens.
#[derive(Debug, Clone, Queryable, QueryableByName, Selectable)]
#[diesel(table_name = tokens)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct TokenRow {
    /// Token identifier.
    #[diesel(sql_type = diesel::sql_types::Uuid)]
    pub id: uuid::Uuid,
    /// Owning user.
    #[diesel(sql_type = diesel::sql_types::Uuid)]
    pub user_id: uuid::Uuid,
    /// Backend identifier.
    #[diesel(sql_type = diesel::sql_types::Varchar)]
    pub backend: String,
    /// Optional service instance.
    #[diesel(sql_type = diesel::sql_types::Nullable<diesel::sql_types::Varchar>)]
    pub instance: Option<String>,
    /// Secret credential.
    #[diesel(sql_type = diesel::sql_types::Text)]
    pub secret: String,
    /// Cooldown instant.
    #[diesel(sql_type = diesel::sql_types::Timestamptz)]
    pub reset: DateTime<Utc>,
    /// Concurrency cap.
    #[diesel(sql_type = diesel::sql_types::Integer)]
    pub max_concurrent_jobs: i32,
    /// Creation timestamp.
    #[diesel(sql_type = diesel::sql_types::Timestamptz)]
    pub created_at: DateTime<Utc>,
}

/// Insert model for tokens.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = tokens)]
pub struct NewTokenRow {
    /// Token identifier.
    pub id: uuid::Uuid,
    /// Owning user.
    pub user_id: uuid::Uuid,
    /// Backend identifier.
    pub backend: String,
    /// Optional service instance.
    pub instance: Option<String>,
    /// Secret credential.
    pub secret: String,
    /// Cooldown instant.
    pub reset: DateTime<Utc>,
    /// Concurrency cap.
    pub max_concurrent_jobs: i32,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Query result row for jobs.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = jobs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct JobRow {
    /// Job identifier.
    pub id: uuid::Uuid,
    /// Claiming worker.
    pub worker_id: Option<uuid::Uuid>,
    /// Creating worker.
    pub created_by: Option<uuid::Uuid>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Insert model for jobs.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = jobs)]
pub struct NewJobRow {
    /// Job identifier.
    pub id: uuid::Uuid,
    /// Claiming worker.
    pub worker_id: Option<uuid::Uuid>,
    /// Creating worker.
    pub created_by: Option<uuid::Uuid>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Insert model for job/token bindings.
#[derive(Debug, Clone, Copy, Insertable)]
#[diesel(table_name = job_tokens)]
pub struct JobTokenRow {
    /// Job identifier.
    pub job_id: uuid::Uuid,
    /// Token identifier.
    pub token_id: uuid::Uuid,
}

/// Query result row for live intentions.
#[derive(Debug, Clone, Queryable, QueryableByName, Selectable)]
#[diesel(table_name = intentions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct IntentionRow {
    /// Intention identifier.
    #[diesel(sql_type = diesel::sql_types::Uuid)]
    pub id: uuid::Uuid,
    /// Requesting user.
    #[diesel(sql_type = diesel::sql_types::Uuid)]
    pub user_id: uuid::Uuid,
    /// Variant discriminator.
    #[diesel(sql_type = diesel::sql_types::Varchar)]
    pub kind_tag: String,
    /// Full variant payload.
    #[diesel(sql_type = diesel::sql_types::Jsonb)]
    pub kind: Value,
    /// Bound job.
    #[diesel(sql_type = diesel::sql_types::Nullable<diesel::sql_types::Uuid>)]
    pub job_id: Option<uuid::Uuid>,
    /// Earliest run instant.
    #[diesel(sql_type = diesel::sql_types::Nullable<diesel::sql_types::Timestamptz>)]
    pub scheduled: Option<DateTime<Utc>>,
    /// Creation timestamp.
    #[diesel(sql_type = diesel::sql_types::Timestamptz)]
    pub created_at: DateTime<Utc>,
}

/// Insert model for live intentions.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = intentions)]
pub struct NewIntentionRow {
    /// Intention identifier.
    pub id: uuid::Uuid,
    /// Requesting user.
    pub user_id: uuid::Uuid,
    /// Variant discriminator.
    pub kind_tag: String,
    /// Full variant payload.
    pub kind: Value,
    /// Periodic series key.
    pub series_key: Option<String>,
    /// Bound job.
    pub job_id: Option<uuid::Uuid>,
    /// Earliest run instant.
    pub scheduled: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Insert model for prerequisite edges.
#[derive(Debug, Clone, Copy, Insertable)]
#[diesel(table_name = intention_dependencies)]
pub struct DependencyRow {
    /// Intention that waits.
    pub dependent_id: uuid::Uuid,
    /// Intention it waits for.
    pub prerequisite_id: uuid::Uuid,
}

/// Query result and insert row for archives.
#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = archived_intentions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ArchiveRow {
    /// Archive identifier.
    pub id: uuid::Uuid,
    /// Identifier the intention had while live.
    pub intention_id: uuid::Uuid,
    /// Requesting user.
    pub user_id: uuid::Uuid,
    /// Variant discriminator.
    pub kind_tag: String,
    /// Full variant payload.
    pub kind: Value,
    /// Intention creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Archival timestamp.
    pub completed_at: DateTime<Utc>,
    /// Final status.
    pub status: String,
    /// Executing job.
    pub job_id: Option<uuid::Uuid>,
}

/// Single identifier returned by raw SQL queries.
#[derive(Debug, Clone, Copy, QueryableByName)]
pub struct IdRow {
    /// Selected identifier.
    #[diesel(sql_type = diesel::sql_types::Uuid)]
    pub id: uuid::Uuid,
}

/// Single boolean returned by raw SQL queries.
#[derive(Debug, Clone, Copy, QueryableByName)]
pub struct FlagRow {
    /// Selected flag.
    #[diesel(sql_type = diesel::sql_types::Bool)]
    pub found: bool,
}
