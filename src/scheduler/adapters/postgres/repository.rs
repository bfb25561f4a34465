//! `PostgreSQL` store implementation for the scheduling engine.
//!
//! Every multi-row port operation runs in one transaction. Claims lock the
//! candidate job with `FOR UPDATE SKIP LOCKED` so concurrent workers never
//! pick the same row, and admission locks the user's tokens while counting
//! their jobs. Prerequisite edges cascade on delete, so archiving an
//! intention clears it from its dependents in the same statement. Binding
//! an intention that may share a job holds a transaction-scoped advisory
//! lock on its kind, so equivalent intentions never get separate jobs.

use super::{
    models::{
        ArchiveRow, DependencyRow, FlagRow, IdRow, IntentionRow, JobRow, JobTokenRow,
        NewIntentionRow, NewJobRow, NewTokenRow, NewWorkerRow, TokenRow, WorkerRow,
    },
    schema::{
        archived_intentions, intention_dependencies, intentions, job_tokens, jobs, tokens, workers,
    },
};
use crate::scheduler::{
    domain::{
        ArchiveId, ArchiveStatus, ArchivedIntention, Backend, InstanceName, Intention, IntentionId,
        IntentionKind, IntentionKindTag, Job, JobId, ParseIntentionKindTagError,
        PersistedArchiveData, PersistedIntentionData, PersistedJobData, PersistedTokenData, Token,
        TokenId, TokenPolicy, TokenScope, TokenSecret, UserId, Worker, WorkerId, WorkerName,
    },
    ports::{
        ClaimedJob, JobBinding, SchedulerStore, SchedulerStoreError, SchedulerStoreResult,
        TokenCooldown,
    },
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::sql_types;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

/// `PostgreSQL` connection pool type used by scheduler adapters.
pub type SchedulerPgPool = Pool<ConnectionManager<PgConnection>>;

const INTENTION_COLUMNS: &str =
    "i.id, i.user_id, i.kind_tag, i.kind, i.job_id, i.scheduled, i.created_at";

/// `PostgreSQL`-backed scheduler store.
#[derive(Debug, Clone)]
pub struct PostgresSchedulerStore {
    pool: SchedulerPgPool,
}

impl PostgresSchedulerStore {
    /// Creates a new store from a `PostgreSQL` connection pool.
    #[must_use]
    pub const fn new(pool: SchedulerPgPool) -> Self {
        Self { pool }
    }

    /// Returns a reference to the connection pool.
    #[must_use]
    pub const fn pool(&self) -> &SchedulerPgPool {
        &self.pool
    }

    async fn run_blocking<F, T>(&self, f: F) -> SchedulerStoreResult<T>
    where
        F: FnOnce(&mut PgConnection) -> SchedulerStoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut connection = pool.get().map_err(SchedulerStoreError::persistence)?;
            f(&mut connection)
        })
        .await
        .map_err(SchedulerStoreError::persistence)?
    }

    async fn run_transaction<F, T>(&self, f: F) -> SchedulerStoreResult<T>
    where
        F: FnOnce(&mut PgConnection) -> SchedulerStoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.run_blocking(move |connection| connection.transaction(f))
            .await
    }
}

impl From<DieselError> for SchedulerStoreError {
    fn from(err: DieselError) -> Self {
        Self::persistence(err)
    }
}

const fn is_unique_violation(err: &DieselError) -> bool {
    matches!(
        err,
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)
    )
}

#[async_trait]
impl SchedulerStore for PostgresSchedulerStore {
    async fn register_worker(&self, worker: &Worker) -> SchedulerStoreResult<()> {
        let worker_id = worker.id();
        let row = NewWorkerRow {
            id: worker_id.into_inner(),
            name: worker.name().as_str().to_owned(),
            registered_at: worker.registered_at(),
        };
        self.run_blocking(move |connection| {
            diesel::insert_into(workers::table)
                .values(&row)
                .execute(connection)
                .map_err(|err| {
                    if is_unique_violation(&err) {
                        SchedulerStoreError::DuplicateWorker(worker_id)
                    } else {
                        SchedulerStoreError::persistence(err)
                    }
                })?;
            Ok(())
        })
        .await
    }

    async fn list_workers(&self) -> SchedulerStoreResult<Vec<Worker>> {
        self.run_blocking(|connection| {
            workers::table
                .order((workers::registered_at.asc(), workers::id.asc()))
                .select(WorkerRow::as_select())
                .load::<WorkerRow>(connection)?
                .into_iter()
                .map(row_to_worker)
                .collect()
        })
        .await
    }

    async fn store_token(&self, token: &Token) -> SchedulerStoreResult<()> {
        let token_id = token.id();
        let row = token_to_row(token)?;
        self.run_blocking(move |connection| {
            diesel::insert_into(tokens::table)
                .values(&row)
                .execute(connection)
                .map_err(|err| {
                    if is_unique_violation(&err) {
                        SchedulerStoreError::DuplicateToken(token_id)
                    } else {
                        SchedulerStoreError::persistence(err)
                    }
                })?;
            Ok(())
        })
        .await
    }

    async fn revoke_token(&self, user: UserId, token: TokenId) -> SchedulerStoreResult<()> {
        let gated: Vec<String> = IntentionKindTag::ALL
            .iter()
            .filter(|tag| tag.requires_tokens())
            .map(|tag| tag.as_str().to_owned())
            .collect();
        self.run_transaction(move |tx| {
            tokens::table
                .filter(tokens::id.eq(token.into_inner()))
                .filter(tokens::user_id.eq(user.into_inner()))
                .select(tokens::id)
                .for_update()
                .first::<uuid::Uuid>(tx)
                .optional()?
                .ok_or(SchedulerStoreError::TokenNotFound(token))?;
            let stranded: Vec<uuid::Uuid> = diesel::sql_query(concat!(
                "SELECT j.id FROM jobs j JOIN job_tokens jt ON jt.job_id = j.id ",
                "WHERE jt.token_id = $1 AND j.worker_id IS NULL ",
                "AND NOT EXISTS (SELECT 1 FROM job_tokens other ",
                "WHERE other.job_id = j.id AND other.token_id <> $1) ",
                "AND EXISTS (SELECT 1 FROM intentions i ",
                "WHERE i.job_id = j.id AND i.kind_tag = ANY($2)) ",
                "FOR UPDATE OF j",
            ))
            .bind::<sql_types::Uuid, _>(token.into_inner())
            .bind::<sql_types::Array<sql_types::Varchar>, _>(gated)
            .load::<IdRow>(tx)?
            .into_iter()
            .map(|row| row.id)
            .collect();
            diesel::delete(tokens::table.filter(tokens::id.eq(token.into_inner()))).execute(tx)?;
            if !stranded.is_empty() {
                diesel::update(intentions::table.filter(intentions::job_id.eq_any(&stranded)))
                    .set(intentions::job_id.eq(None::<uuid::Uuid>))
                    .execute(tx)?;
                diesel::delete(jobs::table.filter(jobs::id.eq_any(&stranded))).execute(tx)?;
            }
            Ok(())
        })
        .await
    }

    async fn list_tokens(&self, user: UserId) -> SchedulerStoreResult<Vec<Token>> {
        self.run_blocking(move |connection| {
            tokens::table
                .filter(tokens::user_id.eq(user.into_inner()))
                .order((tokens::created_at.asc(), tokens::id.asc()))
                .select(TokenRow::as_select())
                .load::<TokenRow>(connection)?
                .into_iter()
                .map(row_to_token)
                .collect()
        })
        .await
    }

    async fn job_tokens(&self, job: JobId) -> SchedulerStoreResult<Vec<Token>> {
        self.run_blocking(move |connection| {
            tokens::table
                .inner_join(job_tokens::table)
                .filter(job_tokens::job_id.eq(job.into_inner()))
                .order((tokens::created_at.asc(), tokens::id.asc()))
                .select(TokenRow::as_select())
                .load::<TokenRow>(connection)?
                .into_iter()
                .map(row_to_token)
                .collect()
        })
        .await
    }

    async fn admissible_tokens(
        &self,
        user: UserId,
        scope: &TokenScope,
        now: DateTime<Utc>,
        enforce_cap: bool,
    ) -> SchedulerStoreResult<Vec<Token>> {
        let lookup_scope = scope.clone();
        self.run_blocking(move |connection| {
            select_admissible_tokens(connection, user, &lookup_scope, now, enforce_cap, false)?
                .into_iter()
                .map(row_to_token)
                .collect()
        })
        .await
    }

    async fn insert_intention(&self, intention: &Intention) -> SchedulerStoreResult<()> {
        let pending = intention.clone();
        self.run_transaction(move |tx| insert_intention_rows(tx, &pending))
            .await
    }

    async fn find_intention(&self, id: IntentionId) -> SchedulerStoreResult<Option<Intention>> {
        self.run_blocking(move |connection| {
            let row = intentions::table
                .filter(intentions::id.eq(id.into_inner()))
                .select(IntentionRow::as_select())
                .first::<IntentionRow>(connection)
                .optional()?;
            row.map(|found| load_intention(connection, found))
                .transpose()
        })
        .await
    }

    async fn find_live(
        &self,
        user: UserId,
        kind: &IntentionKind,
    ) -> SchedulerStoreResult<Option<Intention>> {
        let kind_json = kind_to_value(kind)?;
        self.run_blocking(move |connection| {
            let row = intentions::table
                .filter(intentions::user_id.eq(user.into_inner()))
                .filter(intentions::kind.eq(kind_json))
                .order((intentions::created_at.asc(), intentions::id.asc()))
                .select(IntentionRow::as_select())
                .first::<IntentionRow>(connection)
                .optional()?;
            row.map(|found| load_intention(connection, found))
                .transpose()
        })
        .await
    }

    async fn find_live_by_kind(&self, kind: &IntentionKind) -> SchedulerStoreResult<Vec<Intention>> {
        let kind_json = kind_to_value(kind)?;
        self.run_blocking(move |connection| {
            let rows = intentions::table
                .filter(intentions::kind.eq(kind_json))
                .order((intentions::created_at.desc(), intentions::id.desc()))
                .select(IntentionRow::as_select())
                .load::<IntentionRow>(connection)?;
            load_intentions(connection, rows)
        })
        .await
    }

    async fn find_series(&self, series_key: &str) -> SchedulerStoreResult<Vec<Intention>> {
        let key = series_key.to_owned();
        self.run_blocking(move |connection| {
            let rows = intentions::table
                .filter(intentions::series_key.eq(key))
                .order((intentions::created_at.asc(), intentions::id.asc()))
                .select(IntentionRow::as_select())
                .load::<IntentionRow>(connection)?;
            load_intentions(connection, rows)
        })
        .await
    }

    async fn is_series_running(&self, series_key: &str) -> SchedulerStoreResult<bool> {
        let key = series_key.to_owned();
        self.run_blocking(move |connection| {
            let row = diesel::sql_query(concat!(
                "SELECT EXISTS (SELECT 1 FROM intentions i JOIN jobs j ON j.id = i.job_id ",
                "WHERE i.series_key = $1 AND j.worker_id IS NOT NULL) AS found",
            ))
            .bind::<sql_types::Varchar, _>(key)
            .get_result::<FlagRow>(connection)?;
            Ok(row.found)
        })
        .await
    }

    async fn link_dependency(
        &self,
        dependent: IntentionId,
        prerequisite: IntentionId,
    ) -> SchedulerStoreResult<bool> {
        self.run_transaction(move |tx| {
            let cycle = SchedulerStoreError::DependencyCycle {
                dependent,
                prerequisite,
            };
            if dependent == prerequisite {
                return Err(cycle);
            }
            for id in [dependent, prerequisite] {
                lock_intention(tx, id)?.ok_or(SchedulerStoreError::IntentionNotFound(id))?;
            }
            let closes_cycle = diesel::sql_query(concat!(
                "WITH RECURSIVE upstream(id) AS (",
                "SELECT $1::uuid ",
                "UNION ",
                "SELECT d.prerequisite_id FROM intention_dependencies d ",
                "JOIN upstream u ON d.dependent_id = u.id",
                ") SELECT EXISTS (SELECT 1 FROM upstream WHERE id = $2) AS found",
            ))
            .bind::<sql_types::Uuid, _>(prerequisite.into_inner())
            .bind::<sql_types::Uuid, _>(dependent.into_inner())
            .get_result::<FlagRow>(tx)?;
            if closes_cycle.found {
                return Err(cycle);
            }
            let inserted = diesel::insert_into(intention_dependencies::table)
                .values(DependencyRow {
                    dependent_id: dependent.into_inner(),
                    prerequisite_id: prerequisite.into_inner(),
                })
                .on_conflict_do_nothing()
                .execute(tx)?;
            Ok(inserted == 1)
        })
        .await
    }

    async fn find_unscheduled(
        &self,
        tag: IntentionKindTag,
        user: UserId,
        now: DateTime<Utc>,
        limit: usize,
    ) -> SchedulerStoreResult<Vec<Intention>> {
        let row_limit = i64::try_from(limit).map_err(SchedulerStoreError::persistence)?;
        self.run_blocking(move |connection| {
            let rows = diesel::sql_query(format!(
                concat!(
                    "SELECT {} FROM intentions i ",
                    "WHERE i.kind_tag = $1 AND i.user_id = $2 AND i.job_id IS NULL ",
                    "AND (i.scheduled IS NULL OR i.scheduled <= $3) ",
                    "AND NOT EXISTS (SELECT 1 FROM intention_dependencies d ",
                    "WHERE d.dependent_id = i.id) ",
                    "ORDER BY i.created_at, i.id LIMIT $4",
                ),
                INTENTION_COLUMNS
            ))
            .bind::<sql_types::Varchar, _>(tag.as_str())
            .bind::<sql_types::Uuid, _>(user.into_inner())
            .bind::<sql_types::Timestamptz, _>(now)
            .bind::<sql_types::BigInt, _>(row_limit)
            .load::<IntentionRow>(connection)?;
            load_intentions(connection, rows)
        })
        .await
    }

    async fn users_with_unscheduled(
        &self,
        tag: IntentionKindTag,
        now: DateTime<Utc>,
    ) -> SchedulerStoreResult<Vec<UserId>> {
        self.run_blocking(move |connection| {
            let rows = diesel::sql_query(concat!(
                "SELECT i.user_id AS id FROM intentions i ",
                "WHERE i.kind_tag = $1 AND i.job_id IS NULL ",
                "AND (i.scheduled IS NULL OR i.scheduled <= $2) ",
                "AND NOT EXISTS (SELECT 1 FROM intention_dependencies d ",
                "WHERE d.dependent_id = i.id) ",
                "GROUP BY i.user_id ORDER BY MIN(i.created_at)",
            ))
            .bind::<sql_types::Varchar, _>(tag.as_str())
            .bind::<sql_types::Timestamptz, _>(now)
            .load::<IdRow>(connection)?;
            Ok(rows.into_iter().map(|row| UserId::from_uuid(row.id)).collect())
        })
        .await
    }

    async fn attach_to_equivalent_job(
        &self,
        intention: IntentionId,
        policy: &TokenPolicy,
        now: DateTime<Utc>,
    ) -> SchedulerStoreResult<JobBinding> {
        let admission = policy.clone();
        self.run_transaction(move |tx| {
            let row = lock_intention(tx, intention)?
                .ok_or(SchedulerStoreError::IntentionNotFound(intention))?;
            if let Some(job_id) = row.job_id {
                return load_job_by_id(tx, job_id).map(JobBinding::Bound);
            }
            let Some(job_id) = lock_equivalent_job(tx, &row)? else {
                return Ok(JobBinding::NoEquivalentJob);
            };
            let user = UserId::from_uuid(row.user_id);
            let Some(token_ids) = tokens_for_policy(tx, user, &admission, now)? else {
                return Ok(JobBinding::NoTokenAvailable);
            };
            bind_intention(tx, row.id, job_id, &token_ids)?;
            load_job_by_id(tx, job_id).map(JobBinding::Bound)
        })
        .await
    }

    async fn create_job(
        &self,
        intention: IntentionId,
        created_by: Option<WorkerId>,
        policy: &TokenPolicy,
        now: DateTime<Utc>,
    ) -> SchedulerStoreResult<JobBinding> {
        let admission = policy.clone();
        self.run_transaction(move |tx| {
            let row = lock_intention(tx, intention)?
                .ok_or(SchedulerStoreError::IntentionNotFound(intention))?;
            if let Some(job_id) = row.job_id {
                return load_job_by_id(tx, job_id).map(JobBinding::Bound);
            }
            let equivalent = lock_equivalent_job(tx, &row)?;
            let user = UserId::from_uuid(row.user_id);
            let Some(token_ids) = tokens_for_policy(tx, user, &admission, now)? else {
                return Ok(JobBinding::NoTokenAvailable);
            };
            if let Some(job_id) = equivalent {
                bind_intention(tx, row.id, job_id, &token_ids)?;
                return load_job_by_id(tx, job_id).map(JobBinding::Bound);
            }
            let job = Job::new(created_by, now);
            diesel::insert_into(jobs::table)
                .values(NewJobRow {
                    id: job.id().into_inner(),
                    worker_id: None,
                    created_by: created_by.map(WorkerId::into_inner),
                    created_at: job.created_at(),
                })
                .execute(tx)?;
            bind_intention(tx, row.id, job.id().into_inner(), &token_ids)?;
            load_job_by_id(tx, job.id().into_inner()).map(JobBinding::Bound)
        })
        .await
    }

    async fn find_job(&self, id: JobId) -> SchedulerStoreResult<Option<Job>> {
        self.run_blocking(move |connection| {
            let row = jobs::table
                .filter(jobs::id.eq(id.into_inner()))
                .select(JobRow::as_select())
                .first::<JobRow>(connection)
                .optional()?;
            row.map(|found| load_job(connection, found)).transpose()
        })
        .await
    }

    async fn claim_next_job(
        &self,
        tag: IntentionKindTag,
        worker: WorkerId,
        now: DateTime<Utc>,
    ) -> SchedulerStoreResult<Option<ClaimedJob>> {
        self.run_transaction(move |tx| {
            let candidate = diesel::sql_query(concat!(
                "SELECT j.id FROM jobs j ",
                "WHERE j.worker_id IS NULL ",
                "AND EXISTS (SELECT 1 FROM intentions i ",
                "WHERE i.job_id = j.id AND i.kind_tag = $1) ",
                "AND NOT EXISTS (SELECT 1 FROM intentions w ",
                "JOIN intention_dependencies d ON d.dependent_id = w.id ",
                "WHERE w.job_id = j.id) ",
                "AND (NOT $2 OR EXISTS (SELECT 1 FROM job_tokens jt ",
                "JOIN tokens t ON t.id = jt.token_id ",
                "WHERE jt.job_id = j.id AND t.reset <= $3)) ",
                "ORDER BY j.created_at, j.id LIMIT 1 ",
                "FOR UPDATE OF j SKIP LOCKED",
            ))
            .bind::<sql_types::Varchar, _>(tag.as_str())
            .bind::<sql_types::Bool, _>(tag.requires_tokens())
            .bind::<sql_types::Timestamptz, _>(now)
            .get_result::<IdRow>(tx)
            .optional()?;
            let Some(IdRow { id: job_id }) = candidate else {
                return Ok(None);
            };
            diesel::update(jobs::table.filter(jobs::id.eq(job_id)))
                .set(jobs::worker_id.eq(Some(worker.into_inner())))
                .execute(tx)?;
            let job = load_job_by_id(tx, job_id)?;
            let bound = load_job_intentions(tx, job_id)?;
            Ok(Some(ClaimedJob {
                job,
                intentions: bound,
            }))
        })
        .await
    }

    async fn release_job(
        &self,
        job: JobId,
        worker: WorkerId,
        cooldown: Option<TokenCooldown>,
    ) -> SchedulerStoreResult<()> {
        self.run_transaction(move |tx| {
            ensure_held(tx, job, worker)?;
            if let Some(TokenCooldown { token, reset }) = cooldown {
                diesel::update(tokens::table.filter(tokens::id.eq(token.into_inner())))
                    .set(tokens::reset.eq(reset))
                    .execute(tx)?;
            }
            diesel::update(jobs::table.filter(jobs::id.eq(job.into_inner())))
                .set(jobs::worker_id.eq(None::<uuid::Uuid>))
                .execute(tx)?;
            Ok(())
        })
        .await
    }

    async fn finish_job(
        &self,
        job: JobId,
        worker: WorkerId,
        status: ArchiveStatus,
        completed_at: DateTime<Utc>,
        successors: &[Intention],
    ) -> SchedulerStoreResult<Vec<ArchivedIntention>> {
        let pending = successors.to_vec();
        self.run_transaction(move |tx| {
            ensure_held(tx, job, worker)?;
            let bound = load_job_intentions(tx, job.into_inner())?;
            let mut archived = Vec::with_capacity(bound.len());
            for intention in &bound {
                archived.push(write_archive(tx, intention, status, completed_at)?);
            }
            diesel::delete(intentions::table.filter(intentions::job_id.eq(job.into_inner())))
                .execute(tx)?;
            diesel::delete(jobs::table.filter(jobs::id.eq(job.into_inner()))).execute(tx)?;
            for successor in &pending {
                insert_intention_rows(tx, successor)?;
            }
            Ok(archived)
        })
        .await
    }

    async fn archive_intention(
        &self,
        intention: IntentionId,
        status: ArchiveStatus,
        completed_at: DateTime<Utc>,
    ) -> SchedulerStoreResult<ArchivedIntention> {
        self.run_transaction(move |tx| {
            let row = lock_intention(tx, intention)?
                .ok_or(SchedulerStoreError::IntentionNotFound(intention))?;
            let job_id = row.job_id;
            if let Some(bound_job) = job_id {
                let worker = jobs::table
                    .filter(jobs::id.eq(bound_job))
                    .select(jobs::worker_id)
                    .for_update()
                    .first::<Option<uuid::Uuid>>(tx)
                    .optional()?
                    .flatten();
                if worker.is_some() {
                    return Err(SchedulerStoreError::IntentionRunning(intention));
                }
            }
            let live = load_intention(tx, row)?;
            let archived = write_archive(tx, &live, status, completed_at)?;
            diesel::delete(intentions::table.filter(intentions::id.eq(intention.into_inner())))
                .execute(tx)?;
            if let Some(bound_job) = job_id {
                let remaining: i64 = intentions::table
                    .filter(intentions::job_id.eq(bound_job))
                    .count()
                    .get_result(tx)?;
                if remaining == 0 {
                    diesel::delete(jobs::table.filter(jobs::id.eq(bound_job))).execute(tx)?;
                }
            }
            Ok(archived)
        })
        .await
    }

    async fn find_archives(
        &self,
        kind: &IntentionKind,
        limit: usize,
    ) -> SchedulerStoreResult<Vec<ArchivedIntention>> {
        let kind_json = kind_to_value(kind)?;
        let row_limit = i64::try_from(limit).map_err(SchedulerStoreError::persistence)?;
        self.run_blocking(move |connection| {
            archived_intentions::table
                .filter(archived_intentions::kind.eq(kind_json))
                .order((
                    archived_intentions::completed_at.desc(),
                    archived_intentions::id.desc(),
                ))
                .limit(row_limit)
                .select(ArchiveRow::as_select())
                .load::<ArchiveRow>(connection)?
                .into_iter()
                .map(row_to_archive)
                .collect()
        })
        .await
    }
}

fn kind_to_value(kind: &IntentionKind) -> SchedulerStoreResult<Value> {
    serde_json::to_value(kind).map_err(SchedulerStoreError::persistence)
}

fn value_to_kind(value: Value) -> SchedulerStoreResult<IntentionKind> {
    serde_json::from_value(value).map_err(SchedulerStoreError::invalid_persisted_data)
}

fn row_to_worker(row: WorkerRow) -> SchedulerStoreResult<Worker> {
    let name = WorkerName::new(row.name).map_err(SchedulerStoreError::invalid_persisted_data)?;
    Ok(Worker::from_persisted(
        WorkerId::from_uuid(row.id),
        name,
        row.registered_at,
    ))
}

fn token_to_row(token: &Token) -> SchedulerStoreResult<NewTokenRow> {
    let max_concurrent_jobs =
        i32::try_from(token.max_concurrent_jobs()).map_err(SchedulerStoreError::persistence)?;
    Ok(NewTokenRow {
        id: token.id().into_inner(),
        user_id: token.user().into_inner(),
        backend: token.scope().backend_kind().as_str().to_owned(),
        instance: token
            .scope()
            .instance_name()
            .map(|instance| instance.as_str().to_owned()),
        secret: token.secret().expose().to_owned(),
        reset: token.reset(),
        max_concurrent_jobs,
        created_at: token.created_at(),
    })
}

fn row_to_token(row: TokenRow) -> SchedulerStoreResult<Token> {
    let TokenRow {
        id,
        user_id,
        backend: persisted_backend,
        instance,
        secret,
        reset,
        max_concurrent_jobs,
        created_at,
    } = row;
    let backend = Backend::try_from(persisted_backend.as_str())
        .map_err(SchedulerStoreError::invalid_persisted_data)?;
    let scope = match instance {
        Some(name) => TokenScope::instance(
            backend,
            InstanceName::new(name).map_err(SchedulerStoreError::invalid_persisted_data)?,
        ),
        None => TokenScope::backend(backend),
    };
    let data = PersistedTokenData {
        id: TokenId::from_uuid(id),
        user: UserId::from_uuid(user_id),
        scope,
        secret: TokenSecret::new(secret).map_err(SchedulerStoreError::invalid_persisted_data)?,
        reset,
        max_concurrent_jobs: u32::try_from(max_concurrent_jobs)
            .map_err(SchedulerStoreError::invalid_persisted_data)?,
        created_at,
    };
    Ok(Token::from_persisted(data))
}

fn row_to_archive(row: ArchiveRow) -> SchedulerStoreResult<ArchivedIntention> {
    let status = ArchiveStatus::try_from(row.status.as_str())
        .map_err(SchedulerStoreError::invalid_persisted_data)?;
    let data = PersistedArchiveData {
        id: ArchiveId::from_uuid(row.id),
        intention: IntentionId::from_uuid(row.intention_id),
        user: UserId::from_uuid(row.user_id),
        kind: value_to_kind(row.kind)?,
        created_at: row.created_at,
        completed_at: row.completed_at,
        status,
        job: row.job_id.map(JobId::from_uuid),
    };
    Ok(ArchivedIntention::from_persisted(data))
}

fn write_archive(
    tx: &mut PgConnection,
    intention: &Intention,
    status: ArchiveStatus,
    completed_at: DateTime<Utc>,
) -> SchedulerStoreResult<ArchivedIntention> {
    let archived = ArchivedIntention::capture(intention, status, completed_at);
    let row = ArchiveRow {
        id: archived.id().into_inner(),
        intention_id: archived.intention().into_inner(),
        user_id: archived.user().into_inner(),
        kind_tag: archived.kind().tag().as_str().to_owned(),
        kind: kind_to_value(archived.kind())?,
        created_at: archived.created_at(),
        completed_at: archived.completed_at(),
        status: archived.status().as_str().to_owned(),
        job_id: archived.job().map(JobId::into_inner),
    };
    diesel::insert_into(archived_intentions::table)
        .values(&row)
        .execute(tx)?;
    Ok(archived)
}

fn insert_intention_rows(tx: &mut PgConnection, intention: &Intention) -> SchedulerStoreResult<()> {
    let kind_json = kind_to_value(intention.kind())?;
    let duplicate = || SchedulerStoreError::DuplicateIntention {
        user: intention.user(),
        kind: Box::new(intention.kind().clone()),
    };
    let series_key = intention.kind().series_key();
    let live: i64 = match &series_key {
        Some(key) => intentions::table
            .filter(intentions::series_key.eq(key.clone()))
            .count()
            .get_result(tx)?,
        None => intentions::table
            .filter(intentions::user_id.eq(intention.user().into_inner()))
            .filter(intentions::kind.eq(kind_json.clone()))
            .count()
            .get_result(tx)?,
    };
    if live > 0 {
        return Err(duplicate());
    }
    let row = NewIntentionRow {
        id: intention.id().into_inner(),
        user_id: intention.user().into_inner(),
        kind_tag: intention.kind().tag().as_str().to_owned(),
        kind: kind_json,
        series_key,
        job_id: intention.job().map(JobId::into_inner),
        scheduled: intention.scheduled(),
        created_at: intention.created_at(),
    };
    diesel::insert_into(intentions::table)
        .values(&row)
        .execute(tx)
        .map_err(|err| {
            if is_unique_violation(&err) {
                duplicate()
            } else {
                SchedulerStoreError::persistence(err)
            }
        })?;
    let wanted: Vec<uuid::Uuid> = intention
        .previous()
        .iter()
        .map(|prerequisite| prerequisite.into_inner())
        .collect();
    if wanted.is_empty() {
        return Ok(());
    }
    // Prerequisites archived in the meantime are dropped.
    let live_prerequisites = intentions::table
        .filter(intentions::id.eq_any(&wanted))
        .select(intentions::id)
        .for_share()
        .load::<uuid::Uuid>(tx)?;
    let edges: Vec<DependencyRow> = live_prerequisites
        .into_iter()
        .map(|prerequisite_id| DependencyRow {
            dependent_id: intention.id().into_inner(),
            prerequisite_id,
        })
        .collect();
    if !edges.is_empty() {
        diesel::insert_into(intention_dependencies::table)
            .values(&edges)
            .on_conflict_do_nothing()
            .execute(tx)?;
    }
    Ok(())
}

/// Returns the job of the oldest equivalent intention, locked for update.
/// Kinds that share jobs are serialized on an advisory lock first, so a
/// concurrent binding of the same kind waits for this transaction.
fn lock_equivalent_job(
    tx: &mut PgConnection,
    row: &IntentionRow,
) -> SchedulerStoreResult<Option<uuid::Uuid>> {
    if !value_to_kind(row.kind.clone())?.shares_jobs() {
        return Ok(None);
    }
    diesel::sql_query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind::<sql_types::Text, _>(row.kind.to_string())
        .execute(tx)?;
    let equivalent = intentions::table
        .filter(intentions::kind.eq(row.kind.clone()))
        .filter(intentions::id.ne(row.id))
        .filter(intentions::job_id.is_not_null())
        .order((intentions::created_at.asc(), intentions::id.asc()))
        .select(intentions::job_id)
        .first::<Option<uuid::Uuid>>(tx)
        .optional()?
        .flatten();
    let Some(job_id) = equivalent else {
        return Ok(None);
    };
    Ok(jobs::table
        .filter(jobs::id.eq(job_id))
        .select(jobs::id)
        .for_update()
        .first::<uuid::Uuid>(tx)
        .optional()?)
}

fn lock_intention(
    tx: &mut PgConnection,
    id: IntentionId,
) -> SchedulerStoreResult<Option<IntentionRow>> {
    Ok(intentions::table
        .filter(intentions::id.eq(id.into_inner()))
        .select(IntentionRow::as_select())
        .for_update()
        .first::<IntentionRow>(tx)
        .optional()?)
}

fn load_intention(
    connection: &mut PgConnection,
    row: IntentionRow,
) -> SchedulerStoreResult<Intention> {
    let id = IntentionId::from_uuid(row.id);
    load_intentions(connection, vec![row])?
        .into_iter()
        .next()
        .ok_or(SchedulerStoreError::IntentionNotFound(id))
}

fn load_intentions(
    connection: &mut PgConnection,
    rows: Vec<IntentionRow>,
) -> SchedulerStoreResult<Vec<Intention>> {
    let ids: Vec<uuid::Uuid> = rows.iter().map(|row| row.id).collect();
    let edges = intention_dependencies::table
        .filter(intention_dependencies::dependent_id.eq_any(&ids))
        .select((
            intention_dependencies::dependent_id,
            intention_dependencies::prerequisite_id,
        ))
        .load::<(uuid::Uuid, uuid::Uuid)>(connection)?;
    let mut previous: HashMap<uuid::Uuid, BTreeSet<IntentionId>> = HashMap::new();
    for (dependent, prerequisite) in edges {
        previous
            .entry(dependent)
            .or_default()
            .insert(IntentionId::from_uuid(prerequisite));
    }
    rows.into_iter()
        .map(|row| {
            let kind = value_to_kind(row.kind)?;
            let tag = IntentionKindTag::try_from(row.kind_tag.as_str())
                .map_err(SchedulerStoreError::invalid_persisted_data)?;
            if kind.tag() != tag {
                return Err(SchedulerStoreError::invalid_persisted_data(
                    ParseIntentionKindTagError(row.kind_tag),
                ));
            }
            Ok(Intention::from_persisted(PersistedIntentionData {
                id: IntentionId::from_uuid(row.id),
                user: UserId::from_uuid(row.user_id),
                kind,
                job: row.job_id.map(JobId::from_uuid),
                previous: previous.remove(&row.id).unwrap_or_default(),
                scheduled: row.scheduled,
                created_at: row.created_at,
            }))
        })
        .collect()
}

fn load_job_intentions(
    connection: &mut PgConnection,
    job_id: uuid::Uuid,
) -> SchedulerStoreResult<Vec<Intention>> {
    let rows = intentions::table
        .filter(intentions::job_id.eq(job_id))
        .order((intentions::created_at.asc(), intentions::id.asc()))
        .select(IntentionRow::as_select())
        .load::<IntentionRow>(connection)?;
    load_intentions(connection, rows)
}

fn load_job(connection: &mut PgConnection, row: JobRow) -> SchedulerStoreResult<Job> {
    let token_ids = job_tokens::table
        .filter(job_tokens::job_id.eq(row.id))
        .select(job_tokens::token_id)
        .load::<uuid::Uuid>(connection)?;
    Ok(Job::from_persisted(PersistedJobData {
        id: JobId::from_uuid(row.id),
        worker: row.worker_id.map(WorkerId::from_uuid),
        tokens: token_ids.into_iter().map(TokenId::from_uuid).collect(),
        created_by: row.created_by.map(WorkerId::from_uuid),
        created_at: row.created_at,
    }))
}

fn load_job_by_id(connection: &mut PgConnection, job_id: uuid::Uuid) -> SchedulerStoreResult<Job> {
    let row = jobs::table
        .filter(jobs::id.eq(job_id))
        .select(JobRow::as_select())
        .first::<JobRow>(connection)?;
    load_job(connection, row)
}

fn ensure_held(tx: &mut PgConnection, job: JobId, worker: WorkerId) -> SchedulerStoreResult<()> {
    let holder = jobs::table
        .filter(jobs::id.eq(job.into_inner()))
        .select(jobs::worker_id)
        .for_update()
        .first::<Option<uuid::Uuid>>(tx)
        .optional()?
        .flatten();
    if holder == Some(worker.into_inner()) {
        Ok(())
    } else {
        Err(SchedulerStoreError::JobNotHeld { job, worker })
    }
}

fn bind_intention(
    tx: &mut PgConnection,
    intention: uuid::Uuid,
    job_id: uuid::Uuid,
    token_ids: &[uuid::Uuid],
) -> SchedulerStoreResult<()> {
    if !token_ids.is_empty() {
        let rows: Vec<JobTokenRow> = token_ids
            .iter()
            .map(|token_id| JobTokenRow {
                job_id,
                token_id: *token_id,
            })
            .collect();
        diesel::insert_into(job_tokens::table)
            .values(&rows)
            .on_conflict_do_nothing()
            .execute(tx)?;
    }
    diesel::update(intentions::table.filter(intentions::id.eq(intention)))
        .set(intentions::job_id.eq(Some(job_id)))
        .execute(tx)?;
    Ok(())
}

/// Returns the token ids to bind, or `None` when a gated variant has no
/// admissible token. The user's tokens stay locked until the transaction
/// ends.
fn tokens_for_policy(
    tx: &mut PgConnection,
    user: UserId,
    policy: &TokenPolicy,
    now: DateTime<Utc>,
) -> SchedulerStoreResult<Option<Vec<uuid::Uuid>>> {
    match policy {
        TokenPolicy::Ungated => Ok(Some(Vec::new())),
        TokenPolicy::Gated { scope, enforce_cap } => {
            let rows = select_admissible_tokens(tx, user, scope, now, *enforce_cap, true)?;
            Ok((!rows.is_empty()).then(|| rows.iter().map(|row| row.id).collect()))
        }
    }
}

fn select_admissible_tokens(
    connection: &mut PgConnection,
    user: UserId,
    scope: &TokenScope,
    now: DateTime<Utc>,
    enforce_cap: bool,
    lock: bool,
) -> SchedulerStoreResult<Vec<TokenRow>> {
    let query = format!(
        concat!(
            "SELECT t.id, t.user_id, t.backend, t.instance, t.secret, t.reset, ",
            "t.max_concurrent_jobs, t.created_at FROM tokens t ",
            "WHERE t.user_id = $1 AND t.backend = $2 ",
            "AND t.instance IS NOT DISTINCT FROM $3 AND t.reset <= $4 ",
            "AND (NOT $5 OR (SELECT COUNT(*) FROM job_tokens jt ",
            "WHERE jt.token_id = t.id) < t.max_concurrent_jobs) ",
            "ORDER BY t.created_at, t.id{}",
        ),
        if lock { " FOR UPDATE OF t" } else { "" }
    );
    Ok(diesel::sql_query(query)
        .bind::<sql_types::Uuid, _>(user.into_inner())
        .bind::<sql_types::Varchar, _>(scope.backend_kind().as_str())
        .bind::<sql_types::Nullable<sql_types::Varchar>, _>(
            scope.instance_name().map(|instance| instance.as_str().to_owned()),
        )
        .bind::<sql_types::Timestamptz, _>(now)
        .bind::<sql_types::Bool, _>(enforce_cap)
        .load::<TokenRow>(connection)?)
}
