//! Diesel schema for scheduler persistence.

diesel::table! {
    /// Registered worker identities.
    workers (id) {
        /// Worker identifier.
        id -> Uuid,
        /// Display name.
        #[max_length = 255]
        name -> Varchar,
        /// Registration timestamp.
        registered_at -> Timestamptz,
    }
}

diesel::table! {
    /// Per-user API tokens.
    tokens (id) {
        /// Token identifier.
        id -> Uuid,
        /// Owning user.
        user_id -> Uuid,
        /// Backend the token is valid for.
        #[max_length = 32]
        backend -> Varchar,
        /// Optional service instance.
        #[max_length = 255]
        instance -> Nullable<Varchar>,
        /// Secret credential.
        secret -> Text,
        /// Cooldown instant.
        reset -> Timestamptz,
        /// Concurrency cap.
        max_concurrent_jobs -> Int4,
        /// Creation timestamp.
        created_at -> Timestamptz,
    }
}

diesel::table! {
    /// Shared execution handles.
    jobs (id) {
        /// Job identifier.
        id -> Uuid,
        /// Claiming worker, if running.
        worker_id -> Nullable<Uuid>,
        /// Worker that created the job.
        created_by -> Nullable<Uuid>,
        /// Creation timestamp.
        created_at -> Timestamptz,
    }
}

diesel::table! {
    /// Tokens bound to jobs.
    job_tokens (job_id, token_id) {
        /// Job identifier.
        job_id -> Uuid,
        /// Token identifier.
        token_id -> Uuid,
    }
}

diesel::table! {
    /// Live intentions.
    intentions (id) {
        /// Intention identifier.
        id -> Uuid,
        /// Requesting user.
        user_id -> Uuid,
        /// Variant discriminator.
        #[max_length = 50]
        kind_tag -> Varchar,
        /// Full variant payload.
        kind -> Jsonb,
        /// Periodic series key, if periodic.
        #[max_length = 255]
        series_key -> Nullable<Varchar>,
        /// Bound job, if scheduled.
        job_id -> Nullable<Uuid>,
        /// Earliest run instant.
        scheduled -> Nullable<Timestamptz>,
        /// Creation timestamp.
        created_at -> Timestamptz,
    }
}

diesel::table! {
    /// Prerequisite edges between live intentions.
    intention_dependencies (dependent_id, prerequisite_id) {
        /// Intention that waits.
        dependent_id -> Uuid,
        /// Intention it waits for.
        prerequisite_id -> Uuid,
    }
}

diesel::table! {
    /// Terminal records of intentions.
    archived_intentions (id) {
        /// Archive identifier.
        id -> Uuid,
        /// Identifier the intention had while live.
        intention_id -> Uuid,
        /// Requesting user.
        user_id -> Uuid,
        /// Variant discriminator.
        #[max_length = 50]
        kind_tag -> Varchar,
        /// Full variant payload.
        kind -> Jsonb,
        /// Intention creation timestamp.
        created_at -> Timestamptz,
        /// Archival timestamp.
        completed_at -> Timestamptz,
        /// Final status.
        #[max_length = 10]
        status -> Varchar,
        /// Executing job, if any.
        job_id -> Nullable<Uuid>,
    }
}

diesel::joinable!(intentions -> jobs (job_id));
diesel::joinable!(job_tokens -> jobs (job_id));
diesel::joinable!(job_tokens -> tokens (token_id));

diesel::allow_tables_to_appear_in_same_query!(
    workers,
    tokens,
    jobs,
    job_tokens,
    intentions,
    intention_dependencies,
    archived_intentions,
);
