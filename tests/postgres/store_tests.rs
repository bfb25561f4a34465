//! `PostgreSQL` store tests for admission, claiming, and archiving.

use crate::postgres::helpers::{BoxError, PreparedStore, prepared_store};
use chrono::TimeDelta;
use mockable::Clock;
use poolsched::scheduler::{
    domain::{
        ArchiveStatus, ForgeRepository, InstanceName, Intention, IntentionKind, IntentionKindTag,
        Job, RepositoryUrl, UserId,
    },
    ports::{JobBinding, SchedulerStore, SchedulerStoreError, TokenCooldown},
};
use rstest::rstest;

fn git_raw(url: &str) -> Result<IntentionKind, BoxError> {
    Ok(IntentionKind::GitRaw {
        repo: RepositoryUrl::new(url)?,
    })
}

fn github_raw(repo: &str) -> Result<IntentionKind, BoxError> {
    Ok(IntentionKind::GitHubRaw {
        repo: ForgeRepository::new(InstanceName::new("GitHub")?, "chaoss", repo)?,
    })
}

async fn bind(prepared: &PreparedStore, intention: &Intention) -> Result<Job, BoxError> {
    let binding = prepared
        .store
        .create_job(
            intention.id(),
            None,
            &intention.kind().token_policy(),
            prepared.clock.utc(),
        )
        .await?;
    match binding {
        JobBinding::Bound(job) => Ok(job),
        other => Err(format!("expected a bound job, got {other:?}").into()),
    }
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn duplicate_intentions_hit_the_unique_index(
    #[future] prepared_store: Result<Option<PreparedStore>, BoxError>,
) -> Result<(), BoxError> {
    let Some(prepared) = prepared_store.await? else {
        return Ok(());
    };
    let user = UserId::new();
    let kind = git_raw("https://example.org/a.git")?;
    prepared
        .store
        .insert_intention(&Intention::new(user, kind.clone(), &prepared.clock))
        .await?;

    let duplicate = prepared
        .store
        .insert_intention(&Intention::new(user, kind, &prepared.clock))
        .await;

    assert!(matches!(
        duplicate,
        Err(SchedulerStoreError::DuplicateIntention { .. })
    ));
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn token_caps_bound_job_creation(
    #[future] prepared_store: Result<Option<PreparedStore>, BoxError>,
) -> Result<(), BoxError> {
    let Some(prepared) = prepared_store.await? else {
        return Ok(());
    };
    let user = UserId::new();
    prepared.github_token(user, 1).await?;
    let first = Intention::new(user, github_raw("one")?, &prepared.clock);
    let second = Intention::new(user, github_raw("two")?, &prepared.clock);
    prepared.store.insert_intention(&first).await?;
    prepared.store.insert_intention(&second).await?;

    let job = bind(&prepared, &first).await?;
    let refused = prepared
        .store
        .create_job(
            second.id(),
            None,
            &second.kind().token_policy(),
            prepared.clock.utc(),
        )
        .await?;

    assert_eq!(job.tokens().len(), 1);
    assert_eq!(refused, JobBinding::NoTokenAvailable);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn concurrent_claims_take_distinct_jobs(
    #[future] prepared_store: Result<Option<PreparedStore>, BoxError>,
) -> Result<(), BoxError> {
    let Some(prepared) = prepared_store.await? else {
        return Ok(());
    };
    let left = prepared.worker("left").await?;
    let right = prepared.worker("right").await?;
    let intention = Intention::new(
        UserId::new(),
        git_raw("https://example.org/contended.git")?,
        &prepared.clock,
    );
    prepared.store.insert_intention(&intention).await?;
    bind(&prepared, &intention).await?;
    let now = prepared.clock.utc();

    let (first, second) = tokio::join!(
        prepared
            .store
            .claim_next_job(IntentionKindTag::GitRaw, left.id(), now),
        prepared
            .store
            .claim_next_job(IntentionKindTag::GitRaw, right.id(), now),
    );

    let claims = [first?, second?].into_iter().flatten().count();
    assert_eq!(claims, 1);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn released_cooldowns_hide_jobs_until_reset(
    #[future] prepared_store: Result<Option<PreparedStore>, BoxError>,
) -> Result<(), BoxError> {
    let Some(prepared) = prepared_store.await? else {
        return Ok(());
    };
    let worker = prepared.worker("collector").await?;
    let user = UserId::new();
    let token = prepared.github_token(user, 2).await?;
    let intention = Intention::new(user, github_raw("limited")?, &prepared.clock);
    prepared.store.insert_intention(&intention).await?;
    let job = bind(&prepared, &intention).await?;
    prepared
        .store
        .claim_next_job(IntentionKindTag::GitHubRaw, worker.id(), prepared.clock.utc())
        .await?
        .ok_or("job should be claimable")?;

    let reset = prepared.clock.utc() + TimeDelta::minutes(30);
    prepared
        .store
        .release_job(
            job.id(),
            worker.id(),
            Some(TokenCooldown {
                token: token.id(),
                reset,
            }),
        )
        .await?;

    let hidden = prepared
        .store
        .claim_next_job(IntentionKindTag::GitHubRaw, worker.id(), prepared.clock.utc())
        .await?;
    assert!(hidden.is_none());
    let stored = prepared.store.list_tokens(user).await?;
    assert_eq!(stored.first().map(|token| token.reset()), Some(reset));

    prepared.clock.advance(TimeDelta::minutes(30));
    let visible = prepared
        .store
        .claim_next_job(IntentionKindTag::GitHubRaw, worker.id(), prepared.clock.utc())
        .await?;
    assert!(visible.is_some());
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn finishing_a_job_archives_and_releases_dependents(
    #[future] prepared_store: Result<Option<PreparedStore>, BoxError>,
) -> Result<(), BoxError> {
    let Some(prepared) = prepared_store.await? else {
        return Ok(());
    };
    let worker = prepared.worker("collector").await?;
    let user = UserId::new();
    let url = RepositoryUrl::new("https://example.org/pipeline.git")?;
    let raw = Intention::new(user, IntentionKind::GitRaw { repo: url.clone() }, &prepared.clock);
    let enrich = Intention::new(user, IntentionKind::GitEnrich { repo: url }, &prepared.clock);
    prepared.store.insert_intention(&raw).await?;
    prepared.store.insert_intention(&enrich).await?;
    assert!(prepared.store.link_dependency(enrich.id(), raw.id()).await?);
    let job = bind(&prepared, &raw).await?;
    prepared
        .store
        .claim_next_job(IntentionKindTag::GitRaw, worker.id(), prepared.clock.utc())
        .await?
        .ok_or("job should be claimable")?;

    let stranger = prepared.worker("stranger").await?;
    let refused = prepared
        .store
        .finish_job(job.id(), stranger.id(), ArchiveStatus::Ok, prepared.clock.utc(), &[])
        .await;
    assert!(matches!(refused, Err(SchedulerStoreError::JobNotHeld { .. })));

    let archived = prepared
        .store
        .finish_job(job.id(), worker.id(), ArchiveStatus::Ok, prepared.clock.utc(), &[])
        .await?;

    assert_eq!(archived.len(), 1);
    assert!(prepared.store.find_job(job.id()).await?.is_none());
    let ready = prepared
        .store
        .find_unscheduled(IntentionKindTag::GitEnrich, user, prepared.clock.utc(), 10)
        .await?;
    assert_eq!(ready.len(), 1);
    let archives = prepared.store.find_archives(raw.kind(), 5).await?;
    assert_eq!(
        archives.first().map(|archive| archive.status()),
        Some(ArchiveStatus::Ok)
    );
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn finishing_a_periodic_job_inserts_its_successor(
    #[future] prepared_store: Result<Option<PreparedStore>, BoxError>,
) -> Result<(), BoxError> {
    let Some(prepared) = prepared_store.await? else {
        return Ok(());
    };
    let worker = prepared.worker("collector").await?;
    let intention = Intention::new(
        UserId::new(),
        IntentionKind::MergeIdentities,
        &prepared.clock,
    );
    prepared.store.insert_intention(&intention).await?;
    let job = bind(&prepared, &intention).await?;
    prepared
        .store
        .claim_next_job(
            IntentionKindTag::MergeIdentities,
            worker.id(),
            prepared.clock.utc(),
        )
        .await?
        .ok_or("job should be claimable")?;
    assert!(prepared.store.is_series_running("merge_identities").await?);

    let next_run = prepared.clock.utc() + TimeDelta::hours(1);
    let successor = Intention::new(
        intention.user(),
        IntentionKind::MergeIdentities,
        &prepared.clock,
    )
    .with_scheduled(next_run);
    prepared
        .store
        .finish_job(
            job.id(),
            worker.id(),
            ArchiveStatus::Error,
            prepared.clock.utc(),
            &[successor.clone()],
        )
        .await?;

    let series = prepared.store.find_series("merge_identities").await?;
    assert_eq!(series.len(), 1);
    assert_eq!(series.first().map(Intention::id), Some(successor.id()));
    assert_eq!(series.first().and_then(Intention::scheduled), Some(next_run));
    assert!(!prepared.store.is_series_running("merge_identities").await?);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn periodic_series_hold_one_live_member(
    #[future] prepared_store: Result<Option<PreparedStore>, BoxError>,
) -> Result<(), BoxError> {
    let Some(prepared) = prepared_store.await? else {
        return Ok(());
    };
    let first = Intention::new(UserId::new(), IntentionKind::MergeIdentities, &prepared.clock);
    let second = Intention::new(UserId::new(), IntentionKind::MergeIdentities, &prepared.clock);

    let (left, right) = tokio::join!(
        prepared.store.insert_intention(&first),
        prepared.store.insert_intention(&second),
    );

    let inserted = [&left, &right].into_iter().filter(|result| result.is_ok()).count();
    assert_eq!(inserted, 1);
    assert!(
        [left, right]
            .into_iter()
            .filter_map(Result::err)
            .all(|err| matches!(err, SchedulerStoreError::DuplicateIntention { .. }))
    );
    assert_eq!(prepared.store.find_series("merge_identities").await?.len(), 1);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn concurrent_job_creation_shares_one_job(
    #[future] prepared_store: Result<Option<PreparedStore>, BoxError>,
) -> Result<(), BoxError> {
    let Some(prepared) = prepared_store.await? else {
        return Ok(());
    };
    let kind = git_raw("https://example.org/shared.git")?;
    let first = Intention::new(UserId::new(), kind.clone(), &prepared.clock);
    let second = Intention::new(UserId::new(), kind, &prepared.clock);
    prepared.store.insert_intention(&first).await?;
    prepared.store.insert_intention(&second).await?;

    let (left, right) = tokio::join!(bind(&prepared, &first), bind(&prepared, &second));

    assert_eq!(left?.id(), right?.id());
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn revoking_the_last_token_unschedules_pending_jobs(
    #[future] prepared_store: Result<Option<PreparedStore>, BoxError>,
) -> Result<(), BoxError> {
    let Some(prepared) = prepared_store.await? else {
        return Ok(());
    };
    let user = UserId::new();
    let token = prepared.github_token(user, 2).await?;
    let intention = Intention::new(user, github_raw("revoked")?, &prepared.clock);
    prepared.store.insert_intention(&intention).await?;
    let job = bind(&prepared, &intention).await?;

    prepared.store.revoke_token(user, token.id()).await?;

    assert!(prepared.store.find_job(job.id()).await?.is_none());
    let stored = prepared
        .store
        .find_intention(intention.id())
        .await?
        .ok_or("intention should stay live")?;
    assert!(stored.is_unscheduled());

    prepared.github_token(user, 2).await?;
    let rebound = bind(&prepared, &intention).await?;
    let worker = prepared.worker("collector").await?;
    let claimed = prepared
        .store
        .claim_next_job(IntentionKindTag::GitHubRaw, worker.id(), prepared.clock.utc())
        .await?
        .ok_or("the new token should admit the job")?;
    assert_eq!(claimed.job.id(), rebound.id());
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn jobs_waiting_for_a_prerequisite_are_not_claimed(
    #[future] prepared_store: Result<Option<PreparedStore>, BoxError>,
) -> Result<(), BoxError> {
    let Some(prepared) = prepared_store.await? else {
        return Ok(());
    };
    let worker = prepared.worker("collector").await?;
    let user = UserId::new();
    let url = RepositoryUrl::new("https://example.org/late.git")?;
    let raw = Intention::new(user, IntentionKind::GitRaw { repo: url.clone() }, &prepared.clock);
    let enrich = Intention::new(user, IntentionKind::GitEnrich { repo: url }, &prepared.clock);
    prepared.store.insert_intention(&enrich).await?;
    bind(&prepared, &enrich).await?;
    prepared.store.insert_intention(&raw).await?;
    prepared.store.link_dependency(enrich.id(), raw.id()).await?;

    let blocked = prepared
        .store
        .claim_next_job(IntentionKindTag::GitEnrich, worker.id(), prepared.clock.utc())
        .await?;
    assert!(blocked.is_none());

    prepared
        .store
        .archive_intention(raw.id(), ArchiveStatus::Ok, prepared.clock.utc())
        .await?;
    let released = prepared
        .store
        .claim_next_job(IntentionKindTag::GitEnrich, worker.id(), prepared.clock.utc())
        .await?;
    assert!(released.is_some());
    Ok(())
}
