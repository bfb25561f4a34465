//! Then steps for scheduling BDD scenarios.

use super::world::{SchedulingWorld, run_async};
use chrono::TimeDelta;
use eyre::WrapErr;
use mockable::Clock;
use poolsched::scheduler::{
    domain::{IntentionKind, IntentionKindTag, IntentionState},
    ports::SchedulerStore,
};
use rstest_bdd_macros::then;

#[then(r#"the raw stage is archived with status "{status}""#)]
fn the_raw_stage_is_archived(world: &SchedulingWorld, status: String) -> Result<(), eyre::Report> {
    let kind = world.target()?.raw_kind();
    let archives = run_async(world.engine.store.find_archives(&kind, 1)).wrap_err("archives")?;
    let archive = archives
        .first()
        .ok_or_else(|| eyre::eyre!("raw stage was not archived"))?;
    eyre::ensure!(
        archive.status().as_str() == status,
        "expected {status}, got {}",
        archive.status()
    );
    let live = run_async(world.engine.store.find_live_by_kind(&kind)).wrap_err("live raw")?;
    eyre::ensure!(live.is_empty(), "archived work must leave the live set");
    Ok(())
}

#[then("the enrich stage is selectable")]
fn the_enrich_stage_is_selectable(world: &SchedulingWorld) -> Result<(), eyre::Report> {
    let user = world.user()?;
    let selectable = run_async(world.engine.scheduling.selectable(
        IntentionKindTag::GitHubEnrich,
        user,
        10,
    ))
    .wrap_err("select enrich work")?;
    let enrich = world.target()?.enrich_kind();
    eyre::ensure!(
        selectable.iter().any(|intention| *intention.kind() == enrich),
        "enrich stage should be selectable once raw data is archived"
    );
    Ok(())
}

#[then("both intentions reference the same job")]
fn both_intentions_share_a_job(world: &SchedulingWorld) -> Result<(), eyre::Report> {
    let kind = world.target()?.raw_kind();
    let live = run_async(world.engine.store.find_live_by_kind(&kind)).wrap_err("live raw")?;
    eyre::ensure!(live.len() == 2, "expected two intentions, found {}", live.len());
    let jobs: Vec<_> = live.iter().map(|intention| intention.job()).collect();
    let first = jobs.first().copied().flatten();
    eyre::ensure!(
        first.is_some() && jobs.iter().all(|job| *job == first),
        "intentions are bound to different jobs: {jobs:?}"
    );
    Ok(())
}

#[then("the token is blocked for {minutes:i64} minutes")]
fn the_token_is_blocked(world: &SchedulingWorld, minutes: i64) -> Result<(), eyre::Report> {
    let polled_at = world
        .polled_at
        .ok_or_else(|| eyre::eyre!("no poll recorded"))?;
    let tokens = run_async(world.engine.tokens.list(world.user()?)).wrap_err("list tokens")?;
    let token = tokens
        .first()
        .ok_or_else(|| eyre::eyre!("user has no token"))?;
    eyre::ensure!(
        token.reset() == polled_at + TimeDelta::minutes(minutes),
        "unexpected reset {}",
        token.reset()
    );
    Ok(())
}

#[then("the intention is still pending")]
fn the_intention_is_still_pending(world: &SchedulingWorld) -> Result<(), eyre::Report> {
    let history = run_async(world.engine.requests.history(world.target()?, 5))
        .wrap_err("load history")?;
    eyre::ensure!(history.archives.is_empty(), "deferred work must not be archived");
    let states: Vec<IntentionState> = history.live.iter().map(|live| live.state).collect();
    eyre::ensure!(
        states == vec![IntentionState::Pending],
        "unexpected states {states:?}"
    );
    Ok(())
}

#[then("no job is claimable {minutes:i64} minutes later")]
fn no_job_is_claimable(world: &mut SchedulingWorld, minutes: i64) -> Result<(), eyre::Report> {
    world.advance_to(minutes);
    let claimed = run_async(
        world
            .engine
            .execution
            .claim(IntentionKindTag::GitHubRaw, world.worker),
    )
    .wrap_err("claim")?;
    eyre::ensure!(claimed.is_none(), "job claimed while its token cools down");
    Ok(())
}

#[then("the job is claimable {minutes:i64} minutes later")]
fn the_job_is_claimable(world: &mut SchedulingWorld, minutes: i64) -> Result<(), eyre::Report> {
    world.advance_to(minutes);
    let claimed = run_async(
        world
            .engine
            .execution
            .claim(IntentionKindTag::GitHubRaw, world.worker),
    )
    .wrap_err("claim")?;
    eyre::ensure!(claimed.is_some(), "job should be claimable after the cooldown");
    Ok(())
}

#[then("the collector was never called")]
fn the_collector_was_never_called(world: &SchedulingWorld) -> Result<(), eyre::Report> {
    let calls = world.engine.collector.calls();
    eyre::ensure!(calls.is_empty(), "collector called {} times", calls.len());
    Ok(())
}

#[then(r#"the target status is "{status}""#)]
fn the_target_status_is(world: &SchedulingWorld, status: String) -> Result<(), eyre::Report> {
    let actual = run_async(world.engine.requests.status(world.target()?)).wrap_err("status")?;
    eyre::ensure!(actual.as_str() == status, "expected {status}, got {actual}");
    Ok(())
}

#[then(r#"the periodic run is archived with status "{status}""#)]
fn the_periodic_run_is_archived(
    world: &SchedulingWorld,
    status: String,
) -> Result<(), eyre::Report> {
    let kind = world
        .seeded
        .as_ref()
        .ok_or_else(|| eyre::eyre!("no periodic series seeded"))?;
    let archives = run_async(world.engine.store.find_archives(kind, 1)).wrap_err("archives")?;
    let archive = archives
        .first()
        .ok_or_else(|| eyre::eyre!("periodic run was not archived"))?;
    eyre::ensure!(
        archive.status().as_str() == status,
        "expected {status}, got {}",
        archive.status()
    );
    Ok(())
}

#[then("one successor is scheduled an hour later with the same watermark")]
fn one_successor_is_scheduled(world: &SchedulingWorld) -> Result<(), eyre::Report> {
    let series = run_async(world.engine.store.find_series("auto_refresh:git"))
        .wrap_err("load series")?;
    eyre::ensure!(series.len() == 1, "expected one successor, found {}", series.len());
    let successor = series
        .first()
        .ok_or_else(|| eyre::eyre!("missing successor"))?;
    let expected = world.engine.clock.utc() + TimeDelta::hours(1);
    eyre::ensure!(
        successor.scheduled() == Some(expected),
        "unexpected schedule {:?}",
        successor.scheduled()
    );
    eyre::ensure!(
        matches!(successor.kind(), IntentionKind::AutoRefresh { since, .. } if *since == world.watermark),
        "watermark changed to {:?}",
        successor.kind()
    );
    Ok(())
}
