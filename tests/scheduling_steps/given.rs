//! Given steps for scheduling BDD scenarios.

use super::world::{SchedulingWorld, github_slug, github_token, run_async};
use chrono::TimeDelta;
use eyre::WrapErr;
use mockable::Clock;
use poolsched::scheduler::{
    domain::{CollectorOutcome, Intention, IntentionKind, RefreshTarget, UserId},
    ports::SchedulerStore,
};
use rstest_bdd_macros::given;

fn link_user(world: &mut SchedulingWorld) -> Result<(), eyre::Report> {
    let user = UserId::new();
    run_async(world.engine.tokens.link(github_token(user)?)).wrap_err("link GitHub token")?;
    world.users.push(user);
    Ok(())
}

#[given("a user with a GitHub token")]
fn a_user_with_a_token(world: &mut SchedulingWorld) -> Result<(), eyre::Report> {
    link_user(world)
}

#[given("a second user with a GitHub token")]
fn a_second_user_with_a_token(world: &mut SchedulingWorld) -> Result<(), eyre::Report> {
    link_user(world)
}

#[given("a user without tokens")]
fn a_user_without_tokens(world: &mut SchedulingWorld) {
    world.users.push(UserId::new());
}

#[given(r#"the user requested analysis of GitHub repository "{slug}""#)]
fn the_user_requested_analysis(
    world: &mut SchedulingWorld,
    slug: String,
) -> Result<(), eyre::Report> {
    let target = github_slug(&slug)?;
    let user = world.user()?;
    run_async(world.engine.requests.analyze(user, &target)).wrap_err("request analysis")?;
    world.target = Some(target);
    Ok(())
}

#[given(r#"the user requested raw collection of GitHub repository "{slug}""#)]
fn the_user_requested_raw_collection(
    world: &mut SchedulingWorld,
    slug: String,
) -> Result<(), eyre::Report> {
    let target = github_slug(&slug)?;
    let user = world.user()?;
    run_async(world.engine.requests.request(user, target.raw_kind()))
        .wrap_err("request raw collection")?;
    world.target = Some(target);
    Ok(())
}

#[given(r#"both users requested raw collection of GitHub repository "{slug}""#)]
fn both_users_requested_raw_collection(
    world: &mut SchedulingWorld,
    slug: String,
) -> Result<(), eyre::Report> {
    let target = github_slug(&slug)?;
    for user in world.users.clone() {
        run_async(world.engine.requests.request(user, target.raw_kind()))
            .wrap_err("request raw collection")?;
    }
    world.target = Some(target);
    Ok(())
}

#[given("the collector reports a cooldown of {minutes:u32} minutes")]
fn the_collector_reports_a_cooldown(world: &mut SchedulingWorld, minutes: u32) {
    world
        .engine
        .collector
        .push(CollectorOutcome::CooldownMinutes { minutes });
}

#[given("the collector reports a fatal error")]
fn the_collector_reports_a_fatal_error(world: &mut SchedulingWorld) {
    world.engine.collector.push(CollectorOutcome::FatalError {
        reason: "backend unavailable".to_owned(),
    });
}

#[given(r#"an auto-refresh series for "{target}" that last succeeded an hour ago"#)]
fn an_auto_refresh_series(
    world: &mut SchedulingWorld,
    target: String,
) -> Result<(), eyre::Report> {
    let watermark = world.engine.clock.utc() - TimeDelta::hours(1);
    let kind = IntentionKind::AutoRefresh {
        target: RefreshTarget::new(target)?,
        since: Some(watermark),
    };
    let intention = Intention::new(UserId::new(), kind.clone(), world.engine.clock.as_ref());
    run_async(world.engine.store.insert_intention(&intention)).wrap_err("seed series")?;
    world.watermark = Some(watermark);
    world.seeded = Some(kind);
    Ok(())
}
