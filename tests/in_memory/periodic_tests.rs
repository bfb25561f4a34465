//! Periodic series: seeding, single flight, and re-arming.

use crate::test_helpers::Engine;
use chrono::TimeDelta;
use mockable::Clock;
use poolsched::scheduler::{
    domain::{IntentionKind, IntentionKindTag, RefreshTarget, UserId, WorkerId},
    ports::SchedulerStore,
    services::PeriodicIntervals,
};
use rstest::{fixture, rstest};

#[fixture]
fn engine() -> Engine {
    Engine::new()
}

fn refresh(target: &str) -> Result<IntentionKind, eyre::Report> {
    Ok(IntentionKind::AutoRefresh {
        target: RefreshTarget::new(target)?,
        since: None,
    })
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn each_run_leaves_exactly_one_successor(engine: Engine) -> Result<(), eyre::Report> {
    engine
        .requests
        .ensure_periodic(UserId::from_uuid(uuid::Uuid::nil()), IntentionKind::MergeIdentities)
        .await?;
    let poller = engine
        .poller(WorkerId::new())
        .with_tags([IntentionKindTag::MergeIdentities]);

    for _ in 0..3 {
        let report = poller.poll_once().await?;
        eyre::ensure!(report.runs.len() == 1, "expected one run per interval");
        let series = engine.store.find_series("merge_identities").await?;
        eyre::ensure!(series.len() == 1, "expected one live member, found {}", series.len());
        let idle = poller.poll_once().await?;
        eyre::ensure!(idle.is_idle(), "successor must wait for its interval");
        engine.clock.advance(TimeDelta::hours(1));
    }

    let archives = engine
        .store
        .find_archives(&IntentionKind::MergeIdentities, 10)
        .await?;
    eyre::ensure!(archives.len() == 3, "three archived runs");
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn custom_intervals_schedule_the_successor(engine: Engine) -> Result<(), eyre::Report> {
    let kind = refresh("git")?;
    engine.requests.ensure_periodic(UserId::new(), kind).await?;
    let execution = engine.execution.clone().with_intervals(PeriodicIntervals::new(
        TimeDelta::minutes(10),
        TimeDelta::hours(1),
    ));
    let started = engine.clock.utc();

    engine
        .scheduling
        .schedule_pending(IntentionKindTag::AutoRefresh, None, 10)
        .await?;
    execution
        .run_next(IntentionKindTag::AutoRefresh, WorkerId::new())
        .await?;

    let series = engine.store.find_series("auto_refresh:git").await?;
    let successor = series
        .first()
        .ok_or_else(|| eyre::eyre!("missing successor"))?;
    eyre::ensure!(
        successor.scheduled() == Some(started + TimeDelta::minutes(10)),
        "unexpected schedule {:?}",
        successor.scheduled()
    );
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn separate_refresh_targets_form_separate_series(
    engine: Engine,
) -> Result<(), eyre::Report> {
    let git = engine
        .requests
        .ensure_periodic(UserId::new(), refresh("git")?)
        .await?;
    let github = engine
        .requests
        .ensure_periodic(UserId::new(), refresh("github:issue")?)
        .await?;

    eyre::ensure!(git.id() != github.id(), "targets must not share a series");
    let report = engine
        .poller(WorkerId::new())
        .with_tags([IntentionKindTag::AutoRefresh])
        .poll_once()
        .await?;
    eyre::ensure!(report.scheduled == 2, "both series are due");
    Ok(())
}
