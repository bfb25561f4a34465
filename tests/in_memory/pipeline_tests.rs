//! Raw-then-enrich pipelines driven end to end by pollers.

use crate::test_helpers::{Engine, git_target};
use poolsched::scheduler::{
    domain::{ArchiveStatus, CollectorOutcome, IntentionKindTag, ResourceStatus, UserId, WorkerId},
    ports::SchedulerStore,
};
use rstest::{fixture, rstest};

#[fixture]
fn engine() -> Engine {
    Engine::new()
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn enrichment_never_runs_before_its_raw_stage(engine: Engine) -> Result<(), eyre::Report> {
    let target = git_target("https://example.org/grimoirelab.git")?;
    let user = UserId::new();
    engine.requests.analyze(user, &target).await?;
    let poller = engine
        .poller(WorkerId::new())
        .with_tags([IntentionKindTag::GitEnrich, IntentionKindTag::GitRaw]);

    let first = poller.poll_once().await?;
    eyre::ensure!(first.runs.len() == 1, "expected the raw stage to run alone");
    let second = poller.poll_once().await?;
    eyre::ensure!(second.runs.len() == 1, "expected the enrich stage to run next");
    let idle = poller.poll_once().await?;
    eyre::ensure!(idle.is_idle(), "expected nothing left to do");

    let tags: Vec<IntentionKindTag> = engine.collector.calls().iter().map(|call| call.tag).collect();
    eyre::ensure!(
        tags == vec![IntentionKindTag::GitRaw, IntentionKindTag::GitEnrich],
        "unexpected run order {tags:?}"
    );
    eyre::ensure!(
        engine.requests.status(&target).await? == ResourceStatus::Analyzed,
        "target should be analyzed"
    );
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn failed_raw_stage_still_releases_the_enrich_stage(
    engine: Engine,
) -> Result<(), eyre::Report> {
    let target = git_target("https://example.org/broken.git")?;
    engine.requests.analyze(UserId::new(), &target).await?;
    engine.collector.push(CollectorOutcome::FatalError {
        reason: "clone failed".to_owned(),
    });
    let poller = engine.poller(WorkerId::new());

    poller.poll_once().await?;
    poller.poll_once().await?;

    let raw = engine.store.find_archives(&target.raw_kind(), 1).await?;
    let enrich = engine.store.find_archives(&target.enrich_kind(), 1).await?;
    eyre::ensure!(
        raw.first().map(|archive| archive.status()) == Some(ArchiveStatus::Error),
        "raw stage should be archived ERROR"
    );
    eyre::ensure!(
        enrich.first().map(|archive| archive.status()) == Some(ArchiveStatus::Ok),
        "enrich stage should still run"
    );
    eyre::ensure!(
        engine.requests.status(&target).await? == ResourceStatus::Error,
        "a failed stage leaves the target in error"
    );
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn one_collector_call_serves_every_requesting_user(
    engine: Engine,
) -> Result<(), eyre::Report> {
    let target = git_target("https://example.org/popular.git")?;
    let users = [UserId::new(), UserId::new(), UserId::new()];
    for user in users {
        engine.requests.request(user, target.raw_kind()).await?;
    }

    let report = engine
        .poller(WorkerId::new())
        .with_tags([IntentionKindTag::GitRaw])
        .poll_once()
        .await?;

    eyre::ensure!(report.scheduled == 3, "expected all three bound");
    eyre::ensure!(report.runs.len() == 1, "expected a single shared run");
    eyre::ensure!(engine.collector.calls().len() == 1, "collector called once");
    let archives = engine.store.find_archives(&target.raw_kind(), 10).await?;
    eyre::ensure!(archives.len() == 3, "every user gets an archive");
    let (job_id, _) = report
        .runs
        .first()
        .ok_or_else(|| eyre::eyre!("missing run"))?;
    eyre::ensure!(
        archives.iter().all(|archive| archive.job() == Some(*job_id)),
        "archives should point at the shared job"
    );
    let log = engine.logs.contents(*job_id)?;
    eyre::ensure!(log.contains("collecting Git data gathering"), "log: {log}");
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn two_workers_never_run_the_same_job(engine: Engine) -> Result<(), eyre::Report> {
    let target = git_target("https://example.org/contended.git")?;
    engine.requests.request(UserId::new(), target.raw_kind()).await?;
    engine
        .scheduling
        .schedule_pending(IntentionKindTag::GitRaw, None, 10)
        .await?;

    let (left, right) = tokio::join!(
        engine.execution.claim(IntentionKindTag::GitRaw, WorkerId::new()),
        engine.execution.claim(IntentionKindTag::GitRaw, WorkerId::new()),
    );

    let claims = [left?, right?].into_iter().flatten().count();
    eyre::ensure!(claims == 1, "expected exactly one claim, got {claims}");
    Ok(())
}
