//! Token admission: gating, concurrency caps, cooldowns, and revocation.

use crate::test_helpers::{Engine, github_target};
use chrono::TimeDelta;
use poolsched::scheduler::{
    domain::{
        CollectorOutcome, IntentionKindTag, IntentionState, ResourceStatus, TokenSecret, UserId,
        WorkerId,
    },
    ports::SchedulerStore,
    services::LinkTokenRequest,
};
use rstest::{fixture, rstest};

#[fixture]
fn engine() -> Engine {
    Engine::new()
}

fn github_token(user: UserId, secret: &str) -> Result<LinkTokenRequest, eyre::Report> {
    Ok(LinkTokenRequest::new(user, "github", TokenSecret::new(secret)?).with_instance("GitHub"))
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn caps_limit_how_many_jobs_share_a_token(engine: Engine) -> Result<(), eyre::Report> {
    let user = UserId::new();
    engine
        .tokens
        .link(github_token(user, "ghp_one")?.with_max_concurrent_jobs(2))
        .await?;
    for repo in ["one", "two", "three"] {
        let target = github_target("chaoss", repo)?;
        engine.requests.request(user, target.raw_kind()).await?;
    }

    let bound = engine
        .scheduling
        .schedule_pending(IntentionKindTag::GitHubRaw, None, 10)
        .await?;

    eyre::ensure!(bound == 2, "expected the cap to admit two jobs, got {bound}");
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn tokens_of_other_instances_do_not_admit(engine: Engine) -> Result<(), eyre::Report> {
    let user = UserId::new();
    engine
        .tokens
        .link(
            LinkTokenRequest::new(user, "github", TokenSecret::new("ghe_token")?)
                .with_instance("Enterprise"),
        )
        .await?;
    let target = github_target("chaoss", "grimoirelab")?;
    engine.requests.request(user, target.raw_kind()).await?;

    let bound = engine
        .scheduling
        .schedule_pending(IntentionKindTag::GitHubRaw, None, 10)
        .await?;

    eyre::ensure!(bound == 0, "an Enterprise token must not admit GitHub work");
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn the_collector_only_sees_ready_tokens(engine: Engine) -> Result<(), eyre::Report> {
    let user = UserId::new();
    let token = engine.tokens.link(github_token(user, "ghp_ready")?).await?;
    let target = github_target("chaoss", "grimoirelab")?;
    engine.requests.request(user, target.raw_kind()).await?;

    engine
        .poller(WorkerId::new())
        .with_tags([IntentionKindTag::GitHubRaw])
        .poll_once()
        .await?;

    let calls = engine.collector.calls();
    let fingerprint = calls
        .first()
        .and_then(|call| call.token_fingerprint.clone())
        .ok_or_else(|| eyre::eyre!("collector was not handed a token"))?;
    eyre::ensure!(fingerprint == token.secret().fingerprint(), "wrong token");
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn revoking_every_token_unschedules_the_pending_job(
    engine: Engine,
) -> Result<(), eyre::Report> {
    let user = UserId::new();
    let token = engine.tokens.link(github_token(user, "ghp_gone")?).await?;
    let target = github_target("chaoss", "grimoirelab")?;
    let intention = engine.requests.request(user, target.raw_kind()).await?;
    engine
        .scheduling
        .schedule_pending(IntentionKindTag::GitHubRaw, None, 10)
        .await?;

    engine.tokens.revoke(user, token.id()).await?;
    let run = engine
        .execution
        .run_next(IntentionKindTag::GitHubRaw, WorkerId::new())
        .await?;

    eyre::ensure!(run.is_none(), "a job without tokens must not be claimed");
    let history = engine.requests.history(&target, 5).await?;
    let state = history
        .live
        .iter()
        .find(|live| live.intention.id() == intention.id())
        .map(|live| live.state);
    eyre::ensure!(state == Some(IntentionState::Unscheduled), "state {state:?}");
    eyre::ensure!(
        engine.requests.status(&target).await? == ResourceStatus::Pending,
        "target stays pending"
    );

    let relinked = engine.tokens.link(github_token(user, "ghp_back")?).await?;
    let report = engine
        .poller(WorkerId::new())
        .with_tags([IntentionKindTag::GitHubRaw])
        .poll_once()
        .await?;

    eyre::ensure!(report.runs.len() == 1, "the relinked token should admit the job");
    let fingerprint = engine
        .collector
        .calls()
        .first()
        .and_then(|call| call.token_fingerprint.clone());
    eyre::ensure!(
        fingerprint == Some(relinked.secret().fingerprint()),
        "the collector should use the new token"
    );
    eyre::ensure!(
        engine.requests.status(&target).await? != ResourceStatus::Pending,
        "target leaves the pending state"
    );
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn pollers_leave_variants_without_a_collector_alone() -> Result<(), eyre::Report> {
    let engine = Engine::with_collectors([IntentionKindTag::GitRaw]);
    let user = UserId::new();
    engine.tokens.link(github_token(user, "ghp_idle")?).await?;
    let target = github_target("chaoss", "grimoirelab")?;
    let intention = engine.requests.request(user, target.raw_kind()).await?;

    let report = engine.poller(WorkerId::new()).poll_once().await?;

    eyre::ensure!(report.is_idle(), "nothing runnable here: {report:?}");
    let live = engine.store.find_intention(intention.id()).await?;
    eyre::ensure!(
        live.is_some_and(|found| found.is_unscheduled()),
        "the intention stays live and unscheduled"
    );
    let archives = engine.store.find_archives(&target.raw_kind(), 5).await?;
    eyre::ensure!(archives.is_empty(), "nothing may be archived");
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn cooldowns_expire_and_the_job_runs_again(engine: Engine) -> Result<(), eyre::Report> {
    let user = UserId::new();
    engine.tokens.link(github_token(user, "ghp_limited")?).await?;
    let target = github_target("chaoss", "grimoirelab")?;
    engine.requests.request(user, target.raw_kind()).await?;
    engine
        .collector
        .push(CollectorOutcome::CooldownMinutes { minutes: 5 });
    let poller = engine
        .poller(WorkerId::new())
        .with_tags([IntentionKindTag::GitHubRaw]);

    poller.poll_once().await?;
    engine.clock.advance(TimeDelta::minutes(4));
    let early = poller.poll_once().await?;
    eyre::ensure!(early.is_idle(), "job must wait for the cooldown");

    engine.clock.advance(TimeDelta::minutes(1));
    let retried = poller.poll_once().await?;
    eyre::ensure!(retried.runs.len() == 1, "job should run after the cooldown");
    eyre::ensure!(engine.collector.calls().len() == 2, "two collector calls");
    let archives = engine.store.find_archives(&target.raw_kind(), 5).await?;
    eyre::ensure!(archives.len() == 1, "one archive after the retry");
    Ok(())
}
