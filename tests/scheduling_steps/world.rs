//! Shared world state for scheduling BDD scenarios.

use crate::test_helpers::{Engine, github_target};
use chrono::{DateTime, TimeDelta, Utc};
use poolsched::scheduler::{
    domain::{AnalysisTarget, IntentionKind, IntentionKindTag, TokenSecret, UserId, WorkerId},
    services::{LinkTokenRequest, PollReport},
};
use rstest::fixture;

/// Scenario world for scheduling behaviour tests.
pub struct SchedulingWorld {
    /// Services wired to one in-memory store and clock.
    pub engine: Engine,
    /// Worker identity used by the scenario's poller.
    pub worker: WorkerId,
    /// Users in the order they were introduced.
    pub users: Vec<UserId>,
    /// Target the scenario requests work for.
    pub target: Option<AnalysisTarget>,
    /// Report of the last poll.
    pub last_poll: Option<PollReport>,
    /// Clock reading taken when the last poll started.
    pub polled_at: Option<DateTime<Utc>>,
    /// Minutes the clock has been advanced since the last poll.
    pub elapsed_minutes: i64,
    /// Watermark of the seeded auto-refresh series.
    pub watermark: Option<DateTime<Utc>>,
    /// Kind of the seeded periodic intention.
    pub seeded: Option<IntentionKind>,
}

impl SchedulingWorld {
    #[must_use]
    pub fn new() -> Self {
        Self {
            engine: Engine::new(),
            worker: WorkerId::new(),
            users: Vec::new(),
            target: None,
            last_poll: None,
            polled_at: None,
            elapsed_minutes: 0,
            watermark: None,
            seeded: None,
        }
    }

    /// Returns the first user of the scenario.
    pub fn user(&self) -> Result<UserId, eyre::Report> {
        self.users
            .first()
            .copied()
            .ok_or_else(|| eyre::eyre!("no user in scenario world"))
    }

    /// Returns the requested target.
    pub fn target(&self) -> Result<&AnalysisTarget, eyre::Report> {
        self.target
            .as_ref()
            .ok_or_else(|| eyre::eyre!("no target in scenario world"))
    }

    /// Moves the clock so that `minutes` have passed since the last poll.
    pub fn advance_to(&mut self, minutes: i64) {
        let delta = minutes - self.elapsed_minutes;
        if delta > 0 {
            self.engine.clock.advance(TimeDelta::minutes(delta));
            self.elapsed_minutes = minutes;
        }
    }
}

impl Default for SchedulingWorld {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixture that creates a new scenario world.
#[fixture]
pub fn world() -> SchedulingWorld {
    SchedulingWorld::default()
}

/// Runs an async operation within sync step definitions.
pub fn run_async<T>(future: impl std::future::Future<Output = T>) -> T {
    tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(future))
}

/// Builds a public GitHub token request for `user`.
pub fn github_token(user: UserId) -> Result<LinkTokenRequest, eyre::Report> {
    let secret = TokenSecret::new(format!("ghp_{}", user.into_inner().simple()))?;
    Ok(LinkTokenRequest::new(user, "github", secret).with_instance("GitHub"))
}

/// Parses an `owner/repo` slug into a GitHub target.
pub fn github_slug(slug: &str) -> Result<AnalysisTarget, eyre::Report> {
    let (owner, repo) = slug
        .split_once('/')
        .ok_or_else(|| eyre::eyre!("expected owner/repo, got {slug}"))?;
    github_target(owner, repo)
}

/// Parses a variant tag named in a step.
pub fn parse_tag(tag: &str) -> Result<IntentionKindTag, eyre::Report> {
    IntentionKindTag::try_from(tag).map_err(|err| eyre::eyre!("{err}"))
}
