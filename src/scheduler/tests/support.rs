//! Shared fixtures for scheduler unit tests.

use crate::scheduler::{
    domain::{
        AnalysisTarget, CollectorOutcome, ForgeRepository, InstanceName, IntentionKind,
        MeetupGroup, RefreshTarget, RepositoryUrl, UserId,
    },
    ports::{CollectionRequest, Collector, CollectorResult},
};
use async_trait::async_trait;
use chrono::{DateTime, Local, TimeDelta, TimeZone, Utc};
use mockable::Clock;
use mockall::mock;
use rstest::fixture;
use std::sync::Mutex;

mock! {
    pub Collector {}

    #[async_trait]
    impl Collector for Collector {
        async fn collect(&self, request: CollectionRequest) -> CollectorResult<CollectorOutcome>;
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut now = self.now.lock().expect("clock lock");
        *now += by;
    }
}

impl Clock for ManualClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock lock")
    }
}

#[fixture]
pub fn clock() -> ManualClock {
    ManualClock::starting_at(
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0)
            .single()
            .expect("valid start instant"),
    )
}

#[fixture]
pub fn user() -> UserId {
    UserId::new()
}

pub fn git_target(url: &str) -> AnalysisTarget {
    AnalysisTarget::Git(RepositoryUrl::new(url).expect("valid url"))
}

pub fn github_repo(owner: &str, repo: &str) -> ForgeRepository {
    ForgeRepository::new(InstanceName::new("GitHub").expect("valid instance"), owner, repo)
        .expect("valid repository")
}

pub fn github_raw(owner: &str, repo: &str) -> IntentionKind {
    IntentionKind::GitHubRaw {
        repo: github_repo(owner, repo),
    }
}

pub fn git_raw(url: &str) -> IntentionKind {
    IntentionKind::GitRaw {
        repo: RepositoryUrl::new(url).expect("valid url"),
    }
}

pub fn meetup_raw(group: &str) -> IntentionKind {
    IntentionKind::MeetupRaw {
        group: MeetupGroup::new(group).expect("valid group"),
    }
}

pub fn auto_refresh(target: &str) -> IntentionKind {
    IntentionKind::AutoRefresh {
        target: RefreshTarget::new(target).expect("valid target"),
        since: None,
    }
}
