//! Analysis targets and the status users see for them.

use super::{
    ArchiveStatus, ArchivedIntention, ForgeRepository, IntentionKind, IntentionState,
    MeetupGroup, QuestionTag, RepositoryUrl,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Resource whose data flows through a raw then enrich pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "backend", content = "resource", rename_all = "snake_case")]
pub enum AnalysisTarget {
    /// Plain git repository.
    Git(RepositoryUrl),
    /// GitHub repository.
    #[serde(rename = "github")]
    GitHub(ForgeRepository),
    /// GitLab repository.
    #[serde(rename = "gitlab")]
    GitLab(ForgeRepository),
    /// Meetup group.
    Meetup(MeetupGroup),
    /// StackExchange question tag.
    #[serde(rename = "stackexchange")]
    StackExchange(QuestionTag),
}

impl AnalysisTarget {
    /// Returns the raw collection stage.
    #[must_use]
    pub fn raw_kind(&self) -> IntentionKind {
        match self {
            Self::Git(repo) => IntentionKind::GitRaw { repo: repo.clone() },
            Self::GitHub(repo) => IntentionKind::GitHubRaw { repo: repo.clone() },
            Self::GitLab(repo) => IntentionKind::GitLabRaw { repo: repo.clone() },
            Self::Meetup(group) => IntentionKind::MeetupRaw {
                group: group.clone(),
            },
            Self::StackExchange(question_tag) => IntentionKind::StackExchangeRaw {
                question_tag: question_tag.clone(),
            },
        }
    }

    /// Returns the enrichment stage, the last one of the pipeline.
    #[must_use]
    pub fn enrich_kind(&self) -> IntentionKind {
        match self {
            Self::Git(repo) => IntentionKind::GitEnrich { repo: repo.clone() },
            Self::GitHub(repo) => IntentionKind::GitHubEnrich { repo: repo.clone() },
            Self::GitLab(repo) => IntentionKind::GitLabEnrich { repo: repo.clone() },
            Self::Meetup(group) => IntentionKind::MeetupEnrich {
                group: group.clone(),
            },
            Self::StackExchange(question_tag) => IntentionKind::StackExchangeEnrich {
                question_tag: question_tag.clone(),
            },
        }
    }

    /// Returns both stages in execution order.
    #[must_use]
    pub fn pipeline(&self) -> [IntentionKind; 2] {
        [self.raw_kind(), self.enrich_kind()]
    }
}

impl fmt::Display for AnalysisTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Git(repo) => write!(f, "git {repo}"),
            Self::GitHub(repo) => write!(f, "github {repo}"),
            Self::GitLab(repo) => write!(f, "gitlab {repo}"),
            Self::Meetup(group) => write!(f, "meetup {group}"),
            Self::StackExchange(question_tag) => write!(f, "stackexchange {question_tag}"),
        }
    }
}

/// Status of an analysis target as shown to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceStatus {
    /// Work is requested but no worker runs it.
    Pending,
    /// A worker is running part of the pipeline.
    #[serde(rename = "In progress")]
    InProgress,
    /// Both stages last finished `OK`.
    Analyzed,
    /// A stage last failed, or the target was never analyzed.
    Error,
}

impl ResourceStatus {
    /// Returns the display label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::InProgress => "In progress",
            Self::Analyzed => "Analyzed",
            Self::Error => "Error",
        }
    }

    /// Derives the status from the states of every live intention for the
    /// target (any user) and the latest archive of each stage.
    ///
    /// Live work wins over history; without live work the target counts as
    /// analyzed only when both stages last finished `OK`.
    #[must_use]
    pub fn derive(
        live: &[IntentionState],
        latest_raw: Option<&ArchivedIntention>,
        latest_enrich: Option<&ArchivedIntention>,
    ) -> Self {
        if !live.is_empty() {
            return if live.contains(&IntentionState::Running) {
                Self::InProgress
            } else {
                Self::Pending
            };
        }
        let finished_ok = |archive: Option<&ArchivedIntention>| {
            archive.is_some_and(|found| found.status() == ArchiveStatus::Ok)
        };
        if finished_ok(latest_raw) && finished_ok(latest_enrich) {
            Self::Analyzed
        } else {
            Self::Error
        }
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
