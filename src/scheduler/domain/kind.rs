//! Intention variants and the per-variant scheduling policy.
//!
//! Each variant carries exactly the fields that make two requests
//! equivalent: two live intentions with equal kinds request the same work
//! and may share one job. The companion [`IntentionKindTag`] names a variant
//! without its payload; it keys worker polling, collector lookup, and the
//! storage discriminator.

use super::{
    AnalysisTarget, Backend, ForgeRepository, MeetupGroup, OwnerImport, ParseIntentionKindTagError,
    ProjectId, QuestionTag, RefreshTarget, RepositoryUrl, TokenScope,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Requested unit of work, one variant per backend and purpose.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IntentionKind {
    /// Clone and collect raw commit data from a git repository.
    #[serde(rename = "git_raw")]
    GitRaw {
        /// Repository to collect.
        repo: RepositoryUrl,
    },
    /// Enrich collected git data.
    #[serde(rename = "git_enrich")]
    GitEnrich {
        /// Repository to enrich.
        repo: RepositoryUrl,
    },
    /// Collect raw issues and pull requests from GitHub.
    #[serde(rename = "github_raw")]
    GitHubRaw {
        /// Repository to collect.
        repo: ForgeRepository,
    },
    /// Enrich collected GitHub data.
    #[serde(rename = "github_enrich")]
    GitHubEnrich {
        /// Repository to enrich.
        repo: ForgeRepository,
    },
    /// Collect raw issues and merge requests from a GitLab instance.
    #[serde(rename = "gitlab_raw")]
    GitLabRaw {
        /// Repository to collect.
        repo: ForgeRepository,
    },
    /// Enrich collected GitLab data.
    #[serde(rename = "gitlab_enrich")]
    GitLabEnrich {
        /// Repository to enrich.
        repo: ForgeRepository,
    },
    /// Collect raw events from a Meetup group.
    #[serde(rename = "meetup_raw")]
    MeetupRaw {
        /// Group to collect.
        group: MeetupGroup,
    },
    /// Enrich collected Meetup data.
    #[serde(rename = "meetup_enrich")]
    MeetupEnrich {
        /// Group to enrich.
        group: MeetupGroup,
    },
    /// Collect raw questions for a StackExchange tag.
    #[serde(rename = "stackexchange_raw")]
    StackExchangeRaw {
        /// Site and tag to collect.
        question_tag: QuestionTag,
    },
    /// Enrich collected StackExchange data.
    #[serde(rename = "stackexchange_enrich")]
    StackExchangeEnrich {
        /// Site and tag to enrich.
        question_tag: QuestionTag,
    },
    /// List a GitHub owner's repositories and add them to a project.
    #[serde(rename = "github_owner")]
    GitHubOwner {
        /// Owner import parameters.
        import: OwnerImport,
    },
    /// List a GitLab owner's repositories and add them to a project.
    #[serde(rename = "gitlab_owner")]
    GitLabOwner {
        /// Owner import parameters.
        import: OwnerImport,
    },
    /// Re-request analysis of every repository in a project.
    #[serde(rename = "refresh_project")]
    RefreshProject {
        /// Project to refresh.
        project: ProjectId,
    },
    /// Periodic refresh of identity data for one data set.
    #[serde(rename = "auto_refresh")]
    AutoRefresh {
        /// Data set label.
        target: RefreshTarget,
        /// Only data modified after this instant needs refreshing.
        since: Option<DateTime<Utc>>,
    },
    /// Periodic sweep merging duplicated identities.
    #[serde(rename = "merge_identities")]
    MergeIdentities,
}

/// Token admission rule for a variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenPolicy {
    /// The variant needs no credentials.
    Ungated,
    /// The variant calls a rate-limited API with the user's tokens.
    Gated {
        /// Scope the user's tokens must match.
        scope: TokenScope,
        /// Whether each token's concurrency cap applies.
        enforce_cap: bool,
    },
}

impl TokenPolicy {
    /// Returns the token scope for gated variants.
    #[must_use]
    pub const fn scope(&self) -> Option<&TokenScope> {
        match self {
            Self::Ungated => None,
            Self::Gated { scope, .. } => Some(scope),
        }
    }
}

impl IntentionKind {
    /// Returns the payload-free tag of this variant.
    #[must_use]
    pub const fn tag(&self) -> IntentionKindTag {
        match self {
            Self::GitRaw { .. } => IntentionKindTag::GitRaw,
            Self::GitEnrich { .. } => IntentionKindTag::GitEnrich,
            Self::GitHubRaw { .. } => IntentionKindTag::GitHubRaw,
            Self::GitHubEnrich { .. } => IntentionKindTag::GitHubEnrich,
            Self::GitLabRaw { .. } => IntentionKindTag::GitLabRaw,
            Self::GitLabEnrich { .. } => IntentionKindTag::GitLabEnrich,
            Self::MeetupRaw { .. } => IntentionKindTag::MeetupRaw,
            Self::MeetupEnrich { .. } => IntentionKindTag::MeetupEnrich,
            Self::StackExchangeRaw { .. } => IntentionKindTag::StackExchangeRaw,
            Self::StackExchangeEnrich { .. } => IntentionKindTag::StackExchangeEnrich,
            Self::GitHubOwner { .. } => IntentionKindTag::GitHubOwner,
            Self::GitLabOwner { .. } => IntentionKindTag::GitLabOwner,
            Self::RefreshProject { .. } => IntentionKindTag::RefreshProject,
            Self::AutoRefresh { .. } => IntentionKindTag::AutoRefresh,
            Self::MergeIdentities => IntentionKindTag::MergeIdentities,
        }
    }

    /// Returns the token admission rule for this intention.
    #[must_use]
    pub fn token_policy(&self) -> TokenPolicy {
        match self {
            Self::GitHubRaw { repo } => TokenPolicy::Gated {
                scope: TokenScope::instance(Backend::GitHub, repo.instance().clone()),
                enforce_cap: true,
            },
            Self::GitLabRaw { repo } => TokenPolicy::Gated {
                scope: TokenScope::instance(Backend::GitLab, repo.instance().clone()),
                enforce_cap: true,
            },
            Self::MeetupRaw { .. } => TokenPolicy::Gated {
                scope: TokenScope::backend(Backend::Meetup),
                enforce_cap: true,
            },
            Self::StackExchangeRaw { .. } => TokenPolicy::Gated {
                scope: TokenScope::backend(Backend::StackExchange),
                enforce_cap: true,
            },
            // Listing an owner is a handful of calls; the cap is not applied.
            Self::GitHubOwner { import } => TokenPolicy::Gated {
                scope: TokenScope::instance(Backend::GitHub, import.instance().clone()),
                enforce_cap: false,
            },
            Self::GitLabOwner { import } => TokenPolicy::Gated {
                scope: TokenScope::instance(Backend::GitLab, import.instance().clone()),
                enforce_cap: false,
            },
            Self::GitRaw { .. }
            | Self::GitEnrich { .. }
            | Self::GitHubEnrich { .. }
            | Self::GitLabEnrich { .. }
            | Self::MeetupEnrich { .. }
            | Self::StackExchangeEnrich { .. }
            | Self::RefreshProject { .. }
            | Self::AutoRefresh { .. }
            | Self::MergeIdentities => TokenPolicy::Ungated,
        }
    }

    /// Returns the intentions that must be archived before this one may run.
    #[must_use]
    pub fn prerequisites(&self) -> Vec<Self> {
        match self {
            Self::GitEnrich { repo } => vec![Self::GitRaw { repo: repo.clone() }],
            Self::GitHubEnrich { repo } => vec![Self::GitHubRaw { repo: repo.clone() }],
            Self::GitLabEnrich { repo } => vec![Self::GitLabRaw { repo: repo.clone() }],
            Self::MeetupEnrich { group } => vec![Self::MeetupRaw {
                group: group.clone(),
            }],
            Self::StackExchangeEnrich { question_tag } => vec![Self::StackExchangeRaw {
                question_tag: question_tag.clone(),
            }],
            _ => Vec::new(),
        }
    }

    /// Returns whether this intention re-arms itself after every run.
    #[must_use]
    pub const fn is_periodic(&self) -> bool {
        self.tag().is_periodic()
    }

    /// Returns whether another user's equivalent intention may share a job
    /// with this one. Periodic intentions always run on their own.
    #[must_use]
    pub const fn shares_jobs(&self) -> bool {
        !self.is_periodic()
    }

    /// Key identifying the series a periodic intention belongs to; at most
    /// one member of a series runs at a time.
    #[must_use]
    pub fn series_key(&self) -> Option<String> {
        match self {
            Self::AutoRefresh { target, .. } => Some(format!("auto_refresh:{target}")),
            Self::MergeIdentities => Some("merge_identities".to_owned()),
            _ => None,
        }
    }

    /// Returns the kind the successor of a periodic run carries.
    ///
    /// A successful run moves the watermark to the instant the run started;
    /// a failed run keeps it so the next run retries the same window.
    #[must_use]
    pub fn rearmed(&self, succeeded: bool, run_started_at: DateTime<Utc>) -> Self {
        match self {
            Self::AutoRefresh { target, since } => Self::AutoRefresh {
                target: target.clone(),
                since: if succeeded { Some(run_started_at) } else { *since },
            },
            other => other.clone(),
        }
    }

    /// Returns the analysis target this kind collects or enriches, if any.
    #[must_use]
    pub fn analysis_target(&self) -> Option<AnalysisTarget> {
        match self {
            Self::GitRaw { repo } | Self::GitEnrich { repo } => {
                Some(AnalysisTarget::Git(repo.clone()))
            }
            Self::GitHubRaw { repo } | Self::GitHubEnrich { repo } => {
                Some(AnalysisTarget::GitHub(repo.clone()))
            }
            Self::GitLabRaw { repo } | Self::GitLabEnrich { repo } => {
                Some(AnalysisTarget::GitLab(repo.clone()))
            }
            Self::MeetupRaw { group } | Self::MeetupEnrich { group } => {
                Some(AnalysisTarget::Meetup(group.clone()))
            }
            Self::StackExchangeRaw { question_tag }
            | Self::StackExchangeEnrich { question_tag } => {
                Some(AnalysisTarget::StackExchange(question_tag.clone()))
            }
            _ => None,
        }
    }
}

impl fmt::Display for IntentionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GitRaw { repo } | Self::GitEnrich { repo } => {
                write!(f, "{} {repo}", self.tag().process_name())
            }
            Self::GitHubRaw { repo }
            | Self::GitHubEnrich { repo }
            | Self::GitLabRaw { repo }
            | Self::GitLabEnrich { repo } => write!(f, "{} {repo}", self.tag().process_name()),
            Self::MeetupRaw { group } | Self::MeetupEnrich { group } => {
                write!(f, "{} {group}", self.tag().process_name())
            }
            Self::StackExchangeRaw { question_tag }
            | Self::StackExchangeEnrich { question_tag } => {
                write!(f, "{} {question_tag}", self.tag().process_name())
            }
            Self::GitHubOwner { import } | Self::GitLabOwner { import } => write!(
                f,
                "{} {}:{}",
                self.tag().process_name(),
                import.instance(),
                import.owner()
            ),
            Self::RefreshProject { project } => {
                write!(f, "{} {project}", self.tag().process_name())
            }
            Self::AutoRefresh { target, .. } => {
                write!(f, "{} {target}", self.tag().process_name())
            }
            Self::MergeIdentities => f.write_str(self.tag().process_name()),
        }
    }
}

/// Payload-free name of an intention variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentionKindTag {
    /// See [`IntentionKind::GitRaw`].
    GitRaw,
    /// See [`IntentionKind::GitEnrich`].
    GitEnrich,
    /// See [`IntentionKind::GitHubRaw`].
    #[serde(rename = "github_raw")]
    GitHubRaw,
    /// See [`IntentionKind::GitHubEnrich`].
    #[serde(rename = "github_enrich")]
    GitHubEnrich,
    /// See [`IntentionKind::GitLabRaw`].
    #[serde(rename = "gitlab_raw")]
    GitLabRaw,
    /// See [`IntentionKind::GitLabEnrich`].
    #[serde(rename = "gitlab_enrich")]
    GitLabEnrich,
    /// See [`IntentionKind::MeetupRaw`].
    MeetupRaw,
    /// See [`IntentionKind::MeetupEnrich`].
    MeetupEnrich,
    /// See [`IntentionKind::StackExchangeRaw`].
    #[serde(rename = "stackexchange_raw")]
    StackExchangeRaw,
    /// See [`IntentionKind::StackExchangeEnrich`].
    #[serde(rename = "stackexchange_enrich")]
    StackExchangeEnrich,
    /// See [`IntentionKind::GitHubOwner`].
    #[serde(rename = "github_owner")]
    GitHubOwner,
    /// See [`IntentionKind::GitLabOwner`].
    #[serde(rename = "gitlab_owner")]
    GitLabOwner,
    /// See [`IntentionKind::RefreshProject`].
    RefreshProject,
    /// See [`IntentionKind::AutoRefresh`].
    AutoRefresh,
    /// See [`IntentionKind::MergeIdentities`].
    MergeIdentities,
}

impl IntentionKindTag {
    /// Every variant, in the order workers poll them.
    pub const ALL: [Self; 15] = [
        Self::GitRaw,
        Self::GitEnrich,
        Self::GitHubRaw,
        Self::GitHubEnrich,
        Self::GitLabRaw,
        Self::GitLabEnrich,
        Self::MeetupRaw,
        Self::MeetupEnrich,
        Self::StackExchangeRaw,
        Self::StackExchangeEnrich,
        Self::GitHubOwner,
        Self::GitLabOwner,
        Self::RefreshProject,
        Self::AutoRefresh,
        Self::MergeIdentities,
    ];

    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GitRaw => "git_raw",
            Self::GitEnrich => "git_enrich",
            Self::GitHubRaw => "github_raw",
            Self::GitHubEnrich => "github_enrich",
            Self::GitLabRaw => "gitlab_raw",
            Self::GitLabEnrich => "gitlab_enrich",
            Self::MeetupRaw => "meetup_raw",
            Self::MeetupEnrich => "meetup_enrich",
            Self::StackExchangeRaw => "stackexchange_raw",
            Self::StackExchangeEnrich => "stackexchange_enrich",
            Self::GitHubOwner => "github_owner",
            Self::GitLabOwner => "gitlab_owner",
            Self::RefreshProject => "refresh_project",
            Self::AutoRefresh => "auto_refresh",
            Self::MergeIdentities => "merge_identities",
        }
    }

    /// Human-readable process name used in logs and listings.
    #[must_use]
    pub const fn process_name(self) -> &'static str {
        match self {
            Self::GitRaw => "Git data gathering",
            Self::GitEnrich => "Git data enrichment",
            Self::GitHubRaw => "GitHub data gathering",
            Self::GitHubEnrich => "GitHub data enrichment",
            Self::GitLabRaw => "GitLab data gathering",
            Self::GitLabEnrich => "GitLab data enrichment",
            Self::MeetupRaw => "Meetup data gathering",
            Self::MeetupEnrich => "Meetup data enrichment",
            Self::StackExchangeRaw => "StackExchange data gathering",
            Self::StackExchangeEnrich => "StackExchange data enrichment",
            Self::GitHubOwner => "GitHub owner repositories",
            Self::GitLabOwner => "GitLab owner repositories",
            Self::RefreshProject => "Refresh project",
            Self::AutoRefresh => "Autorefresh",
            Self::MergeIdentities => "Merge identities",
        }
    }

    /// Returns whether jobs of this variant hold tokens that gate claiming.
    #[must_use]
    pub const fn requires_tokens(self) -> bool {
        matches!(
            self,
            Self::GitHubRaw
                | Self::GitLabRaw
                | Self::MeetupRaw
                | Self::StackExchangeRaw
                | Self::GitHubOwner
                | Self::GitLabOwner
        )
    }

    /// Returns whether this variant re-arms itself after every run.
    #[must_use]
    pub const fn is_periodic(self) -> bool {
        matches!(self, Self::AutoRefresh | Self::MergeIdentities)
    }
}

impl fmt::Display for IntentionKindTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for IntentionKindTag {
    type Error = ParseIntentionKindTagError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|tag| tag.as_str() == normalized)
            .ok_or_else(|| ParseIntentionKindTagError(value.to_owned()))
    }
}
