//! Natural keys of the resources intentions collect data for.

use super::{InstanceName, ProjectId, SchedulerDomainError};
use serde::{Deserialize, Serialize};
use std::fmt;

fn validated_token(field: &'static str, value: &str) -> Result<String, SchedulerDomainError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(SchedulerDomainError::EmptyValue(field));
    }
    if trimmed.chars().any(char::is_whitespace) {
        return Err(SchedulerDomainError::UnexpectedWhitespace {
            field,
            value: value.to_owned(),
        });
    }
    Ok(trimmed.to_owned())
}

/// Clone URL of a plain git repository.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepositoryUrl(String);

impl RepositoryUrl {
    /// Creates a validated repository URL.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerDomainError`] when the URL is blank or contains
    /// whitespace.
    pub fn new(value: impl Into<String>) -> Result<Self, SchedulerDomainError> {
        validated_token("repository url", &value.into()).map(Self)
    }

    /// Returns the URL as `str`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RepositoryUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Repository hosted on a forge instance (GitHub or GitLab).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ForgeRepository {
    instance: InstanceName,
    owner: String,
    repo: String,
}

impl ForgeRepository {
    /// Creates a validated forge repository reference.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerDomainError`] when the owner or repository name is
    /// blank or contains whitespace.
    pub fn new(
        instance: InstanceName,
        owner: impl Into<String>,
        repo: impl Into<String>,
    ) -> Result<Self, SchedulerDomainError> {
        Ok(Self {
            instance,
            owner: validated_token("owner", &owner.into())?,
            repo: validated_token("repository", &repo.into())?,
        })
    }

    /// Returns the forge instance.
    #[must_use]
    pub const fn instance(&self) -> &InstanceName {
        &self.instance
    }

    /// Returns the owner (user or organisation).
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Returns the repository name.
    #[must_use]
    pub fn repo(&self) -> &str {
        &self.repo
    }
}

impl fmt::Display for ForgeRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.instance, self.owner, self.repo)
    }
}

/// Meetup group URL name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MeetupGroup(String);

impl MeetupGroup {
    /// Creates a validated group name.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerDomainError`] when the name is blank or contains
    /// whitespace.
    pub fn new(value: impl Into<String>) -> Result<Self, SchedulerDomainError> {
        validated_token("meetup group", &value.into()).map(Self)
    }

    /// Returns the group name as `str`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MeetupGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Questions carrying one tag on one StackExchange site.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QuestionTag {
    site: String,
    tagged: String,
}

impl QuestionTag {
    /// Creates a validated question tag; `site` is the full domain name,
    /// e.g. `stackoverflow.com`.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerDomainError`] when the site or tag is blank or
    /// contains whitespace.
    pub fn new(
        site: impl Into<String>,
        tagged: impl Into<String>,
    ) -> Result<Self, SchedulerDomainError> {
        Ok(Self {
            site: validated_token("site", &site.into())?,
            tagged: validated_token("tag", &tagged.into())?,
        })
    }

    /// Returns the site domain.
    #[must_use]
    pub fn site(&self) -> &str {
        &self.site
    }

    /// Returns the tag.
    #[must_use]
    pub fn tagged(&self) -> &str {
        &self.tagged
    }
}

impl fmt::Display for QuestionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.site, self.tagged)
    }
}

/// Request to list an owner's repositories and add them to a project.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OwnerImport {
    owner: String,
    instance: InstanceName,
    project: ProjectId,
    commits: bool,
    issues: bool,
    forks: bool,
    analyze: bool,
}

impl OwnerImport {
    /// Creates an owner import that collects commits and issues, skips
    /// forks, and starts analysis of every imported repository.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerDomainError`] when the owner is blank or contains
    /// whitespace.
    pub fn new(
        owner: impl Into<String>,
        instance: InstanceName,
        project: ProjectId,
    ) -> Result<Self, SchedulerDomainError> {
        Ok(Self {
            owner: validated_token("owner", &owner.into())?,
            instance,
            project,
            commits: true,
            issues: true,
            forks: false,
            analyze: true,
        })
    }

    /// Sets whether git commits are collected.
    #[must_use]
    pub const fn with_commits(mut self, commits: bool) -> Self {
        self.commits = commits;
        self
    }

    /// Sets whether forge issues are collected.
    #[must_use]
    pub const fn with_issues(mut self, issues: bool) -> Self {
        self.issues = issues;
        self
    }

    /// Sets whether forks are included.
    #[must_use]
    pub const fn with_forks(mut self, forks: bool) -> Self {
        self.forks = forks;
        self
    }

    /// Sets whether imported repositories are analyzed right away.
    #[must_use]
    pub const fn with_analyze(mut self, analyze: bool) -> Self {
        self.analyze = analyze;
        self
    }

    /// Returns the owner name.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Returns the forge instance.
    #[must_use]
    pub const fn instance(&self) -> &InstanceName {
        &self.instance
    }

    /// Returns the destination project.
    #[must_use]
    pub const fn project(&self) -> ProjectId {
        self.project
    }

    /// Returns whether git commits are collected.
    #[must_use]
    pub const fn commits(&self) -> bool {
        self.commits
    }

    /// Returns whether forge issues are collected.
    #[must_use]
    pub const fn issues(&self) -> bool {
        self.issues
    }

    /// Returns whether forks are included.
    #[must_use]
    pub const fn forks(&self) -> bool {
        self.forks
    }

    /// Returns whether imported repositories are analyzed right away.
    #[must_use]
    pub const fn analyze(&self) -> bool {
        self.analyze
    }
}

/// Label of the data set an auto-refresh sweep covers, e.g. `git` or
/// `github:issue`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RefreshTarget(String);

impl RefreshTarget {
    /// Creates a validated refresh target label.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerDomainError`] when the label is blank or contains
    /// whitespace.
    pub fn new(value: impl Into<String>) -> Result<Self, SchedulerDomainError> {
        validated_token("refresh target", &value.into()).map(Self)
    }

    /// Returns the label as `str`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RefreshTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
