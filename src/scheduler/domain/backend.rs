//! Data-source backends and the scopes tokens are issued for.

use super::{ParseBackendError, SchedulerDomainError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// External service a token or intention talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Plain git repositories.
    Git,
    /// GitHub or GitHub Enterprise.
    #[serde(rename = "github")]
    GitHub,
    /// GitLab deployments.
    #[serde(rename = "gitlab")]
    GitLab,
    /// Meetup groups.
    Meetup,
    /// StackExchange sites.
    #[serde(rename = "stackexchange")]
    StackExchange,
}

impl Backend {
    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Git => "git",
            Self::GitHub => "github",
            Self::GitLab => "gitlab",
            Self::Meetup => "meetup",
            Self::StackExchange => "stackexchange",
        }
    }

    /// Default number of jobs that may share one token of this backend.
    #[must_use]
    pub const fn default_max_concurrent_jobs(self) -> u32 {
        match self {
            Self::Meetup => 1,
            Self::Git | Self::GitHub | Self::GitLab | Self::StackExchange => 3,
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for Backend {
    type Error = ParseBackendError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "git" => Ok(Self::Git),
            "github" => Ok(Self::GitHub),
            "gitlab" => Ok(Self::GitLab),
            "meetup" => Ok(Self::Meetup),
            "stackexchange" => Ok(Self::StackExchange),
            _ => Err(ParseBackendError(value.to_owned())),
        }
    }
}

/// Named deployment of a forge, e.g. `GitHub`, `GitLab`, or `Gnome`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceName(String);

impl InstanceName {
    /// Creates a validated instance name.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerDomainError::EmptyValue`] when the name is blank.
    pub fn new(value: impl Into<String>) -> Result<Self, SchedulerDomainError> {
        let raw = value.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(SchedulerDomainError::EmptyValue("instance name"));
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the instance name as `str`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Backend plus optional service instance a token is valid for.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TokenScope {
    backend: Backend,
    instance: Option<InstanceName>,
}

impl TokenScope {
    /// Creates a scope covering a backend without instance distinction.
    #[must_use]
    pub const fn backend(backend: Backend) -> Self {
        Self {
            backend,
            instance: None,
        }
    }

    /// Creates a scope bound to one deployment of a backend.
    #[must_use]
    pub const fn instance(backend: Backend, instance: InstanceName) -> Self {
        Self {
            backend,
            instance: Some(instance),
        }
    }

    /// Returns the backend.
    #[must_use]
    pub const fn backend_kind(&self) -> Backend {
        self.backend
    }

    /// Returns the service instance, if any.
    #[must_use]
    pub const fn instance_name(&self) -> Option<&InstanceName> {
        self.instance.as_ref()
    }
}

impl fmt::Display for TokenScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.instance {
            Some(instance) => write!(f, "{}@{instance}", self.backend),
            None => write!(f, "{}", self.backend),
        }
    }
}
