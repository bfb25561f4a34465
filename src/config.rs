//! Worker configuration.
//!
//! Settings come from an optional JSON file and are then overridden by
//! `POOLSCHED_*` environment variables. A representative file is:
//!
//! ```json
//! {
//!   "worker_name": "collector-1",
//!   "poll_interval_secs": 5,
//!   "batch_size": 10,
//!   "auto_refresh_interval_secs": 3600,
//!   "merge_identities_interval_secs": 3600,
//!   "job_log_dir": "/var/log/poolsched",
//!   "database_url": "postgres://localhost/poolsched",
//!   "pool_size": 4,
//!   "log_format": "json",
//!   "collectors": {
//!     "git_raw": { "program": "collect-git", "args": ["--raw"] }
//!   }
//! }
//! ```

use crate::scheduler::{
    adapters::{CollectorCommand, ProcessCollector},
    domain::IntentionKindTag,
    services::{CollectorRegistry, PeriodicIntervals},
};
use crate::telemetry::LogFormat;
use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors returned while loading or validating configuration.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Path of the file.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// The configuration file is not valid JSON for this schema.
    #[error("failed to parse config file: {0}")]
    Parse(Arc<serde_json::Error>),

    /// An environment override could not be parsed.
    #[error("invalid value for {key}: '{value}'")]
    InvalidEnv {
        /// Variable name.
        key: &'static str,
        /// Rejected value.
        value: String,
    },

    /// A setting that must be positive was zero.
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    /// An interval does not fit in a timestamp offset.
    #[error("{0} is out of range")]
    OutOfRange(&'static str),

    /// The worker name is blank.
    #[error("worker_name must not be empty")]
    EmptyWorkerName,
}

/// Settings of one worker process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Display name the worker registers under.
    pub worker_name: String,
    /// Pause between idle polling passes, in seconds.
    pub poll_interval_secs: u64,
    /// Intentions selected per user and variant in one pass.
    pub batch_size: usize,
    /// Delay between auto-refresh runs, in seconds.
    pub auto_refresh_interval_secs: u64,
    /// Delay between identity merge runs, in seconds.
    pub merge_identities_interval_secs: u64,
    /// Directory receiving `job-<id>.log` files.
    pub job_log_dir: Utf8PathBuf,
    /// `PostgreSQL` connection URL. The in-memory store is used when unset.
    pub database_url: Option<String>,
    /// Maximum number of pooled database connections.
    pub pool_size: u32,
    /// Log output format.
    pub log_format: LogFormat,
    /// External collector command per variant.
    pub collectors: BTreeMap<IntentionKindTag, CollectorCommand>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_name: "poolsched-worker".to_owned(),
            poll_interval_secs: 5,
            batch_size: 10,
            auto_refresh_interval_secs: 3600,
            merge_identities_interval_secs: 3600,
            job_log_dir: Utf8PathBuf::from("job-logs"),
            database_url: None,
            pool_size: 4,
            log_format: LogFormat::Text,
            collectors: BTreeMap::new(),
        }
    }
}

impl SchedulerConfig {
    /// Loads the file at `path` (defaults when `None`), applies process
    /// environment overrides, and validates the result.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when reading, parsing, or validation fails.
    pub fn load(path: Option<&Utf8Path>) -> ConfigResult<Self> {
        let base = match path {
            Some(file) => Self::from_json_slice(&read_config_file(file)?)?,
            None => Self::default(),
        };
        base.with_env_overrides(|key| std::env::var(key).ok())?
            .validated()
    }

    /// Parses a JSON document. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the document does not match.
    pub fn from_json_slice(bytes: &[u8]) -> ConfigResult<Self> {
        serde_json::from_slice(bytes).map_err(|err| ConfigError::Parse(Arc::new(err)))
    }

    /// Applies `POOLSCHED_*` overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] when a numeric or format value
    /// does not parse.
    pub fn with_env_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> ConfigResult<Self> {
        if let Some(value) = lookup("POOLSCHED_WORKER_NAME") {
            self.worker_name = value;
        }
        if let Some(value) = lookup("POOLSCHED_POLL_INTERVAL_SECS") {
            self.poll_interval_secs = parse_env("POOLSCHED_POLL_INTERVAL_SECS", value)?;
        }
        if let Some(value) = lookup("POOLSCHED_BATCH_SIZE") {
            self.batch_size = parse_env("POOLSCHED_BATCH_SIZE", value)?;
        }
        if let Some(value) = lookup("POOLSCHED_AUTO_REFRESH_INTERVAL_SECS") {
            self.auto_refresh_interval_secs =
                parse_env("POOLSCHED_AUTO_REFRESH_INTERVAL_SECS", value)?;
        }
        if let Some(value) = lookup("POOLSCHED_MERGE_IDENTITIES_INTERVAL_SECS") {
            self.merge_identities_interval_secs =
                parse_env("POOLSCHED_MERGE_IDENTITIES_INTERVAL_SECS", value)?;
        }
        if let Some(value) = lookup("POOLSCHED_JOB_LOG_DIR") {
            self.job_log_dir = Utf8PathBuf::from(value);
        }
        if let Some(value) = lookup("POOLSCHED_DATABASE_URL") {
            self.database_url = Some(value);
        }
        if let Some(value) = lookup("POOLSCHED_POOL_SIZE") {
            self.pool_size = parse_env("POOLSCHED_POOL_SIZE", value)?;
        }
        if let Some(value) = lookup("POOLSCHED_LOG_FORMAT") {
            let parsed = LogFormat::try_from(value.as_str());
            self.log_format = parsed.map_err(|_| ConfigError::InvalidEnv {
                key: "POOLSCHED_LOG_FORMAT",
                value,
            })?;
        }
        Ok(self)
    }

    /// Checks value ranges and returns the configuration unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for a blank worker name, a zero interval,
    /// batch, or pool size, or an interval too large for timestamps.
    pub fn validated(self) -> ConfigResult<Self> {
        if self.worker_name.trim().is_empty() {
            return Err(ConfigError::EmptyWorkerName);
        }
        for (name, value) in [
            ("poll_interval_secs", self.poll_interval_secs),
            ("auto_refresh_interval_secs", self.auto_refresh_interval_secs),
            (
                "merge_identities_interval_secs",
                self.merge_identities_interval_secs,
            ),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Zero("batch_size"));
        }
        if self.pool_size == 0 {
            return Err(ConfigError::Zero("pool_size"));
        }
        self.periodic_intervals()?;
        Ok(self)
    }

    /// Returns the pause between idle polling passes.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Returns the periodic intervals as timestamp offsets.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::OutOfRange`] when an interval is too large.
    pub fn periodic_intervals(&self) -> ConfigResult<PeriodicIntervals> {
        Ok(PeriodicIntervals::new(
            seconds("auto_refresh_interval_secs", self.auto_refresh_interval_secs)?,
            seconds(
                "merge_identities_interval_secs",
                self.merge_identities_interval_secs,
            )?,
        ))
    }

    /// Builds a registry running the configured command for each variant.
    #[must_use]
    pub fn collector_registry(&self) -> CollectorRegistry {
        self.collectors
            .iter()
            .fold(CollectorRegistry::new(), |registry, (tag, command)| {
                registry.with_collector(*tag, Arc::new(ProcessCollector::new(command.clone())))
            })
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: String) -> ConfigResult<T> {
    let parsed = value.trim().parse();
    parsed.map_err(|_| ConfigError::InvalidEnv { key, value })
}

fn seconds(name: &'static str, value: u64) -> ConfigResult<TimeDelta> {
    i64::try_from(value)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .ok_or(ConfigError::OutOfRange(name))
}

fn read_config_file(path: &Utf8Path) -> ConfigResult<Vec<u8>> {
    let read_error = |source: std::io::Error| ConfigError::Read {
        path: path.to_path_buf(),
        source: Arc::new(source),
    };
    let parent = match path.parent() {
        Some(dir) if !dir.as_str().is_empty() => dir,
        _ => Utf8Path::new("."),
    };
    let file_name = path
        .file_name()
        .ok_or_else(|| read_error(std::io::Error::other("path has no file name")))?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(read_error)?;
    dir.read(file_name).map_err(read_error)
}
