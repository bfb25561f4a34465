//! Tracing subscriber setup for binaries.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Output format of log events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Returns the canonical configuration value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned while parsing log formats.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown log format: {0}")]
pub struct ParseLogFormatError(pub String);

impl TryFrom<&str> for LogFormat {
    type Error = ParseLogFormatError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(ParseLogFormatError(value.to_owned())),
        }
    }
}

/// Error returned when a global subscriber is already installed.
#[derive(Debug, Error)]
#[error("failed to install tracing subscriber: {0}")]
pub struct TelemetryInitError(String);

/// Installs the global subscriber.
///
/// The filter comes from `RUST_LOG` and falls back to `info`.
///
/// # Errors
///
/// Returns [`TelemetryInitError`] when a global subscriber already exists.
pub fn init(format: LogFormat) -> Result<(), TelemetryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
    .map_err(|err| TelemetryInitError(err.to_string()))
}
