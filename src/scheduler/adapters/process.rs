//! Collector adapter running one external command per job.
//!
//! The command receives the intention as JSON in `POOLSCHED_INTENTION`, its
//! variant in `POOLSCHED_KIND`, and the token secret (for gated variants) in
//! `POOLSCHED_TOKEN`. Its output goes to the job log. The exit status is the
//! outcome: 0 is success, 1 is a fatal error, and any other code `n` asks
//! for a cooldown of `n` minutes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use tokio::process::Command;

use crate::scheduler::{
    domain::CollectorOutcome,
    ports::{CollectionRequest, Collector, CollectorError, CollectorResult, JobLog},
};

/// External command configured for one variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorCommand {
    /// Executable to run.
    pub program: String,
    /// Arguments passed before anything else.
    #[serde(default)]
    pub args: Vec<String>,
}

impl CollectorCommand {
    /// Creates a command without arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Appends arguments.
    #[must_use]
    pub fn with_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.args.extend(args);
        self
    }

    /// Renders the command as a POSIX shell line for the job log.
    #[must_use]
    pub fn display_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(quote_for_shell)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Quotes a word only when the shell would otherwise split or expand it.
fn quote_for_shell(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || "-_./=:@%+,".contains(ch));
    if plain {
        return word.to_owned();
    }
    format!("'{}'", word.replace('\'', r"'\''"))
}

/// Collector that spawns a [`CollectorCommand`].
#[derive(Debug, Clone)]
pub struct ProcessCollector {
    command: CollectorCommand,
}

impl ProcessCollector {
    /// Creates a collector for `command`.
    #[must_use]
    pub const fn new(command: CollectorCommand) -> Self {
        Self { command }
    }

    /// Maps an exit code onto a collector outcome.
    #[must_use]
    pub fn outcome_for_exit(code: Option<i32>) -> CollectorOutcome {
        match code {
            Some(0) => CollectorOutcome::Success,
            Some(1) => CollectorOutcome::FatalError {
                reason: "collector exited with status 1".to_owned(),
            },
            Some(minutes) => u32::try_from(minutes).map_or_else(
                |_| CollectorOutcome::FatalError {
                    reason: format!("collector exited with status {minutes}"),
                },
                |minutes| CollectorOutcome::CooldownMinutes { minutes },
            ),
            None => CollectorOutcome::FatalError {
                reason: "collector terminated by a signal".to_owned(),
            },
        }
    }
}

fn copy_output(log: &JobLog, stream: &str, bytes: &[u8]) -> CollectorResult<()> {
    for line in String::from_utf8_lossy(bytes).lines() {
        log.write_line(&format!("[{stream}] {line}"))
            .map_err(CollectorError::runtime)?;
    }
    Ok(())
}

#[async_trait]
impl Collector for ProcessCollector {
    async fn collect(&self, request: CollectionRequest) -> CollectorResult<CollectorOutcome> {
        let payload = serde_json::to_string(&request.kind).map_err(CollectorError::runtime)?;
        let mut command = Command::new(&self.command.program);
        command
            .args(&self.command.args)
            .env("POOLSCHED_KIND", request.kind.tag().as_str())
            .env("POOLSCHED_INTENTION", payload)
            .env("POOLSCHED_JOB", request.job.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(token) = &request.token {
            command.env("POOLSCHED_TOKEN", token.expose());
        }

        request
            .log
            .write_line(&format!("$ {}", self.command.display_line()))
            .map_err(CollectorError::runtime)?;
        let output = command.output().await.map_err(CollectorError::runtime)?;
        copy_output(&request.log, "stdout", &output.stdout)?;
        copy_output(&request.log, "stderr", &output.stderr)?;

        let outcome = Self::outcome_for_exit(output.status.code());
        request
            .log
            .write_line(&format!("exit: {}", output.status))
            .map_err(CollectorError::runtime)?;
        Ok(outcome)
    }
}
