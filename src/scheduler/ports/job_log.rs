//! Per-job log sink port.
//!
//! A [`JobLog`] is opened before a collector runs and handed to it
//! explicitly. [`JobLogGuard`] closes it when the run ends, whichever way it
//! ends.

use crate::scheduler::domain::JobId;
use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Result type for job log operations.
pub type JobLogResult<T> = Result<T, JobLogError>;

/// Opens log destinations for jobs.
pub trait JobLogSink: Send + Sync {
    /// Opens the log of a job, appending to any earlier output.
    ///
    /// # Errors
    ///
    /// Returns [`JobLogError::Io`] when the destination cannot be opened.
    fn open(&self, job: JobId) -> JobLogResult<JobLog>;
}

type SharedWriter = Arc<Mutex<Option<Box<dyn Write + Send>>>>;

/// Shared handle to one job's log output.
#[derive(Clone)]
pub struct JobLog {
    job: JobId,
    writer: SharedWriter,
}

impl JobLog {
    /// Wraps a writer as the log of `job`.
    #[must_use]
    pub fn new(job: JobId, writer: impl Write + Send + 'static) -> Self {
        Self {
            job,
            writer: Arc::new(Mutex::new(Some(Box::new(writer)))),
        }
    }

    /// Returns a log that drops everything written to it.
    #[must_use]
    pub fn discard(job: JobId) -> Self {
        Self::new(job, std::io::sink())
    }

    /// Returns the job this log belongs to.
    #[must_use]
    pub const fn job(&self) -> JobId {
        self.job
    }

    /// Appends one line.
    ///
    /// # Errors
    ///
    /// Returns [`JobLogError::Closed`] after [`JobLog::close`], or
    /// [`JobLogError::Io`] when writing fails.
    pub fn write_line(&self, line: &str) -> JobLogResult<()> {
        let mut guard = self
            .writer
            .lock()
            .map_err(|err| JobLogError::io(std::io::Error::other(err.to_string())))?;
        let writer = guard.as_mut().ok_or(JobLogError::Closed(self.job))?;
        writeln!(writer, "{line}").map_err(JobLogError::io)
    }

    /// Flushes and releases the destination. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`JobLogError::Io`] when flushing fails.
    pub fn close(&self) -> JobLogResult<()> {
        let mut guard = self
            .writer
            .lock()
            .map_err(|err| JobLogError::io(std::io::Error::other(err.to_string())))?;
        match guard.take() {
            Some(mut writer) => writer.flush().map_err(JobLogError::io),
            None => Ok(()),
        }
    }

    /// Returns whether the log has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        match self.writer.lock() {
            Ok(guard) => guard.is_none(),
            Err(_) => true,
        }
    }
}

impl fmt::Debug for JobLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobLog")
            .field("job", &self.job)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Closes a [`JobLog`] when dropped.
#[derive(Debug)]
pub struct JobLogGuard {
    log: JobLog,
}

impl JobLogGuard {
    /// Takes responsibility for closing `log`.
    #[must_use]
    pub const fn new(log: JobLog) -> Self {
        Self { log }
    }

    /// Returns a handle to pass to the collector.
    #[must_use]
    pub fn handle(&self) -> JobLog {
        self.log.clone()
    }
}

impl Drop for JobLogGuard {
    fn drop(&mut self) {
        if let Err(err) = self.log.close() {
            tracing::warn!(job_id = %self.log.job(), error = %err, "failed to close job log");
        }
    }
}

/// Errors returned by job log sinks.
#[derive(Debug, Clone, Error)]
pub enum JobLogError {
    /// The log was already closed.
    #[error("log of job {0} is closed")]
    Closed(JobId),

    /// I/O failure.
    #[error("job log I/O error: {0}")]
    Io(Arc<std::io::Error>),
}

impl JobLogError {
    /// Wraps an I/O error.
    #[must_use]
    pub fn io(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}
