//! In-memory job log sink that keeps every job's output for inspection.

use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex};

use crate::scheduler::{
    domain::JobId,
    ports::{JobLog, JobLogError, JobLogResult, JobLogSink},
};

/// Job log sink that buffers output in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryJobLogSink {
    buffers: Arc<Mutex<HashMap<JobId, Arc<Mutex<Vec<u8>>>>>>,
}

impl InMemoryJobLogSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns everything written to the job's log so far.
    ///
    /// # Errors
    ///
    /// Returns [`JobLogError::Io`] when a lock is poisoned.
    pub fn contents(&self, job: JobId) -> JobLogResult<String> {
        let buffers = self
            .buffers
            .lock()
            .map_err(|err| JobLogError::io(std::io::Error::other(err.to_string())))?;
        let Some(buffer) = buffers.get(&job) else {
            return Ok(String::new());
        };
        let bytes = buffer
            .lock()
            .map_err(|err| JobLogError::io(std::io::Error::other(err.to_string())))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut bytes = self
            .0
            .lock()
            .map_err(|err| std::io::Error::other(err.to_string()))?;
        bytes.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl JobLogSink for InMemoryJobLogSink {
    fn open(&self, job: JobId) -> JobLogResult<JobLog> {
        let mut buffers = self
            .buffers
            .lock()
            .map_err(|err| JobLogError::io(std::io::Error::other(err.to_string())))?;
        let buffer = Arc::clone(buffers.entry(job).or_default());
        Ok(JobLog::new(job, SharedBuffer(buffer)))
    }
}
