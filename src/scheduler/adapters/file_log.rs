//! Job log sink writing one `job-<id>.log` file per job.

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use cap_std::fs::OpenOptions;
use cap_std::fs_utf8::Dir;
use std::sync::Arc;

use crate::scheduler::{
    domain::JobId,
    ports::{JobLog, JobLogError, JobLogResult, JobLogSink},
};

/// Job log sink rooted at one directory.
#[derive(Debug, Clone)]
pub struct FileJobLogSink {
    root: Utf8PathBuf,
    dir: Arc<Dir>,
}

impl FileJobLogSink {
    /// Opens `root`, creating it when missing.
    ///
    /// # Errors
    ///
    /// Returns [`JobLogError::Io`] when the directory cannot be created or
    /// opened.
    pub fn open_ambient(root: &Utf8Path) -> JobLogResult<Self> {
        Dir::create_ambient_dir_all(root, ambient_authority()).map_err(JobLogError::io)?;
        let dir = Dir::open_ambient_dir(root, ambient_authority()).map_err(JobLogError::io)?;
        Ok(Self {
            root: root.to_owned(),
            dir: Arc::new(dir),
        })
    }

    /// Wraps an already opened directory.
    #[must_use]
    pub fn from_dir(root: impl Into<Utf8PathBuf>, dir: Dir) -> Self {
        Self {
            root: root.into(),
            dir: Arc::new(dir),
        }
    }

    /// Returns the file name used for a job's log.
    #[must_use]
    pub fn file_name(job: JobId) -> String {
        format!("job-{job}.log")
    }

    /// Returns the full path of a job's log.
    #[must_use]
    pub fn log_path(&self, job: JobId) -> Utf8PathBuf {
        self.root.join(Self::file_name(job))
    }
}

impl JobLogSink for FileJobLogSink {
    fn open(&self, job: JobId) -> JobLogResult<JobLog> {
        let mut options = OpenOptions::new();
        options.create(true).append(true);
        let file = self
            .dir
            .open_with(Self::file_name(job), &options)
            .map_err(JobLogError::io)?;
        Ok(JobLog::new(job, file))
    }
}
