//! Job status record.
//!
//! A batch finishes independently of whoever started it. A runner that wants
//! progress polls this small JSON file, rewritten after every chunk.

use crate::JobError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job: String,
    pub state: JobState,
    pub processed: usize,
    pub total: usize,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl JobStatus {
    pub fn load(path: &Path) -> Result<Self, JobError> {
        let text = std::fs::read_to_string(path).map_err(|e| JobError::io(path, e))?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Writes the status record of one job.
#[derive(Debug, Clone)]
pub struct StatusWriter {
    path: PathBuf,
    job: String,
    total: usize,
}

impl StatusWriter {
    pub fn new(path: &Path, job: &str, total: usize) -> Self {
        Self {
            path: path.to_path_buf(),
            job: job.to_string(),
            total,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn running(&self, processed: usize) {
        self.record(JobState::Running, processed, None);
    }

    pub fn completed(&self, processed: usize) {
        self.record(JobState::Completed, processed, None);
    }

    pub fn failed(&self, processed: usize, message: &str) {
        self.record(JobState::Failed, processed, Some(message.to_string()));
    }

    /// A status write failure never fails the job it describes.
    fn record(&self, state: JobState, processed: usize, message: Option<String>) {
        let status = JobStatus {
            job: self.job.clone(),
            state,
            processed,
            total: self.total,
            updated_at: Utc::now(),
            message,
        };
        if let Err(e) = self.write(&status) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to write job status");
        }
    }

    fn write(&self, status: &JobStatus) -> Result<(), JobError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(|e| JobError::io(dir, e))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| JobError::io(dir, e))?;
        serde_json::to_writer_pretty(&mut tmp, status)?;
        tmp.write_all(b"\n").map_err(|e| JobError::io(&self.path, e))?;
        tmp.persist(&self.path)
            .map_err(|e| JobError::io(&self.path, e.error))?;
        Ok(())
    }
}
