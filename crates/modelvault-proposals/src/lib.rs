//! Modelvault job layer.
//!
//! ```text
//!   inventory / store ──► jobs (plan, dry-run by default) ──► Report ──► file
//!                                                               │
//!                                                     --apply   ▼
//!                                       apply engine (chunked transactions,
//!                                       compare-and-set, ApplyConflict)
//!                                                               │
//!                                                               ▼
//!                                                             Store
//! ```
//!
//! A saved dry-run report can be applied later with [`apply_report`]; the
//! prior value recorded with every proposed write turns drift into a reported
//! conflict instead of a silent overwrite.

pub mod apply;
pub mod jobs;
pub mod report;
pub mod status;

pub use apply::{apply_report, ApplyConflict, ApplyOptions, ApplyTotals, ConflictReason};
pub use jobs::{
    ingest, kits_job, match_job, normalize_job, run_pipeline, vocabulary_diff, JobContext,
    JobOptions,
};
pub use report::{JobKind, Proposal, Report, ReportItem, Summary, REPORT_VERSION_V1};
pub use status::{JobState, JobStatus, StatusWriter};

use modelvault_engine::EngineError;
use modelvault_storage::StoreError;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl JobError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        JobError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
