//! Job lifecycle: submission gate, queue, workers and result storage.

pub mod orchestrator;
pub mod parse;
pub mod store;

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use orchestrator::{JobReceiver, Orchestrator, Pipeline, WorkerPool};
pub use parse::SummaryParser;
pub use store::{InMemoryJobStore, JobStore};

pub const FETCHING_MESSAGE: &str = "Fetching page...";
pub const SUMMARIZING_MESSAGE: &str = "Summarizing...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Reported by stores that re-drive failed work. The worker pool never retries.
    Retrying,
    /// Still queued when the worker pool shut down.
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed | JobState::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryResult {
    pub title: String,
    pub bullet_summary: String,
}

impl SummaryResult {
    /// Result for a page that had no text to summarize.
    pub fn no_content() -> Self {
        Self {
            title: "No content".to_string(),
            bullet_summary: "No usable content could be extracted from this URL.".to_string(),
        }
    }
}

/// Client-safe description of a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub url: String,
    pub state: JobState,
    pub progress_message: Option<String>,
    pub result: Option<SummaryResult>,
    pub error: Option<ErrorInfo>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(id: Uuid, url: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
            state: JobState::Pending,
            progress_message: None,
            result: None,
            error: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }
}
