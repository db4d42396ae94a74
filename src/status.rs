//! Client-facing view of a job.
//!
//! Unknown ids are reported as `processing`, the same as a job that has
//! not been picked up yet.

use serde::Serialize;

use crate::jobs::{Job, JobState};

pub const PENDING_MESSAGE: &str = "Task is pending.";
pub const PROCESSING_MESSAGE: &str = "Processing...";
pub const RETRYING_MESSAGE: &str = "Retrying...";
pub const CANCELLED_MESSAGE: &str = "Task was cancelled.";
pub const FAILED_MESSAGE: &str = "Processing failed.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum StatusResponse {
    Processing { message: String },
    Success { title: String, summary: String },
    Error { message: String },
}

impl StatusResponse {
    fn processing(message: &str) -> Self {
        StatusResponse::Processing {
            message: message.to_string(),
        }
    }

    fn error(message: &str) -> Self {
        StatusResponse::Error {
            message: message.to_string(),
        }
    }
}

pub fn status_for(job: Option<&Job>) -> StatusResponse {
    let Some(job) = job else {
        return StatusResponse::processing(PENDING_MESSAGE);
    };

    match job.state {
        JobState::Pending => StatusResponse::processing(PENDING_MESSAGE),
        JobState::Running => StatusResponse::processing(
            job.progress_message
                .as_deref()
                .filter(|m| !m.is_empty())
                .unwrap_or(PROCESSING_MESSAGE),
        ),
        JobState::Succeeded => match &job.result {
            Some(result) => StatusResponse::Success {
                title: result.title.clone(),
                summary: result.bullet_summary.clone(),
            },
            None => StatusResponse::error(FAILED_MESSAGE),
        },
        JobState::Failed => StatusResponse::error(
            job.error
                .as_ref()
                .map(|e| e.message.as_str())
                .filter(|m| !m.is_empty())
                .unwrap_or(FAILED_MESSAGE),
        ),
        JobState::Retrying => StatusResponse::processing(RETRYING_MESSAGE),
        JobState::Cancelled => StatusResponse::error(CANCELLED_MESSAGE),
    }
}
