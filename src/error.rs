use axum::{
    response::{IntoResponse, Response},
    Json,
    http::StatusCode,
};
use serde::Serialize;

/// Body returned for every non-2xx response of the public API.
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// URL rejected by the validator. The message is safe to show to users as is.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Only http/https URLs are supported.")]
    UnsupportedScheme,

    #[error("The URL host name is invalid.")]
    InvalidHost,

    #[error("The specified host is not allowed.")]
    HostNotAllowed,
}

#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("Failed to fetch content: {status} for {url}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
    },

    #[error("Failed to fetch content: {0}")]
    Request(#[from] reqwest::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum SummarizationError {
    #[error("LLM API is unhealthy. Status: {status}, Body: {body}")]
    Unhealthy {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("Failed to connect to the LLM API health endpoint: {0}")]
    HealthUnreachable(#[source] reqwest::Error),

    #[error("Failed to connect to the LLM API: {0}")]
    Connection(#[source] reqwest::Error),

    #[error("LLM API request failed. Status: {status}, Body: {body}")]
    Http {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("Failed to decode the LLM API response as JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("LLM API response did not contain a 'response' field")]
    MissingField,

    #[error("Invalid LLM API base URL: {0}")]
    InvalidBaseUrl(#[from] url::ParseError),
}

/// Everything that can end a job in the failed state.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Scrape(#[from] ScrapeError),

    #[error(transparent)]
    Summarization(#[from] SummarizationError),

    #[error("job task aborted: {0}")]
    Aborted(String),
}

pub const GENERIC_JOB_FAILURE: &str = "An unexpected error occurred while processing the request.";

impl JobError {
    /// Message stored on the job and shown to the client.
    pub fn user_message(&self) -> String {
        match self {
            JobError::Validation(err) => err.to_string(),
            _ => GENERIC_JOB_FAILURE.to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("job queue is unavailable")]
    Unavailable,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Errors surfaced by the HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Could not queue the task. Please try again later.")]
    Unavailable,
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::Invalid(err) => ApiError::BadRequest(err.to_string()),
            SubmitError::Unavailable => ApiError::Unavailable,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        };

        let body = Json(ErrorResponse {
            error: self.to_string(),
        });

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_keep_their_message() {
        let err = JobError::from(ValidationError::HostNotAllowed);
        assert_eq!(err.user_message(), "The specified host is not allowed.");
    }

    #[test]
    fn other_job_errors_are_sanitized() {
        let err = JobError::from(SummarizationError::MissingField);
        assert_eq!(err.user_message(), GENERIC_JOB_FAILURE);
        assert!(!err.user_message().contains("response"));
    }

    #[test]
    fn submit_errors_map_to_api_status() {
        let bad = ApiError::from(SubmitError::Invalid(ValidationError::UnsupportedScheme));
        assert_eq!(bad.into_response().status(), StatusCode::BAD_REQUEST);

        let down = ApiError::from(SubmitError::Unavailable);
        assert_eq!(down.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
