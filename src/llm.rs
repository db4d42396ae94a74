//! Client for the text-generation backend.

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{Client, ClientBuilder};
use serde::Serialize;
use std::fmt::Write;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

use crate::config::{LlmSettings, SummaryFormat};
use crate::error::SummarizationError;

const HEALTH_PATH: &str = "health";
const GENERATE_PATH: &str = "api/v1/generate";

/// Longest error body kept in an error message.
const MAX_ERROR_BODY_CHARS: usize = 200;

/// Turns page text into the backend's raw summary text.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str, max_chars: Option<usize>) -> Result<String, SummarizationError>;
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    stream: bool,
}

/// Time of the last successful health probe.
struct HealthState {
    last_success: Mutex<Option<Instant>>,
    ttl: Duration,
}

impl HealthState {
    fn new(ttl: Duration) -> Self {
        Self {
            last_success: Mutex::new(None),
            ttl,
        }
    }

    fn is_fresh(&self) -> bool {
        let last = self.last_success.lock().unwrap_or_else(|e| e.into_inner());
        last.is_some_and(|at| at.elapsed() < self.ttl)
    }

    fn mark_healthy(&self) {
        let mut last = self.last_success.lock().unwrap_or_else(|e| e.into_inner());
        *last = Some(Instant::now());
    }
}

pub struct SummarizationClient {
    client: Client,
    health_url: Url,
    generate_url: Url,
    settings: LlmSettings,
    health: HealthState,
}

impl SummarizationClient {
    pub fn new(settings: LlmSettings) -> Result<Self, SummarizationError> {
        let base = endpoint_base(&settings.base_url)?;
        let health_url = base.join(HEALTH_PATH)?;
        let generate_url = base.join(GENERATE_PATH)?;

        let client = ClientBuilder::new()
            .connect_timeout(settings.timeouts.connect)
            .read_timeout(settings.timeouts.read)
            .timeout(settings.timeouts.total)
            .build()
            .map_err(SummarizationError::Connection)?;

        Ok(Self {
            client,
            health_url,
            generate_url,
            health: HealthState::new(settings.health_ttl),
            settings,
        })
    }

    pub fn health_url(&self) -> &Url {
        &self.health_url
    }

    pub fn generate_url(&self) -> &Url {
        &self.generate_url
    }

    async fn ensure_healthy(&self) -> Result<(), SummarizationError> {
        if self.health.is_fresh() {
            return Ok(());
        }

        debug!(url = %self.health_url, "probing LLM API health");
        let response = self
            .client
            .get(self.health_url.clone())
            .timeout(self.settings.health_timeout)
            .send()
            .await
            .map_err(SummarizationError::HealthUnreachable)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "LLM API health check failed");
            return Err(SummarizationError::Unhealthy {
                status,
                body: truncate_chars(&body, MAX_ERROR_BODY_CHARS).to_string(),
            });
        }

        self.health.mark_healthy();
        Ok(())
    }

    async fn generate(&self, prompt: &str) -> Result<String, SummarizationError> {
        let body = GenerateRequest {
            prompt,
            model: self.settings.model.as_deref(),
            stream: false,
        };

        let started = Instant::now();
        let response = self
            .client
            .post(self.generate_url.clone())
            .header(ACCEPT, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(SummarizationError::Connection)?;

        let status = response.status();
        let raw = response.text().await.map_err(SummarizationError::Connection)?;
        if !status.is_success() {
            return Err(SummarizationError::Http {
                status,
                body: truncate_chars(&raw, MAX_ERROR_BODY_CHARS).to_string(),
            });
        }
        debug!(elapsed = ?started.elapsed(), "LLM API call finished");

        let json: serde_json::Value = serde_json::from_str(&raw)?;
        json.get("response")
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned)
            .ok_or(SummarizationError::MissingField)
    }
}

#[async_trait]
impl Summarizer for SummarizationClient {
    async fn summarize(&self, text: &str, max_chars: Option<usize>) -> Result<String, SummarizationError> {
        if text.trim().is_empty() {
            return Ok(String::new());
        }

        let max_chars = max_chars.unwrap_or(self.settings.max_chars);
        let truncated = truncate_chars(text, max_chars);

        self.ensure_healthy().await?;

        let prompt = build_prompt(truncated, &self.settings.language, &self.settings.format);
        debug!(prompt_chars = prompt.chars().count(), "built summarization prompt");
        self.generate(&prompt).await
    }
}

/// Parses the configured base so that `base` and `base/` join to the same endpoints.
fn endpoint_base(raw: &str) -> Result<Url, url::ParseError> {
    let mut base = Url::parse(raw.trim())?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    Ok(base)
}

/// Keeps at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub fn build_prompt(content: &str, language: &str, format: &SummaryFormat) -> String {
    let mut result = String::with_capacity(content.len() + 400);
    let _ = writeln!(result, "Summarize the following text in {language}.");
    result.push_str("\nText:\n");
    result.push_str(content);
    result.push_str("\n\nFormat the summary as follows.\n");
    let _ = writeln!(
        result,
        "{}: a single one-line title that captures what the text is about.",
        format.title_marker
    );
    let _ = writeln!(
        result,
        "{}: the most important points as a bulleted list, about 3 and at most 5, each bullet under 100 characters.",
        format.points_marker
    );
    result
}
