use std::env;
use std::fmt::Display;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;
use crate::error::ConfigError;

/// Timeouts for one kind of outbound call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    /// Longest wait for any single read.
    pub read: Duration,
    /// Deadline for the whole request, body included.
    pub total: Duration,
}

/// Marker labels the prompt asks the backend to emit and the parser keys on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryFormat {
    pub title_marker: String,
    pub points_marker: String,
}

impl Default for SummaryFormat {
    fn default() -> Self {
        Self {
            title_marker: "Title".to_string(),
            points_marker: "Key points".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub base_url: String,
    pub model: Option<String>,
    pub max_chars: usize,
    pub language: String,
    pub health_ttl: Duration,
    pub health_timeout: Duration,
    pub timeouts: Timeouts,
    pub format: SummaryFormat,
}

impl LlmSettings {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: None,
            max_chars: 8000,
            language: "English".to_string(),
            health_ttl: Duration::from_secs(30),
            health_timeout: Duration::from_secs(5),
            timeouts: Timeouts {
                connect: Duration::from_secs(5),
                read: Duration::from_secs(60),
                total: Duration::from_secs(180),
            },
            format: SummaryFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrapeSettings {
    pub timeouts: Timeouts,
    /// Bytes of a page body read before the rest is dropped.
    pub max_body_bytes: usize,
}

impl Default for ScrapeSettings {
    fn default() -> Self {
        Self {
            timeouts: Timeouts {
                connect: Duration::from_secs(10),
                read: Duration::from_secs(30),
                total: Duration::from_secs(45),
            },
            max_body_bytes: 5 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobSettings {
    pub workers: usize,
    pub queue_capacity: usize,
    pub result_ttl: Duration,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 64,
            result_ttl: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_addr: SocketAddr,
    pub llm: LlmSettings,
    pub scrape: ScrapeSettings,
    pub jobs: JobSettings,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        // Load environment variables from .env file if it exists
        dotenv::dotenv().ok();

        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let ip = IpAddr::from_str(&host).map_err(|e| ConfigError::Invalid {
            name: "HOST",
            reason: e.to_string(),
        })?;
        let port: u16 = parse_or(&lookup, "PORT", 3000)?;

        let base_url = lookup("LLM_API_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("LLM_API_URL"))?;

        let mut llm = LlmSettings::new(base_url);
        llm.model = lookup("LLM_MODEL").filter(|v| !v.trim().is_empty());
        llm.max_chars = parse_or(&lookup, "SUMMARY_MAX_CHARS", llm.max_chars)?;
        if let Some(language) = lookup("SUMMARY_LANGUAGE") {
            llm.language = language;
        }
        if let Some(marker) = lookup("SUMMARY_TITLE_MARKER") {
            llm.format.title_marker = marker;
        }
        if let Some(marker) = lookup("SUMMARY_POINTS_MARKER") {
            llm.format.points_marker = marker;
        }
        llm.health_ttl = secs_or(&lookup, "LLM_HEALTH_TTL_SECS", llm.health_ttl)?;
        llm.health_timeout = secs_or(&lookup, "LLM_HEALTH_TIMEOUT_SECS", llm.health_timeout)?;
        llm.timeouts.connect = secs_or(&lookup, "LLM_CONNECT_TIMEOUT_SECS", llm.timeouts.connect)?;
        llm.timeouts.read = secs_or(&lookup, "LLM_READ_TIMEOUT_SECS", llm.timeouts.read)?;
        llm.timeouts.total = secs_or(&lookup, "LLM_TOTAL_TIMEOUT_SECS", llm.timeouts.total)?;

        let mut scrape = ScrapeSettings::default();
        scrape.timeouts.connect = secs_or(&lookup, "SCRAPE_CONNECT_TIMEOUT_SECS", scrape.timeouts.connect)?;
        scrape.timeouts.read = secs_or(&lookup, "SCRAPE_READ_TIMEOUT_SECS", scrape.timeouts.read)?;
        scrape.timeouts.total = secs_or(&lookup, "SCRAPE_TOTAL_TIMEOUT_SECS", scrape.timeouts.total)?;
        scrape.max_body_bytes = parse_or(&lookup, "SCRAPE_MAX_BODY_BYTES", scrape.max_body_bytes)?;

        let defaults = JobSettings::default();
        let jobs = JobSettings {
            workers: parse_or(&lookup, "WORKER_COUNT", defaults.workers)?,
            queue_capacity: parse_or(&lookup, "JOB_QUEUE_CAPACITY", defaults.queue_capacity)?,
            result_ttl: secs_or(&lookup, "JOB_RESULT_TTL_SECS", defaults.result_ttl)?,
        };
        if jobs.workers == 0 {
            return Err(ConfigError::Invalid {
                name: "WORKER_COUNT",
                reason: "must be at least 1".to_string(),
            });
        }
        if jobs.queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                name: "JOB_QUEUE_CAPACITY",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Config {
            server_addr: SocketAddr::new(ip, port),
            llm,
            scrape,
            jobs,
        })
    }
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn secs_or<F>(lookup: &F, name: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parse_or(lookup, name, default.as_secs()).map(Duration::from_secs)
}
