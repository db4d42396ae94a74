use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::header::CONTENT_TYPE;
use reqwest::{redirect, Client, ClientBuilder, Response};
use scraper::{Html, Selector};
use tracing::{debug, warn};
use url::Url;

use crate::config::ScrapeSettings;
use crate::error::ScrapeError;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Elements whose text never counts as page content.
const SKIPPED_ELEMENTS: [&str; 6] = ["script", "style", "header", "footer", "nav", "aside"];

static BODY_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("body").expect("Failed to parse body selector")
});

/// Source of page text for a job.
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    /// Returns the visible text of the page, or an empty string when there is nothing to read.
    async fn scrape(&self, url: &Url) -> Result<String, ScrapeError>;
}

pub struct PageScraper {
    client: Client,
    max_body_bytes: usize,
}

impl PageScraper {
    pub fn new(settings: ScrapeSettings) -> Result<Self, reqwest::Error> {
        // Redirect targets would skip host validation, so none are followed.
        let client = ClientBuilder::new()
            .user_agent(USER_AGENT)
            .redirect(redirect::Policy::none())
            .connect_timeout(settings.timeouts.connect)
            .read_timeout(settings.timeouts.read)
            .timeout(settings.timeouts.total)
            .pool_max_idle_per_host(10)
            .build()?;

        Ok(Self {
            client,
            max_body_bytes: settings.max_body_bytes,
        })
    }

    /// Reads at most `max_body_bytes` of the body and drops the rest.
    async fn read_capped(&self, mut response: Response, url: &Url) -> Result<String, ScrapeError> {
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            let room = self.max_body_bytes - body.len();
            if chunk.len() > room {
                body.extend_from_slice(&chunk[..room]);
                warn!(url = %url, limit = self.max_body_bytes, "page body truncated");
                break;
            }
            body.extend_from_slice(&chunk);
        }
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

#[async_trait]
impl ContentExtractor for PageScraper {
    async fn scrape(&self, url: &Url) -> Result<String, ScrapeError> {
        let response = self.client.get(url.as_str()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::Status {
                status,
                url: url.to_string(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if !content_type.contains("html") {
            debug!(url = %url, content_type = %content_type, "skipping non-HTML response");
            return Ok(String::new());
        }

        let html = self.read_capped(response, url).await?;
        let text = extract_text(&html);
        debug!(url = %url, chars = text.chars().count(), "extracted page text");
        Ok(text)
    }
}

/// Reduces an HTML document to the whitespace-normalized text of its body.
pub fn extract_text(html: &str) -> String {
    let document = Html::parse_document(html);

    let Some(body) = document.select(&BODY_SELECTOR).next() else {
        return String::new();
    };

    let mut parts = Vec::new();
    for node in body.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let skipped = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|element| SKIPPED_ELEMENTS.contains(&element.name()))
        });
        if skipped {
            continue;
        }

        let trimmed = text.trim();
        if !trimmed.is_empty() {
            parts.push(trimmed);
        }
    }

    parts
        .iter()
        .flat_map(|part| part.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Serves every request with a chunked 200 that sends one byte per `interval`.
#[cfg(test)]
pub(crate) async fn spawn_drip_server(
    content_type: &'static str,
    interval: std::time::Duration,
    bytes: usize,
) -> std::net::SocketAddr {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut request = [0u8; 4096];
                let _ = socket.read(&mut request).await;
                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: {content_type}\r\nTransfer-Encoding: chunked\r\n\r\n"
                );
                if socket.write_all(head.as_bytes()).await.is_err() {
                    return;
                }
                for _ in 0..bytes {
                    tokio::time::sleep(interval).await;
                    if socket.write_all(b"1\r\na\r\n").await.is_err() {
                        return;
                    }
                }
                let _ = socket.write_all(b"0\r\n\r\n").await;
            });
        }
    });
    addr
}
