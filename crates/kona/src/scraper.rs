use crate::config::FetchConfig;
use crate::parser::ParseError;
use crate::retry::{RetryPolicy, retry_when};

use reqwest::{Client, StatusCode};

#[derive(Debug, thiserror::Error)]
pub enum ScraperError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("Page not found: {0}")]
    NotFound(String),
    #[error("Parse error: {0}")]
    ParseError(#[from] ParseError),
    #[error("No race editions listed at {0}")]
    NoEditions(String),
    #[error("Timed out after {secs}s")]
    Timeout { secs: u64 },
}

impl ScraperError {
    /// Transport failures, throttling and server errors are worth another
    /// attempt; anything else will fail the same way again.
    pub fn is_transient(&self) -> bool {
        match self {
            ScraperError::HttpError(_) => true,
            ScraperError::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS.as_u16() || *status >= 500
            }
            _ => false,
        }
    }
}

/// Something that turns a URL into page markup.
#[async_trait::async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, url: &str) -> Result<String, ScraperError>;
}

/// Fetches `url` from `source`, retrying transient failures under `policy`.
pub async fn fetch_with_retry(
    source: &dyn PageSource,
    policy: &RetryPolicy,
    url: &str,
) -> Result<String, ScraperError> {
    retry_when(policy, url, ScraperError::is_transient, || {
        source.fetch_page(url)
    })
    .await
}

#[derive(Debug, Clone)]
pub struct WebScraper {
    client: Client,
}

impl WebScraper {
    pub fn new(config: &FetchConfig) -> Result<Self, ScraperError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(format!(
                "{}/{}",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            ))
            .build()?;

        Ok(Self { client })
    }

    async fn get_html(&self, url: &str) -> Result<String, ScraperError> {
        log::debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .inspect_err(|e| log::error!("HTTP error: {e:?}"))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ScraperError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(ScraperError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(response
            .text()
            .await
            .inspect_err(|e| log::error!("Decode error: {e:?}"))?)
    }
}

#[async_trait::async_trait]
impl PageSource for WebScraper {
    async fn fetch_page(&self, url: &str) -> Result<String, ScraperError> {
        self.get_html(url).await
    }
}

/// In-memory page source for stage tests.
#[cfg(test)]
pub(crate) mod memory {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::{PageSource, ScraperError};

    #[derive(Default)]
    pub struct MemorySource {
        pages: HashMap<String, String>,
        failing: HashMap<String, u16>,
        requests: Mutex<Vec<String>>,
    }

    impl MemorySource {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn page(mut self, url: &str, html: &str) -> Self {
            self.pages.insert(url.to_string(), html.to_string());
            self
        }

        /// Every request for `url` fails with `status`.
        pub fn failing(mut self, url: &str, status: u16) -> Self {
            self.failing.insert(url.to_string(), status);
            self
        }

        pub fn requests(&self) -> Vec<String> {
            self.requests.lock().map(|r| r.clone()).unwrap_or_default()
        }

        pub fn request_count(&self, url: &str) -> usize {
            self.requests().iter().filter(|r| *r == url).count()
        }
    }

    #[async_trait::async_trait]
    impl PageSource for MemorySource {
        async fn fetch_page(&self, url: &str) -> Result<String, ScraperError> {
            if let Ok(mut requests) = self.requests.lock() {
                requests.push(url.to_string());
            }
            if let Some(&status) = self.failing.get(url) {
                return Err(ScraperError::Status {
                    url: url.to_string(),
                    status,
                });
            }
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| ScraperError::NotFound(url.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemorySource;
    use super::*;
    use std::time::Duration;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
        }
    }

    #[test]
    fn test_transient_errors() {
        let status = |status| ScraperError::Status {
            url: "u".to_string(),
            status,
        };
        assert!(status(503).is_transient());
        assert!(status(429).is_transient());
        assert!(!status(403).is_transient());
        assert!(!ScraperError::NotFound("u".to_string()).is_transient());
    }

    #[tokio::test]
    async fn test_fetch_with_retry_retries_server_errors() {
        let source = MemorySource::new().failing("https://x/a", 502);

        let result = fetch_with_retry(&source, &fast_policy(), "https://x/a").await;

        assert!(matches!(result, Err(ScraperError::Status { status: 502, .. })));
        assert_eq!(source.request_count("https://x/a"), 3);
    }

    #[tokio::test]
    async fn test_fetch_with_retry_does_not_retry_missing_pages() {
        let source = MemorySource::new();

        let result = fetch_with_retry(&source, &fast_policy(), "https://x/missing").await;

        assert!(matches!(result, Err(ScraperError::NotFound(_))));
        assert_eq!(source.request_count("https://x/missing"), 1);
    }

    #[tokio::test]
    async fn test_fetch_with_retry_returns_page() {
        let source = MemorySource::new().page("https://x/a", "<html>ok</html>");

        let html = fetch_with_retry(&source, &fast_policy(), "https://x/a")
            .await
            .expect("Failed to fetch");
        assert_eq!(html, "<html>ok</html>");
    }

    #[test]
    fn test_web_scraper_builds_from_config() {
        assert!(WebScraper::new(&FetchConfig::default()).is_ok());
    }
}
