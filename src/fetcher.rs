use crate::error::{FetchError, Result};
use crate::parser::{HtmlPageParser, PageParser, PageSummary};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_USER_AGENT: &str = concat!("ratecrawl/", env!("CARGO_PKG_VERSION"));

/// A page that was fetched and parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub status: u16,
    pub summary: PageSummary,
}

/// A failed fetch. Keeps the status code when the server answered before the
/// failure happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchFailure {
    pub status: Option<u16>,
    pub error: FetchError,
}

impl FetchFailure {
    pub fn new(status: Option<u16>, error: FetchError) -> Self {
        Self { status, error }
    }
}

impl From<FetchError> for FetchFailure {
    fn from(error: FetchError) -> Self {
        Self::new(None, error)
    }
}

/// Outcome of one job, as handed to the collector.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult {
    pub url: String,
    pub title: String,
    pub h1: String,
    pub h2_count: usize,
    pub status_code: Option<u16>,
    pub duration: Duration,
    pub error: Option<FetchError>,
}

impl FetchResult {
    pub fn failed(url: impl Into<String>, error: FetchError, duration: Duration) -> Self {
        Self {
            url: url.into(),
            title: String::new(),
            h1: String::new(),
            h2_count: 0,
            status_code: None,
            duration,
            error: Some(error),
        }
    }

    pub fn from_outcome(
        url: impl Into<String>,
        outcome: std::result::Result<FetchedPage, FetchFailure>,
        duration: Duration,
    ) -> Self {
        match outcome {
            Ok(page) => Self {
                url: url.into(),
                title: page.summary.title,
                h1: page.summary.h1,
                h2_count: page.summary.h2_count,
                status_code: Some(page.status),
                duration,
                error: None,
            },
            Err(failure) => Self {
                status_code: failure.status,
                ..Self::failed(url, failure.error, duration)
            },
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Duration rounded to whole milliseconds.
    pub fn duration_ms(&self) -> u64 {
        (self.duration.as_secs_f64() * 1000.0).round() as u64
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetches and parses one page. Must return promptly once `cancel` fires.
    async fn fetch(
        &self,
        url: &Url,
        cancel: &CancellationToken,
    ) -> std::result::Result<FetchedPage, FetchFailure>;
}

/// reqwest-backed fetcher. One GET per call with a hard timeout, no retries.
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
    parser: Arc<dyn PageParser>,
    fail_on_http_error: bool,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        Self::builder().timeout(timeout).build()
    }

    pub fn builder() -> HttpFetcherBuilder {
        HttpFetcherBuilder::default()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn get(&self, url: &Url) -> std::result::Result<FetchedPage, FetchFailure> {
        log::info!("Visiting: {}", url);

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| FetchFailure::new(None, self.classify(e)))?;

        let status = response.status().as_u16();
        if self.fail_on_http_error && !response.status().is_success() {
            // dropping the response releases the connection
            return Err(FetchFailure::new(Some(status), FetchError::HttpStatus(status)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchFailure::new(Some(status), self.classify(e)))?;
        log::debug!("{} answered {} ({} bytes)", url, status, body.len());

        // parsing is CPU-bound, keep it off the async workers
        let parser = self.parser.clone();
        let summary = tokio::task::spawn_blocking(move || parser.parse(&body))
            .await
            .map_err(|e| {
                FetchFailure::new(Some(status), FetchError::Parse(format!("parser failed: {}", e)))
            })?
            .map_err(|e| FetchFailure::new(Some(status), FetchError::Parse(e.to_string())))?;

        Ok(FetchedPage { status, summary })
    }

    fn classify(&self, error: reqwest::Error) -> FetchError {
        if error.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else {
            FetchError::Network(error.to_string())
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &Url,
        cancel: &CancellationToken,
    ) -> std::result::Result<FetchedPage, FetchFailure> {
        tokio::select! {
            _ = cancel.cancelled() => Err(FetchFailure::from(FetchError::Cancelled)),
            outcome = self.get(url) => outcome,
        }
    }
}

pub struct HttpFetcherBuilder {
    timeout: Duration,
    user_agent: String,
    parser: Arc<dyn PageParser>,
    fail_on_http_error: bool,
}

impl Default for HttpFetcherBuilder {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            parser: Arc::new(HtmlPageParser),
            fail_on_http_error: false,
        }
    }
}

impl HttpFetcherBuilder {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn parser(mut self, parser: Arc<dyn PageParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Treat non-2xx responses as failed jobs instead of recording them.
    pub fn fail_on_http_error(mut self, enabled: bool) -> Self {
        self.fail_on_http_error = enabled;
        self
    }

    pub fn build(self) -> Result<HttpFetcher> {
        if self.timeout.is_zero() {
            return Err(crate::error::Error::Config(
                "fetch timeout must be greater than zero".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent)
            .build()?;

        Ok(HttpFetcher {
            client,
            timeout: self.timeout,
            parser: self.parser,
            fail_on_http_error: self.fail_on_http_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_result_has_only_error() {
        let result = FetchResult::failed(
            "::bad::",
            FetchError::UrlParse("nope".into()),
            Duration::from_millis(1),
        );
        assert!(!result.is_success());
        assert!(result.title.is_empty());
        assert!(result.status_code.is_none());
    }

    #[test]
    fn test_parse_failure_keeps_status() {
        let outcome = Err(FetchFailure::new(Some(200), FetchError::Parse("bad".into())));
        let result = FetchResult::from_outcome("https://a.example", outcome, Duration::ZERO);
        assert_eq!(result.status_code, Some(200));
        assert_eq!(result.error, Some(FetchError::Parse("bad".into())));
    }

    #[test]
    fn test_duration_ms_rounds() {
        let mut result = FetchResult::failed("u", FetchError::Cancelled, Duration::from_micros(1500));
        assert_eq!(result.duration_ms(), 2);
        result.duration = Duration::from_micros(1499);
        assert_eq!(result.duration_ms(), 1);
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        assert!(HttpFetcher::new(Duration::ZERO).is_err());
        let fetcher = HttpFetcher::new(DEFAULT_TIMEOUT).unwrap();
        assert_eq!(fetcher.timeout(), DEFAULT_TIMEOUT);
    }
}
