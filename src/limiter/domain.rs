use super::{RateConfig, TokenBucket};
use crate::error::{FetchError, Result};
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Scheme, host and non-default port of a URL. The rate limiting key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Origin(String);

impl Origin {
    pub fn from_url(url: &Url) -> std::result::Result<Self, FetchError> {
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(FetchError::UrlParse(format!(
                    "unsupported scheme '{}' in {}",
                    other, url
                )));
            }
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(FetchError::UrlParse(format!("missing host in {}", url)));
        }
        Ok(Origin(url.origin().ascii_serialization()))
    }

    /// Parses `input` and derives its origin in one step.
    pub fn parse(input: &str) -> std::result::Result<(Url, Self), FetchError> {
        let url = Url::parse(input.trim())
            .map_err(|e| FetchError::UrlParse(format!("{}: {}", input, e)))?;
        let origin = Self::from_url(&url)?;
        Ok((url, origin))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Registry of per-origin token buckets.
///
/// Lookups of a known origin take a shared shard lock only. The exclusive lock
/// is taken to insert a missing bucket. Waiting for a permit happens on the
/// bucket itself, so one origin only serializes on its own bucket.
#[derive(Debug)]
pub struct DomainRateLimiter {
    config: RateConfig,
    limiters: DashMap<Origin, Arc<TokenBucket>>,
}

impl DomainRateLimiter {
    pub fn new(config: RateConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            limiters: DashMap::new(),
        })
    }

    pub fn config(&self) -> RateConfig {
        self.config
    }

    /// Returns the bucket for `origin`, creating it on first use. Repeated
    /// calls hand out the same `Arc`.
    pub fn get_or_create(&self, origin: &Origin) -> Arc<TokenBucket> {
        if let Some(bucket) = self.limiters.get(origin) {
            return bucket.value().clone();
        }

        // entry() re-checks under the shard write lock, so a racing insert wins once
        self.limiters
            .entry(origin.clone())
            .or_insert_with(|| {
                log::debug!(
                    "Created rate limiter for {} ({} req/s, burst {})",
                    origin,
                    self.config.requests_per_second,
                    self.config.burst
                );
                Arc::new(TokenBucket::new(self.config))
            })
            .value()
            .clone()
    }

    /// Blocks the caller until `origin` yields a permit.
    pub async fn acquire(
        &self,
        origin: &Origin,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), FetchError> {
        let bucket = self.get_or_create(origin);
        bucket.acquire(cancel).await
    }

    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }

    pub fn origins(&self) -> Vec<Origin> {
        let mut origins: Vec<_> = self.limiters.iter().map(|e| e.key().clone()).collect();
        origins.sort();
        origins
    }
}
