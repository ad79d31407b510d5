use crate::crawler::DEFAULT_QUEUE_CAPACITY;
use crate::fetcher::DEFAULT_USER_AGENT;
use crate::limiter::RateConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CrawlConfig {
    #[serde(default)]
    #[validate(length(min = 1))]
    pub name: String,

    #[serde(default)]
    #[validate(length(min = 1))]
    pub urls: Vec<String>,

    #[serde(default = "default_workers")]
    #[validate(range(min = 1))]
    pub workers: usize,

    #[serde(default)]
    pub rate: RateConfig,

    #[serde(default = "default_timeout")]
    #[validate(range(min = 1))]
    pub timeout_ms: u64,

    #[serde(default = "default_queue_capacity")]
    #[validate(range(min = 1))]
    pub queue_capacity: usize,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Count non-2xx responses as failed jobs.
    #[serde(default)]
    pub fail_on_http_error: bool,

    #[serde(default)]
    pub output: Option<OutputConfig>,

    /// Optional path to a parent configuration file to inherit from
    #[serde(default)]
    pub extends: Option<String>,
}

impl CrawlConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutputConfig {
    Console,
    Csv { path: String },
}

pub(crate) fn default_workers() -> usize {
    4
}

pub(crate) fn default_timeout() -> u64 {
    10_000
}

pub(crate) fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

pub(crate) fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}
