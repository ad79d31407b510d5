pub mod config;
pub mod crawler;
pub mod error;
pub mod fetcher;
pub mod limiter;
pub mod metrics;
pub mod output;
pub mod parser;

pub use crawler::{CrawlReport, CrawlerEngine, CrawlerState, WorkerState, WorkerTracker, process_job, run_crawl};
pub use error::{Error, FetchError, Result};
pub use fetcher::{FetchFailure, FetchResult, FetchedPage, Fetcher, HttpFetcher};
pub use limiter::{DomainRateLimiter, Origin, RateConfig, TokenBucket};
pub use metrics::collector::MetricsCollector;
pub use metrics::report::{Collector, RunStatistics};
pub use metrics::snapshot::MetricsSnapshot;
pub use output::ResultSink;
pub use parser::{HtmlPageParser, PageParser, PageSummary, ParseError};
