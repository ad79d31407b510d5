use crate::error::Result;
use crate::fetcher::FetchResult;
use async_trait::async_trait;

pub mod console;
pub mod csv;

/// Destination for a finished run's results.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Writes every result. Must leave nothing buffered when it returns.
    async fn export(&mut self, results: &[FetchResult]) -> Result<()>;
}
