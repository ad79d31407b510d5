//! Aggregation of finished jobs into the end-of-run statistics.

use crate::fetcher::FetchResult;
use chrono::{DateTime, Utc};
use futures::stream::StreamExt;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

#[derive(Debug, Clone, PartialEq)]
pub struct RunStatistics {
    pub total_jobs: usize,
    pub success_count: usize,
    pub error_count: usize,
    /// Sum of the durations of successful jobs.
    pub total_duration: Duration,
    /// Mean duration of successful jobs, zero when none succeeded.
    pub average_duration: Duration,
    pub elapsed: Duration,
    pub started_at: DateTime<Utc>,
}

/// Consumes results one at a time and keeps the running totals.
#[derive(Debug)]
pub struct Collector {
    results: Vec<FetchResult>,
    success_count: usize,
    error_count: usize,
    total_duration: Duration,
    started_at: DateTime<Utc>,
    start: Instant,
}

impl Default for Collector {
    fn default() -> Self {
        Self {
            results: Vec::new(),
            success_count: 0,
            error_count: 0,
            total_duration: Duration::ZERO,
            started_at: Utc::now(),
            start: Instant::now(),
        }
    }
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drains `results` until every sender is gone. A closed queue is the
    /// normal end of the run.
    pub async fn drain(results: mpsc::Receiver<FetchResult>) -> Self {
        ReceiverStream::new(results)
            .fold(Self::new(), |mut collector, result| async move {
                collector.record(result);
                collector
            })
            .await
    }

    pub fn record(&mut self, result: FetchResult) {
        match &result.error {
            None => {
                self.success_count += 1;
                self.total_duration += result.duration;
                log::debug!("Collected {} ({}ms)", result.url, result.duration_ms());
            }
            Some(error) => {
                self.error_count += 1;
                log::warn!("{} failed: {}", result.url, error);
            }
        }
        self.results.push(result);
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn statistics(&self) -> RunStatistics {
        let average_duration = match u32::try_from(self.success_count) {
            Ok(0) => Duration::ZERO,
            Ok(count) => self.total_duration / count,
            Err(_) => Duration::from_secs_f64(
                self.total_duration.as_secs_f64() / self.success_count as f64,
            ),
        };

        RunStatistics {
            total_jobs: self.results.len(),
            success_count: self.success_count,
            error_count: self.error_count,
            total_duration: self.total_duration,
            average_duration,
            elapsed: self.start.elapsed(),
            started_at: self.started_at,
        }
    }

    pub fn finish(self) -> (Vec<FetchResult>, RunStatistics) {
        let stats = self.statistics();
        (self.results, stats)
    }
}

impl RunStatistics {
    /// Recomputes the statistics from an already collected result set.
    pub fn from_results(results: &[FetchResult]) -> Self {
        let mut collector = Collector::new();
        for result in results {
            collector.record(result.clone());
        }
        collector.statistics()
    }
}
