use crate::error::{Error, FetchError, Result};
use crate::fetcher::{FetchFailure, FetchResult, Fetcher};
use crate::limiter::{DomainRateLimiter, Origin};
use crate::metrics::collector::MetricsCollector;
use crate::metrics::report::{Collector, RunStatistics};
use crate::metrics::snapshot::MetricsSnapshot;
use futures::stream::StreamExt;
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlerState {
    Idle,
    Running,
    Stopped,
}

/// Where a worker is in its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    AwaitingPermit,
    Fetching,
    Publishing,
    Terminated,
}

impl WorkerState {
    pub const COUNT: usize = 5;

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Follows one worker through `Idle -> AwaitingPermit -> Fetching ->
/// Publishing -> Idle` for a single job and mirrors every step into the live
/// gauges. A job that fails before reaching the network still passes through
/// `Fetching`.
pub struct WorkerTracker {
    state: std::sync::Mutex<WorkerState>,
    metrics: Arc<MetricsCollector>,
}

impl WorkerTracker {
    /// Starts in `Idle`. The worker is expected to be counted as idle already.
    pub fn new(metrics: Arc<MetricsCollector>) -> Self {
        Self {
            state: std::sync::Mutex::new(WorkerState::Idle),
            metrics,
        }
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn advance(&self, next: WorkerState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == next {
            return;
        }
        log::trace!("worker {:?} -> {:?}", *state, next);
        self.metrics.worker_moved(*state, next);
        *state = next;
    }
}

/// Everything a run produced: the raw results in completion order and the
/// aggregate numbers.
#[derive(Debug, Clone)]
pub struct CrawlReport {
    pub results: Vec<FetchResult>,
    pub stats: RunStatistics,
}

/// Fixed-size worker pool. Workers pull jobs from a bounded queue, take a
/// permit from the job's origin bucket, fetch, and publish to the result queue.
pub struct CrawlerEngine {
    workers: usize,
    queue_capacity: usize,
    limiter: Arc<DomainRateLimiter>,
    fetcher: Arc<dyn Fetcher>,
    metrics: Arc<MetricsCollector>,
    cancel: std::sync::Mutex<CancellationToken>,
    state: Arc<Mutex<CrawlerState>>,
    state_watcher: watch::Sender<CrawlerState>,
}

impl CrawlerEngine {
    pub fn new(
        workers: usize,
        limiter: DomainRateLimiter,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self> {
        if workers == 0 {
            return Err(Error::Config("worker count must be at least 1".to_string()));
        }
        let (state_tx, _) = watch::channel(CrawlerState::Idle);

        Ok(Self {
            workers,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            limiter: Arc::new(limiter),
            fetcher,
            metrics: Arc::new(MetricsCollector::new()),
            cancel: std::sync::Mutex::new(CancellationToken::new()),
            state: Arc::new(Mutex::new(CrawlerState::Idle)),
            state_watcher: state_tx,
        })
    }

    /// Bound on both the job and the result queue. Submission stalls when the
    /// job queue is full.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::Config("queue capacity must be at least 1".to_string()));
        }
        self.queue_capacity = capacity;
        Ok(self)
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn limiter(&self) -> &Arc<DomainRateLimiter> {
        &self.limiter
    }

    /// Cancelling this token unblocks every worker waiting on a permit or a
    /// response. Jobs still queued come back as `Cancelled` results.
    ///
    /// The token belongs to the run in progress, or to the next one when idle.
    /// Once a cancelled run finishes the engine issues a fresh token, so later
    /// runs need a new handle.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.lock_token().clone()
    }

    fn lock_token(&self) -> std::sync::MutexGuard<'_, CancellationToken> {
        self.cancel.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs every URL to completion and returns one result per URL. Live
    /// metrics are reset at the start of each run.
    pub async fn run(&self, urls: Vec<String>) -> CrawlReport {
        self.set_state(CrawlerState::Running).await;
        self.metrics.begin_run(self.workers);
        let cancel = self.cancellation_token();
        log::info!(
            "Starting {} workers for {} URLs ({} req/s, burst {} per origin)",
            self.workers,
            urls.len(),
            self.limiter.config().requests_per_second,
            self.limiter.config().burst
        );

        let (jobs_tx, jobs_rx) = mpsc::channel::<String>(self.queue_capacity);
        let (results_tx, results_rx) = mpsc::channel::<FetchResult>(self.queue_capacity);

        // 1. Submitter: the job queue closes when this task drops its sender
        let metrics_seed = self.metrics.clone();
        let submitter = tokio::spawn(async move {
            for url in urls {
                if jobs_tx.send(url).await.is_err() {
                    break;
                }
                metrics_seed.increment_jobs_queued();
            }
        });

        // 2. Worker pool: at most `workers` jobs in flight, each on its own task.
        // The result queue closes once every worker is done.
        let workers = self.workers;
        let limiter = self.limiter.clone();
        let fetcher = self.fetcher.clone();
        let metrics = self.metrics.clone();
        let pool_metrics = self.metrics.clone();
        let pool = tokio::spawn(async move {
            ReceiverStream::new(jobs_rx)
                .for_each_concurrent(workers, |job| {
                    let limiter = limiter.clone();
                    let fetcher = fetcher.clone();
                    let metrics = metrics.clone();
                    let cancel = cancel.clone();
                    let results_tx = results_tx.clone();

                    async move {
                        let started = Instant::now();
                        let tracker = Arc::new(WorkerTracker::new(metrics.clone()));
                        let task = {
                            let tracker = tracker.clone();
                            let job = job.clone();
                            tokio::spawn(async move {
                                process_job(job, &limiter, fetcher.as_ref(), &tracker, &cancel)
                                    .await
                            })
                        };

                        let result = match task.await {
                            Ok(result) => result,
                            Err(e) => {
                                log::error!("Worker task for {} failed: {}", job, e);
                                FetchResult::failed(
                                    job,
                                    FetchError::Aborted(e.to_string()),
                                    started.elapsed(),
                                )
                            }
                        };

                        if result.is_success() {
                            metrics.record_success(result.duration);
                        } else {
                            metrics.record_failure();
                        }

                        tracker.advance(WorkerState::Publishing);
                        if results_tx.send(result).await.is_err() {
                            log::error!("Result queue closed before the pool finished");
                        }
                        tracker.advance(WorkerState::Idle);
                    }
                })
                .await;

            pool_metrics.terminate_idle_workers();
            drop(results_tx);
            log::debug!("Worker pool finished");
        });

        // 3. Collector runs here, concurrently with the pool
        let collector = Collector::drain(results_rx).await;

        if let Err(e) = submitter.await {
            log::error!("Job submitter failed: {}", e);
        }
        if let Err(e) = pool.await {
            log::error!("Worker pool failed: {}", e);
        }

        let (results, stats) = collector.finish();
        log::info!(
            "Crawl finished: {} jobs, {} ok, {} failed in {:.2}s",
            stats.total_jobs,
            stats.success_count,
            stats.error_count,
            stats.elapsed.as_secs_f64()
        );

        {
            let mut token = self.lock_token();
            if token.is_cancelled() {
                *token = CancellationToken::new();
            }
        }

        self.set_state(CrawlerState::Stopped).await;
        CrawlReport { results, stats }
    }

    pub fn get_metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn watch_metrics(&self) -> watch::Receiver<MetricsSnapshot> {
        let (tx, rx) = watch::channel(self.metrics.snapshot());
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(500));
            loop {
                interval.tick().await;
                if tx.send(metrics.snapshot()).is_err() {
                    break;
                }
            }
        });
        rx
    }

    pub fn watch_state(&self) -> watch::Receiver<CrawlerState> {
        self.state_watcher.subscribe()
    }

    pub async fn state(&self) -> CrawlerState {
        *self.state.lock().await
    }

    pub async fn set_state(&self, state: CrawlerState) {
        let mut state_guard = self.state.lock().await;
        *state_guard = state;
        let _ = self.state_watcher.send(state);
    }
}

/// One pass of the worker loop for a single job. Never fails: every error ends
/// up inside the returned result. The duration covers parsing the URL, waiting
/// for the permit and the fetch itself.
pub async fn process_job(
    job: String,
    limiter: &DomainRateLimiter,
    fetcher: &dyn Fetcher,
    tracker: &WorkerTracker,
    cancel: &CancellationToken,
) -> FetchResult {
    let start = Instant::now();
    tracker.advance(WorkerState::AwaitingPermit);

    let (url, origin) = match Origin::parse(&job) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracker.advance(WorkerState::Fetching);
            return FetchResult::failed(job, e, start.elapsed());
        }
    };

    log::trace!("{} waiting for a permit on {}", job, origin);
    let permit = limiter.acquire(&origin, cancel).await;
    tracker.advance(WorkerState::Fetching);
    if let Err(e) = permit {
        log::debug!("Gave up waiting for {}: {}", origin, e);
        return FetchResult::failed(job, e, start.elapsed());
    }

    let outcome = if cancel.is_cancelled() {
        Err(FetchFailure::from(FetchError::Cancelled))
    } else {
        fetcher.fetch(&url, cancel).await
    };

    FetchResult::from_outcome(job, outcome, start.elapsed())
}

/// Fetches `urls` with the default HTTP fetcher and returns the full report.
/// Fails only on invalid configuration, before any request is made.
pub async fn run_crawl(
    urls: Vec<String>,
    worker_count: usize,
    rate: crate::limiter::RateConfig,
    timeout: Duration,
) -> Result<CrawlReport> {
    let limiter = DomainRateLimiter::new(rate)?;
    let fetcher = crate::fetcher::HttpFetcher::new(timeout)?;
    let engine = CrawlerEngine::new(worker_count, limiter, Arc::new(fetcher))?;
    Ok(engine.run(urls).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::FetchedPage;
    use crate::limiter::RateConfig;
    use crate::parser::PageSummary;
    use async_trait::async_trait;
    use url::Url;

    struct StaticFetcher;

    #[async_trait]
    impl Fetcher for StaticFetcher {
        async fn fetch(
            &self,
            url: &Url,
            _cancel: &CancellationToken,
        ) -> std::result::Result<FetchedPage, FetchFailure> {
            Ok(FetchedPage {
                status: 200,
                summary: PageSummary {
                    title: url.path().to_string(),
                    h1: String::new(),
                    h2_count: 0,
                },
            })
        }
    }

    fn limiter() -> DomainRateLimiter {
        DomainRateLimiter::new(RateConfig::new(100.0, 10)).unwrap()
    }

    fn tracker() -> WorkerTracker {
        WorkerTracker::new(Arc::new(MetricsCollector::new()))
    }

    #[test]
    fn test_zero_workers_rejected() {
        assert!(CrawlerEngine::new(0, limiter(), Arc::new(StaticFetcher)).is_err());
    }

    #[test]
    fn test_zero_queue_capacity_rejected() {
        let engine = CrawlerEngine::new(2, limiter(), Arc::new(StaticFetcher)).unwrap();
        assert!(engine.with_queue_capacity(0).is_err());
    }

    #[tokio::test]
    async fn test_process_job_bad_url_skips_limiter() {
        let limiter = limiter();
        let result = process_job(
            "not a url".to_string(),
            &limiter,
            &StaticFetcher,
            &tracker(),
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(result.error, Some(FetchError::UrlParse(_))));
        assert!(result.status_code.is_none());
        assert!(limiter.is_empty());
    }

    #[tokio::test]
    async fn test_process_job_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = process_job(
            "https://a.example/".to_string(),
            &limiter(),
            &StaticFetcher,
            &tracker(),
            &cancel,
        )
        .await;

        assert_eq!(result.error, Some(FetchError::Cancelled));
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let engine = CrawlerEngine::new(2, limiter(), Arc::new(StaticFetcher)).unwrap();
        let state_rx = engine.watch_state();
        assert_eq!(engine.state().await, CrawlerState::Idle);

        let report = engine
            .run(vec!["https://a.example/x".into(), "https://b.example/y".into()])
            .await;

        assert_eq!(report.results.len(), 2);
        assert_eq!(report.stats.success_count, 2);
        assert_eq!(engine.state().await, CrawlerState::Stopped);
        assert_eq!(*state_rx.borrow(), CrawlerState::Stopped);
        let metrics = engine.get_metrics();
        assert_eq!(metrics.jobs_completed, 2);
        assert_eq!(metrics.active_workers, 0);
        assert_eq!(metrics.idle_workers, 0);
        assert_eq!(metrics.terminated_workers, 2);
    }

    #[tokio::test]
    async fn test_tracker_walks_the_worker_loop() {
        let metrics = Arc::new(MetricsCollector::new());
        metrics.begin_run(1);
        let tracker = WorkerTracker::new(metrics.clone());

        let result = process_job(
            "https://a.example/".to_string(),
            &limiter(),
            &StaticFetcher,
            &tracker,
            &CancellationToken::new(),
        )
        .await;
        assert!(result.is_success());
        assert_eq!(tracker.state(), WorkerState::Fetching);
        assert_eq!(metrics.workers_in(WorkerState::Fetching), 1);
        assert_eq!(metrics.workers_in(WorkerState::Idle), 0);

        tracker.advance(WorkerState::Publishing);
        tracker.advance(WorkerState::Idle);
        assert_eq!(metrics.workers_in(WorkerState::Idle), 1);
        assert_eq!(metrics.snapshot().active_workers, 0);
    }

    #[tokio::test]
    async fn test_engine_is_reusable_after_cancelled_run() {
        let engine = CrawlerEngine::new(2, limiter(), Arc::new(StaticFetcher)).unwrap();
        let first_token = engine.cancellation_token();
        first_token.cancel();

        let cancelled = engine
            .run(vec!["https://a.example/1".into(), "https://a.example/2".into()])
            .await;
        assert_eq!(cancelled.stats.error_count, 2);

        let token = engine.cancellation_token();
        assert!(!token.is_cancelled());

        let report = engine
            .run(vec![
                "https://a.example/3".into(),
                "https://b.example/4".into(),
                "https://c.example/5".into(),
            ])
            .await;
        assert_eq!(report.stats.success_count, 3);

        // counters describe the latest run only
        let metrics = engine.get_metrics();
        assert_eq!(metrics.jobs_queued, 3);
        assert_eq!(metrics.jobs_completed, 3);
        assert_eq!(metrics.requests_failed, 0);
        assert_eq!(metrics.terminated_workers, 2);
    }

    #[tokio::test]
    async fn test_empty_job_list() {
        let engine = CrawlerEngine::new(3, limiter(), Arc::new(StaticFetcher)).unwrap();
        let report = engine.run(Vec::new()).await;
        assert!(report.results.is_empty());
        assert_eq!(report.stats.total_jobs, 0);
    }
}
