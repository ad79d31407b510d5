use crate::crawler::WorkerState;
use crate::metrics::snapshot::MetricsSnapshot;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, PoisonError,
};
use std::time::{Duration, Instant};

/// Live counters updated by the workers while a crawl runs.
#[derive(Clone)]
pub struct MetricsCollector {
    jobs_queued: Arc<AtomicU64>,
    jobs_completed: Arc<AtomicU64>,
    requests_success: Arc<AtomicU64>,
    requests_failed: Arc<AtomicU64>,
    total_response_time_ms: Arc<AtomicU64>,
    /// Number of workers in each `WorkerState`, indexed by `WorkerState::index`.
    worker_states: Arc<[AtomicU64; WorkerState::COUNT]>,
    start_time: Arc<Mutex<Instant>>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self {
            jobs_queued: Arc::new(AtomicU64::new(0)),
            jobs_completed: Arc::new(AtomicU64::new(0)),
            requests_success: Arc::new(AtomicU64::new(0)),
            requests_failed: Arc::new(AtomicU64::new(0)),
            total_response_time_ms: Arc::new(AtomicU64::new(0)),
            worker_states: Arc::new(std::array::from_fn(|_| AtomicU64::new(0))),
            start_time: Arc::new(Mutex::new(Instant::now())),
        }
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zeroes every counter and parks `workers` workers in `Idle`.
    pub fn begin_run(&self, workers: usize) {
        for counter in [
            &self.jobs_queued,
            &self.jobs_completed,
            &self.requests_success,
            &self.requests_failed,
            &self.total_response_time_ms,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
        for gauge in self.worker_states.iter() {
            gauge.store(0, Ordering::SeqCst);
        }
        self.worker_states[WorkerState::Idle.index()].store(workers as u64, Ordering::SeqCst);
        *self.start_time.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    pub fn increment_jobs_queued(&self) {
        self.jobs_queued.fetch_add(1, Ordering::SeqCst);
    }

    /// Moves one worker from `from` to `to`.
    pub fn worker_moved(&self, from: WorkerState, to: WorkerState) {
        let _ = self.worker_states[from.index()].fetch_update(
            Ordering::SeqCst,
            Ordering::SeqCst,
            |n| Some(n.saturating_sub(1)),
        );
        self.worker_states[to.index()].fetch_add(1, Ordering::SeqCst);
    }

    /// Moves every idle worker to `Terminated` once the job queue is drained.
    pub fn terminate_idle_workers(&self) {
        let idle = self.worker_states[WorkerState::Idle.index()].swap(0, Ordering::SeqCst);
        self.worker_states[WorkerState::Terminated.index()].fetch_add(idle, Ordering::SeqCst);
    }

    pub fn workers_in(&self, state: WorkerState) -> u64 {
        self.worker_states[state.index()].load(Ordering::SeqCst)
    }

    pub fn record_success(&self, duration: Duration) {
        self.jobs_completed.fetch_add(1, Ordering::SeqCst);
        self.requests_success.fetch_add(1, Ordering::SeqCst);
        self.total_response_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn record_failure(&self) {
        self.jobs_completed.fetch_add(1, Ordering::SeqCst);
        self.requests_failed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let completed = self.jobs_completed.load(Ordering::SeqCst);
        let success = self.requests_success.load(Ordering::SeqCst);
        let failed = self.requests_failed.load(Ordering::SeqCst);
        let total_time = self.total_response_time_ms.load(Ordering::SeqCst);

        let success_rate = if completed > 0 {
            (success as f64 / completed as f64) * 100.0
        } else {
            0.0
        };

        // failures are left out of the average, same as the final report
        let avg_response_time_ms = if success > 0 { total_time / success } else { 0 };

        let elapsed = self
            .start_time
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
            .as_secs_f64();

        let awaiting_permit = self.workers_in(WorkerState::AwaitingPermit);
        let fetching = self.workers_in(WorkerState::Fetching);
        let publishing = self.workers_in(WorkerState::Publishing);

        MetricsSnapshot {
            jobs_queued: self.jobs_queued.load(Ordering::SeqCst),
            jobs_completed: completed,
            requests_success: success,
            requests_failed: failed,
            idle_workers: self.workers_in(WorkerState::Idle),
            active_workers: awaiting_permit + fetching + publishing,
            awaiting_permit,
            terminated_workers: self.workers_in(WorkerState::Terminated),
            success_rate,
            avg_response_time_ms,
            requests_per_second: if elapsed > 0.0 {
                completed as f64 / elapsed
            } else {
                0.0
            },
            elapsed_seconds: elapsed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_counts() {
        let metrics = MetricsCollector::new();
        metrics.increment_jobs_queued();
        metrics.increment_jobs_queued();
        metrics.record_success(Duration::from_millis(100));
        metrics.record_failure();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.jobs_queued, 2);
        assert_eq!(snapshot.jobs_completed, 2);
        assert_eq!(snapshot.requests_success, 1);
        assert_eq!(snapshot.requests_failed, 1);
        assert_eq!(snapshot.avg_response_time_ms, 100);
        assert_eq!(snapshot.success_rate, 50.0);
    }

    #[test]
    fn test_worker_gauges_follow_transitions() {
        let metrics = MetricsCollector::new();
        metrics.begin_run(2);
        assert_eq!(metrics.snapshot().idle_workers, 2);

        metrics.worker_moved(WorkerState::Idle, WorkerState::AwaitingPermit);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.idle_workers, 1);
        assert_eq!(snapshot.awaiting_permit, 1);
        assert_eq!(snapshot.active_workers, 1);

        metrics.worker_moved(WorkerState::AwaitingPermit, WorkerState::Fetching);
        metrics.worker_moved(WorkerState::Fetching, WorkerState::Publishing);
        metrics.worker_moved(WorkerState::Publishing, WorkerState::Idle);
        metrics.terminate_idle_workers();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.active_workers, 0);
        assert_eq!(snapshot.idle_workers, 0);
        assert_eq!(snapshot.terminated_workers, 2);
    }

    #[test]
    fn test_begin_run_clears_previous_run() {
        let metrics = MetricsCollector::new();
        metrics.begin_run(3);
        metrics.increment_jobs_queued();
        metrics.record_failure();
        metrics.terminate_idle_workers();

        metrics.begin_run(3);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.jobs_queued, 0);
        assert_eq!(snapshot.jobs_completed, 0);
        assert_eq!(snapshot.requests_failed, 0);
        assert_eq!(snapshot.idle_workers, 3);
        assert_eq!(snapshot.terminated_workers, 0);
    }

    #[test]
    fn test_gauges_never_underflow() {
        let metrics = MetricsCollector::new();
        metrics.worker_moved(WorkerState::Idle, WorkerState::AwaitingPermit);
        assert_eq!(metrics.workers_in(WorkerState::Idle), 0);
        assert_eq!(metrics.workers_in(WorkerState::AwaitingPermit), 1);
    }
}
