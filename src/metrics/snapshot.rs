use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub jobs_queued: u64,
    pub jobs_completed: u64,
    pub requests_success: u64,
    pub requests_failed: u64,
    pub idle_workers: u64,
    pub active_workers: u64,
    pub awaiting_permit: u64,
    pub terminated_workers: u64,
    pub success_rate: f64,
    pub avg_response_time_ms: u64,
    pub requests_per_second: f64,
    pub elapsed_seconds: f64,
}
