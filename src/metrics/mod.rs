pub mod collector;
pub mod report;
pub mod snapshot;

pub use collector::MetricsCollector;
pub use report::{Collector, RunStatistics};
pub use snapshot::MetricsSnapshot;
