use arc_swap::ArcSwap;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use crate::models::ProcessingStats;

/// Shortest cycle duration used for the rate, so a near-instant cycle does not report an absurd rate
const MIN_CYCLE_SECONDS: f64 = 0.1;

/// Totals of one batch cycle
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CycleSummary {
    pub processed: u64,
    pub anomalies: u64,
    pub duration: Duration,
    pub active_services: usize,
    pub queue_size: usize,
}

/// Global processing statistics.
///
/// Readers get a consistent snapshot without locking; the scheduler is the
/// only writer and replaces the whole record once per cycle.
pub struct StatsTracker {
    current: ArcSwap<ProcessingStats>,
}

impl Default for StatsTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsTracker {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(ProcessingStats::default()),
        }
    }

    pub fn snapshot(&self) -> ProcessingStats {
        self.current.load().as_ref().clone()
    }

    pub fn record_cycle(&self, cycle: CycleSummary) -> ProcessingStats {
        let seconds = cycle.duration.as_secs_f64();
        let previous = self.current.load();

        let next = ProcessingStats {
            total_logs_processed: previous.total_logs_processed + cycle.processed,
            logs_per_second: cycle.processed as f64 / seconds.max(MIN_CYCLE_SECONDS),
            active_services: cycle.active_services,
            total_anomalies: previous.total_anomalies + cycle.anomalies,
            processing_lag: seconds,
            last_processed_timestamp: Utc::now(),
            queue_size: cycle.queue_size,
        };

        self.current.store(Arc::new(next.clone()));
        next
    }
}
