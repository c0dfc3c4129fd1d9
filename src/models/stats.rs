use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Global processing statistics, replaced once per batch cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStats {
    pub total_logs_processed: u64,
    pub logs_per_second: f64,
    pub active_services: usize,
    pub total_anomalies: u64,
    /// Duration of the last cycle in seconds
    pub processing_lag: f64,
    pub last_processed_timestamp: DateTime<Utc>,
    /// Entries still queued across all services after the last cycle
    pub queue_size: usize,
}

impl Default for ProcessingStats {
    fn default() -> Self {
        Self {
            total_logs_processed: 0,
            logs_per_second: 0.0,
            active_services: 0,
            total_anomalies: 0,
            processing_lag: 0.0,
            last_processed_timestamp: Utc::now(),
            queue_size: 0,
        }
    }
}
