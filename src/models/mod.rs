pub mod health;
pub mod log;
pub mod stats;

pub use health::{ServiceHealth, ServiceStatus, SeverityBreakdown, SystemHealth};
pub use log::{LogEntry, LogLevel, ProcessedLog};
pub use stats::ProcessingStats;
