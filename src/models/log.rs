use crate::classifier::taxonomy::{ErrorSubtype, ErrorType, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Log level reported by the producing service
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    #[serde(alias = "WARNING")]
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
        }
    }

    /// ERROR and FATAL count towards a service's error rate
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error | Self::Fatal)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw log entry as shipped by a microservice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub service_name: String,
    pub level: LogLevel,
    pub message: String,
    /// Defaults to the time of ingestion when the producer omits it
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u32>,
}

impl LogEntry {
    pub fn new(service_name: impl Into<String>, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            level,
            message: message.into(),
            timestamp: Utc::now(),
            source_file: None,
            line_number: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// A log entry after detection and classification.
///
/// Produced once per entry during a batch cycle and handed to the broadcast
/// layer; the pipeline does not retain it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedLog {
    pub id: String,
    pub service_name: String,
    pub level: LogLevel,
    pub message: String,
    pub error_type: ErrorType,
    pub error_subtype: ErrorSubtype,
    pub severity: Severity,
    pub description: String,
    pub is_anomaly: bool,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    pub processed_at: DateTime<Utc>,
}
