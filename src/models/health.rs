use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Health status of a single service (or of the whole system)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Healthy,
    Warning,
    Critical,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cumulative entry counts per severity bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityBreakdown {
    #[serde(rename = "High")]
    pub high: u64,
    #[serde(rename = "Medium")]
    pub medium: u64,
    #[serde(rename = "Low")]
    pub low: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub service_name: String,
    pub status: ServiceStatus,
    /// Error ratio of the most recent batch only
    pub error_rate: f64,
    pub total_logs: u64,
    pub error_count: u64,
    pub warning_count: u64,
    pub last_seen: DateTime<Utc>,
    pub severity_breakdown: SeverityBreakdown,
    pub most_common_errors: Vec<String>,
}

impl ServiceHealth {
    /// Fresh record for a service that has not been processed yet
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            status: ServiceStatus::Healthy,
            error_rate: 0.0,
            total_logs: 0,
            error_count: 0,
            warning_count: 0,
            last_seen: Utc::now(),
            severity_breakdown: SeverityBreakdown::default(),
            most_common_errors: Vec::new(),
        }
    }
}

/// System-wide health summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealth {
    pub overall_status: ServiceStatus,
    pub total_services: usize,
    pub healthy_services: usize,
    pub warning_services: usize,
    pub critical_services: usize,
    pub services: Vec<ServiceHealth>,
    pub last_updated: DateTime<Utc>,
}
