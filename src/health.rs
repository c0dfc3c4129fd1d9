//! Per-service health aggregation.
//!
//! Only the batch scheduler mutates these records; the REST and broadcast
//! layers read cloned snapshots.

use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;

use crate::classifier::ErrorType;
use crate::models::{LogEntry, LogLevel, ServiceHealth, ServiceStatus, SystemHealth};

/// Error ratio above which a service is critical
pub const CRITICAL_ERROR_RATE: f64 = 0.10;
/// Error ratio above which a service is at least warning
pub const WARNING_ERROR_RATE: f64 = 0.05;

const MOST_COMMON_ERRORS: usize = 3;

struct ServiceRecord {
    health: ServiceHealth,
    error_types: HashMap<ErrorType, u64>,
}

impl ServiceRecord {
    fn new(service: &str) -> Self {
        Self {
            health: ServiceHealth::new(service),
            error_types: HashMap::new(),
        }
    }
}

/// Status of one batch. No hysteresis: each batch is judged on its own.
pub fn evaluate_status(error_rate: f64, warning_logs: u64) -> ServiceStatus {
    if error_rate > CRITICAL_ERROR_RATE {
        ServiceStatus::Critical
    } else if error_rate > WARNING_ERROR_RATE || warning_logs > 0 {
        ServiceStatus::Warning
    } else {
        ServiceStatus::Healthy
    }
}

/// Strict priority: critical, then warning, then healthy
pub fn system_status(statuses: &[ServiceStatus]) -> ServiceStatus {
    if statuses.contains(&ServiceStatus::Critical) {
        ServiceStatus::Critical
    } else if statuses.contains(&ServiceStatus::Warning) {
        ServiceStatus::Warning
    } else {
        ServiceStatus::Healthy
    }
}

#[derive(Default)]
pub struct HealthAggregator {
    records: DashMap<String, ServiceRecord>,
}

impl HealthAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a zero-count healthy record; returns false when one existed
    pub fn register(&self, service: &str) -> bool {
        let mut created = false;
        self.records.entry(service.to_string()).or_insert_with(|| {
            created = true;
            ServiceRecord::new(service)
        });
        created
    }

    pub fn remove(&self, service: &str) -> bool {
        self.records.remove(service).is_some()
    }

    pub fn contains(&self, service: &str) -> bool {
        self.records.contains_key(service)
    }

    /// Fold one drained batch into the service's record.
    ///
    /// `error_rate` reflects this batch only; the counters are cumulative.
    /// Returns `None` for services that are not registered.
    pub fn update(&self, service: &str, batch: &[LogEntry]) -> Option<ServiceHealth> {
        let mut record = self.records.get_mut(service)?;

        let error_logs = batch.iter().filter(|e| e.level.is_error()).count() as u64;
        let warning_logs = batch.iter().filter(|e| e.level == LogLevel::Warn).count() as u64;
        let other_logs = batch.len() as u64 - error_logs - warning_logs;
        let error_rate = error_logs as f64 / batch.len().max(1) as f64;

        let health = &mut record.health;
        health.total_logs += batch.len() as u64;
        health.error_count += error_logs;
        health.warning_count += warning_logs;
        health.error_rate = error_rate;
        health.status = evaluate_status(error_rate, warning_logs);
        health.last_seen = Utc::now();
        health.severity_breakdown.high += error_logs;
        health.severity_breakdown.medium += warning_logs;
        health.severity_breakdown.low += other_logs;

        Some(health.clone())
    }

    /// Count classified error types for `most_common_errors`
    pub fn record_error_types(&self, service: &str, error_types: &[ErrorType]) {
        if error_types.is_empty() {
            return;
        }
        let Some(mut record) = self.records.get_mut(service) else {
            return;
        };

        for error_type in error_types {
            *record.error_types.entry(*error_type).or_insert(0) += 1;
        }

        let mut ranked: Vec<(&ErrorType, &u64)> = record.error_types.iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.as_str().cmp(b.0.as_str())));
        let top: Vec<String> = ranked
            .into_iter()
            .take(MOST_COMMON_ERRORS)
            .map(|(t, _)| t.as_str().to_string())
            .collect();
        record.health.most_common_errors = top;
    }

    pub fn get(&self, service: &str) -> Option<ServiceHealth> {
        self.records.get(service).map(|r| r.health.clone())
    }

    /// Every record, sorted by service name
    pub fn all(&self) -> Vec<ServiceHealth> {
        let mut all: Vec<ServiceHealth> = self.records.iter().map(|r| r.health.clone()).collect();
        all.sort_by(|a, b| a.service_name.cmp(&b.service_name));
        all
    }

    pub fn system_health(&self) -> SystemHealth {
        let services = self.all();
        let statuses: Vec<ServiceStatus> = services.iter().map(|s| s.status).collect();
        let count = |status: ServiceStatus| statuses.iter().filter(|s| **s == status).count();

        SystemHealth {
            overall_status: system_status(&statuses),
            total_services: services.len(),
            healthy_services: count(ServiceStatus::Healthy),
            warning_services: count(ServiceStatus::Warning),
            critical_services: count(ServiceStatus::Critical),
            services,
            last_updated: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(errors: usize, warnings: usize, infos: usize) -> Vec<LogEntry> {
        let mut batch = Vec::new();
        batch.extend((0..errors).map(|_| LogEntry::new("svc", LogLevel::Error, "failed")));
        batch.extend((0..warnings).map(|_| LogEntry::new("svc", LogLevel::Warn, "slow")));
        batch.extend((0..infos).map(|_| LogEntry::new("svc", LogLevel::Info, "ok")));
        batch
    }

    #[test]
    fn test_clean_batch_is_healthy() {
        for size in [1, 5, 100, 1000] {
            assert_eq!(evaluate_status(0.0, 0), ServiceStatus::Healthy);
            let agg = HealthAggregator::new();
            agg.register("svc");
            let health = agg.update("svc", &batch(0, 0, size)).unwrap();
            assert_eq!(health.status, ServiceStatus::Healthy);
        }
    }

    #[test]
    fn test_error_rate_above_ten_percent_is_critical() {
        let agg = HealthAggregator::new();
        agg.register("svc");
        // 2/19 and 200/1900 are both just above 0.10
        assert_eq!(agg.update("svc", &batch(2, 0, 17)).unwrap().status, ServiceStatus::Critical);
        assert_eq!(
            agg.update("svc", &batch(200, 0, 1700)).unwrap().status,
            ServiceStatus::Critical
        );
        // exactly 0.10 is not
        assert_eq!(agg.update("svc", &batch(1, 0, 9)).unwrap().status, ServiceStatus::Warning);
    }

    #[test]
    fn test_any_warning_is_warning() {
        let agg = HealthAggregator::new();
        agg.register("svc");
        let health = agg.update("svc", &batch(0, 1, 99)).unwrap();
        assert_eq!(health.status, ServiceStatus::Warning);
        assert_eq!(health.error_rate, 0.0);
    }

    #[test]
    fn test_status_has_no_hysteresis() {
        let agg = HealthAggregator::new();
        agg.register("svc");
        agg.update("svc", &batch(5, 0, 5));
        let health = agg.update("svc", &batch(0, 0, 10)).unwrap();
        assert_eq!(health.status, ServiceStatus::Healthy);
        assert_eq!(health.total_logs, 20);
        assert_eq!(health.error_count, 5);
    }

    #[test]
    fn test_counters_accumulate() {
        let agg = HealthAggregator::new();
        agg.register("svc");
        agg.update("svc", &batch(1, 2, 3));
        let health = agg.update("svc", &batch(1, 0, 1)).unwrap();

        assert_eq!(health.total_logs, 8);
        assert_eq!(health.error_count, 2);
        assert_eq!(health.warning_count, 2);
        assert_eq!(health.error_rate, 0.5);
        assert_eq!(health.severity_breakdown.high, 2);
        assert_eq!(health.severity_breakdown.medium, 2);
        assert_eq!(health.severity_breakdown.low, 4);
    }

    #[test]
    fn test_update_for_unregistered_service_is_noop() {
        let agg = HealthAggregator::new();
        assert!(agg.update("ghost", &batch(1, 0, 0)).is_none());
        assert!(!agg.contains("ghost"));
    }

    #[test]
    fn test_most_common_errors_top_three() {
        let agg = HealthAggregator::new();
        agg.register("svc");
        agg.record_error_types(
            "svc",
            &[
                ErrorType::Timeout,
                ErrorType::Timeout,
                ErrorType::NetworkError,
                ErrorType::DatabaseError,
                ErrorType::ApplicationException,
                ErrorType::ApplicationException,
            ],
        );
        assert_eq!(
            agg.get("svc").unwrap().most_common_errors,
            vec!["Application Exception", "Timeout", "Database Error"]
        );
    }

    #[test]
    fn test_system_status_priority() {
        use ServiceStatus::*;
        assert_eq!(system_status(&[Healthy, Warning, Critical]), Critical);
        assert_eq!(system_status(&[Healthy, Warning]), Warning);
        assert_eq!(system_status(&[Healthy, Healthy]), Healthy);
        assert_eq!(system_status(&[]), Healthy);
    }

    #[test]
    fn test_system_health_counts() {
        let agg = HealthAggregator::new();
        for name in ["a", "b", "c"] {
            agg.register(name);
        }
        agg.update("a", &batch(5, 0, 5));
        agg.update("b", &batch(0, 1, 5));

        let system = agg.system_health();
        assert_eq!(system.overall_status, ServiceStatus::Critical);
        assert_eq!(system.total_services, 3);
        assert_eq!(system.critical_services, 1);
        assert_eq!(system.warning_services, 1);
        assert_eq!(system.healthy_services, 1);
    }
}
