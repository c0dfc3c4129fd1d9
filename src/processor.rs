//! Batch scheduler and the service object the REST layer talks to.

use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

use crate::broadcast::{BroadcastHub, HubEvent};
use crate::buffer::{validate_service_name, EnqueueReceipt, IngestionBuffer};
use crate::classifier::{Classifier, ErrorSubtype, ErrorType, LogRecord, Severity};
use crate::config::ProcessingConfig;
use crate::detector;
use crate::error::AppError;
use crate::health::HealthAggregator;
use crate::models::{LogEntry, ProcessedLog, ProcessingStats, ServiceHealth, SystemHealth};
use crate::stats::{CycleSummary, StatsTracker};

/// Confidence reported for entries the detector passed as normal
const NORMAL_CONFIDENCE: f64 = 0.9;

/// Slack past the cycle deadline before outstanding service tasks are aborted
const ABORT_GRACE: Duration = Duration::from_secs(10);

/// `get_service_health` result: one record, or all of them keyed by service
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum HealthView {
    Service(ServiceHealth),
    All(BTreeMap<String, ServiceHealth>),
}

/// Queue and throughput summary
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub queue_size: usize,
    pub processing_rate: f64,
    pub total_processed: u64,
    pub processing_lag: f64,
    pub last_processed: chrono::DateTime<Utc>,
    pub active_services: usize,
    pub is_processing: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct ServiceOutcome {
    processed: u64,
    anomalies: u64,
}

/// Continuous log processing pipeline.
///
/// Producers call [`enqueue_batch`](Self::enqueue_batch) concurrently; one
/// background task drains every service queue on a fixed interval, classifies
/// anomalies, folds each batch into the service's health and publishes the
/// results to the broadcast hub.
pub struct LogProcessor {
    config: ProcessingConfig,
    buffer: IngestionBuffer,
    health: HealthAggregator,
    stats: StatsTracker,
    classifier: Arc<Classifier>,
    hub: Arc<BroadcastHub>,
    is_processing: AtomicBool,
    wake: Notify,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LogProcessor {
    pub fn new(config: ProcessingConfig, classifier: Arc<Classifier>, hub: Arc<BroadcastHub>) -> Self {
        let buffer = IngestionBuffer::new(config.queue_capacity, config.overflow_policy);
        Self {
            config,
            buffer,
            health: HealthAggregator::new(),
            stats: StatsTracker::new(),
            classifier,
            hub,
            is_processing: AtomicBool::new(false),
            wake: Notify::new(),
            task: Mutex::new(None),
        }
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    // ===== Ingestion =====

    /// Validate and queue a batch. Registers the service if unseen.
    pub fn enqueue_batch(&self, service: &str, entries: Vec<LogEntry>) -> Result<EnqueueReceipt, AppError> {
        let result = self.try_enqueue(service, entries);
        if let Err(e) = &result {
            crate::metrics::record_rejected(crate::error::error_type_name(e));
            tracing::debug!(service = %service, error = %e, "Log batch rejected");
        }
        result
    }

    fn try_enqueue(&self, service: &str, entries: Vec<LogEntry>) -> Result<EnqueueReceipt, AppError> {
        let name = validate_service_name(service)?;
        if entries.len() > self.config.max_batch_size {
            return Err(AppError::ValidationError(format!(
                "Batch of {} entries exceeds the maximum of {}",
                entries.len(),
                self.config.max_batch_size
            )));
        }

        // The path names the queue; entries may omit their own service name
        if let Some(entry) = entries.iter().find(|e| {
            let producer = e.service_name.trim();
            !producer.is_empty() && producer != name
        }) {
            return Err(AppError::ValidationError(format!(
                "Entry for service '{}' sent to the '{}' stream",
                entry.service_name.trim(),
                name
            )));
        }

        let receipt = self.buffer.enqueue(name, entries, |name| {
            self.health.register(name);
        })?;
        if receipt.newly_registered {
            tracing::info!(service = %name, "Service registered on first batch");
        }

        crate::metrics::record_ingested(name, receipt.accepted);
        if receipt.dropped > 0 {
            crate::metrics::record_dropped(name, receipt.dropped);
            tracing::warn!(
                service = %name,
                dropped = receipt.dropped,
                capacity = self.buffer.capacity(),
                "Queue full, dropped oldest entries"
            );
        }
        tracing::debug!(service = %name, accepted = receipt.accepted, "Log batch queued");

        Ok(receipt)
    }

    // ===== Registry =====

    /// Returns false when the service was already registered
    pub fn register_service(&self, service: &str) -> Result<bool, AppError> {
        let name = validate_service_name(service)?;
        let created = self.buffer.register(name, |name| {
            self.health.register(name);
        });
        if created {
            tracing::info!(service = %name, "Service registered");
        }
        Ok(created)
    }

    /// Drop the service's queue and health record
    pub fn unregister_service(&self, service: &str) -> bool {
        let name = service.trim();
        let mut had_health = false;
        let discarded = self.buffer.unregister(name, |name| had_health = self.health.remove(name));
        if let Some(discarded) = discarded {
            tracing::info!(service = %name, discarded, "Service unregistered");
        }
        discarded.is_some() || had_health
    }

    pub fn get_registered_services(&self) -> Vec<String> {
        self.buffer.services()
    }

    // ===== Read views =====

    pub fn get_service_health(&self, service: Option<&str>) -> Result<HealthView, AppError> {
        match service {
            Some(name) => self
                .health
                .get(name.trim())
                .map(HealthView::Service)
                .ok_or_else(|| AppError::ServiceNotFound(name.to_string())),
            None => Ok(HealthView::All(
                self.health
                    .all()
                    .into_iter()
                    .map(|h| (h.service_name.clone(), h))
                    .collect(),
            )),
        }
    }

    pub fn get_processing_stats(&self) -> ProcessingStats {
        self.stats.snapshot()
    }

    pub fn system_health(&self) -> SystemHealth {
        self.health.system_health()
    }

    pub fn queue_status(&self) -> QueueStatus {
        let stats = self.stats.snapshot();
        QueueStatus {
            queue_size: self.buffer.total_depth(),
            processing_rate: stats.logs_per_second,
            total_processed: stats.total_logs_processed,
            processing_lag: stats.processing_lag,
            last_processed: stats.last_processed_timestamp,
            active_services: self.active_services(),
            is_processing: self.is_processing(),
        }
    }

    pub fn active_services(&self) -> usize {
        self.buffer.services().len()
    }

    // ===== Lifecycle =====

    pub fn is_processing(&self) -> bool {
        self.is_processing.load(Ordering::SeqCst)
    }

    /// Spawn the scheduler loop. Returns false if it is already running.
    pub fn start(self: &Arc<Self>) -> bool {
        if self.is_processing.swap(true, Ordering::SeqCst) {
            return false;
        }

        let handle = tokio::spawn(self.clone().processing_loop());
        *self.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);

        tracing::info!(
            interval_seconds = self.config.interval_seconds,
            max_batch_size = self.config.max_batch_size,
            max_concurrent_services = self.config.max_concurrent_services,
            "Log processing started"
        );
        true
    }

    /// Cooperative stop: the in-flight cycle may finish within the grace period,
    /// no new cycle starts.
    pub async fn stop(&self) {
        if !self.is_processing.swap(false, Ordering::SeqCst) {
            return;
        }
        self.wake.notify_one();

        let handle = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(mut handle) = handle {
            let grace = self.config.shutdown_grace();
            match tokio::time::timeout(grace, &mut handle).await {
                Ok(_) => tracing::info!("Log processing stopped"),
                Err(_) => {
                    tracing::warn!(
                        grace_seconds = grace.as_secs(),
                        "In-flight cycle exceeded shutdown grace period, aborting"
                    );
                    handle.abort();
                }
            }
        }
    }

    async fn processing_loop(self: Arc<Self>) {
        while self.is_processing() {
            let pause = match self.run_cycle().await {
                Ok(_) => self.config.interval(),
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        backoff_seconds = self.config.error_backoff_seconds,
                        "Processing cycle failed"
                    );
                    self.config.error_backoff()
                }
            };

            if !self.is_processing() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = self.wake.notified() => {}
            }
        }
    }

    /// One batch cycle over every registered service.
    ///
    /// Services run concurrently (bounded by `max_concurrent_services`); each
    /// service's entries are handled in order inside its own task. Once
    /// `cycle_timeout` has elapsed the remaining anomalies are classified by
    /// rules only, so a failing backend degrades confidence instead of
    /// dropping batches.
    pub async fn run_cycle(self: &Arc<Self>) -> anyhow::Result<ProcessingStats> {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.config.cycle_timeout();
        let services = self.buffer.services();
        let permits = Arc::new(Semaphore::new(self.config.max_concurrent_services.max(1)));
        let mut tasks = JoinSet::new();

        for service in services.iter().filter(|s| self.buffer.depth(s) > 0) {
            let processor = self.clone();
            let permits = permits.clone();
            let service = service.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                processor.process_service(&service, deadline).await
            });
        }

        let mut outcome = ServiceOutcome::default();
        let mut panicked = 0usize;
        let collect = async {
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(service_outcome) => {
                        outcome.processed += service_outcome.processed;
                        outcome.anomalies += service_outcome.anomalies;
                    }
                    Err(e) if e.is_panic() => panicked += 1,
                    Err(_) => {}
                }
            }
        };

        if tokio::time::timeout_at(deadline + ABORT_GRACE, collect).await.is_err() {
            let outstanding = tasks.len();
            tasks.abort_all();
            tracing::warn!(
                outstanding,
                timeout_seconds = self.config.cycle_timeout_seconds,
                "Service tasks overran the cycle deadline, aborting"
            );
        }

        let duration = started.elapsed();
        let stats = self.stats.record_cycle(CycleSummary {
            processed: outcome.processed,
            anomalies: outcome.anomalies,
            duration,
            active_services: services.len(),
            queue_size: self.buffer.total_depth(),
        });

        crate::metrics::record_cycle(duration, stats.queue_size);
        self.hub.publish(&HubEvent::StatsUpdate(stats.clone()));

        if outcome.processed > 0 {
            tracing::info!(
                processed = outcome.processed,
                anomalies = outcome.anomalies,
                services = services.len(),
                duration_ms = duration.as_millis() as u64,
                queue_size = stats.queue_size,
                "Processing cycle complete"
            );
        } else {
            tracing::debug!(services = services.len(), "Processing cycle found no queued logs");
        }

        if panicked > 0 {
            anyhow::bail!("{} service task(s) panicked during the cycle", panicked);
        }
        Ok(stats)
    }

    async fn process_service(&self, service: &str, deadline: tokio::time::Instant) -> ServiceOutcome {
        let batch = self.buffer.drain(service, self.config.max_batch_size);
        if batch.is_empty() {
            return ServiceOutcome::default();
        }

        // Counted from levels alone, before any classification
        let registered = self.health.update(service, &batch).is_some();

        let mut outcome = ServiceOutcome::default();
        let mut error_types = Vec::new();

        for entry in &batch {
            match self.process_entry(service, entry, deadline).await {
                Ok(processed) => {
                    outcome.processed += 1;
                    if processed.is_anomaly {
                        outcome.anomalies += 1;
                        error_types.push(processed.error_type);
                        crate::metrics::record_anomaly(processed.error_type.as_str());
                        self.hub.publish(&HubEvent::AnomalyAlert(processed));
                    }
                }
                Err(e) => {
                    tracing::error!(service = %service, error = %e, "Failed to process log entry");
                }
            }
        }
        crate::metrics::record_processed(outcome.processed);

        self.health.record_error_types(service, &error_types);
        if let Some(health) = self.health.get(service).filter(|_| registered) {
            tracing::debug!(
                service = %service,
                status = %health.status,
                error_rate = health.error_rate,
                "Service health updated"
            );
            self.hub.publish(&HubEvent::HealthUpdate(health));
        }

        outcome
    }

    async fn process_entry(
        &self,
        service: &str,
        entry: &LogEntry,
        deadline: tokio::time::Instant,
    ) -> Result<ProcessedLog, AppError> {
        if entry.message.trim().is_empty() {
            return Err(AppError::ValidationError("Log entry has an empty message".to_string()));
        }

        if !detector::is_anomalous(&entry.message) {
            return Ok(ProcessedLog {
                id: uuid::Uuid::new_v4().to_string(),
                service_name: service.to_string(),
                level: entry.level,
                message: entry.message.clone(),
                error_type: ErrorType::Unknown,
                error_subtype: ErrorSubtype::Unknown,
                severity: Severity::Low,
                description: "Normal log entry".to_string(),
                is_anomaly: false,
                confidence: NORMAL_CONFIDENCE,
                timestamp: entry.timestamp,
                processed_at: Utc::now(),
            });
        }

        let record = LogRecord {
            line: entry.message.clone(),
            timestamp: Some(entry.timestamp),
            service: Some(service.to_string()),
        };
        let classification = self.classifier.classify_before(&record, deadline).await;

        Ok(ProcessedLog {
            id: uuid::Uuid::new_v4().to_string(),
            service_name: service.to_string(),
            level: entry.level,
            message: entry.message.clone(),
            error_type: classification.error_type,
            error_subtype: classification.error_subtype,
            severity: classification.severity,
            description: classification.description,
            is_anomaly: true,
            confidence: classification.confidence,
            timestamp: entry.timestamp,
            processed_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::ChannelType;
    use crate::classifier::{
        Classification, ClassifyError, LogClassifier, RetryPolicy, AI_CONFIDENCE,
    };
    use crate::config::BroadcastConfig;
    use crate::models::{LogLevel, ServiceStatus};
    use async_trait::async_trait;

    /// Succeeds after `delay`
    struct SlowClassifier {
        delay: Duration,
    }

    #[async_trait]
    impl LogClassifier for SlowClassifier {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn classify(&self, record: &LogRecord) -> Result<Classification, ClassifyError> {
            tokio::time::sleep(self.delay).await;
            Ok(Classification {
                service: record.service.clone().unwrap_or_default(),
                error_type: ErrorType::Timeout,
                error_subtype: ErrorSubtype::Unknown,
                severity: Severity::Medium,
                description: record.line.clone(),
                confidence: AI_CONFIDENCE,
                timestamp: Utc::now(),
            })
        }
    }

    fn processor(config: ProcessingConfig) -> Arc<LogProcessor> {
        let hub = Arc::new(BroadcastHub::new(&BroadcastConfig::default()));
        Arc::new(LogProcessor::new(config, Arc::new(Classifier::rule_based()), hub))
    }

    fn slow_processor(config: ProcessingConfig, delay: Duration) -> Arc<LogProcessor> {
        let hub = Arc::new(BroadcastHub::new(&BroadcastConfig::default()));
        let classifier = Classifier::with_primary(Arc::new(SlowClassifier { delay }), RetryPolicy::default());
        Arc::new(LogProcessor::new(config, Arc::new(classifier), hub))
    }

    fn info(service: &str, i: usize) -> LogEntry {
        LogEntry::new(service, LogLevel::Info, format!("request {} served", i))
    }

    fn error(service: &str, message: &str) -> LogEntry {
        LogEntry::new(service, LogLevel::Error, message)
    }

    #[tokio::test]
    async fn test_enqueue_registers_health() {
        let p = processor(ProcessingConfig::default());
        p.enqueue_batch("auth-service", vec![info("auth-service", 0)]).unwrap();

        assert_eq!(p.get_registered_services(), vec!["auth-service"]);
        match p.get_service_health(Some("auth-service")).unwrap() {
            HealthView::Service(h) => {
                assert_eq!(h.status, ServiceStatus::Healthy);
                assert_eq!(h.total_logs, 0);
            }
            HealthView::All(_) => panic!("expected a single record"),
        }
    }

    #[tokio::test]
    async fn test_oversized_batch_rejected() {
        let p = processor(ProcessingConfig {
            max_batch_size: 3,
            ..Default::default()
        });
        let batch: Vec<LogEntry> = (0..4).map(|i| info("svc", i)).collect();
        assert!(matches!(
            p.enqueue_batch("svc", batch),
            Err(AppError::ValidationError(_))
        ));
        assert!(p.get_registered_services().is_empty());
    }

    #[tokio::test]
    async fn test_unregister_clears_queue_and_health() {
        let p = processor(ProcessingConfig::default());
        p.enqueue_batch("svc", vec![info("svc", 0)]).unwrap();
        assert!(p.unregister_service("svc"));
        assert!(p.get_registered_services().is_empty());
        assert!(matches!(
            p.get_service_health(Some("svc")),
            Err(AppError::ServiceNotFound(_))
        ));
        assert!(!p.unregister_service("svc"));
    }

    #[tokio::test]
    async fn test_cycle_drains_in_batches_preserving_order() {
        let p = processor(ProcessingConfig {
            max_batch_size: 4,
            ..Default::default()
        });
        let (_id, mut rx) = p.hub().connect(ChannelType::Logs, None, None).unwrap();

        for chunk in 0..3 {
            let batch = (chunk * 3..chunk * 3 + 3)
                .map(|i| LogEntry::new("svc", LogLevel::Error, format!("job {} failed", i)))
                .collect();
            p.enqueue_batch("svc", batch).unwrap();
        }

        let first = p.run_cycle().await.unwrap();
        assert_eq!(first.total_logs_processed, 4);
        assert_eq!(first.queue_size, 5);
        p.run_cycle().await.unwrap();
        let third = p.run_cycle().await.unwrap();
        assert_eq!(third.total_logs_processed, 9);
        assert_eq!(third.total_anomalies, 9);
        assert_eq!(third.queue_size, 0);

        let messages: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|e| e.event_type == "anomaly_alert")
            .map(|e| e.data["message"].as_str().unwrap_or_default().to_string())
            .collect();
        let expected: Vec<String> = (0..9).map(|i| format!("job {} failed", i)).collect();
        assert_eq!(messages, expected);
    }

    #[tokio::test]
    async fn test_bad_entry_does_not_abort_batch() {
        let p = processor(ProcessingConfig::default());
        let batch = vec![
            LogEntry::new("svc", LogLevel::Error, "   "),
            LogEntry::new("svc", LogLevel::Error, "payment failed"),
        ];
        p.enqueue_batch("svc", batch).unwrap();

        let stats = p.run_cycle().await.unwrap();
        assert_eq!(stats.total_logs_processed, 1);
        assert_eq!(stats.total_anomalies, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_stop_is_cooperative() {
        let p = processor(ProcessingConfig {
            interval_seconds: 30,
            ..Default::default()
        });
        p.enqueue_batch("svc", vec![info("svc", 0)]).unwrap();

        assert!(p.start());
        assert!(!p.start());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(p.get_processing_stats().total_logs_processed, 1);

        p.enqueue_batch("svc", vec![info("svc", 1)]).unwrap();
        p.stop().await;
        assert!(!p.is_processing());

        // no further cycle runs after stop
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(p.get_processing_stats().total_logs_processed, 1);
        assert_eq!(p.queue_status().queue_size, 1);
    }

    #[tokio::test]
    async fn test_entry_for_another_service_rejected() {
        let p = processor(ProcessingConfig::default());
        let batch = vec![info("payment-service", 0), info("auth-service", 1)];

        assert!(matches!(
            p.enqueue_batch("payment-service", batch),
            Err(AppError::ValidationError(_))
        ));
        assert!(p.get_registered_services().is_empty());

        // entries without their own service name take the stream's
        let receipt = p.enqueue_batch("payment-service", vec![info("", 0)]).unwrap();
        assert_eq!(receipt.accepted, 1);
    }

    #[test]
    fn test_registry_and_health_stay_in_step_under_contention() {
        let p = processor(ProcessingConfig::default());

        std::thread::scope(|scope| {
            for t in 0..4 {
                let p = &p;
                scope.spawn(move || {
                    for i in 0..500 {
                        if (t + i) % 2 == 0 {
                            let _ = p.enqueue_batch("svc", vec![info("svc", i)]);
                        } else {
                            p.unregister_service("svc");
                        }
                    }
                });
            }
        });

        let registered = p.get_registered_services().iter().any(|s| s == "svc");
        assert_eq!(registered, p.get_service_health(Some("svc")).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_lets_in_flight_cycle_finish() {
        let p = slow_processor(ProcessingConfig::default(), Duration::from_secs(10));
        p.enqueue_batch(
            "svc",
            vec![
                error("svc", "db write failed"),
                info("svc", 0),
                error("svc", "cache connection refused"),
            ],
        )
        .unwrap();

        assert!(p.start());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(p.get_processing_stats().total_logs_processed, 0);

        let started = tokio::time::Instant::now();
        p.stop().await;

        assert!(started.elapsed() >= Duration::from_secs(19));
        assert!(!p.is_processing());
        let stats = p.get_processing_stats();
        assert_eq!(stats.total_logs_processed, 3);
        assert_eq!(stats.total_anomalies, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_aborts_cycle_after_grace_period() {
        let p = slow_processor(
            ProcessingConfig {
                shutdown_grace_seconds: 2,
                ..Default::default()
            },
            Duration::from_secs(60),
        );
        p.enqueue_batch("svc", vec![error("svc", "db write failed")]).unwrap();

        assert!(p.start());
        tokio::time::sleep(Duration::from_secs(1)).await;

        let started = tokio::time::Instant::now();
        p.stop().await;

        assert!(started.elapsed() >= Duration::from_secs(2));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(!p.is_processing());
        assert_eq!(p.get_processing_stats().total_logs_processed, 0);

        // the aborted loop never comes back
        p.enqueue_batch("svc", vec![info("svc", 1)]).unwrap();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(p.get_processing_stats().total_logs_processed, 0);
        assert_eq!(p.queue_status().queue_size, 1);
    }
}
