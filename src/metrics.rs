use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the global Prometheus recorder.
///
/// Fails if a recorder is already installed (e.g. a second call in tests).
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;

    init_metric_descriptions();

    Ok(handle)
}

fn init_metric_descriptions() {
    describe_counter!(
        "logpulse_logs_ingested_total",
        "Log entries accepted into a service queue"
    );
    describe_counter!(
        "logpulse_logs_rejected_total",
        "Log batches rejected at ingestion"
    );
    describe_counter!(
        "logpulse_logs_dropped_total",
        "Queued log entries evicted by the drop-oldest policy"
    );
    describe_counter!(
        "logpulse_logs_processed_total",
        "Log entries run through detection and classification"
    );
    describe_counter!(
        "logpulse_anomalies_total",
        "Anomalous log entries by classified error type"
    );
    describe_counter!(
        "logpulse_classification_total",
        "Classifications by outcome (ai, fallback, rules)"
    );
    describe_counter!(
        "logpulse_classification_retries_total",
        "Failed AI classification attempts"
    );
    describe_histogram!(
        "logpulse_cycle_duration_seconds",
        "Batch cycle duration in seconds"
    );
    describe_gauge!(
        "logpulse_queue_depth",
        "Entries queued across all services after the last cycle"
    );
    describe_gauge!(
        "logpulse_ws_connections",
        "Open dashboard connections"
    );
    describe_gauge!("logpulse_info", "Build information");

    gauge!("logpulse_info", "version" => env!("CARGO_PKG_VERSION")).set(1.0);
}

pub fn record_ingested(service: &str, count: usize) {
    counter!("logpulse_logs_ingested_total", "service" => service.to_string())
        .increment(count as u64);
}

pub fn record_rejected(reason: &str) {
    counter!("logpulse_logs_rejected_total", "reason" => reason.to_string()).increment(1);
}

pub fn record_dropped(service: &str, count: usize) {
    counter!("logpulse_logs_dropped_total", "service" => service.to_string())
        .increment(count as u64);
}

pub fn record_processed(count: u64) {
    counter!("logpulse_logs_processed_total").increment(count);
}

pub fn record_anomaly(error_type: &str) {
    counter!("logpulse_anomalies_total", "error_type" => error_type.to_string()).increment(1);
}

/// `outcome` is one of `ai`, `fallback`, `rules`
pub fn record_classification(outcome: &'static str) {
    counter!("logpulse_classification_total", "outcome" => outcome).increment(1);
}

pub fn record_classification_retry() {
    counter!("logpulse_classification_retries_total").increment(1);
}

pub fn record_cycle(duration: Duration, queue_depth: usize) {
    histogram!("logpulse_cycle_duration_seconds").record(duration.as_secs_f64());
    gauge!("logpulse_queue_depth").set(queue_depth as f64);
}

pub fn update_ws_connections(count: usize) {
    gauge!("logpulse_ws_connections").set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_ingested("svc", 3);
        record_rejected("validation_error");
        record_classification("fallback");
        record_cycle(Duration::from_millis(15), 0);
        update_ws_connections(2);
    }

    #[test]
    fn test_local_recorder_renders_counters() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            record_ingested("auth-service", 12);
            record_anomaly("Timeout");
        });

        let rendered = handle.render();
        assert!(rendered.contains("logpulse_logs_ingested_total{service=\"auth-service\"} 12"));
        assert!(rendered.contains("logpulse_anomalies_total{error_type=\"Timeout\"} 1"));
    }
}
