use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix, e.g. `LOGPULSE__PROCESSING__INTERVAL_SECONDS=5`
pub const ENV_PREFIX: &str = "LOGPULSE";

/// Upper bound on `processing.max_batch_size`
pub const MAX_BATCH_SIZE_LIMIT: usize = 100_000;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// "text" or "json"
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

/// What to do when a service queue cannot take a whole batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued entries to make room
    #[default]
    DropOldest,
    /// Refuse the batch
    Reject,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessingConfig {
    /// Sleep between batch cycles
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    /// Max entries drained per service per cycle, also the max ingress batch size
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Max queued entries per service
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,
    /// Services processed in parallel within one cycle
    #[serde(default = "default_max_concurrent_services")]
    pub max_concurrent_services: usize,
    #[serde(default = "default_cycle_timeout_seconds")]
    pub cycle_timeout_seconds: u64,
    /// Pause after a failed cycle
    #[serde(default = "default_error_backoff_seconds")]
    pub error_backoff_seconds: u64,
    /// How long stop() waits for the in-flight cycle
    #[serde(default = "default_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval_seconds(),
            max_batch_size: default_max_batch_size(),
            queue_capacity: default_queue_capacity(),
            overflow_policy: OverflowPolicy::default(),
            max_concurrent_services: default_max_concurrent_services(),
            cycle_timeout_seconds: default_cycle_timeout_seconds(),
            error_backoff_seconds: default_error_backoff_seconds(),
            shutdown_grace_seconds: default_shutdown_grace_seconds(),
        }
    }
}

impl ProcessingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_secs(self.cycle_timeout_seconds)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_seconds)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}

/// AI-assisted classification backend (OpenAI-compatible chat completions API)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClassifierConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_classifier_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_classifier_model")]
    pub model: String,
    #[serde(default = "default_classifier_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First backoff step; doubles after every failed attempt
    #[serde(default = "default_backoff_base_seconds")]
    pub backoff_base_seconds: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: default_classifier_base_url(),
            api_key: String::new(),
            model: default_classifier_model(),
            timeout_seconds: default_classifier_timeout(),
            max_retries: default_max_retries(),
            backoff_base_seconds: default_backoff_base_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BroadcastConfig {
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_seconds: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Outbound events buffered per connection before it is dropped as dead
    #[serde(default = "default_client_buffer")]
    pub client_buffer: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_seconds: default_heartbeat_interval(),
            max_connections: default_max_connections(),
            client_buffer: default_client_buffer(),
        }
    }
}

impl BroadcastConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_metrics_endpoint")]
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: default_metrics_endpoint(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_allowed_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "http://localhost:3001".to_string(),
    ]
}

fn default_interval_seconds() -> u64 {
    30
}

fn default_max_batch_size() -> usize {
    1000
}

fn default_queue_capacity() -> usize {
    10_000
}

fn default_max_concurrent_services() -> usize {
    8
}

fn default_cycle_timeout_seconds() -> u64 {
    120
}

fn default_error_backoff_seconds() -> u64 {
    5
}

fn default_shutdown_grace_seconds() -> u64 {
    30
}

fn default_classifier_base_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}

fn default_classifier_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}

fn default_classifier_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_seconds() -> u64 {
    1
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_max_connections() -> usize {
    100
}

fn default_client_buffer() -> usize {
    256
}

fn default_metrics_endpoint() -> String {
    "/metrics".to_string()
}

fn default_true() -> bool {
    true
}

/// Load configuration from `path` (optional file) layered under `LOGPULSE__*` env vars
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let config = config::Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("server.allowed_origins"),
        )
        .build()?;

    let cfg: Config = config.try_deserialize()?;
    validate_config(&cfg)?;

    Ok(cfg)
}

pub fn validate_config(cfg: &Config) -> anyhow::Result<()> {
    match cfg.server.log_format.as_str() {
        "text" | "json" => {}
        other => anyhow::bail!("Invalid log format '{}', expected 'text' or 'json'", other),
    }

    let processing = &cfg.processing;
    if processing.interval_seconds == 0 {
        anyhow::bail!("processing.interval_seconds must be greater than zero");
    }
    if processing.max_batch_size == 0 || processing.max_batch_size > MAX_BATCH_SIZE_LIMIT {
        anyhow::bail!(
            "processing.max_batch_size must be between 1 and {}",
            MAX_BATCH_SIZE_LIMIT
        );
    }
    if processing.queue_capacity < processing.max_batch_size {
        anyhow::bail!(
            "processing.queue_capacity ({}) must be at least max_batch_size ({})",
            processing.queue_capacity,
            processing.max_batch_size
        );
    }
    if processing.max_concurrent_services == 0 {
        anyhow::bail!("processing.max_concurrent_services must be greater than zero");
    }
    if processing.cycle_timeout_seconds == 0 {
        anyhow::bail!("processing.cycle_timeout_seconds must be greater than zero");
    }

    let classifier = &cfg.classifier;
    if classifier.max_retries == 0 {
        anyhow::bail!("classifier.max_retries must be at least 1");
    }
    if classifier.enabled {
        if classifier.api_key.is_empty() {
            anyhow::bail!("classifier.api_key is required when AI classification is enabled");
        }
        if classifier.base_url.is_empty() {
            anyhow::bail!("classifier.base_url is required when AI classification is enabled");
        }
    }

    if cfg.broadcast.heartbeat_interval_seconds == 0 {
        anyhow::bail!("broadcast.heartbeat_interval_seconds must be greater than zero");
    }
    if cfg.broadcast.max_connections == 0 {
        anyhow::bail!("broadcast.max_connections must be greater than zero");
    }
    if cfg.broadcast.client_buffer == 0 {
        anyhow::bail!("broadcast.client_buffer must be greater than zero");
    }

    if cfg.metrics.enabled && !cfg.metrics.endpoint.starts_with('/') {
        anyhow::bail!("metrics.endpoint must start with '/'");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = Config::default();
        assert!(validate_config(&cfg).is_ok());
        assert_eq!(cfg.processing.interval_seconds, 30);
        assert_eq!(cfg.processing.max_batch_size, 1000);
        assert_eq!(cfg.classifier.max_retries, 3);
        assert_eq!(cfg.broadcast.heartbeat_interval_seconds, 30);
        assert_eq!(cfg.processing.overflow_policy, OverflowPolicy::DropOldest);
    }

    #[test]
    fn test_validate_config_requires_api_key_when_ai_enabled() {
        let mut cfg = Config::default();
        cfg.classifier.enabled = true;

        let result = validate_config(&cfg);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("api_key is required"));

        cfg.classifier.api_key = "gsk-test".to_string();
        assert!(validate_config(&cfg).is_ok());
    }

    #[test]
    fn test_validate_config_rejects_small_queue() {
        let mut cfg = Config::default();
        cfg.processing.queue_capacity = 10;

        let result = validate_config(&cfg);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("queue_capacity"));
    }

    #[test]
    fn test_validate_config_rejects_unknown_log_format() {
        let mut cfg = Config::default();
        cfg.server.log_format = "xml".to_string();
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[processing]
interval_seconds = 5
max_batch_size = 200
overflow_policy = "reject"

[broadcast]
max_connections = 10
"#
        )
        .unwrap();

        let cfg = load_config(file.path()).unwrap();
        assert_eq!(cfg.processing.interval_seconds, 5);
        assert_eq!(cfg.processing.max_batch_size, 200);
        assert_eq!(cfg.processing.overflow_policy, OverflowPolicy::Reject);
        assert_eq!(cfg.broadcast.max_connections, 10);
        // Untouched sections keep their defaults
        assert_eq!(cfg.server.port, 8000);
    }

    #[test]
    fn test_load_config_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.processing.queue_capacity, 10_000);
    }
}
