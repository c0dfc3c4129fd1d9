//! Two-tier log classification.
//!
//! An AI-backed [`LogClassifier`] is tried first with exponential backoff; once
//! its retries are exhausted the deterministic [`RuleBasedClassifier`] answers
//! instead. [`Classifier::classify_log_with_retry`] therefore never fails.

pub mod ai;
pub mod rules;
pub mod taxonomy;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::ClassifierConfig;

pub use ai::AiClassifier;
pub use rules::{FallbackClassification, RuleBasedClassifier};
pub use taxonomy::{
    normalize_classification, ErrorSubtype, ErrorType, NormalizedClassification, Severity,
};

/// Confidence reported for results from the AI-backed path
pub const AI_CONFIDENCE: f64 = 0.8;
/// Confidence reported for deterministic fallback results
pub const FALLBACK_CONFIDENCE: f64 = 0.6;

/// Input to the classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub line: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub service: Option<String>,
}

impl LogRecord {
    pub fn new(line: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            timestamp: None,
            service: None,
        }
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Structured classification of one anomalous line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub service: String,
    pub error_type: ErrorType,
    pub error_subtype: ErrorSubtype,
    pub severity: Severity,
    pub description: String,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

/// Transient failures of a classification backend
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Invalid classification response: {0}")]
    InvalidResponse(String),
}

/// A classification capability.
///
/// Implementations may fail; [`Classifier`] absorbs those failures.
#[async_trait]
pub trait LogClassifier: Send + Sync + 'static {
    /// Short name used in logs and metrics
    fn name(&self) -> &'static str;

    async fn classify(&self, record: &LogRecord) -> Result<Classification, ClassifyError>;
}

/// Retry schedule for the primary classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl RetryPolicy {
    /// Wait after the given (zero-based) failed attempt: base * 2^attempt
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base.saturating_mul(2u32.saturating_pow(attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_secs(1),
        }
    }
}

impl From<&ClassifierConfig> for RetryPolicy {
    fn from(config: &ClassifierConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_base: Duration::from_secs(config.backoff_base_seconds),
        }
    }
}

/// Fallback decorator: optional primary classifier with retries, then rules.
pub struct Classifier {
    primary: Option<Arc<dyn LogClassifier>>,
    fallback: RuleBasedClassifier,
    retry: RetryPolicy,
}

impl Classifier {
    /// Deterministic rules only
    pub fn rule_based() -> Self {
        Self {
            primary: None,
            fallback: RuleBasedClassifier,
            retry: RetryPolicy::default(),
        }
    }

    /// Try `primary` first, falling back to rules after `retry.max_retries` failures
    pub fn with_primary(primary: Arc<dyn LogClassifier>, retry: RetryPolicy) -> Self {
        Self {
            primary: Some(primary),
            fallback: RuleBasedClassifier,
            retry,
        }
    }

    /// Build from configuration: AI-backed when enabled, rules otherwise
    pub fn from_config(config: &ClassifierConfig, client: reqwest::Client) -> Self {
        if config.enabled {
            let ai = AiClassifier::new(client, config.clone());
            Self::with_primary(Arc::new(ai), RetryPolicy::from(config))
        } else {
            Self::rule_based()
        }
    }

    pub fn primary_name(&self) -> Option<&'static str> {
        self.primary.as_ref().map(|p| p.name())
    }

    /// Classify one record. Never fails.
    ///
    /// Each failed primary attempt is followed by a `base * 2^attempt` sleep;
    /// the sleep is an ordinary tokio timer so dropping the future cancels it.
    pub async fn classify_log_with_retry(&self, record: &LogRecord) -> Classification {
        let Some(primary) = &self.primary else {
            crate::metrics::record_classification("rules");
            return FallbackClassification::create(record);
        };

        for attempt in 0..self.retry.max_retries {
            match primary.classify(record).await {
                Ok(classification) => {
                    crate::metrics::record_classification("ai");
                    return classification;
                }
                Err(e) => {
                    let wait = self.retry.backoff(attempt);
                    crate::metrics::record_classification_retry();
                    tracing::warn!(
                        classifier = primary.name(),
                        attempt = attempt + 1,
                        max_retries = self.retry.max_retries,
                        backoff_ms = wait.as_millis() as u64,
                        error = %e,
                        "Classification attempt failed"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }

        tracing::warn!(
            classifier = primary.name(),
            retries = self.retry.max_retries,
            "Classification retries exhausted, using rule-based fallback"
        );
        crate::metrics::record_classification("fallback");
        self.fallback.classify_infallible(record)
    }

    /// [`classify_log_with_retry`](Self::classify_log_with_retry) bounded by
    /// `deadline`. Past it, or once it expires mid-attempt, the rules answer.
    pub async fn classify_before(&self, record: &LogRecord, deadline: Instant) -> Classification {
        if self.primary.is_none() {
            return self.classify_log_with_retry(record).await;
        }
        if Instant::now() >= deadline {
            crate::metrics::record_classification("fallback");
            return self.fallback.classify_infallible(record);
        }

        match tokio::time::timeout_at(deadline, self.classify_log_with_retry(record)).await {
            Ok(classification) => classification,
            Err(_) => {
                tracing::warn!(
                    service = record.service.as_deref().unwrap_or_default(),
                    "Classification deadline reached, using rule-based fallback"
                );
                crate::metrics::record_classification("fallback");
                self.fallback.classify_infallible(record)
            }
        }
    }
}
