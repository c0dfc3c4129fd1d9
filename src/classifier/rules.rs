use async_trait::async_trait;
use chrono::Utc;

use super::taxonomy::{normalize_classification, severity_from_keywords};
use super::{Classification, ClassifyError, LogClassifier, LogRecord, FALLBACK_CONFIDENCE};
use crate::detector::extract_compact_error;

/// Deterministic keyword classification of a raw line
pub struct FallbackClassification;

impl FallbackClassification {
    pub fn create(record: &LogRecord) -> Classification {
        let normalized = normalize_classification(&record.line, record.service.as_deref());

        Classification {
            service: normalized.service,
            error_type: normalized.error_type,
            error_subtype: normalized.error_subtype,
            severity: severity_from_keywords(&record.line),
            description: extract_compact_error(&record.line),
            confidence: FALLBACK_CONFIDENCE,
            timestamp: record.timestamp.unwrap_or_else(Utc::now),
        }
    }
}

/// Rule-based tier. Never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedClassifier;

impl RuleBasedClassifier {
    pub fn classify_infallible(&self, record: &LogRecord) -> Classification {
        FallbackClassification::create(record)
    }
}

#[async_trait]
impl LogClassifier for RuleBasedClassifier {
    fn name(&self) -> &'static str {
        "rules"
    }

    async fn classify(&self, record: &LogRecord) -> Result<Classification, ClassifyError> {
        Ok(self.classify_infallible(record))
    }
}
