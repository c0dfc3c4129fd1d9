use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::taxonomy::{lookup_error_type, normalize_service, severity_from_keywords, ErrorType, Severity};
use super::{Classification, ClassifyError, LogClassifier, LogRecord, AI_CONFIDENCE};
use crate::config::ClassifierConfig;

const SYSTEM_PROMPT: &str = "You are a site reliability engineer triaging microservice logs. \
Classify the log line and answer with a single JSON object with the keys \
service, error_type, error_sub_type, error_desc and severity_level. \
error_type is one of: Application Exception, Infrastructure Error, Network Error, \
Database Error, Security Alert, Resource Exhaustion, Deployment Issue, Timeout, \
Business Logic Error, Payment Error, Communication Error, Unknown. \
severity_level is High, Medium or Low. error_desc is one short sentence.";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Structured record the model is asked to produce
#[derive(Debug, Default, Deserialize)]
struct ModelClassification {
    #[serde(default)]
    service: Option<String>,
    #[serde(default)]
    error_type: String,
    #[serde(default)]
    error_sub_type: String,
    #[serde(default)]
    error_desc: String,
    #[serde(default)]
    severity_level: String,
}

/// AI-backed tier over an OpenAI-compatible chat completions endpoint
pub struct AiClassifier {
    client: Client,
    config: ClassifierConfig,
}

impl AiClassifier {
    pub fn new(client: Client, config: ClassifierConfig) -> Self {
        Self { client, config }
    }

    async fn request(&self, line: &str) -> Result<String, ClassifyError> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let timeout = Duration::from_secs(self.config.timeout_seconds);

        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: line,
                },
            ],
            temperature: 0.0,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ClassifyError::Timeout(timeout)
                } else {
                    ClassifyError::Http(e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClassifyError::Upstream { status, message });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ClassifyError::InvalidResponse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| ClassifyError::InvalidResponse("empty completion".to_string()))
    }
}

/// Map the model's free-text answer back onto the closed vocabulary.
///
/// The raw line is looked up first; the model's own labels are only consulted
/// when the line matches no keyword.
fn normalize_model_output(record: &LogRecord, model: ModelClassification) -> Classification {
    let (mut error_type, mut error_subtype) = lookup_error_type(&record.line);
    if error_type == ErrorType::Unknown {
        let labels = format!("{} {} {}", model.error_type, model.error_sub_type, model.error_desc);
        (error_type, error_subtype) = lookup_error_type(&labels);
    }

    let producer = record.service.as_deref().or(model.service.as_deref());
    let severity = Severity::parse(&model.severity_level)
        .unwrap_or_else(|| severity_from_keywords(&record.line));
    let description = if model.error_desc.trim().is_empty() {
        crate::detector::extract_compact_error(&record.line)
    } else {
        model.error_desc.trim().to_string()
    };

    Classification {
        service: normalize_service(producer, &record.line),
        error_type,
        error_subtype,
        severity,
        description,
        confidence: AI_CONFIDENCE,
        timestamp: record.timestamp.unwrap_or_else(Utc::now),
    }
}

#[async_trait]
impl LogClassifier for AiClassifier {
    fn name(&self) -> &'static str {
        "ai"
    }

    async fn classify(&self, record: &LogRecord) -> Result<Classification, ClassifyError> {
        let content = self.request(&record.line).await?;
        let model: ModelClassification = serde_json::from_str(content.trim())
            .map_err(|e| ClassifyError::InvalidResponse(format!("{}: {}", e, content)))?;

        tracing::debug!(
            model_type = %model.error_type,
            model_severity = %model.severity_level,
            "Model classification received"
        );

        Ok(normalize_model_output(record, model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ErrorSubtype;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: String) -> ClassifierConfig {
        ClassifierConfig {
            enabled: true,
            base_url,
            api_key: "gsk-test".to_string(),
            timeout_seconds: 5,
            ..Default::default()
        }
    }

    fn completion(content: &str) -> serde_json::Value {
        json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": content},
                "finish_reason": "stop"
            }]
        })
    }

    #[tokio::test]
    async fn test_classify_normalizes_model_output() {
        let server = MockServer::start().await;
        let content = json!({
            "service": "Auth",
            "error_type": "Something Creative",
            "error_sub_type": "whatever",
            "error_desc": "Login handler dereferenced a null token",
            "severity_level": "high"
        })
        .to_string();

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer gsk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(&content)))
            .expect(1)
            .mount(&server)
            .await;

        let classifier = AiClassifier::new(Client::new(), test_config(server.uri()));
        let record = LogRecord::new("NullPointerException in LoginController");
        let result = classifier.classify(&record).await.unwrap();

        assert_eq!(result.error_type, ErrorType::ApplicationException);
        assert_eq!(result.error_subtype, ErrorSubtype::NullPointer);
        assert_eq!(result.service, "auth-service");
        assert_eq!(result.severity, Severity::High);
        assert_eq!(result.description, "Login handler dereferenced a null token");
        assert_eq!(result.confidence, AI_CONFIDENCE);
    }

    #[tokio::test]
    async fn test_model_labels_used_when_line_has_no_keyword() {
        let server = MockServer::start().await;
        let content = json!({
            "error_type": "Database Error",
            "error_desc": "replica lag",
            "severity_level": "medium"
        })
        .to_string();

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(&content)))
            .mount(&server)
            .await;

        let classifier = AiClassifier::new(Client::new(), test_config(server.uri()));
        let record = LogRecord::new("replica 3 lagging behind primary").with_service("inventory-service");
        let result = classifier.classify(&record).await.unwrap();

        assert_eq!(result.error_type, ErrorType::DatabaseError);
        assert_eq!(result.service, "inventory-service");
        assert_eq!(result.severity, Severity::Medium);
    }

    #[tokio::test]
    async fn test_upstream_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let classifier = AiClassifier::new(Client::new(), test_config(server.uri()));
        let err = classifier.classify(&LogRecord::new("boom")).await.unwrap_err();
        match err {
            ClassifyError::Upstream { status, message } => {
                assert_eq!(status, 429);
                assert_eq!(message, "rate limited");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_non_json_content_is_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("not json")))
            .mount(&server)
            .await;

        let classifier = AiClassifier::new(Client::new(), test_config(server.uri()));
        let err = classifier.classify(&LogRecord::new("boom")).await.unwrap_err();
        assert!(matches!(err, ClassifyError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_empty_choices_is_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let classifier = AiClassifier::new(Client::new(), test_config(server.uri()));
        let err = classifier.classify(&LogRecord::new("boom")).await.unwrap_err();
        assert!(matches!(err, ClassifyError::InvalidResponse(_)));
    }
}
