//! Closed classification vocabulary and the deterministic lookup tables that
//! map free text onto it.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorType {
    #[serde(rename = "Application Exception")]
    ApplicationException,
    #[serde(rename = "Infrastructure Error")]
    InfrastructureError,
    #[serde(rename = "Network Error")]
    NetworkError,
    #[serde(rename = "Database Error")]
    DatabaseError,
    #[serde(rename = "Security Alert")]
    SecurityAlert,
    #[serde(rename = "Resource Exhaustion")]
    ResourceExhaustion,
    #[serde(rename = "Deployment Issue")]
    DeploymentIssue,
    #[serde(rename = "Timeout")]
    Timeout,
    #[serde(rename = "Business Logic Error")]
    BusinessLogicError,
    #[serde(rename = "Payment Error")]
    PaymentError,
    #[serde(rename = "Communication Error")]
    CommunicationError,
    #[serde(rename = "Unknown")]
    Unknown,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApplicationException => "Application Exception",
            Self::InfrastructureError => "Infrastructure Error",
            Self::NetworkError => "Network Error",
            Self::DatabaseError => "Database Error",
            Self::SecurityAlert => "Security Alert",
            Self::ResourceExhaustion => "Resource Exhaustion",
            Self::DeploymentIssue => "Deployment Issue",
            Self::Timeout => "Timeout",
            Self::BusinessLogicError => "Business Logic Error",
            Self::PaymentError => "Payment Error",
            Self::CommunicationError => "Communication Error",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorSubtype {
    #[serde(rename = "Stack Trace")]
    StackTrace,
    #[serde(rename = "Null Pointer Exception")]
    NullPointer,
    #[serde(rename = "Connection Refused")]
    ConnectionRefused,
    #[serde(rename = "Timeout")]
    Timeout,
    #[serde(rename = "Out of Memory (OOMKilled)")]
    OomKilled,
    #[serde(rename = "Database Connection Failed")]
    DbConnectionFailed,
    #[serde(rename = "Authentication Failure")]
    AuthFailure,
    #[serde(rename = "Rate Limit Hit")]
    RateLimitHit,
    #[serde(rename = "Configuration Mismatch")]
    ConfigMismatch,
    #[serde(rename = "SSL Handshake Error")]
    SslHandshakeError,
    #[serde(rename = "Permission Denied")]
    PermissionDenied,
    #[serde(rename = "Service Unavailable")]
    ServiceUnavailable,
    #[serde(rename = "Conflict")]
    Conflict,
    #[serde(rename = "Account Suspension")]
    Suspension,
    #[serde(rename = "Chargeback")]
    Chargeback,
    #[serde(rename = "HTTP 4XX Error")]
    Http4xx,
    #[serde(rename = "HTTP 5XX Error")]
    Http5xx,
    #[serde(rename = "SMTP Error")]
    SmtpError,
    #[serde(rename = "Unknown")]
    Unknown,
}

impl ErrorSubtype {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StackTrace => "Stack Trace",
            Self::NullPointer => "Null Pointer Exception",
            Self::ConnectionRefused => "Connection Refused",
            Self::Timeout => "Timeout",
            Self::OomKilled => "Out of Memory (OOMKilled)",
            Self::DbConnectionFailed => "Database Connection Failed",
            Self::AuthFailure => "Authentication Failure",
            Self::RateLimitHit => "Rate Limit Hit",
            Self::ConfigMismatch => "Configuration Mismatch",
            Self::SslHandshakeError => "SSL Handshake Error",
            Self::PermissionDenied => "Permission Denied",
            Self::ServiceUnavailable => "Service Unavailable",
            Self::Conflict => "Conflict",
            Self::Suspension => "Account Suspension",
            Self::Chargeback => "Chargeback",
            Self::Http4xx => "HTTP 4XX Error",
            Self::Http5xx => "HTTP 5XX Error",
            Self::SmtpError => "SMTP Error",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ErrorSubtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
        }
    }

    /// Lenient parse of a model-provided severity label
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "high" | "critical" => Some(Self::High),
            "medium" | "moderate" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered keyword table; the first keyword found in the text wins.
const ERROR_KEYWORDS: &[(&str, ErrorType, ErrorSubtype)] = &[
    ("nullpointer", ErrorType::ApplicationException, ErrorSubtype::NullPointer),
    ("null pointer", ErrorType::ApplicationException, ErrorSubtype::NullPointer),
    ("connection refused", ErrorType::NetworkError, ErrorSubtype::ConnectionRefused),
    ("timeout", ErrorType::Timeout, ErrorSubtype::Timeout),
    ("timed out", ErrorType::Timeout, ErrorSubtype::Timeout),
    ("oomkilled", ErrorType::ResourceExhaustion, ErrorSubtype::OomKilled),
    ("out of memory", ErrorType::ResourceExhaustion, ErrorSubtype::OomKilled),
    ("ssl handshake", ErrorType::NetworkError, ErrorSubtype::SslHandshakeError),
    ("permission denied", ErrorType::SecurityAlert, ErrorSubtype::PermissionDenied),
    ("unauthorized", ErrorType::SecurityAlert, ErrorSubtype::AuthFailure),
    ("forbidden", ErrorType::SecurityAlert, ErrorSubtype::PermissionDenied),
    ("auth fail", ErrorType::SecurityAlert, ErrorSubtype::AuthFailure),
    ("invalid token", ErrorType::SecurityAlert, ErrorSubtype::AuthFailure),
    ("rate limit", ErrorType::InfrastructureError, ErrorSubtype::RateLimitHit),
    ("service unavailable", ErrorType::InfrastructureError, ErrorSubtype::ServiceUnavailable),
    ("unavailable", ErrorType::InfrastructureError, ErrorSubtype::ServiceUnavailable),
    ("db conn", ErrorType::DatabaseError, ErrorSubtype::DbConnectionFailed),
    ("database", ErrorType::DatabaseError, ErrorSubtype::DbConnectionFailed),
    ("sql", ErrorType::DatabaseError, ErrorSubtype::DbConnectionFailed),
    ("chargeback", ErrorType::PaymentError, ErrorSubtype::Chargeback),
    ("suspended", ErrorType::PaymentError, ErrorSubtype::Suspension),
    ("payment", ErrorType::PaymentError, ErrorSubtype::Unknown),
    ("optimistic lock", ErrorType::BusinessLogicError, ErrorSubtype::Conflict),
    ("conflict", ErrorType::BusinessLogicError, ErrorSubtype::Conflict),
    ("smtp", ErrorType::CommunicationError, ErrorSubtype::SmtpError),
    ("mail", ErrorType::CommunicationError, ErrorSubtype::SmtpError),
    ("rollout", ErrorType::DeploymentIssue, ErrorSubtype::ConfigMismatch),
    ("deployment", ErrorType::DeploymentIssue, ErrorSubtype::ConfigMismatch),
    ("config", ErrorType::DeploymentIssue, ErrorSubtype::ConfigMismatch),
    ("http 5", ErrorType::InfrastructureError, ErrorSubtype::Http5xx),
    ("http 4", ErrorType::ApplicationException, ErrorSubtype::Http4xx),
    ("traceback", ErrorType::ApplicationException, ErrorSubtype::StackTrace),
    ("stacktrace", ErrorType::ApplicationException, ErrorSubtype::StackTrace),
    ("stack trace", ErrorType::ApplicationException, ErrorSubtype::StackTrace),
    ("exception", ErrorType::ApplicationException, ErrorSubtype::StackTrace),
    ("panic", ErrorType::ApplicationException, ErrorSubtype::Unknown),
    ("crash", ErrorType::ApplicationException, ErrorSubtype::Unknown),
    ("refused", ErrorType::NetworkError, ErrorSubtype::ConnectionRefused),
    ("network", ErrorType::NetworkError, ErrorSubtype::Unknown),
];

/// Canonical service names and the exact producer names that alias them
const SERVICE_ALIASES: &[(&str, &[&str])] = &[
    ("auth-service", &["auth", "authentication", "auth-svc", "authservice", "login-service"]),
    ("api-gateway", &["gateway", "api-gw", "apigateway", "nginx", "proxy"]),
    ("user-service", &["user", "users", "user-svc", "userservice", "profile-service"]),
    ("payment-service", &["payment", "payments", "payment-svc", "paymentservice", "billing"]),
    (
        "notification-service",
        &["notification", "notifications", "notify", "notification-svc", "mailer"],
    ),
    ("inventory-service", &["inventory", "inventory-svc", "inventoryservice", "stock-service"]),
];

/// Keywords used to guess the service when the line names none
const SERVICE_KEYWORDS: &[(&str, &[&str])] = &[
    ("auth-service", &["auth", "login", "token"]),
    ("payment-service", &["payment", "transaction", "merchant"]),
    ("api-gateway", &["gateway", "nginx", "proxy"]),
    ("user-service", &["user", "profile", "account"]),
    ("notification-service", &["notify", "email", "sms", "webhook"]),
    ("inventory-service", &["inventory", "stock", "warehouse"]),
];

pub const UNKNOWN_SERVICE: &str = "unknown-service";

static SERVICE_TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[([^\[\]]+)\]").unwrap());

/// Deterministic (error_type, error_subtype, service) triple
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedClassification {
    pub error_type: ErrorType,
    pub error_subtype: ErrorSubtype,
    pub service: String,
}

/// First matching keyword from the ordered table, `Unknown/Unknown` otherwise
pub fn lookup_error_type(text: &str) -> (ErrorType, ErrorSubtype) {
    let lower = text.to_lowercase();
    ERROR_KEYWORDS
        .iter()
        .find(|(keyword, _, _)| lower.contains(keyword))
        .map(|(_, error_type, subtype)| (*error_type, *subtype))
        .unwrap_or((ErrorType::Unknown, ErrorSubtype::Unknown))
}

/// Canonical service name.
///
/// The producer-supplied name wins when present; otherwise the first
/// bracketed tag in the text, then keyword guessing.
pub fn normalize_service(service: Option<&str>, text: &str) -> String {
    let candidate = service
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| service_tag(text));

    if let Some(candidate) = candidate {
        return canonical_service_name(&candidate);
    }

    let lower = text.to_lowercase();
    SERVICE_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(canonical, _)| canonical.to_string())
        .unwrap_or_else(|| UNKNOWN_SERVICE.to_string())
}

/// Map a raw service name onto the alias table, keeping unknown names as-is (lowercased)
fn canonical_service_name(raw: &str) -> String {
    let cleaned = raw.trim().to_lowercase().replace('_', "-");
    SERVICE_ALIASES
        .iter()
        .find(|(canonical, aliases)| *canonical == cleaned || aliases.contains(&cleaned.as_str()))
        .map(|(canonical, _)| canonical.to_string())
        .unwrap_or(cleaned)
}

/// First bracketed tag that is not a log level or a timestamp
fn service_tag(text: &str) -> Option<String> {
    SERVICE_TAG_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .find(|tag| {
            let upper = tag.to_uppercase();
            !tag.is_empty()
                && !tag.starts_with(|c: char| c.is_ascii_digit())
                && !matches!(
                    upper.as_str(),
                    "DEBUG" | "INFO" | "WARN" | "WARNING" | "ERROR" | "FATAL" | "TRACE"
                )
        })
        .map(str::to_string)
}

/// Pure lookup from free text onto the closed vocabulary.
///
/// Identical inputs always yield identical output.
pub fn normalize_classification(description: &str, service: Option<&str>) -> NormalizedClassification {
    let (error_type, error_subtype) = lookup_error_type(description);
    NormalizedClassification {
        error_type,
        error_subtype,
        service: normalize_service(service, description),
    }
}

/// Severity from keywords: fatal/critical/emergency are High, warning/info/debug are Low
pub fn severity_from_keywords(line: &str) -> Severity {
    let lower = line.to_lowercase();
    if ["fatal", "critical", "emergency"].iter().any(|k| lower.contains(k)) {
        Severity::High
    } else if ["warning", "info", "debug"].iter().any(|k| lower.contains(k)) {
        Severity::Low
    } else {
        Severity::Medium
    }
}
