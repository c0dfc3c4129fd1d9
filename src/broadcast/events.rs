//! Event, envelope and subscription types of the broadcast hub.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

use crate::classifier::Severity;
use crate::models::{LogLevel, ProcessedLog, ProcessingStats, ServiceHealth};

/// Events published by the batch scheduler and the heartbeat task
#[derive(Debug, Clone)]
pub enum HubEvent {
    HealthUpdate(ServiceHealth),
    AnomalyAlert(ProcessedLog),
    StatsUpdate(ProcessingStats),
    Heartbeat {
        active_services: usize,
        connections: usize,
    },
}

impl HubEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::HealthUpdate(_) => "health_update",
            Self::AnomalyAlert(_) => "anomaly_alert",
            Self::StatsUpdate(_) => "stats_update",
            Self::Heartbeat { .. } => "heartbeat",
        }
    }

    /// Service the event concerns; `None` for global events
    pub fn service_name(&self) -> Option<&str> {
        match self {
            Self::HealthUpdate(health) => Some(&health.service_name),
            Self::AnomalyAlert(log) => Some(&log.service_name),
            Self::StatsUpdate(_) | Self::Heartbeat { .. } => None,
        }
    }

    pub fn to_envelope(&self) -> Result<Envelope, serde_json::Error> {
        let data = match self {
            Self::HealthUpdate(health) => serde_json::to_value(health)?,
            Self::AnomalyAlert(log) => serde_json::to_value(log)?,
            Self::StatsUpdate(stats) => serde_json::to_value(stats)?,
            Self::Heartbeat {
                active_services,
                connections,
            } => json!({
                "active_services": active_services,
                "connections": connections,
            }),
        };

        Ok(Envelope {
            event_type: self.event_type().to_string(),
            service_name: self.service_name().map(str::to_string),
            data,
            timestamp: Utc::now(),
        })
    }
}

/// Wire format of every outbound message: `{type, service_name?, data, timestamp}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(default)]
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    /// Control reply (`pong`, `subscription_confirmed`, `error`, ...)
    pub fn reply(event_type: &str, data: Value) -> Self {
        Self {
            event_type: event_type.to_string(),
            service_name: None,
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::reply("error", json!({ "message": message.into() }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    /// Every event
    #[default]
    Live,
    /// Health and stats updates
    Health,
    /// Every anomaly alert
    Logs,
    /// Anomaly alerts of medium or high severity
    Alerts,
}

impl ChannelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Health => "health",
            Self::Logs => "logs",
            Self::Alerts => "alerts",
        }
    }

    fn accepts(&self, event: &HubEvent) -> bool {
        match (self, event) {
            (_, HubEvent::Heartbeat { .. }) => true,
            (Self::Live, _) => true,
            (Self::Health, HubEvent::HealthUpdate(_) | HubEvent::StatsUpdate(_)) => true,
            (Self::Logs, HubEvent::AnomalyAlert(_)) => true,
            (Self::Alerts, HubEvent::AnomalyAlert(log)) => log.severity >= Severity::Medium,
            _ => false,
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
}

/// Client-side narrowing of anomaly alerts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionFilters {
    /// Minimum log level
    #[serde(default, alias = "log_level")]
    pub level: Option<LogLevel>,
    /// At least one must appear in the message (case-insensitive)
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub time_range: Option<TimeRange>,
}

impl SubscriptionFilters {
    pub fn matches(&self, log: &ProcessedLog) -> bool {
        if let Some(level) = self.level {
            if log.level < level {
                return false;
            }
        }

        if !self.keywords.is_empty() {
            let message = log.message.to_lowercase();
            if !self
                .keywords
                .iter()
                .any(|k| message.contains(&k.to_lowercase()))
            {
                return false;
            }
        }

        if let Some(range) = &self.time_range {
            if range.start.is_some_and(|start| log.timestamp < start) {
                return false;
            }
            if range.end.is_some_and(|end| log.timestamp > end) {
                return false;
            }
        }

        true
    }
}

/// One connection's interest in hub events
#[derive(Debug, Clone, Serialize)]
pub struct Subscription {
    pub connection_id: String,
    pub service_filter: Option<String>,
    pub channel_type: ChannelType,
    pub filters: SubscriptionFilters,
    /// Cleared by `unsubscribe`; heartbeats are still delivered
    pub active: bool,
    pub connected_at: DateTime<Utc>,
}

impl Subscription {
    pub fn new(connection_id: String, channel_type: ChannelType, service_filter: Option<String>) -> Self {
        Self {
            connection_id,
            service_filter,
            channel_type,
            filters: SubscriptionFilters::default(),
            active: true,
            connected_at: Utc::now(),
        }
    }

    /// Whether this connection should receive `event`.
    ///
    /// Heartbeats bypass every filter. Events without a service name are global
    /// and pass the service filter.
    pub fn wants(&self, event: &HubEvent) -> bool {
        if matches!(event, HubEvent::Heartbeat { .. }) {
            return true;
        }
        if !self.active || !self.channel_type.accepts(event) {
            return false;
        }

        if let (Some(filter), Some(service)) = (&self.service_filter, event.service_name()) {
            if filter != service {
                return false;
            }
        }

        match event {
            HubEvent::AnomalyAlert(log) => self.filters.matches(log),
            _ => true,
        }
    }
}

/// Inbound control messages
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe {
        #[serde(default)]
        subscription_type: Option<ChannelType>,
        #[serde(default)]
        service_name: Option<String>,
        #[serde(default)]
        filters: Option<SubscriptionFilters>,
    },
    Unsubscribe,
    Filter {
        #[serde(default)]
        filters: SubscriptionFilters,
    },
    Ping,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{ErrorSubtype, ErrorType};
    use chrono::TimeZone;

    fn alert(service: &str, level: LogLevel, severity: Severity, message: &str) -> ProcessedLog {
        ProcessedLog {
            id: "1".to_string(),
            service_name: service.to_string(),
            level,
            message: message.to_string(),
            error_type: ErrorType::Timeout,
            error_subtype: ErrorSubtype::Timeout,
            severity,
            description: message.to_string(),
            is_anomaly: true,
            confidence: 0.6,
            timestamp: Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap(),
            processed_at: Utc::now(),
        }
    }

    #[test]
    fn test_envelope_shape() {
        let event = HubEvent::HealthUpdate(ServiceHealth::new("auth-service"));
        let value = serde_json::to_value(event.to_envelope().unwrap()).unwrap();
        assert_eq!(value["type"], "health_update");
        assert_eq!(value["service_name"], "auth-service");
        assert_eq!(value["data"]["status"], "healthy");
        assert!(value["timestamp"].is_string());

        let heartbeat = HubEvent::Heartbeat {
            active_services: 2,
            connections: 5,
        };
        let value = serde_json::to_value(heartbeat.to_envelope().unwrap()).unwrap();
        assert!(value.get("service_name").is_none());
        assert_eq!(value["data"]["connections"], 5);
    }

    #[test]
    fn test_service_filter() {
        let sub = Subscription::new("c1".into(), ChannelType::Live, Some("payment-service".into()));
        let auth = HubEvent::AnomalyAlert(alert("auth-service", LogLevel::Error, Severity::High, "x"));
        let payment = HubEvent::HealthUpdate(ServiceHealth::new("payment-service"));
        let stats = HubEvent::StatsUpdate(ProcessingStats::default());

        assert!(!sub.wants(&auth));
        assert!(sub.wants(&payment));
        assert!(sub.wants(&stats));
    }

    #[test]
    fn test_channel_semantics() {
        let medium = HubEvent::AnomalyAlert(alert("s", LogLevel::Error, Severity::Medium, "x"));
        let low = HubEvent::AnomalyAlert(alert("s", LogLevel::Error, Severity::Low, "x"));
        let health = HubEvent::HealthUpdate(ServiceHealth::new("s"));

        let alerts = Subscription::new("a".into(), ChannelType::Alerts, None);
        assert!(alerts.wants(&medium));
        assert!(!alerts.wants(&low));
        assert!(!alerts.wants(&health));

        let logs = Subscription::new("l".into(), ChannelType::Logs, None);
        assert!(logs.wants(&low));
        assert!(!logs.wants(&health));

        let health_sub = Subscription::new("h".into(), ChannelType::Health, None);
        assert!(health_sub.wants(&health));
        assert!(!health_sub.wants(&medium));
    }

    #[test]
    fn test_heartbeat_bypasses_everything() {
        let mut sub = Subscription::new("c".into(), ChannelType::Alerts, Some("x".into()));
        sub.active = false;
        assert!(sub.wants(&HubEvent::Heartbeat {
            active_services: 0,
            connections: 1
        }));
        assert!(!sub.wants(&HubEvent::StatsUpdate(ProcessingStats::default())));
    }

    #[test]
    fn test_filters() {
        let log = alert("s", LogLevel::Warn, Severity::Low, "Upstream TIMEOUT on /pay");

        let by_level = SubscriptionFilters {
            level: Some(LogLevel::Error),
            ..Default::default()
        };
        assert!(!by_level.matches(&log));

        let by_keyword = SubscriptionFilters {
            keywords: vec!["timeout".into(), "refused".into()],
            ..Default::default()
        };
        assert!(by_keyword.matches(&log));

        let by_time = SubscriptionFilters {
            time_range: Some(TimeRange {
                start: Some(Utc.with_ymd_and_hms(2025, 1, 11, 0, 0, 0).unwrap()),
                end: None,
            }),
            ..Default::default()
        };
        assert!(!by_time.matches(&log));
    }

    #[test]
    fn test_client_message_parsing() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"subscribe","subscription_type":"alerts","service_name":"auth-service","filters":{"log_level":"ERROR","keywords":["db"]}}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::Subscribe {
                subscription_type,
                service_name,
                filters,
            } => {
                assert_eq!(subscription_type, Some(ChannelType::Alerts));
                assert_eq!(service_name.as_deref(), Some("auth-service"));
                assert_eq!(filters.unwrap().level, Some(LogLevel::Error));
            }
            other => panic!("unexpected message: {other:?}"),
        }

        let ping: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(ping, ClientMessage::Ping);
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"dance"}"#).is_err());
    }
}
