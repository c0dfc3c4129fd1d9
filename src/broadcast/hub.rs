use dashmap::DashMap;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use super::events::{ChannelType, ClientMessage, Envelope, HubEvent, Subscription};
use crate::config::BroadcastConfig;
use crate::error::AppError;

struct Connection {
    subscription: Subscription,
    tx: mpsc::Sender<Envelope>,
}

/// Live connection counts
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectionStats {
    pub total_connections: usize,
    pub connections_by_type: BTreeMap<String, usize>,
    pub service_subscriptions: BTreeMap<String, usize>,
}

/// Registry of live dashboard connections.
///
/// Delivery is best-effort and at-most-once: each connection owns a bounded
/// outbound queue, and a connection whose queue is full or closed is removed
/// on the spot. Nothing is replayed on reconnect.
pub struct BroadcastHub {
    connections: DashMap<String, Connection>,
    /// Serializes the cap check with the insert
    admission: Mutex<()>,
    max_connections: usize,
    client_buffer: usize,
}

impl BroadcastHub {
    pub fn new(config: &BroadcastConfig) -> Self {
        Self {
            connections: DashMap::new(),
            admission: Mutex::new(()),
            max_connections: config.max_connections,
            client_buffer: config.client_buffer.max(1),
        }
    }

    /// Register a connection and queue its `connection` welcome message.
    ///
    /// Returns the connection id and the receiving end of its outbound queue.
    pub fn connect(
        &self,
        channel_type: ChannelType,
        service_filter: Option<String>,
        client_id: Option<String>,
    ) -> Result<(String, mpsc::Receiver<Envelope>), AppError> {
        let _admission = self.admission.lock().unwrap_or_else(|e| e.into_inner());
        if self.connections.len() >= self.max_connections {
            return Err(AppError::CapacityExceeded(format!(
                "Maximum of {} connections reached",
                self.max_connections
            )));
        }

        let connection_id = match client_id.filter(|id| !id.trim().is_empty()) {
            Some(id) if !self.connections.contains_key(&id) => id,
            _ => uuid::Uuid::new_v4().to_string(),
        };

        let (tx, rx) = mpsc::channel(self.client_buffer);
        let welcome = Envelope::reply(
            "connection",
            json!({
                "message": "Connected to log monitoring stream",
                "connection_id": connection_id,
                "subscription_type": channel_type,
                "service_filter": service_filter,
            }),
        );
        let _ = tx.try_send(welcome);

        let subscription = Subscription::new(connection_id.clone(), channel_type, service_filter);
        self.connections
            .insert(connection_id.clone(), Connection { subscription, tx });
        crate::metrics::update_ws_connections(self.connections.len());

        tracing::info!(
            connection_id = %connection_id,
            channel = %channel_type,
            total = self.connections.len(),
            "Dashboard client connected"
        );

        Ok((connection_id, rx))
    }

    pub fn disconnect(&self, connection_id: &str) -> bool {
        let removed = self.connections.remove(connection_id).is_some();
        if removed {
            crate::metrics::update_ws_connections(self.connections.len());
            tracing::info!(connection_id = %connection_id, "Dashboard client disconnected");
        }
        removed
    }

    pub fn subscription(&self, connection_id: &str) -> Option<Subscription> {
        self.connections
            .get(connection_id)
            .map(|c| c.subscription.clone())
    }

    /// Apply a control message and build the reply
    pub fn handle_message(&self, connection_id: &str, text: &str) -> Envelope {
        let message: ClientMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => return Envelope::error(format!("Invalid message: {}", e)),
        };

        if matches!(message, ClientMessage::Ping) {
            return Envelope::reply("pong", json!({}));
        }

        let Some(mut connection) = self.connections.get_mut(connection_id) else {
            return Envelope::error("Unknown connection");
        };
        let subscription = &mut connection.subscription;

        match message {
            ClientMessage::Subscribe {
                subscription_type,
                service_name,
                filters,
            } => {
                if let Some(channel_type) = subscription_type {
                    subscription.channel_type = channel_type;
                }
                if service_name.is_some() {
                    subscription.service_filter = service_name;
                }
                if let Some(filters) = filters {
                    subscription.filters = filters;
                }
                subscription.active = true;
                Envelope::reply(
                    "subscription_confirmed",
                    json!({
                        "subscription_type": subscription.channel_type,
                        "service_name": subscription.service_filter,
                        "filters": subscription.filters,
                    }),
                )
            }
            ClientMessage::Unsubscribe => {
                subscription.active = false;
                Envelope::reply("unsubscription_confirmed", json!({}))
            }
            ClientMessage::Filter { filters } => {
                subscription.filters = filters;
                Envelope::reply("filters_updated", json!({ "filters": subscription.filters }))
            }
            ClientMessage::Ping => Envelope::reply("pong", json!({})),
        }
    }

    /// Deliver `event` to every interested connection; returns the delivery count
    pub fn publish(&self, event: &HubEvent) -> usize {
        let envelope = match event.to_envelope() {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::error!(event = event.event_type(), error = %e, "Failed to serialize event");
                return 0;
            }
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for connection in self.connections.iter() {
            if !connection.subscription.wants(event) {
                continue;
            }
            match connection.tx.try_send(envelope.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => dead.push((connection.key().clone(), e.to_string())),
            }
        }

        // Removal happens after iteration; DashMap shards are still read-locked inside the loop
        for (connection_id, reason) in dead {
            if self.connections.remove(&connection_id).is_some() {
                tracing::warn!(
                    connection_id = %connection_id,
                    event = event.event_type(),
                    reason = %reason,
                    "Dropping dashboard connection after failed send"
                );
            }
        }
        crate::metrics::update_ws_connections(self.connections.len());

        delivered
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn connection_stats(&self) -> ConnectionStats {
        let mut stats = ConnectionStats {
            total_connections: self.connections.len(),
            ..Default::default()
        };
        for connection in self.connections.iter() {
            let sub = &connection.subscription;
            *stats
                .connections_by_type
                .entry(sub.channel_type.as_str().to_string())
                .or_insert(0) += 1;
            if let Some(service) = &sub.service_filter {
                *stats.service_subscriptions.entry(service.clone()).or_insert(0) += 1;
            }
        }
        stats
    }

    /// Drop every connection; their socket tasks see a closed queue and close
    pub fn close_all(&self) {
        let count = self.connections.len();
        self.connections.clear();
        crate::metrics::update_ws_connections(0);
        if count > 0 {
            tracing::info!(connections = count, "Closed all dashboard connections");
        }
    }

    /// Publish a heartbeat every `interval` until `shutdown` flips to true
    pub async fn heartbeat_loop<F>(
        self: Arc<Self>,
        interval: Duration,
        active_services: F,
        mut shutdown: watch::Receiver<bool>,
    ) where
        F: Fn() -> usize + Send + 'static,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let event = HubEvent::Heartbeat {
                        active_services: active_services(),
                        connections: self.connections.len(),
                    };
                    let delivered = self.publish(&event);
                    tracing::debug!(delivered, "Heartbeat sent");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Heartbeat task stopped");
    }
}
