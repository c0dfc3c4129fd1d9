use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::{IntoResponse, Json, Response},
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::AppState;
use crate::broadcast::{BroadcastHub, ChannelType, ConnectionStats, Envelope};

#[derive(Debug, Default, Deserialize)]
pub struct StreamParams {
    pub service: Option<String>,
    pub client_id: Option<String>,
}

/// GET /ws/live
pub async fn live_stream(
    ws: WebSocketUpgrade,
    Query(params): Query<StreamParams>,
    State(state): State<AppState>,
) -> Response {
    upgrade(ws, &state, ChannelType::Live, params.service, params.client_id)
}

/// GET /ws/health
pub async fn health_stream(
    ws: WebSocketUpgrade,
    Query(params): Query<StreamParams>,
    State(state): State<AppState>,
) -> Response {
    upgrade(ws, &state, ChannelType::Health, params.service, params.client_id)
}

/// GET /ws/logs/{service}
pub async fn service_logs_stream(
    ws: WebSocketUpgrade,
    Path(service): Path<String>,
    Query(params): Query<StreamParams>,
    State(state): State<AppState>,
) -> Response {
    upgrade(ws, &state, ChannelType::Logs, Some(service), params.client_id)
}

/// GET /ws/alerts
pub async fn alerts_stream(
    ws: WebSocketUpgrade,
    Query(params): Query<StreamParams>,
    State(state): State<AppState>,
) -> Response {
    upgrade(ws, &state, ChannelType::Alerts, params.service, params.client_id)
}

/// GET /api/v1/ws/connections
pub async fn connection_stats(State(state): State<AppState>) -> Json<ConnectionStats> {
    Json(state.hub().connection_stats())
}

/// Register with the hub before upgrading so a full hub answers 503 instead
/// of accepting the handshake.
fn upgrade(
    ws: WebSocketUpgrade,
    state: &AppState,
    channel: ChannelType,
    service: Option<String>,
    client_id: Option<String>,
) -> Response {
    let hub = state.hub().clone();
    let service = service.filter(|s| !s.trim().is_empty());

    match hub.connect(channel, service, client_id) {
        Ok((connection_id, rx)) => {
            ws.on_upgrade(move |socket| handle_socket(socket, hub, connection_id, rx))
        }
        Err(e) => {
            tracing::warn!(channel = %channel, error = %e, "Refusing dashboard connection");
            e.into_response()
        }
    }
}

async fn handle_socket(
    socket: WebSocket,
    hub: Arc<BroadcastHub>,
    connection_id: String,
    mut rx: mpsc::Receiver<Envelope>,
) {
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            outbound = rx.recv() => match outbound {
                Some(envelope) => {
                    if send_envelope(&mut sender, &envelope).await.is_err() {
                        break;
                    }
                }
                // Removed from the hub (dead or shutting down)
                None => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            },
            inbound = receiver.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    let reply = hub.handle_message(&connection_id, &text);
                    if send_envelope(&mut sender, &reply).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(connection_id = %connection_id, error = %e, "WebSocket receive failed");
                    break;
                }
            },
        }
    }

    hub.disconnect(&connection_id);
}

async fn send_envelope<S>(sender: &mut S, envelope: &Envelope) -> Result<(), axum::Error>
where
    S: SinkExt<Message, Error = axum::Error> + Unpin,
{
    match serde_json::to_string(envelope) {
        Ok(text) => sender.send(Message::Text(text)).await,
        Err(e) => {
            tracing::error!(event = %envelope.event_type, error = %e, "Failed to serialize envelope");
            Ok(())
        }
    }
}
