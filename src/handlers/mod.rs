//! HTTP and WebSocket handlers.

pub mod health;
pub mod logs;
pub mod metrics_handler;
pub mod probes;
pub mod websocket;

use std::sync::Arc;

use crate::broadcast::BroadcastHub;
use crate::processor::LogProcessor;

/// Shared state of the API routes
#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<LogProcessor>,
}

impl AppState {
    pub fn new(processor: Arc<LogProcessor>) -> Self {
        Self { processor }
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        self.processor.hub()
    }
}
