use anyhow::Result;
use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{delete, get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::watch;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    broadcast::BroadcastHub,
    classifier::Classifier,
    config::{Config, ServerConfig},
    handlers::{self, AppState},
    metrics,
    processor::LogProcessor,
    signals::setup_signal_handlers,
};

/// Ingestion request body limit
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Everything the server runs, wired from configuration
pub struct Pipeline {
    pub processor: Arc<LogProcessor>,
    pub hub: Arc<BroadcastHub>,
}

impl Pipeline {
    pub fn from_config(config: &Config) -> Result<Self> {
        let http_client = reqwest::Client::builder().build()?;
        let classifier = Arc::new(Classifier::from_config(&config.classifier, http_client));
        let hub = Arc::new(BroadcastHub::new(&config.broadcast));
        let processor = Arc::new(LogProcessor::new(
            config.processing.clone(),
            classifier,
            hub.clone(),
        ));
        Ok(Self { processor, hub })
    }
}

/// Start the log monitoring server
///
/// This function:
/// 1. Initializes metrics
/// 2. Sets up signal handlers for graceful shutdown
/// 3. Starts the batch scheduler and the heartbeat task
/// 4. Serves the REST and WebSocket API until a shutdown signal arrives
/// 5. Stops the scheduler, closes dashboards and drains HTTP connections
pub async fn start_server(config: Config) -> Result<()> {
    let metrics_handle = if config.metrics.enabled {
        info!("Initializing Prometheus metrics...");
        Some(Arc::new(metrics::init_metrics()?))
    } else {
        None
    };

    let (shutdown_tx, signal_handle) = setup_signal_handlers();
    let mut shutdown_rx = shutdown_tx.subscribe();

    let pipeline = Pipeline::from_config(&config)?;
    let processor = pipeline.processor.clone();
    let hub = pipeline.hub.clone();

    processor.start();

    let (heartbeat_tx, heartbeat_rx) = watch::channel(false);
    let heartbeat = tokio::spawn(hub.clone().heartbeat_loop(
        config.broadcast.heartbeat_interval(),
        {
            let processor = processor.clone();
            move || processor.active_services()
        },
        heartbeat_rx,
    ));

    let app = create_router(&config, AppState::new(processor.clone()), metrics_handle);

    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));

    info!("Starting logpulse on {}", addr);
    info!(
        interval_seconds = config.processing.interval_seconds,
        max_batch_size = config.processing.max_batch_size,
        ai_classifier = config.classifier.enabled,
        "Pipeline configured"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown({
            let processor = processor.clone();
            let hub = hub.clone();
            async move {
                let _ = shutdown_rx.recv().await;
                info!("Shutdown signal received, stopping pipeline...");
                processor.stop().await;
                hub.close_all();
                info!("Draining HTTP connections...");
            }
        })
        .await?;

    let _ = heartbeat_tx.send(true);
    heartbeat.await?;
    signal_handle.await?;
    info!("Server stopped gracefully");

    Ok(())
}

/// Create the Axum router with all routes and middleware
pub fn create_router(
    config: &Config,
    state: AppState,
    metrics_handle: Option<Arc<PrometheusHandle>>,
) -> Router {
    let api = Router::new()
        // Ingestion and registry
        .route("/api/v1/logs/stream/:service", post(handlers::logs::stream_logs))
        .route(
            "/api/v1/logs/stream/:service/single",
            post(handlers::logs::stream_single_log),
        )
        .route("/api/v1/logs/services", get(handlers::logs::list_services))
        .route(
            "/api/v1/logs/services/register",
            post(handlers::logs::register_service),
        )
        .route(
            "/api/v1/logs/services/:service",
            delete(handlers::logs::unregister_service),
        )
        .route("/api/v1/logs/queue/status", get(handlers::logs::queue_status))
        // Health views
        .route("/api/v1/health", get(handlers::health::system_health))
        .route("/api/v1/health/services", get(handlers::health::all_services))
        .route(
            "/api/v1/health/services/:service",
            get(handlers::health::service_health),
        )
        // Dashboards
        .route("/api/v1/ws/connections", get(handlers::websocket::connection_stats))
        .route("/ws/live", get(handlers::websocket::live_stream))
        .route("/ws/health", get(handlers::websocket::health_stream))
        .route("/ws/logs/:service", get(handlers::websocket::service_logs_stream))
        .route("/ws/alerts", get(handlers::websocket::alerts_stream))
        // Probes
        .route("/health", get(handlers::probes::health_check))
        .route("/ready", get(handlers::probes::readiness_check))
        .with_state(state);

    let app = match metrics_handle {
        Some(handle) => api.merge(
            Router::new()
                .route(&config.metrics.endpoint, get(handlers::metrics_handler::metrics))
                .with_state(handle),
        ),
        None => api,
    };

    app.layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors_layer(&config.server))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(server: &ServerConfig) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if server.allowed_origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = server
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    layer.allow_origin(AllowOrigin::list(origins))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_router() {
        let config = Config::default();
        let pipeline = Pipeline::from_config(&config).unwrap();

        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let metrics_handle = Arc::new(recorder.handle());

        let _app = create_router(&config, AppState::new(pipeline.processor), Some(metrics_handle));
        // Router created successfully - no panic
    }

    #[test]
    fn test_cors_layer_accepts_wildcard() {
        let server = ServerConfig {
            allowed_origins: vec!["*".to_string()],
            ..Default::default()
        };
        let _layer = cors_layer(&server);
    }
}
