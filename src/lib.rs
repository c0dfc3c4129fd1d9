pub mod broadcast;
pub mod buffer;
pub mod classifier;
pub mod config;
pub mod detector;
pub mod error;
pub mod handlers;
pub mod health;
pub mod metrics;
pub mod models;
pub mod processor;
pub mod server;
pub mod signals;
pub mod stats;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing/logging
///
/// `RUST_LOG` wins over `level` when set. `format` is `"json"` or anything
/// else for human-readable text. Can only be called once per process.
pub fn init_tracing(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);

    if format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_target(true))
            .init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}
