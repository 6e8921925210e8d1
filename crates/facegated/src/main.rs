use anyhow::{Context, Result};
use facegate_core::{CosineMatcher, OnnxFaceEncoder};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod error;
mod http;
mod registry;
mod store;

#[cfg(test)]
mod test_support;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "facegated starting");

    let config = config::Config::from_env();
    tracing::info!(
        bind = %config.bind_addr,
        model_dir = %config.model_dir.display(),
        similarity_threshold = config.similarity_threshold,
        "configuration loaded"
    );

    let store = store::ImageStore::open(&config.faces_dir).await?;
    tracing::info!(faces_dir = %store.dir().display(), "image store ready");

    let encoder = OnnxFaceEncoder::load(&config.model_dir, config.detection_threshold)
        .with_context(|| format!("failed to load models from {}", config.model_dir.display()))?;
    let engine = engine::spawn_engine(Box::new(encoder), config.engine_queue)?;

    let matcher = Arc::new(CosineMatcher::new(config.similarity_threshold));
    let state = http::AppState::new(store, engine, matcher, config.similarity_threshold);
    let app = http::router(state, config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "facegated ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    tracing::info!("facegated shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl-C; running until killed");
        std::future::pending::<()>().await;
    }
}
