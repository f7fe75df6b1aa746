use std::env;

use fieldwise::{app, build_state_from_env};
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Structured logging; RUST_LOG overrides the default `info` level.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    // Missing credentials or endpoints abort here, before binding.
    let state = build_state_from_env().await?;
    match state.default_model_id.as_deref() {
        Some(model_id) => tracing::info!(
            model_id,
            "single-model mode: /api/azuredocument/{{base64,bytes,uri,azure-blob}} and /{{modelId}} variants"
        ),
        None => tracing::info!(
            "multi-model mode: /api/azuredocument/{{base64,bytes,uri,azure-blob}}/{{modelId}}"
        ),
    }
    tracing::info!(max_request_bytes = state.max_request_bytes, "request body cap");
    let app = app(state);

    let port: u16 = env::var("PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);
    let addr: std::net::SocketAddr = ([0, 0, 0, 0], port).into();

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "fieldwise listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

// In-flight analyses finish before the process exits.
async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    tracing::info!("shutdown signal received, draining connections");
}
