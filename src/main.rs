use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{fmt, EnvFilter};

use adstudio::config::StudioConfig;
use adstudio::credentials::{CredentialContext, DefaultSource, FileCredentialStore};
use adstudio::gemini::GeminiClient;
use adstudio::jobs::TokioSleeper;
use adstudio::routes::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = StudioConfig::from_env();
    let credentials = CredentialContext::new(DefaultSource::Env(config.api_key_var.clone()))
        .with_store(Arc::new(FileCredentialStore::new(&config.credential_file)))
        .context("loading saved API key")?;
    let status = credentials.status();
    tracing::info!(
        manual = status.manual,
        environment = status.environment,
        "🔑 Credentials ready ({} is read on every call)",
        config.api_key_var
    );
    tracing::info!(
        interval_secs = config.poll.interval.as_secs(),
        max_attempts = config.poll.max_attempts,
        "⏱️ Video polling gives up after {:?}",
        config.poll.ceiling()
    );

    let state = AppState::new(credentials, GeminiClient::new(&config), Arc::new(TokioSleeper), config.poll);
    let app = router(state).layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "Starting server");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
