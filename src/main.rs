use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use imagevet::config::{Args, Config};
use imagevet::recovery;
use imagevet::routes::create_app;
use imagevet::state::AppState;
use imagevet::supervisor;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let mut config = Config::from_env()?;
    config.apply_cli_overrides(&args);

    let state = AppState::new(config)?;

    recovery::run(&state.tracker, &state.ingest).await;

    supervisor::spawn(state.clone());

    let app = create_app(state.clone());

    let listener = tokio::net::TcpListener::bind(state.config.bind_addr())
        .await
        .map_err(|err| anyhow::anyhow!("cannot bind {}: {err}", state.config.bind_addr()))?;

    tracing::info!(addr = %state.config.bind_addr(), "imagevet listening");

    let ingest_for_shutdown = state.ingest.clone();
    axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>())
        .with_graceful_shutdown(shutdown(ingest_for_shutdown))
        .await?;

    Ok(())
}

async fn shutdown(ingest: Arc<imagevet::ingest::IngestPipeline>) {
    supervisor::wait_for_shutdown_signal().await;
    ingest.begin_shutdown();
}
