//! Datastream HTTP/JSON Gateway binary.

use clap::Parser;
use datastream_core::{error_conduit, PollSettings};
use datastream_gateway::{create_router, open_backend, AppState, Args, GatewayConfig};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("datastream_gateway=info,datastream_storage=info")),
        )
        .init();

    // Parse command line args
    let args = Args::parse();
    let config = GatewayConfig::try_from(&args)?;

    info!(
        listen = %config.listen_addr,
        backend = ?config.backend.kind(),
        sync_interval_secs = config.sync_interval.as_secs(),
        "Starting datastream gateway"
    );

    // Background errors from every subscription end up in the log
    let (conduit, mut errors) = error_conduit(config.error_capacity);
    tokio::spawn(async move {
        while let Some(error) = errors.recv().await {
            tracing::warn!(error = %error, "background error");
        }
    });

    let poll = PollSettings::new(config.sync_interval)
        .with_initial_snapshot(config.initial_snapshot)
        .with_error_conduit(conduit);
    let backend = open_backend(&config.backend, poll).await?;

    // Create application state and router
    let app = create_router(AppState::new(backend));

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!("Gateway listening on {}", config.listen_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
