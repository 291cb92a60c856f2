//! mailblast server - HTTP front end for tracked bulk-mail campaigns.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mailblast::campaign::CampaignRunner;
use mailblast::web::{self, AppState};
use mailblast::{Config, RecipientStore, SmtpMailer};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("server_starting");

    // Load configuration from environment
    let config = Config::from_env();
    info!(
        port = config.port,
        smtp_host = %config.smtp_host,
        smtp_auth_configured = config.smtp_user.is_some(),
        public_base_url = ?config.public_base_url,
        sqlite_path = %config.sqlite_path,
        send_delay_ms = config.send_delay_ms,
        "config_loaded"
    );

    // Open the recipient store
    let store = RecipientStore::connect(&config.sqlite_path)
        .await
        .context("Failed to open recipient store")?;

    // Build the SMTP transport and campaign runner
    let mailer = SmtpMailer::from_config(&config).context("Failed to build SMTP transport")?;
    let runner = Arc::new(CampaignRunner::new(
        store.clone(),
        Arc::new(mailer),
        config.public_base_url.clone(),
        Duration::from_millis(config.send_delay_ms),
    ));

    let port = config.port;
    let state = AppState {
        config: Arc::new(config),
        store,
        runner,
    };

    let app = web::router(state);

    // Bind to address
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "server_listening");

    // Run server with graceful shutdown; connect info is needed for
    // the tracking endpoint's socket-address fallback
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    info!("server_shutdown_complete");

    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("server_shutting_down");
}
