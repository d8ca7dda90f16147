//! Registration Server - Entry point.

use anyhow::{Context, Result};
use discord_webhook::DiscordWebhookClient;
use registration_server::{
    api::{create_router, ApiOptions, AppState},
    config::Config,
    notifier::{Notifier, RetryPolicy},
    service::RegistrationService,
    store::SqliteStore,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How often idle rate limiter entries are dropped.
const LIMITER_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    // Load configuration
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log.level));
    let json = config.log.format.eq_ignore_ascii_case("json");

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();
}

async fn run(config: Config) -> Result<()> {
    info!(environment = %config.server.environment, "Starting Registration Server");

    // Initialize storage
    let store = SqliteStore::open(&config.database.url, config.database.max_connections)
        .await
        .with_context(|| format!("Failed to open database {}", config.database.url))?;

    // Initialize webhook client
    let client = match config.webhook.url() {
        Some(url) => Some(
            DiscordWebhookClient::new(url, config.webhook.timeout)
                .context("Invalid webhook URL")?
                .with_wait(config.webhook.wait_for_message),
        ),
        None => {
            warn!("No Discord webhook URL configured, every notification will fail");
            None
        }
    };

    let policy = RetryPolicy {
        max_attempts: config.webhook.max_attempts,
        backoff_unit: config.webhook.backoff_unit,
    };
    let notifier = Notifier::new(client, policy, Arc::new(store.clone()));
    let service = RegistrationService::new(store.clone(), notifier, config.admin.token.as_ref());

    let options = ApiOptions::from_config(&config);
    let rate_limit = options.rate_limit.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(LIMITER_PRUNE_INTERVAL);
        loop {
            interval.tick().await;
            rate_limit.prune();
        }
    });

    if let Some(dir) = &options.static_dir {
        info!(static_dir = %dir.display(), "Serving frontend");
    }

    let app = create_router(AppState::new(service), options);

    // Bind to address
    let addr = config.server.socket_addr()?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Listening on {}", addr);
    info!("Health check: http://{}/api/health", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    store.close().await;
    info!("Database connection closed");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutting down gracefully...");
}
