use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use clickstats::analytics::RollupService;
use clickstats::api::create_api_router;
use clickstats::config::Config;
use clickstats::cursor::init_cursor_hmac_key;
use clickstats::storage;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration (also reads .env)
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clickstats=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Loaded configuration");

    if config.pagination.cursor_hmac_secret.is_none() {
        tracing::warn!("CURSOR_HMAC_SECRET not set, pagination cursors will not survive restarts");
    }
    init_cursor_hmac_key(config.pagination.cursor_hmac_secret.as_deref());

    let storage = storage::connect(&config.database).await?;

    info!("Initializing database...");
    storage.init().await?;
    info!("Database initialized successfully");

    let rollup = if config.rollup.enabled {
        let service = Arc::new(RollupService::new(
            Arc::clone(&storage),
            &config.rollup,
            &config.analytics,
        ));
        service.start(config.rollup.interval_secs);
        info!(
            "📊 Rollups enabled (every {}s, {}-day daily window)",
            config.rollup.interval_secs, config.rollup.daily_window_days
        );
        Some(service)
    } else {
        info!("Rollups disabled");
        None
    };

    let api_router = create_api_router(
        Arc::clone(&storage),
        config.analytics.clone(),
        &config.cache,
    )?;

    let api_addr = format!("{}:{}", config.api_server.host, config.api_server.port);
    let listener = tokio::net::TcpListener::bind(&api_addr).await?;
    info!("🚀 API server listening on http://{}", api_addr);

    axum::serve(
        listener,
        api_router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    if let Some(service) = rollup {
        service.shutdown();
    }
    info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
