use std::sync::Arc;

use actix_governor::{Governor, GovernorConfigBuilder};
use actix_web::{middleware::Logger, web, App, HttpServer};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sproutpay::settlement::{ClearNodeClient, ClientConfig, SettlementNetwork};
use sproutpay_api::{
    config::SproutConfig, db::Database, metrics::register_metrics, monitor::ChannelMonitor,
    routes, state::AppState,
};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = SproutConfig::from_env().expect("Failed to load configuration");
    let port = config.port;
    let allowed_origins = config.allowed_origins.clone();
    let rate_limit_rpm = config.rate_limit_rpm;
    let monitor_interval = config.monitor_interval;

    tracing::info!("Starting sproutpay-api on port {}", port);
    tracing::info!("Service address: {:#x}", config.signer.address());
    tracing::info!("Settlement network: {}", config.ws_url);
    tracing::info!(
        "Virtual channel fallback: {}",
        if config.virtual_channel_fallback {
            "enabled"
        } else {
            "disabled"
        }
    );

    // Initialize database
    let db = Database::new(&config.db_path).expect("Failed to initialize database");
    tracing::info!("Database initialized at: {}", config.db_path);

    // Register Prometheus metrics
    register_metrics();

    // Settlement network client and channel monitor share one shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (client, client_task) = ClearNodeClient::spawn(
        ClientConfig {
            url: config.ws_url.clone(),
            app_name: config.app_name.clone(),
            signer: config.signer.clone(),
        },
        shutdown_rx.clone(),
    );
    let network: Arc<dyn SettlementNetwork> = client;

    // Create shared state
    let state = AppState::new(config, db, network);
    let monitor_task =
        ChannelMonitor::new(state.machine.clone(), monitor_interval).spawn(shutdown_rx);
    let state_data = web::Data::new(state);

    // Configure rate limiter
    let governor_conf = GovernorConfigBuilder::default()
        .requests_per_minute(rate_limit_rpm as u64)
        .finish()
        .expect("Failed to create rate limiter config");

    // Start HTTP server
    let result = HttpServer::new(move || {
        let cors = sproutpay_api::cors::build_cors(&allowed_origins);

        App::new()
            .app_data(state_data.clone())
            .app_data(routes::json_config())
            .wrap(Logger::default())
            .wrap(cors)
            .wrap(Governor::new(&governor_conf))
            .configure(routes::configure)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await;

    tracing::info!("HTTP server stopped, shutting down background tasks");
    let _ = shutdown_tx.send(true);
    if let Err(e) = monitor_task.await {
        tracing::warn!("Channel monitor task ended abnormally: {}", e);
    }
    if let Err(e) = client_task.await {
        tracing::warn!("Settlement client task ended abnormally: {}", e);
    }

    result
}
