use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use atmx_settlement_core::aggregator::{GridCellIndexer, IemAsosClient, StationCatalogue};
use atmx_settlement_core::api::{self, AppState};
use atmx_settlement_core::config::AppConfig;
use atmx_settlement_core::cron::SettlementCron;
use atmx_settlement_core::driver::SettlementDriver;
use atmx_settlement_core::market_client::MarketEngineClient;
use atmx_settlement_core::middleware::request_logging;
use atmx_settlement_core::pricing::PricingEngine;
use atmx_settlement_core::store::SqliteRecordStore;
use atmx_settlement_core::webhook::dispatcher::WebhookDispatcher;
use atmx_settlement_core::webhook::store::WebhookStore;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = AppConfig::from_env();
    info!(port = config.port, database = %config.database_path, "starting atmx settlement core");

    let http_client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .context("failed to build HTTP client")?;

    let store = Arc::new(SqliteRecordStore::open(&config.database_path).context("failed to open record store")?);

    let observation_source = Arc::new(IemAsosClient::new(
        http_client.clone(),
        config.asos_base_url.clone(),
        StationCatalogue::sample(),
        Box::new(GridCellIndexer::default()),
        std::time::Duration::from_secs(30),
    ));

    let market_client = Arc::new(MarketEngineClient::new(http_client.clone(), config.market_engine_url.clone()));

    let webhooks = Arc::new(WebhookStore::new());
    let dispatcher = Arc::new(WebhookDispatcher::new(
        http_client.clone(),
        webhooks.clone(),
        config.webhook_timeout,
        config.webhook_max_retries,
    ));

    let driver = Arc::new(SettlementDriver::new(
        store.clone() as Arc<dyn atmx_settlement_core::store::RecordStore>,
        observation_source,
        config.clone(),
    ));

    let mut cron = SettlementCron::new(
        store.clone() as Arc<dyn atmx_settlement_core::store::RecordStore>,
        driver.clone(),
        dispatcher,
        config.cron_interval,
    );
    cron.start();
    info!(interval_secs = config.cron_interval.as_secs(), "settlement cron started");

    let pricing = Arc::new(PricingEngine::from_config(&config));

    let state = AppState {
        store: store as Arc<dyn atmx_settlement_core::store::RecordStore>,
        driver,
        webhooks,
        pricing,
        market: market_client,
    };

    let app = api::router(state)
        .layer(CorsLayer::permissive())
        .layer(axum::middleware::from_fn(request_logging));

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await.context("failed to bind listener")?;
    info!(%addr, "HTTP server listening");

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    server.await.context("server error")?;

    cron.stop();
    cron.join().await;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "atmx_settlement_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
