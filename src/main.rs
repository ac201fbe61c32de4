use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use newshub_ingest::config::Config;
use newshub_ingest::db::Database;
use newshub_ingest::extract::ItemExtractor;
use newshub_ingest::fetcher::FeedFetcher;
use newshub_ingest::ingest::Ingester;
use newshub_ingest::routes::{self, AppState};
use newshub_ingest::scheduler::Scheduler;
use newshub_ingest::tagger::TopicTagger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "newshub_ingest=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path =
        std::env::var("NEWSHUB_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let mut config = Config::load(&config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path))?;
    config.apply_env_overrides()?;
    info!(
        "Loaded {} publications and {} topics from {}",
        config.publications.len(),
        config.topics.len(),
        config_path
    );

    // Initialize database
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite:newshub.db?mode=rwc".to_string());
    let db = Database::new(&database_url).await?;
    db.initialize().await?;
    db.sync_publications(&config.publications).await?;
    info!("Database initialized");

    let db = Arc::new(db);

    // Ingestion pipeline
    let fetcher = FeedFetcher::new(&config.fetch_config())?;
    let tagger = TopicTagger::new(config.topics.clone())?;
    let ingester = Arc::new(Ingester::new(
        db.clone(),
        fetcher,
        ItemExtractor::new(tagger),
        config.ingest_config(),
    ));

    let scheduler = Arc::new(Scheduler::from_config(ingester, &config));
    scheduler.start().await;

    let state = Arc::new(AppState {
        db: db.clone(),
        scheduler: scheduler.clone(),
    });
    let app = routes::router(state);

    // Start server
    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Admin server listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.stop().await;
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
