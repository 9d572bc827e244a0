// SPDX-License-Identifier: MIT

//! Stridesync API Server
//!
//! Ingests step-count activity from the Fitbit Web API via webhooks and an
//! hourly fallback poll, and reconciles per-provider readings into one
//! authoritative daily total per user.

use std::sync::Arc;
use std::time::Duration;

use stridesync::{
    config::Config,
    db::Store,
    services::{
        FitbitClient, NotificationProcessor, QueueWorker, ReconciliationEngine, StepsPoller,
        TokenService,
    },
    AppState,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often the queue worker drains a batch.
const WORKER_INTERVAL: Duration = Duration::from_secs(60);

/// How often the fallback poller re-pulls "today" for every account.
const POLL_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging
    init_logging();

    // Load configuration from environment
    let config = Config::from_env().expect("Failed to load configuration");
    tracing::info!(port = config.port, "Starting Stridesync API");

    // Connect to PostgreSQL and apply migrations
    let store = Store::connect(&config.database_url)
        .await
        .expect("Failed to connect to PostgreSQL");
    store
        .run_migrations()
        .await
        .expect("Failed to run migrations");
    tracing::info!("Migrations applied");

    // Initialize shared token cache and refresh locks
    // These are shared across all TokenService clones within this process.
    let token_cache = Arc::new(dashmap::DashMap::new());
    let refresh_locks = Arc::new(dashmap::DashMap::new());

    let client = FitbitClient::new(
        config.fitbit_client_id.clone(),
        config.fitbit_client_secret.clone(),
    );
    let tokens = TokenService::new(
        client.clone(),
        store.clone(),
        token_cache,
        refresh_locks,
    );
    let engine = ReconciliationEngine::new(store.clone());

    // Queue worker loop: drains a bounded batch every interval.
    let processor = NotificationProcessor::new(
        store.clone(),
        client.clone(),
        tokens.clone(),
        engine.clone(),
    );
    let worker = QueueWorker::new(store.clone(), processor);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(WORKER_INTERVAL);
        loop {
            ticker.tick().await;
            worker.run_batch().await;
        }
    });
    tracing::info!(interval_secs = WORKER_INTERVAL.as_secs(), "Queue worker started");

    // Hourly fallback poller: provider notifications are at-most-once.
    let poller = StepsPoller::new(store.clone(), client, tokens, engine);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        loop {
            ticker.tick().await;
            poller.poll_all().await;
        }
    });
    tracing::info!(interval_secs = POLL_INTERVAL.as_secs(), "Scheduled poller started");

    // Build shared state
    let state = Arc::new(AppState {
        config: config.clone(),
        store,
    });

    // Build router
    let app = stridesync::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging.
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("stridesync=debug".parse().unwrap())
                .add_directive("info".parse().unwrap()),
        )
        .with(format)
        .init();
}
