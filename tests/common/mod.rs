// SPDX-License-Identifier: MIT

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use stridesync::config::Config;
use stridesync::db::Store;
use stridesync::routes::create_router;
use stridesync::AppState;

/// Check if a test database is configured via environment variable.
#[allow(dead_code)]
pub fn database_available() -> bool {
    std::env::var("TEST_DATABASE_URL").is_ok()
}

/// Skip test with message if no test database is configured.
#[macro_export]
macro_rules! require_database {
    () => {
        if !crate::common::database_available() {
            eprintln!("⚠️  Skipping: TEST_DATABASE_URL not set");
            return;
        }
    };
}

/// Connect to the test database and apply migrations.
#[allow(dead_code)]
pub async fn test_store() -> Store {
    let url = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set");
    let store = Store::connect(&url).await.expect("Failed to connect to test database");
    store.run_migrations().await.expect("Failed to run migrations");
    store
}

/// Create a mock store (offline).
#[allow(dead_code)]
pub fn test_store_offline() -> Store {
    Store::new_mock()
}

/// Create a test app with offline mock dependencies.
/// Returns the router and the shared state.
#[allow(dead_code)]
pub fn create_test_app() -> (axum::Router, Arc<AppState>) {
    let config = Config::default();
    let store = test_store_offline();

    let state = Arc::new(AppState { config, store });
    (create_router(state.clone()), state)
}

/// Create a test app over a real database store.
#[allow(dead_code)]
pub fn create_test_app_with_store(store: Store) -> (axum::Router, Arc<AppState>) {
    let state = Arc::new(AppState {
        config: Config::default(),
        store,
    });
    (create_router(state.clone()), state)
}

/// Generate an id unique across tests in one run, so database-backed tests
/// never step on each other's rows.
#[allow(dead_code)]
pub fn unique_id() -> i64 {
    static COUNTER: AtomicI64 = AtomicI64::new(0);
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock before epoch")
        .as_nanos() as i64;
    (nanos & 0x7FFF_FFFF_FFFF) + COUNTER.fetch_add(1, Ordering::Relaxed)
}
