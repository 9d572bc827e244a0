//! Application configuration loaded from environment variables.

use std::env;

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Environment Variables (non-sensitive) ---
    /// Fitbit OAuth client ID (public)
    pub fitbit_client_id: String,
    /// PostgreSQL connection string
    pub database_url: String,
    /// Server port
    pub port: u16,

    // --- Secrets ---
    /// Fitbit OAuth client secret (also the webhook signing key)
    pub fitbit_client_secret: String,
    /// Webhook endpoint verification code
    pub webhook_verify_code: String,
    /// Subscriber id sent on subscription creation (optional)
    pub fitbit_subscriber_id: Option<String>,
}

impl Default for Config {
    /// Default config for testing only.
    fn default() -> Self {
        Self {
            fitbit_client_id: "test_client_id".to_string(),
            database_url: "postgres://localhost/stridesync_test".to_string(),
            port: 8080,
            fitbit_client_secret: "test_secret".to_string(),
            webhook_verify_code: "test_verify_code".to_string(),
            fitbit_subscriber_id: Some("1".to_string()),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// A `.env` file is honored for local development.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        Ok(Self {
            fitbit_client_id: env::var("FITBIT_CLIENT_ID")
                .map_err(|_| ConfigError::Missing("FITBIT_CLIENT_ID"))?,
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            fitbit_client_secret: env::var("FITBIT_CLIENT_SECRET")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("FITBIT_CLIENT_SECRET"))?,
            webhook_verify_code: env::var("FITBIT_VERIFY_CODE")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("FITBIT_VERIFY_CODE"))?,
            fitbit_subscriber_id: env::var("FITBIT_SUBSCRIBER_ID")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
}
