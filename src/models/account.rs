//! Linked provider account model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Provider name for Fitbit accounts.
pub const PROVIDER_FITBIT: &str = "fitbit";

/// An external fitness-tracker account linked to a platform user.
///
/// Tokens are nulled, not deleted, on revocation or deletion notices so
/// historical readings survive.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LinkedAccount {
    pub id: i64,
    pub user_id: i64,
    pub provider: String,
    pub external_user_id: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}
