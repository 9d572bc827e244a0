//! Fitbit webhook subscription model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A webhook subscription registered with the provider for one account.
///
/// Deactivated (not deleted) when the provider's delete endpoint cannot be
/// reached; deleted outright on a confirmed remote delete.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub id: i64,
    pub account_id: i64,
    /// Provider-side subscription id, globally unique.
    pub subscription_id: String,
    pub collection_type: String,
    pub subscriber_id: Option<String>,
    pub is_active: bool,
}
