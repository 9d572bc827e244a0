//! Step reading models: raw per-account readings and reconciled daily totals.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Granularity of a raw reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum Granularity {
    /// One aggregate count for the whole calendar day (`time` is NULL).
    Daily,
    /// A sample tagged with a time-of-day.
    Intraday,
}

/// A step count as reported by one provider account.
///
/// At most one row exists per (account, date, time); the daily aggregate
/// uses a NULL time.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RawReading {
    pub id: i64,
    pub account_id: i64,
    pub date: NaiveDate,
    pub time: Option<NaiveTime>,
    pub steps: i32,
    pub granularity: Granularity,
    pub synced_at: DateTime<Utc>,
}

/// A raw reading joined with its account's provider name, as consumed by
/// the reconciliation merge.
#[derive(Debug, Clone, FromRow)]
pub struct AccountReading {
    pub account_id: i64,
    pub provider: String,
    pub time: Option<NaiveTime>,
    pub granularity: Granularity,
    pub steps: i32,
    pub synced_at: DateTime<Utc>,
}

/// The authoritative per-user daily total, recomputable from raw readings.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DailyTotal {
    pub id: i64,
    pub user_id: i64,
    pub date: NaiveDate,
    pub steps: i32,
    /// The account whose reading won conflict resolution, if any survive.
    pub primary_account_id: Option<i64>,
}
