// SPDX-License-Identifier: MIT

//! Reconciliation engine: derives the authoritative per-user daily step
//! total from raw per-account readings.
//!
//! The merge itself is a pure function over in-memory readings; the engine
//! wraps it with the store round-trip and the conflict-safe upsert. Running
//! it any number of times over the same readings converges to the same
//! total.

use crate::db::Store;
use crate::error::AppError;
use crate::models::{AccountReading, Granularity};
use chrono::{NaiveDate, NaiveTime};
use std::collections::BTreeMap;

/// Outcome of merging one (user, date)'s readings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTotal {
    pub steps: i32,
    /// The account whose reading won conflict resolution.
    pub primary_account_id: Option<i64>,
}

/// Merge readings for one user/date into a single daily total.
///
/// If any intraday rows exist they drive the result: readings are grouped
/// by time slot, conflicts are resolved only where providers actually
/// overlap in time, and the resolved slot values are summed. Otherwise the
/// daily aggregates compete directly.
///
/// Conflict policy, first match wins:
/// 1. the user's preferred provider, if present among the candidates;
/// 2. the most recently synced candidate;
/// 3. the first candidate in input order (deterministic, not meaningful).
pub fn resolve_daily_total(
    readings: &[AccountReading],
    preferred_provider: Option<&str>,
) -> Option<ResolvedTotal> {
    if readings.is_empty() {
        return None;
    }

    let intraday: Vec<&AccountReading> = readings
        .iter()
        .filter(|r| r.granularity == Granularity::Intraday)
        .collect();

    if intraday.is_empty() {
        let daily: Vec<&AccountReading> = readings
            .iter()
            .filter(|r| r.granularity == Granularity::Daily)
            .collect();
        let winner = resolve_conflict(&daily, preferred_provider)?;
        return Some(ResolvedTotal {
            steps: winner.steps,
            primary_account_id: Some(winner.account_id),
        });
    }

    // Group intraday samples by time slot; a missing time counts as midnight.
    let mut slots: BTreeMap<NaiveTime, Vec<&AccountReading>> = BTreeMap::new();
    for reading in intraday {
        slots
            .entry(reading.time.unwrap_or(NaiveTime::MIN))
            .or_default()
            .push(reading);
    }

    let mut total: i64 = 0;
    let mut primary_account_id = None;
    for candidates in slots.values() {
        let winner = resolve_conflict(candidates, preferred_provider)?;
        total += i64::from(winner.steps);
        primary_account_id = Some(winner.account_id);
    }

    Some(ResolvedTotal {
        steps: total.min(i64::from(i32::MAX)) as i32,
        primary_account_id,
    })
}

/// Pick one reading out of a conflicting set.
fn resolve_conflict<'a>(
    candidates: &[&'a AccountReading],
    preferred_provider: Option<&str>,
) -> Option<&'a AccountReading> {
    let (first, rest) = candidates.split_first()?;
    if rest.is_empty() {
        return Some(first);
    }

    if let Some(preferred) = preferred_provider {
        if let Some(reading) = candidates.iter().find(|r| r.provider == preferred) {
            return Some(reading);
        }
    }

    // Most recent sync wins; on a tie the earliest candidate in input order
    // is kept.
    Some(candidates.iter().fold(*first, |best, r| {
        if r.synced_at > best.synced_at {
            *r
        } else {
            best
        }
    }))
}

/// Recomputes and upserts daily totals from current raw readings.
#[derive(Clone)]
pub struct ReconciliationEngine {
    store: Store,
}

impl ReconciliationEngine {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Recompute the daily total for one (user, date) and upsert it.
    ///
    /// Called after any raw-reading write for that key. A concurrent
    /// invocation for the same key is safe: the store upsert resolves the
    /// unique-constraint race into an update.
    pub async fn reconcile(&self, user_id: i64, date: NaiveDate) -> Result<(), AppError> {
        let readings = self.store.readings_for_user_date(user_id, date).await?;
        if readings.is_empty() {
            tracing::debug!(user_id, %date, "No readings to reconcile");
            return Ok(());
        }

        let preferred = self.store.preferred_provider(user_id).await?;
        let Some(resolved) = resolve_daily_total(&readings, preferred.as_deref()) else {
            return Ok(());
        };

        self.store
            .upsert_daily_total(user_id, date, resolved.steps, resolved.primary_account_id)
            .await?;

        tracing::debug!(
            user_id,
            %date,
            steps = resolved.steps,
            primary_account_id = resolved.primary_account_id,
            "Daily total reconciled"
        );
        Ok(())
    }

    /// Reconcile a batch of dates for one user.
    pub async fn reconcile_dates(
        &self,
        user_id: i64,
        dates: &[NaiveDate],
    ) -> Result<(), AppError> {
        for date in dates {
            self.reconcile(user_id, *date).await?;
        }
        Ok(())
    }

    /// Reconcile every user that has readings on the given date.
    /// Returns the number of users touched.
    pub async fn reconcile_all_users_for_date(&self, date: NaiveDate) -> Result<usize, AppError> {
        let user_ids = self.store.user_ids_with_readings_on(date).await?;
        for user_id in &user_ids {
            self.reconcile(*user_id, date).await?;
        }
        Ok(user_ids.len())
    }
}
