// SPDX-License-Identifier: MIT

//! Gap-driven historical backfill.
//!
//! Missing dates are re-derived from stored readings on every run, so a
//! partially completed backfill is always resumable — there is no progress
//! bookkeeping to corrupt.

use crate::db::Store;
use crate::error::AppError;
use crate::models::{Granularity, LinkedAccount, PROVIDER_FITBIT};
use crate::services::fitbit::FitbitClient;
use crate::services::reconcile::ReconciliationEngine;
use crate::services::tokens::TokenService;
use chrono::{Duration, NaiveDate, Utc};
use std::collections::HashSet;

/// Provider's practical limit for one dated-range fetch.
const MAX_CHUNK_DAYS: usize = 30;

/// Pause between chunk fetches to respect rate limits.
const INTER_CHUNK_DELAY: std::time::Duration = std::time::Duration::from_secs(1);

/// Days covered by the on-link backfill.
const RECENT_BACKFILL_DAYS: i64 = 30;

#[derive(Clone)]
pub struct BackfillService {
    store: Store,
    client: FitbitClient,
    tokens: TokenService,
    engine: ReconciliationEngine,
}

impl BackfillService {
    pub fn new(
        store: Store,
        client: FitbitClient,
        tokens: TokenService,
        engine: ReconciliationEngine,
    ) -> Self {
        Self {
            store,
            client,
            tokens,
            engine,
        }
    }

    /// Fill missing daily readings for a user within a date range, then
    /// reconcile every date that was actually fetched.
    ///
    /// A chunk failure is logged and skipped; the remaining chunks (and the
    /// reconciliation of the dates that did succeed) still run.
    pub async fn backfill(
        &self,
        user_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<(), AppError> {
        let Some(account) = self.store.account_for_user(user_id, PROVIDER_FITBIT).await? else {
            tracing::warn!(user_id, "No Fitbit account linked, skipping backfill");
            return Ok(());
        };

        tracing::info!(user_id, %start, %end, "Starting backfill");

        let today = Utc::now().date_naive();
        let existing: HashSet<NaiveDate> = self
            .store
            .daily_reading_dates(account.id, start, end)
            .await?
            .into_iter()
            .collect();

        let missing = missing_dates(start, end, today, &existing);
        if missing.is_empty() {
            tracing::info!(user_id, "No missing dates, backfill not needed");
            return Ok(());
        }

        tracing::info!(user_id, missing = missing.len(), "Found missing dates");

        let chunks = chunk_contiguous(&missing, MAX_CHUNK_DAYS);
        let mut fetched: Vec<NaiveDate> = Vec::new();

        for (index, chunk) in chunks.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(INTER_CHUNK_DELAY).await;
            }

            match self.fetch_and_store_chunk(&account, chunk).await {
                Ok(dates) => fetched.extend(dates),
                Err(e) => {
                    tracing::error!(
                        user_id,
                        error = %e,
                        chunk_start = %chunk[0],
                        "Chunk fetch failed, continuing with remaining chunks"
                    );
                }
            }
        }

        if !fetched.is_empty() {
            fetched.sort();
            fetched.dedup();
            tracing::info!(user_id, dates = fetched.len(), "Reconciling fetched dates");
            if let Err(e) = self.engine.reconcile_dates(user_id, &fetched).await {
                // The readings are stored; the next reconcile converges.
                tracing::error!(user_id, error = %e, "Reconciliation after backfill failed");
            }
        }

        tracing::info!(user_id, "Completed backfill");
        Ok(())
    }

    /// Fill the trailing 30 days, for account-link completion flows.
    pub async fn backfill_recent(&self, user_id: i64) -> Result<(), AppError> {
        let end = Utc::now().date_naive();
        let start = end - Duration::days(RECENT_BACKFILL_DAYS);
        self.backfill(user_id, start, end).await
    }

    /// True when the user's account is missing daily readings in the range.
    ///
    /// Used by membership-join flows to decide whether to trigger a fill;
    /// without a linked account there is nothing to fill.
    pub async fn needs_backfill(
        &self,
        user_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<bool, AppError> {
        let Some(account) = self.store.account_for_user(user_id, PROVIDER_FITBIT).await? else {
            return Ok(false);
        };

        let today = Utc::now().date_naive();
        let existing: HashSet<NaiveDate> = self
            .store
            .daily_reading_dates(account.id, start, end)
            .await?
            .into_iter()
            .collect();

        Ok(!missing_dates(start, end, today, &existing).is_empty())
    }

    /// Fetch one contiguous chunk and store its readings.
    /// Returns the dates the provider actually reported.
    async fn fetch_and_store_chunk(
        &self,
        account: &LinkedAccount,
        chunk: &[NaiveDate],
    ) -> Result<Vec<NaiveDate>, AppError> {
        let (Some(&start), Some(&end)) = (chunk.first(), chunk.last()) else {
            return Ok(Vec::new());
        };

        let Some(access_token) = self.tokens.valid_access_token(account).await else {
            return Err(AppError::FitbitApi(AppError::FITBIT_TOKEN_ERROR.to_string()));
        };

        tracing::debug!(account_id = account.id, %start, %end, "Fetching chunk");

        let days = self.client.fetch_steps_range(&access_token, start, end).await?;

        let now = Utc::now();
        let mut dates = Vec::with_capacity(days.len());
        for day in days {
            self.store
                .upsert_raw_reading(account.id, day.date, None, Granularity::Daily, day.steps, now)
                .await?;
            dates.push(day.date);
        }

        tracing::debug!(account_id = account.id, stored = dates.len(), "Stored chunk");
        Ok(dates)
    }
}

/// Dates in [start, end] (capped at today) with no existing daily reading.
fn missing_dates(
    start: NaiveDate,
    end: NaiveDate,
    today: NaiveDate,
    existing: &HashSet<NaiveDate>,
) -> Vec<NaiveDate> {
    let end = end.min(today);
    let mut missing = Vec::new();
    let mut current = start;
    while current <= end {
        if !existing.contains(&current) {
            missing.push(current);
        }
        current = match current.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }
    missing
}

/// Split dates into runs of consecutive days, each at most `max_len` long.
fn chunk_contiguous(dates: &[NaiveDate], max_len: usize) -> Vec<Vec<NaiveDate>> {
    let mut chunks = Vec::new();
    let mut current: Vec<NaiveDate> = Vec::new();

    for &date in dates {
        let breaks_run = match current.last() {
            Some(&last) => last.succ_opt() != Some(date),
            None => false,
        };
        if !current.is_empty() && (breaks_run || current.len() >= max_len) {
            chunks.push(std::mem::take(&mut current));
        }
        current.push(date);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
