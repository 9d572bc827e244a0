// SPDX-License-Identifier: MIT

//! Scheduled fallback poller.
//!
//! Provider notifications are at-most-once and occasionally dropped, so an
//! hourly pass re-pulls "today" for every linked account. Failures are
//! isolated per account and counted; a run never aborts early.

use crate::db::Store;
use crate::error::AppError;
use crate::models::{Granularity, LinkedAccount, PROVIDER_FITBIT};
use crate::services::fitbit::FitbitClient;
use crate::services::reconcile::ReconciliationEngine;
use crate::services::tokens::TokenService;
use chrono::{NaiveDate, Utc};
use futures_util::{stream, StreamExt};

/// Accounts synced concurrently per run.
const MAX_CONCURRENT_SYNCS: usize = 4;

/// Counters for one poller run.
#[derive(Debug, Default, Clone, Copy)]
pub struct PollStats {
    pub accounts: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct StepsPoller {
    store: Store,
    client: FitbitClient,
    tokens: TokenService,
    engine: ReconciliationEngine,
}

impl StepsPoller {
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

    /// Re-pull today's daily total for every linked account.
    pub async fn poll_all(&self) -> PollStats {
        let accounts = match self.store.accounts_for_provider(PROVIDER_FITBIT).await {
            Ok(accounts) => accounts,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list accounts for polling");
                return PollStats::default();
            }
        };

        let today = Utc::now().date_naive();
        let total = accounts.len();
        tracing::info!(accounts = total, "Starting scheduled steps sync");

        let results: Vec<bool> = stream::iter(accounts)
            .map(|account| async move { self.sync_account(&account, today).await.is_ok() })
            .buffered(MAX_CONCURRENT_SYNCS)
            .collect()
            .await;

        let succeeded = results.iter().filter(|ok| **ok).count();
        let stats = PollStats {
            accounts: total,
            succeeded,
            failed: total - succeeded,
        };

        tracing::info!(
            accounts = stats.accounts,
            succeeded = stats.succeeded,
            failed = stats.failed,
            "Scheduled steps sync completed"
        );
        stats
    }

    /// Sync one account's reading for the given date and reconcile it.
    pub async fn sync_account(
        &self,
        account: &LinkedAccount,
        date: NaiveDate,
    ) -> Result<(), AppError> {
        let Some(access_token) = self.tokens.valid_access_token(account).await else {
            tracing::warn!(account_id = account.id, "No valid token, skipping account");
            return Err(AppError::FitbitApi(AppError::FITBIT_TOKEN_ERROR.to_string()));
        };

        let days = self.client.fetch_steps_range(&access_token, date, date).await?;
        let Some(day) = days.first() else {
            tracing::warn!(account_id = account.id, %date, "No steps data returned");
            return Err(AppError::NotFound(format!("No steps data for {}", date)));
        };

        self.store
            .upsert_raw_reading(
                account.id,
                day.date,
                None,
                Granularity::Daily,
                day.steps,
                Utc::now(),
            )
            .await?;

        self.engine.reconcile(account.user_id, day.date).await?;

        tracing::info!(
            account_id = account.id,
            date = %day.date,
            steps = day.steps,
            "Synced today's steps"
        );
        Ok(())
    }
}
