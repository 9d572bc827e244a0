// SPDX-License-Identifier: MIT

//! Processes webhook notifications pulled off the job queue.
//!
//! Data notifications are resolved by re-fetching the notified date from
//! the provider (the notification itself carries no step values). Account
//! state notifications (revocation, deletion) clear credentials but keep
//! historical readings.

use crate::db::Store;
use crate::error::AppError;
use crate::models::{CollectionType, Granularity, WebhookNotification, PROVIDER_FITBIT};
use crate::services::fitbit::FitbitClient;
use crate::services::reconcile::ReconciliationEngine;
use crate::services::tokens::TokenService;
use chrono::{NaiveDate, Utc};

#[derive(Clone)]
pub struct NotificationProcessor {
    store: Store,
    client: FitbitClient,
    tokens: TokenService,
    engine: ReconciliationEngine,
}

impl NotificationProcessor {
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

    /// Process a data notification: fetch the notified date's steps, store
    /// the readings, and reconcile the affected user/dates.
    pub async fn process(&self, notification: &WebhookNotification) -> Result<(), AppError> {
        tracing::info!(
            collection = %notification.collection_type,
            owner_id = %notification.owner_id,
            date = %notification.date,
            "Processing Fitbit notification"
        );

        let account = self
            .store
            .account_by_external_id(PROVIDER_FITBIT, &notification.owner_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "No account for Fitbit user {}",
                    notification.owner_id
                ))
            })?;

        if notification.collection_type != CollectionType::Activities {
            tracing::info!(
                collection = %notification.collection_type,
                "Skipping collection type"
            );
            return Ok(());
        }

        let date = NaiveDate::parse_from_str(&notification.date, "%Y-%m-%d").map_err(|e| {
            AppError::BadRequest(format!(
                "Invalid notification date {:?}: {}",
                notification.date, e
            ))
        })?;

        let Some(access_token) = self.tokens.valid_access_token(&account).await else {
            // Transient until proven otherwise; the worker retries.
            return Err(AppError::FitbitApi(AppError::FITBIT_TOKEN_ERROR.to_string()));
        };

        let days = self.client.fetch_steps_range(&access_token, date, date).await?;
        if days.is_empty() {
            tracing::warn!(owner_id = %notification.owner_id, %date, "No steps data returned");
            return Err(AppError::NotFound(format!("No steps data for {}", date)));
        }

        let now = Utc::now();
        for day in &days {
            self.store
                .upsert_raw_reading(account.id, day.date, None, Granularity::Daily, day.steps, now)
                .await?;
            tracing::info!(
                account_id = account.id,
                date = %day.date,
                steps = day.steps,
                "Stored daily reading"
            );
        }

        for day in &days {
            self.engine.reconcile(account.user_id, day.date).await?;
        }

        tracing::info!(
            owner_id = %notification.owner_id,
            %date,
            "Notification processed"
        );
        Ok(())
    }

    /// Handle `userRevokedAccess` / `deleteUser`: null the account's tokens
    /// and deactivate its subscriptions, preserving historical readings.
    ///
    /// Idempotent; an account that is already gone counts as success.
    pub async fn handle_access_revoked(&self, owner_id: &str) -> Result<(), AppError> {
        let Some(account) = self
            .store
            .account_by_external_id(PROVIDER_FITBIT, owner_id)
            .await?
        else {
            tracing::warn!(owner_id, "No account for revoked Fitbit user - may already be gone");
            return Ok(());
        };

        self.store.clear_account_tokens(account.id).await?;
        self.tokens.invalidate(account.id);

        let deactivated = self.store.deactivate_subscriptions(account.id).await?;

        tracing::info!(
            account_id = account.id,
            user_id = account.user_id,
            deactivated,
            "Access revoked: tokens cleared, subscriptions deactivated, readings preserved"
        );
        Ok(())
    }
}
