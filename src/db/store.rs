// SPDX-License-Identifier: MIT

//! PostgreSQL store with typed operations.
//!
//! Provides high-level operations for:
//! - Linked accounts (provider links and OAuth tokens)
//! - Raw readings (per-account step counts)
//! - Daily totals (reconciled per-user values)
//! - Subscriptions (provider webhook registrations)
//! - The webhook job queue
//!
//! Write contention on daily totals and queue rows is absorbed by
//! unique-constraint upserts and a `FOR UPDATE SKIP LOCKED` claim; no
//! application-level locks are involved.

use crate::error::AppError;
use crate::models::{
    AccountReading, DailyTotal, Granularity, LinkedAccount, QueuedJob, RawReading, Subscription,
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::postgres::PgPool;

/// PostgreSQL store.
#[derive(Clone)]
pub struct Store {
    pool: Option<PgPool>,
}

impl Store {
    /// Connect to PostgreSQL.
    pub async fn connect(database_url: &str) -> Result<Self, AppError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to PostgreSQL: {}", e)))?;

        tracing::info!("Connected to PostgreSQL");

        Ok(Self { pool: Some(pool) })
    }

    /// Create a mock store for testing (offline mode).
    ///
    /// All database operations will return an error if called.
    pub fn new_mock() -> Self {
        Self { pool: None }
    }

    /// Run embedded migrations.
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        sqlx::migrate!("./migrations")
            .run(self.get_pool()?)
            .await
            .map_err(|e| AppError::Database(format!("Migration failed: {}", e)))
    }

    /// Access the underlying pool, if connected (used by tests).
    pub fn pool(&self) -> Option<&PgPool> {
        self.pool.as_ref()
    }

    /// Helper to get the pool or return an error if offline.
    fn get_pool(&self) -> Result<&PgPool, AppError> {
        self.pool
            .as_ref()
            .ok_or_else(|| AppError::Database("Database not connected (offline mode)".to_string()))
    }

    // ─── Linked Accounts ─────────────────────────────────────────

    /// Create or refresh a provider link for a user.
    ///
    /// Relinking the same provider replaces the external id and tokens.
    pub async fn link_account(
        &self,
        user_id: i64,
        provider: &str,
        external_user_id: &str,
        access_token: Option<&str>,
        refresh_token: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<LinkedAccount, AppError> {
        sqlx::query_as::<_, LinkedAccount>(
            r#"
            INSERT INTO linked_accounts
                (user_id, provider, external_user_id, access_token, refresh_token, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id, provider) DO UPDATE SET
                external_user_id = EXCLUDED.external_user_id,
                access_token = EXCLUDED.access_token,
                refresh_token = EXCLUDED.refresh_token,
                expires_at = EXCLUDED.expires_at,
                updated_at = now()
            RETURNING id, user_id, provider, external_user_id,
                      access_token, refresh_token, expires_at
            "#,
        )
        .bind(user_id)
        .bind(provider)
        .bind(external_user_id)
        .bind(access_token)
        .bind(refresh_token)
        .bind(expires_at)
        .fetch_one(self.get_pool()?)
        .await
        .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Fetch one account by id.
    pub async fn account(&self, account_id: i64) -> Result<Option<LinkedAccount>, AppError> {
        sqlx::query_as::<_, LinkedAccount>(
            r#"
            SELECT id, user_id, provider, external_user_id,
                   access_token, refresh_token, expires_at
            FROM linked_accounts
            WHERE id = $1
            "#,
        )
        .bind(account_id)
        .fetch_optional(self.get_pool()?)
        .await
        .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Look up an account by the provider's own user id.
    pub async fn account_by_external_id(
        &self,
        provider: &str,
        external_user_id: &str,
    ) -> Result<Option<LinkedAccount>, AppError> {
        sqlx::query_as::<_, LinkedAccount>(
            r#"
            SELECT id, user_id, provider, external_user_id,
                   access_token, refresh_token, expires_at
            FROM linked_accounts
            WHERE provider = $1 AND external_user_id = $2
            "#,
        )
        .bind(provider)
        .bind(external_user_id)
        .fetch_optional(self.get_pool()?)
        .await
        .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Get a user's account for one provider.
    pub async fn account_for_user(
        &self,
        user_id: i64,
        provider: &str,
    ) -> Result<Option<LinkedAccount>, AppError> {
        sqlx::query_as::<_, LinkedAccount>(
            r#"
            SELECT id, user_id, provider, external_user_id,
                   access_token, refresh_token, expires_at
            FROM linked_accounts
            WHERE user_id = $1 AND provider = $2
            "#,
        )
        .bind(user_id)
        .bind(provider)
        .fetch_optional(self.get_pool()?)
        .await
        .map_err(|e| AppError::Database(e.to_string()))
    }

    /// All accounts linked for a provider (poller input).
    pub async fn accounts_for_provider(
        &self,
        provider: &str,
    ) -> Result<Vec<LinkedAccount>, AppError> {
        sqlx::query_as::<_, LinkedAccount>(
            r#"
            SELECT id, user_id, provider, external_user_id,
                   access_token, refresh_token, expires_at
            FROM linked_accounts
            WHERE provider = $1
            ORDER BY id
            "#,
        )
        .bind(provider)
        .fetch_all(self.get_pool()?)
        .await
        .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Persist refreshed OAuth tokens for an account.
    pub async fn update_account_tokens(
        &self,
        account_id: i64,
        access_token: &str,
        refresh_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE linked_accounts
            SET access_token = $2, refresh_token = $3, expires_at = $4, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(account_id)
        .bind(access_token)
        .bind(refresh_token)
        .bind(expires_at)
        .execute(self.get_pool()?)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// Null an account's tokens (revocation/deletion notices keep the row).
    pub async fn clear_account_tokens(&self, account_id: i64) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE linked_accounts
            SET access_token = NULL, refresh_token = NULL, expires_at = NULL, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(account_id)
        .execute(self.get_pool()?)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// The user's preferred provider for conflict resolution, if configured.
    pub async fn preferred_provider(&self, user_id: i64) -> Result<Option<String>, AppError> {
        let row: Option<Option<String>> = sqlx::query_scalar(
            "SELECT preferred_provider FROM user_settings WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(self.get_pool()?)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(row.flatten())
    }

    /// Set (or clear) the user's preferred provider.
    pub async fn set_preferred_provider(
        &self,
        user_id: i64,
        provider: Option<&str>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO user_settings (user_id, preferred_provider)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO UPDATE SET
                preferred_provider = EXCLUDED.preferred_provider,
                updated_at = now()
            "#,
        )
        .bind(user_id)
        .bind(provider)
        .execute(self.get_pool()?)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    // ─── Raw Readings ────────────────────────────────────────────

    /// Insert or update a reading for (account, date, time).
    pub async fn upsert_raw_reading(
        &self,
        account_id: i64,
        date: NaiveDate,
        time: Option<NaiveTime>,
        granularity: Granularity,
        steps: i32,
        synced_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO raw_readings (account_id, date, time, steps, granularity, synced_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (account_id, date, time) DO UPDATE SET
                steps = EXCLUDED.steps,
                granularity = EXCLUDED.granularity,
                synced_at = EXCLUDED.synced_at,
                updated_at = now()
            "#,
        )
        .bind(account_id)
        .bind(date)
        .bind(time)
        .bind(steps)
        .bind(granularity)
        .bind(synced_at)
        .execute(self.get_pool()?)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// All readings one account reported for a date.
    pub async fn raw_readings(
        &self,
        account_id: i64,
        date: NaiveDate,
    ) -> Result<Vec<RawReading>, AppError> {
        sqlx::query_as::<_, RawReading>(
            r#"
            SELECT id, account_id, date, time, steps, granularity, synced_at
            FROM raw_readings
            WHERE account_id = $1 AND date = $2
            ORDER BY time ASC NULLS FIRST, id ASC
            "#,
        )
        .bind(account_id)
        .bind(date)
        .fetch_all(self.get_pool()?)
        .await
        .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Dates in range that already have a daily-granularity reading.
    pub async fn daily_reading_dates(
        &self,
        account_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<NaiveDate>, AppError> {
        sqlx::query_scalar(
            r#"
            SELECT date FROM raw_readings
            WHERE account_id = $1 AND granularity = 'daily' AND date BETWEEN $2 AND $3
            ORDER BY date
            "#,
        )
        .bind(account_id)
        .bind(start)
        .bind(end)
        .fetch_all(self.get_pool()?)
        .await
        .map_err(|e| AppError::Database(e.to_string()))
    }

    /// All readings for a user on one date, joined with provider names.
    ///
    /// Row order (time, then insertion id) is what the merge's deterministic
    /// fallback leans on.
    pub async fn readings_for_user_date(
        &self,
        user_id: i64,
        date: NaiveDate,
    ) -> Result<Vec<AccountReading>, AppError> {
        sqlx::query_as::<_, AccountReading>(
            r#"
            SELECT r.account_id, a.provider, r.time, r.granularity, r.steps, r.synced_at
            FROM raw_readings r
            JOIN linked_accounts a ON a.id = r.account_id
            WHERE a.user_id = $1 AND r.date = $2
            ORDER BY r.time ASC NULLS FIRST, r.id ASC
            "#,
        )
        .bind(user_id)
        .bind(date)
        .fetch_all(self.get_pool()?)
        .await
        .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Users with any reading on the given date.
    pub async fn user_ids_with_readings_on(&self, date: NaiveDate) -> Result<Vec<i64>, AppError> {
        sqlx::query_scalar(
            r#"
            SELECT DISTINCT a.user_id
            FROM raw_readings r
            JOIN linked_accounts a ON a.id = r.account_id
            WHERE r.date = $1
            ORDER BY a.user_id
            "#,
        )
        .bind(date)
        .fetch_all(self.get_pool()?)
        .await
        .map_err(|e| AppError::Database(e.to_string()))
    }

    // ─── Daily Totals ────────────────────────────────────────────

    /// Upsert the reconciled total for (user, date).
    ///
    /// Concurrent reconciliations of the same key both land here; the
    /// unique constraint makes the second writer update instead of fail.
    pub async fn upsert_daily_total(
        &self,
        user_id: i64,
        date: NaiveDate,
        steps: i32,
        primary_account_id: Option<i64>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO daily_totals (user_id, date, steps, primary_account_id)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, date) DO UPDATE SET
                steps = EXCLUDED.steps,
                primary_account_id = EXCLUDED.primary_account_id,
                updated_at = now()
            "#,
        )
        .bind(user_id)
        .bind(date)
        .bind(steps)
        .bind(primary_account_id)
        .execute(self.get_pool()?)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// Get the reconciled total for (user, date).
    pub async fn daily_total(
        &self,
        user_id: i64,
        date: NaiveDate,
    ) -> Result<Option<DailyTotal>, AppError> {
        sqlx::query_as::<_, DailyTotal>(
            r#"
            SELECT id, user_id, date, steps, primary_account_id
            FROM daily_totals
            WHERE user_id = $1 AND date = $2
            "#,
        )
        .bind(user_id)
        .bind(date)
        .fetch_optional(self.get_pool()?)
        .await
        .map_err(|e| AppError::Database(e.to_string()))
    }

    // ─── Job Queue ───────────────────────────────────────────────

    /// Append a job; FIFO position comes from created_at/id.
    pub async fn enqueue_job(
        &self,
        job_type: &str,
        payload: serde_json::Value,
    ) -> Result<i64, AppError> {
        sqlx::query_scalar(
            "INSERT INTO webhook_queue (job_type, payload) VALUES ($1, $2) RETURNING id",
        )
        .bind(job_type)
        .bind(payload)
        .fetch_one(self.get_pool()?)
        .await
        .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Claim the oldest eligible pending job, flipping it to `processing`.
    ///
    /// Eligibility encodes the retry backoff tiers (1, 5, then 15 minutes)
    /// directly in the predicate, so no separate scheduler is needed.
    /// `FOR UPDATE SKIP LOCKED` keeps concurrent workers off the same row.
    pub async fn claim_next_job(&self) -> Result<Option<QueuedJob>, AppError> {
        sqlx::query_as::<_, QueuedJob>(
            r#"
            UPDATE webhook_queue
            SET status = 'processing', updated_at = now()
            WHERE id = (
                SELECT id FROM webhook_queue
                WHERE status = 'pending'
                  AND (retries = 0
                    OR (retries = 1 AND updated_at < now() - interval '1 minute')
                    OR (retries = 2 AND updated_at < now() - interval '5 minutes')
                    OR (retries >= 3 AND updated_at < now() - interval '15 minutes'))
                ORDER BY created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, job_type, payload, status, retries, error,
                      processed_at, created_at, updated_at
            "#,
        )
        .fetch_optional(self.get_pool()?)
        .await
        .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Mark a job completed.
    pub async fn complete_job(&self, job_id: i64) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE webhook_queue
            SET status = 'completed', error = NULL, processed_at = now(), updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .execute(self.get_pool()?)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// Mark a job permanently failed.
    pub async fn fail_job(&self, job_id: i64, retries: i32, error: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE webhook_queue
            SET status = 'failed', retries = $2, error = $3,
                processed_at = now(), updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(retries)
        .bind(error)
        .execute(self.get_pool()?)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// Return a job to `pending` with an incremented retry count.
    ///
    /// The bumped updated_at is what the backoff predicate measures from.
    pub async fn requeue_job(
        &self,
        job_id: i64,
        retries: i32,
        error: &str,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE webhook_queue
            SET status = 'pending', retries = $2, error = $3, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(retries)
        .bind(error)
        .execute(self.get_pool()?)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// Requeue jobs stuck in `processing` since before the cutoff.
    ///
    /// Covers workers that died mid-job; redelivery is safe because
    /// processing is idempotent.
    pub async fn reclaim_stuck_jobs(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_queue
            SET status = 'pending', updated_at = now()
            WHERE status = 'processing' AND updated_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(self.get_pool()?)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(result.rows_affected())
    }

    /// Fetch one job by id.
    pub async fn job(&self, job_id: i64) -> Result<Option<QueuedJob>, AppError> {
        sqlx::query_as::<_, QueuedJob>(
            r#"
            SELECT id, job_type, payload, status, retries, error,
                   processed_at, created_at, updated_at
            FROM webhook_queue
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(self.get_pool()?)
        .await
        .map_err(|e| AppError::Database(e.to_string()))
    }

    // ─── Subscriptions ───────────────────────────────────────────

    /// Insert or reactivate a subscription row.
    pub async fn upsert_subscription(
        &self,
        account_id: i64,
        subscription_id: &str,
        collection_type: &str,
        subscriber_id: Option<&str>,
    ) -> Result<Subscription, AppError> {
        sqlx::query_as::<_, Subscription>(
            r#"
            INSERT INTO subscriptions (account_id, subscription_id, collection_type, subscriber_id)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (subscription_id) DO UPDATE SET
                collection_type = EXCLUDED.collection_type,
                subscriber_id = EXCLUDED.subscriber_id,
                is_active = TRUE,
                updated_at = now()
            RETURNING id, account_id, subscription_id, collection_type, subscriber_id, is_active
            "#,
        )
        .bind(account_id)
        .bind(subscription_id)
        .bind(collection_type)
        .bind(subscriber_id)
        .fetch_one(self.get_pool()?)
        .await
        .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Active subscriptions for an account.
    pub async fn active_subscriptions(
        &self,
        account_id: i64,
    ) -> Result<Vec<Subscription>, AppError> {
        sqlx::query_as::<_, Subscription>(
            r#"
            SELECT id, account_id, subscription_id, collection_type, subscriber_id, is_active
            FROM subscriptions
            WHERE account_id = $1 AND is_active
            ORDER BY id
            "#,
        )
        .bind(account_id)
        .fetch_all(self.get_pool()?)
        .await
        .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Deactivate every active subscription for an account. Returns the count.
    pub async fn deactivate_subscriptions(&self, account_id: i64) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET is_active = FALSE, updated_at = now()
            WHERE account_id = $1 AND is_active
            "#,
        )
        .bind(account_id)
        .execute(self.get_pool()?)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(result.rows_affected())
    }

    /// Deactivate one subscription by its provider-side id.
    pub async fn deactivate_subscription(&self, subscription_id: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE subscriptions
            SET is_active = FALSE, updated_at = now()
            WHERE subscription_id = $1
            "#,
        )
        .bind(subscription_id)
        .execute(self.get_pool()?)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// Delete a subscription row after a confirmed remote delete.
    pub async fn delete_subscription(&self, subscription_id: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM subscriptions WHERE subscription_id = $1")
            .bind(subscription_id)
            .execute(self.get_pool()?)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }
}
