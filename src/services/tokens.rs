// SPDX-License-Identifier: MIT

//! Credential cache: every provider call obtains its access token here.
//!
//! A failed or impossible refresh degrades to "skip this account" — the
//! caller gets `None` and moves on, so one revoked credential never takes
//! down a whole batch run.

use crate::db::Store;
use crate::models::LinkedAccount;
use crate::services::fitbit::FitbitClient;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Margin before token expiration when we proactively refresh (5 minutes).
const TOKEN_REFRESH_MARGIN_SECS: i64 = 5 * 60;

/// Cached access token with expiry information.
#[derive(Clone)]
pub struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    pub fn new(access_token: String, expires_at: DateTime<Utc>) -> Self {
        Self {
            access_token,
            expires_at,
        }
    }
}

/// Shared token cache type, keyed by linked-account id.
pub type TokenCache = Arc<DashMap<i64, CachedToken>>;

/// Shared refresh locks type, keyed by linked-account id.
pub type RefreshLocks = Arc<DashMap<i64, Arc<Mutex<()>>>>;

/// Manages the access-token lifecycle for linked accounts.
///
/// Layered lookup: in-memory cache, then the stored token if still valid,
/// then a refresh-token exchange. A per-account async lock serializes
/// refreshes so concurrent worker and poller tasks don't burn the same
/// refresh token twice.
#[derive(Clone)]
pub struct TokenService {
    client: FitbitClient,
    store: Store,
    token_cache: TokenCache,
    refresh_locks: RefreshLocks,
}

impl TokenService {
    /// Create a new token service with shared cache and locks.
    ///
    /// The `token_cache` and `refresh_locks` should be shared across all
    /// `TokenService` clones within the process.
    pub fn new(
        client: FitbitClient,
        store: Store,
        token_cache: TokenCache,
        refresh_locks: RefreshLocks,
    ) -> Self {
        Self {
            client,
            store,
            token_cache,
            refresh_locks,
        }
    }

    /// Get a valid (non-expired) access token for the given account.
    ///
    /// Returns `None` when the account has no tokens, the refresh token is
    /// missing, or the refresh exchange fails — callers skip the account.
    pub async fn valid_access_token(&self, account: &LinkedAccount) -> Option<String> {
        if account.access_token.is_none() {
            tracing::debug!(account_id = account.id, "Account has no access token");
            return None;
        }

        let now = Utc::now();
        let margin = Duration::seconds(TOKEN_REFRESH_MARGIN_SECS);

        // Fast path - cache hit, no I/O
        if let Some(cached) = self.token_cache.get(&account.id) {
            if now + margin < cached.expires_at {
                return Some(cached.access_token.clone());
            }
            // Expired or expiring soon - fall through to refresh
        }

        // Serialize refreshes per account
        let lock = self
            .refresh_locks
            .entry(account.id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let _guard = lock.lock().await;

        // Re-check cache after acquiring the lock; another task may have
        // refreshed while we waited.
        if let Some(cached) = self.token_cache.get(&account.id) {
            if now + margin < cached.expires_at {
                return Some(cached.access_token.clone());
            }
        }

        // Re-read the account: the row may have newer tokens than the copy
        // our caller is holding (or none at all, after a revocation).
        let fresh = match self.store.account(account.id).await {
            Ok(Some(a)) => a,
            Ok(None) => {
                tracing::warn!(account_id = account.id, "Account vanished during token lookup");
                return None;
            }
            Err(e) => {
                tracing::error!(account_id = account.id, error = %e, "Failed to load account");
                return None;
            }
        };

        let access_token = fresh.access_token?;

        // Stored token still valid (and has a known expiry)?
        if let Some(expires_at) = fresh.expires_at {
            if now + margin < expires_at {
                self.token_cache.insert(
                    account.id,
                    CachedToken {
                        access_token: access_token.clone(),
                        expires_at,
                    },
                );
                return Some(access_token);
            }
        }

        // Expired, expiring soon, or unknown expiry - exchange the refresh token.
        let Some(refresh_token) = fresh.refresh_token else {
            tracing::debug!(account_id = account.id, "No refresh token available");
            return None;
        };

        tracing::info!(account_id = account.id, "Access token expired, refreshing");

        let new_tokens = match self.client.refresh_token(&refresh_token).await {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(account_id = account.id, error = %e, "Token refresh failed");
                return None;
            }
        };

        let new_expires_at = now + Duration::seconds(new_tokens.expires_in);

        // The provider rotates refresh tokens on every exchange, so the new
        // pair must win even if persisting hiccups: the in-hand access token
        // stays usable for its lifetime either way.
        if let Err(e) = self
            .store
            .update_account_tokens(
                account.id,
                &new_tokens.access_token,
                &new_tokens.refresh_token,
                new_expires_at,
            )
            .await
        {
            tracing::error!(account_id = account.id, error = %e, "Failed to persist refreshed tokens");
        }

        self.token_cache.insert(
            account.id,
            CachedToken {
                access_token: new_tokens.access_token.clone(),
                expires_at: new_expires_at,
            },
        );

        tracing::info!(account_id = account.id, "Token refreshed and cached");
        Some(new_tokens.access_token)
    }

    /// Evict an account's cached token (after revocation or token clearing).
    pub fn invalidate(&self, account_id: i64) {
        self.token_cache.remove(&account_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PROVIDER_FITBIT;

    fn test_account(id: i64, access: Option<&str>) -> LinkedAccount {
        LinkedAccount {
            id,
            user_id: 1,
            provider: PROVIDER_FITBIT.to_string(),
            external_user_id: "EXT1".to_string(),
            access_token: access.map(String::from),
            refresh_token: Some("refresh".to_string()),
            expires_at: Some(Utc::now() + Duration::hours(1)),
        }
    }

    fn test_service() -> (TokenService, TokenCache) {
        let cache: TokenCache = Arc::new(DashMap::new());
        let locks: RefreshLocks = Arc::new(DashMap::new());
        let service = TokenService::new(
            FitbitClient::new("id".to_string(), "secret".to_string()),
            Store::new_mock(),
            cache.clone(),
            locks,
        );
        (service, cache)
    }

    #[tokio::test]
    async fn test_no_access_token_short_circuits() {
        let (service, _cache) = test_service();
        let account = test_account(1, None);
        assert!(service.valid_access_token(&account).await.is_none());
    }

    #[tokio::test]
    async fn test_cache_hit_avoids_database() {
        let (service, cache) = test_service();
        cache.insert(
            2,
            CachedToken::new("cached_token".to_string(), Utc::now() + Duration::hours(1)),
        );

        // The store is a mock that errors on any call, so a returned token
        // proves the cache satisfied the lookup.
        let account = test_account(2, Some("stored"));
        assert_eq!(
            service.valid_access_token(&account).await.as_deref(),
            Some("cached_token")
        );
    }

    #[tokio::test]
    async fn test_expiring_cache_entry_is_not_returned() {
        let (service, cache) = test_service();
        // Inside the 5-minute refresh margin
        cache.insert(
            3,
            CachedToken::new("stale".to_string(), Utc::now() + Duration::seconds(60)),
        );

        // Falls through to the store, which is offline here, so we get None
        // rather than the stale token.
        let account = test_account(3, Some("stored"));
        assert!(service.valid_access_token(&account).await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_evicts_cache_entry() {
        let (service, cache) = test_service();
        cache.insert(
            4,
            CachedToken::new("cached".to_string(), Utc::now() + Duration::hours(1)),
        );
        service.invalidate(4);
        assert!(!cache.contains_key(&4));
    }
}
