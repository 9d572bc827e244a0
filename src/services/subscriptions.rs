// SPDX-License-Identifier: MIT

//! Fitbit webhook subscription management.
//!
//! Local rows mirror the provider's registrations. A delete that cannot
//! reach the provider deactivates the row instead of removing it; a
//! confirmed remote delete removes it outright.

use crate::db::Store;
use crate::error::AppError;
use crate::models::{LinkedAccount, Subscription};
use crate::services::fitbit::{FitbitClient, SubscriptionResponse};
use crate::services::tokens::TokenService;

/// Collection subscribed on account link.
pub const DEFAULT_COLLECTION: &str = "activities";

#[derive(Clone)]
pub struct SubscriptionService {
    store: Store,
    client: FitbitClient,
    tokens: TokenService,
    subscriber_id: Option<String>,
}

impl SubscriptionService {
    pub fn new(
        store: Store,
        client: FitbitClient,
        tokens: TokenService,
        subscriber_id: Option<String>,
    ) -> Self {
        Self {
            store,
            client,
            tokens,
            subscriber_id,
        }
    }

    /// Register a subscription for one collection type.
    ///
    /// The id is derived from (user, collection) so a retried create lands
    /// on the same provider-side subscription; HTTP 409 adopts the existing
    /// one. Returns `None` when the account has no usable credentials.
    pub async fn subscribe(
        &self,
        account: &LinkedAccount,
        collection_type: &str,
    ) -> Result<Option<Subscription>, AppError> {
        let Some(access_token) = self.tokens.valid_access_token(account).await else {
            tracing::warn!(account_id = account.id, "No valid token for subscription create");
            return Ok(None);
        };

        let subscription_id = format!("{}-{}", account.user_id, collection_type);

        let response = self
            .client
            .create_subscription(
                &access_token,
                collection_type,
                &subscription_id,
                self.subscriber_id.as_deref(),
            )
            .await?;

        let subscription = self
            .store
            .upsert_subscription(
                account.id,
                &response.subscription_id,
                &response.collection_type,
                response.subscriber_id.as_deref(),
            )
            .await?;

        tracing::info!(
            account_id = account.id,
            subscription_id = %subscription.subscription_id,
            collection = %subscription.collection_type,
            "Subscription registered"
        );
        Ok(Some(subscription))
    }

    /// Remove a subscription. Returns true when the provider confirmed the
    /// delete (local row removed); false when it could not be reached
    /// (local row deactivated for later cleanup).
    pub async fn unsubscribe(
        &self,
        account: &LinkedAccount,
        subscription: &Subscription,
    ) -> Result<bool, AppError> {
        let Some(access_token) = self.tokens.valid_access_token(account).await else {
            tracing::warn!(
                account_id = account.id,
                subscription_id = %subscription.subscription_id,
                "No valid token for subscription delete, deactivating locally"
            );
            self.store
                .deactivate_subscription(&subscription.subscription_id)
                .await?;
            return Ok(false);
        };

        match self
            .client
            .delete_subscription(
                &access_token,
                &subscription.collection_type,
                &subscription.subscription_id,
                self.subscriber_id.as_deref(),
            )
            .await
        {
            Ok(()) => {
                self.store
                    .delete_subscription(&subscription.subscription_id)
                    .await?;
                tracing::info!(
                    subscription_id = %subscription.subscription_id,
                    "Subscription deleted"
                );
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(
                    subscription_id = %subscription.subscription_id,
                    error = %e,
                    "Provider delete failed, deactivating locally"
                );
                self.store
                    .deactivate_subscription(&subscription.subscription_id)
                    .await?;
                Ok(false)
            }
        }
    }

    /// The provider's view of this user's subscriptions.
    pub async fn list_remote(
        &self,
        account: &LinkedAccount,
    ) -> Result<Vec<SubscriptionResponse>, AppError> {
        let Some(access_token) = self.tokens.valid_access_token(account).await else {
            return Ok(Vec::new());
        };
        self.client.list_subscriptions(&access_token).await
    }

    /// Deactivate local active rows that no longer exist on the provider.
    pub async fn sync(&self, account: &LinkedAccount) -> Result<(), AppError> {
        let remote = self.list_remote(account).await?;
        let local = self.store.active_subscriptions(account.id).await?;

        for subscription in local {
            let exists_remotely = remote
                .iter()
                .any(|r| r.subscription_id == subscription.subscription_id);
            if !exists_remotely {
                self.store
                    .deactivate_subscription(&subscription.subscription_id)
                    .await?;
                tracing::info!(
                    subscription_id = %subscription.subscription_id,
                    "Marked subscription inactive (not found on provider)"
                );
            }
        }
        Ok(())
    }
}
