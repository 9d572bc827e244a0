// SPDX-License-Identifier: MIT

//! Fitbit Web API client.
//!
//! Handles:
//! - Step time-series fetches over dated ranges
//! - Webhook subscription create/delete/list
//! - Refresh-token exchange
//! - Rate limit and auth-failure detection (for worker retry categorization)

use crate::error::AppError;
use chrono::NaiveDate;
use serde::Deserialize;

/// Fitbit API client.
#[derive(Clone)]
pub struct FitbitClient {
    http: reqwest::Client,
    base_url: String,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl FitbitClient {
    /// Create a new Fitbit client with OAuth credentials.
    pub fn new(client_id: String, client_secret: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: "https://api.fitbit.com".to_string(),
            token_url: "https://api.fitbit.com/oauth2/token".to_string(),
            client_id,
            client_secret,
        }
    }

    /// Point the client at a different API host (tests).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self.token_url = format!("{}/oauth2/token", self.base_url);
        self
    }

    /// Fetch the daily step series for an inclusive date range.
    ///
    /// GET /1/user/-/activities/steps/date/{start}/{end}.json
    pub async fn fetch_steps_range(
        &self,
        access_token: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<StepsDay>, AppError> {
        let url = format!(
            "{}/1/user/-/activities/steps/date/{}/{}.json",
            self.base_url, start, end
        );

        let response: StepsSeriesResponse = self.get_json(&url, access_token).await?;

        // Fitbit reports step values as strings; map into typed readings
        // here so malformed payloads surface as API errors, not later panics.
        response
            .series
            .into_iter()
            .map(|point| {
                let steps = point.value.parse::<i32>().map_err(|_| {
                    AppError::FitbitApi(format!(
                        "Non-numeric step value {:?} for {}",
                        point.value, point.date_time
                    ))
                })?;
                Ok(StepsDay {
                    date: point.date_time,
                    steps,
                })
            })
            .collect()
    }

    /// Exchange a refresh token for a new token pair.
    ///
    /// POST {token_url} with HTTP Basic auth of client id/secret.
    pub async fn refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<TokenRefreshResponse, AppError> {
        let response = self
            .http
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await
            .map_err(|e| AppError::FitbitApi(format!("Token refresh request failed: {}", e)))?;

        self.check_response_json(response).await
    }

    /// Create a webhook subscription for one collection type.
    ///
    /// POST /1/user/-/{collection}/apiSubscriptions/{id}.json
    /// HTTP 409 means the subscription already exists; the existing
    /// subscription is adopted rather than treated as an error.
    pub async fn create_subscription(
        &self,
        access_token: &str,
        collection_type: &str,
        subscription_id: &str,
        subscriber_id: Option<&str>,
    ) -> Result<SubscriptionResponse, AppError> {
        let url = format!(
            "{}/1/user/-/{}/apiSubscriptions/{}.json",
            self.base_url, collection_type, subscription_id
        );

        let mut request = self.http.post(&url).bearer_auth(access_token);
        if let Some(id) = subscriber_id {
            request = request.header("X-Fitbit-Subscriber-Id", id);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::FitbitApi(format!("Subscription create failed: {}", e)))?;

        if response.status().as_u16() == 409 {
            tracing::info!(subscription_id, "Subscription already exists, adopting");
            return response.json().await.map_err(|e| {
                AppError::FitbitApi(format!("Failed to parse subscription response: {}", e))
            });
        }

        self.check_response_json(response).await
    }

    /// Delete a webhook subscription. A 404 counts as already deleted.
    pub async fn delete_subscription(
        &self,
        access_token: &str,
        collection_type: &str,
        subscription_id: &str,
        subscriber_id: Option<&str>,
    ) -> Result<(), AppError> {
        let url = format!(
            "{}/1/user/-/{}/apiSubscriptions/{}.json",
            self.base_url, collection_type, subscription_id
        );

        let mut request = self.http.delete(&url).bearer_auth(access_token);
        if let Some(id) = subscriber_id {
            request = request.header("X-Fitbit-Subscriber-Id", id);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::FitbitApi(format!("Subscription delete failed: {}", e)))?;

        if response.status().as_u16() == 404 {
            tracing::info!(subscription_id, "Subscription already gone on provider side");
            return Ok(());
        }

        self.check_response(response).await
    }

    /// List all subscriptions the provider holds for this user.
    pub async fn list_subscriptions(
        &self,
        access_token: &str,
    ) -> Result<Vec<SubscriptionResponse>, AppError> {
        let url = format!("{}/1/user/-/apiSubscriptions.json", self.base_url);
        let response: SubscriptionListResponse = self.get_json(&url, access_token).await?;
        Ok(response.api_subscriptions)
    }

    /// Generic GET request with JSON response.
    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        access_token: &str,
    ) -> Result<T, AppError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AppError::FitbitApi(e.to_string()))?;

        self.check_response_json(response).await
    }

    /// Check response status and return error if not successful.
    async fn check_response(&self, response: reqwest::Response) -> Result<(), AppError> {
        if response.status().is_success() {
            return Ok(());
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        // Rate limit - worker treats this as retryable
        if status.as_u16() == 429 {
            tracing::warn!("Fitbit rate limit hit (429)");
            return Err(AppError::FitbitApi(AppError::FITBIT_RATE_LIMIT.to_string()));
        }

        // Unauthorized - token may be expired or revoked
        if status.as_u16() == 401 {
            return Err(AppError::FitbitApi(AppError::FITBIT_TOKEN_ERROR.to_string()));
        }

        Err(AppError::FitbitApi(format!("HTTP {}: {}", status, body)))
    }

    /// Check response and parse JSON body.
    async fn check_response_json<T: for<'de> Deserialize<'de>>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, AppError> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            if status.as_u16() == 429 {
                tracing::warn!("Fitbit rate limit hit (429)");
                return Err(AppError::FitbitApi(AppError::FITBIT_RATE_LIMIT.to_string()));
            }

            if status.as_u16() == 401 {
                return Err(AppError::FitbitApi(AppError::FITBIT_TOKEN_ERROR.to_string()));
            }

            return Err(AppError::FitbitApi(format!("HTTP {}: {}", status, body)));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::FitbitApi(format!("JSON parse error: {}", e)))
    }
}

/// Token refresh response from Fitbit.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenRefreshResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Lifetime of the new access token in seconds.
    pub expires_in: i64,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// One day of the step time series, after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepsDay {
    pub date: NaiveDate,
    pub steps: i32,
}

/// Wire format of the step series endpoint.
#[derive(Debug, Deserialize)]
struct StepsSeriesResponse {
    #[serde(rename = "activities-steps")]
    series: Vec<SeriesPoint>,
}

#[derive(Debug, Deserialize)]
struct SeriesPoint {
    #[serde(rename = "dateTime")]
    date_time: NaiveDate,
    value: String,
}

/// Subscription record as returned by the provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionResponse {
    pub collection_type: String,
    pub owner_id: String,
    pub owner_type: String,
    #[serde(default)]
    pub subscriber_id: Option<String>,
    pub subscription_id: String,
}

/// Wire format of the subscription list endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionListResponse {
    #[serde(default)]
    api_subscriptions: Vec<SubscriptionResponse>,
}
