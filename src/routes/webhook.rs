// SPDX-License-Identifier: MIT

//! Webhook routes for Fitbit push notifications.
//!
//! The notification endpoint must acknowledge within the provider's short
//! timeout, so it only verifies, validates, and enqueues — all fetching and
//! reconciliation happens in the queue worker.

use crate::error::AppError;
use crate::models::{WebhookNotification, JOB_TYPE_NOTIFICATION};
use crate::AppState;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    routing::get,
    Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha1::Sha1;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use validator::Validate;

type HmacSha1 = Hmac<Sha1>;

/// Webhook routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/fitbit/webhook", get(verify).post(handle_notifications))
}

/// Fitbit webhook verification query params.
#[derive(Deserialize)]
struct VerifyParams {
    verify: Option<String>,
}

/// Verify webhook endpoint ownership (GET).
///
/// Fitbit probes with a `verify` code: 204 for the configured code, 404 for
/// anything else (including no code at all).
async fn verify(
    State(state): State<Arc<AppState>>,
    Query(params): Query<VerifyParams>,
) -> StatusCode {
    match params.verify {
        Some(code) if code == state.config.webhook_verify_code => {
            tracing::info!("Webhook verification successful");
            StatusCode::NO_CONTENT
        }
        Some(_) => {
            tracing::warn!("Webhook verification failed: incorrect code");
            StatusCode::NOT_FOUND
        }
        None => StatusCode::NOT_FOUND,
    }
}

/// Compute the webhook body signature: BASE64(HMAC-SHA1(body, secret + "&")).
pub fn compute_signature(body: &[u8], client_secret: &str) -> String {
    let signing_key = format!("{}&", client_secret);
    let mut mac = match HmacSha1::new_from_slice(signing_key.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    BASE64.encode(mac.finalize().into_bytes())
}

/// Verify the X-Fitbit-Signature header against the raw body.
fn verify_signature(body: &[u8], signature: Option<&str>, client_secret: &str) -> bool {
    let Some(signature) = signature else {
        tracing::warn!("Missing X-Fitbit-Signature header");
        return false;
    };

    if client_secret.is_empty() {
        tracing::error!("Fitbit client secret not configured");
        return false;
    }

    let computed = compute_signature(body, client_secret);
    bool::from(computed.as_bytes().ct_eq(signature.as_bytes()))
}

/// Handle webhook notifications (POST).
///
/// 401 on missing/invalid signature, 400 on a schema-invalid body (the
/// whole batch is rejected, nothing is enqueued), 204 otherwise — including
/// on internal enqueue failures, which the provider must never see.
async fn handle_notifications(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let signature = headers
        .get("x-fitbit-signature")
        .and_then(|value| value.to_str().ok());

    if !verify_signature(&body, signature, &state.config.fitbit_client_secret) {
        tracing::error!("Webhook signature verification failed - possible spoofing attempt");
        return Err(AppError::Unauthorized);
    }

    let notifications: Vec<WebhookNotification> = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Invalid notification payload: {}", e)))?;

    // All-or-nothing: every record must validate before any is enqueued.
    for notification in &notifications {
        notification
            .validate()
            .map_err(|e| AppError::BadRequest(format!("Invalid notification record: {}", e)))?;
    }

    tracing::info!(count = notifications.len(), "Received validated notifications");

    for notification in notifications {
        let payload = match serde_json::to_value(&notification) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize notification payload");
                continue;
            }
        };

        match state.store.enqueue_job(JOB_TYPE_NOTIFICATION, payload).await {
            Ok(job_id) => {
                tracing::info!(
                    job_id,
                    collection = %notification.collection_type,
                    owner_id = %notification.owner_id,
                    date = %notification.date,
                    "Queued notification"
                );
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    owner_id = %notification.owner_id,
                    "Failed to enqueue notification"
                );
            }
        }
    }

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test_secret";

    #[test]
    fn test_signature_round_trip() {
        let body = br#"[{"collectionType":"activities"}]"#;
        let signature = compute_signature(body, SECRET);
        assert!(verify_signature(body, Some(&signature), SECRET));
    }

    #[test]
    fn test_flipped_signature_byte_fails() {
        let body = b"payload";
        let mut signature = compute_signature(body, SECRET).into_bytes();
        signature[0] ^= 0x01;
        let tampered = String::from_utf8(signature).unwrap();
        assert!(!verify_signature(body, Some(&tampered), SECRET));
    }

    #[test]
    fn test_missing_signature_fails_without_body_evaluation() {
        assert!(!verify_signature(b"anything", None, SECRET));
    }

    #[test]
    fn test_empty_signature_fails() {
        assert!(!verify_signature(b"anything", Some(""), SECRET));
    }

    #[test]
    fn test_wrong_secret_fails() {
        let body = b"payload";
        let signature = compute_signature(body, "other_secret");
        assert!(!verify_signature(body, Some(&signature), SECRET));
    }

    #[test]
    fn test_unconfigured_secret_rejects() {
        let body = b"payload";
        let signature = compute_signature(body, "");
        assert!(!verify_signature(body, Some(&signature), ""));
    }
}
