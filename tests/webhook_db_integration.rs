// SPDX-License-Identifier: MIT

//! Database-backed test for the webhook-to-queue flow.

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::json;
use stridesync::routes::webhook::compute_signature;
use tower::ServiceExt;

/// Secret matching `Config::default()`.
const CLIENT_SECRET: &str = "test_secret";

#[tokio::test]
async fn test_valid_batch_creates_one_job_per_record() {
    require_database!();
    let store = common::test_store().await;
    let (app, _state) = common::create_test_app_with_store(store.clone());

    // Unique owner ids so the assertion is immune to other tests' jobs
    let data_owner = format!("OWNER-{}", common::unique_id());
    let revoked_owner = format!("OWNER-{}", common::unique_id());

    let body = json!([
        {
            "collectionType": "activities",
            "date": "2024-01-15",
            "ownerId": data_owner,
            "ownerType": "user",
            "subscriptionId": "7-activities"
        },
        {
            "collectionType": "userRevokedAccess",
            "date": "2024-01-15",
            "ownerId": revoked_owner,
            "ownerType": "user",
            "subscriptionId": "8-activities"
        }
    ])
    .to_string();

    let signature = compute_signature(body.as_bytes(), CLIENT_SECRET);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/fitbit/webhook")
                .header("content-type", "application/json")
                .header("x-fitbit-signature", signature)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let rows: Vec<(String, String)> = sqlx::query_as(
        r#"
        SELECT payload->>'collectionType', status
        FROM webhook_queue
        WHERE payload->>'ownerId' = ANY($1)
        ORDER BY created_at
        "#,
    )
    .bind(vec![data_owner, revoked_owner])
    .fetch_all(store.pool().unwrap())
    .await
    .unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0], ("activities".to_string(), "pending".to_string()));
    assert_eq!(
        rows[1],
        ("userRevokedAccess".to_string(), "pending".to_string())
    );
}

#[tokio::test]
async fn test_invalid_batch_enqueues_nothing() {
    require_database!();
    let store = common::test_store().await;
    let (app, _state) = common::create_test_app_with_store(store.clone());

    let owner = format!("OWNER-{}", common::unique_id());

    // Second record is schema-invalid: the whole batch must be rejected
    let body = json!([
        {
            "collectionType": "activities",
            "date": "2024-01-15",
            "ownerId": owner,
            "ownerType": "user",
            "subscriptionId": "7-activities"
        },
        {
            "collectionType": "activities",
            "date": "not-a-date",
            "ownerId": owner,
            "ownerType": "user",
            "subscriptionId": "7-activities"
        }
    ])
    .to_string();

    let signature = compute_signature(body.as_bytes(), CLIENT_SECRET);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/fitbit/webhook")
                .header("content-type", "application/json")
                .header("x-fitbit-signature", signature)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM webhook_queue WHERE payload->>'ownerId' = $1")
            .bind(&owner)
            .fetch_one(store.pool().unwrap())
            .await
            .unwrap();
    assert_eq!(count, 0);
}
