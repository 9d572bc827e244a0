// SPDX-License-Identifier: MIT

//! Integration tests for webhook handling (no database required).

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

fn signed_post(body: &str) -> Request<Body> {
    let signature = compute_signature(body.as_bytes(), CLIENT_SECRET);
    Request::builder()
        .method("POST")
        .uri("/fitbit/webhook")
        .header("content-type", "application/json")
        .header("x-fitbit-signature", signature)
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn valid_batch() -> String {
    json!([
        {
            "collectionType": "activities",
            "date": "2024-01-15",
            "ownerId": "X",
            "ownerType": "user",
            "subscriptionId": "7-activities"
        },
        {
            "collectionType": "userRevokedAccess",
            "date": "2024-01-15",
            "ownerId": "Y",
            "ownerType": "user",
            "subscriptionId": "8-activities"
        }
    ])
    .to_string()
}

#[tokio::test]
async fn test_verification_with_correct_code() {
    let (app, _state) = common::create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/fitbit/webhook?verify=test_verify_code")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_verification_with_wrong_code() {
    let (app, _state) = common::create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/fitbit/webhook?verify=wrong_code")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_verification_without_code() {
    let (app, _state) = common::create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/fitbit/webhook")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_notification_with_valid_signature_is_acknowledged() {
    let (app, _state) = common::create_test_app();

    // The offline store makes every enqueue fail internally; the provider
    // must still get a 204 after the signature checks out.
    let response = app.oneshot(signed_post(&valid_batch())).await.unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_notification_with_missing_signature_is_rejected() {
    let (app, _state) = common::create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/fitbit/webhook")
                .header("content-type", "application/json")
                .body(Body::from(valid_batch()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_notification_with_tampered_signature_is_rejected() {
    let (app, _state) = common::create_test_app();

    let body = valid_batch();
    let mut signature = compute_signature(body.as_bytes(), CLIENT_SECRET).into_bytes();
    signature[0] ^= 0x01;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/fitbit/webhook")
                .header("content-type", "application/json")
                .header("x-fitbit-signature", String::from_utf8(signature).unwrap())
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_signature_from_wrong_secret_is_rejected() {
    let (app, _state) = common::create_test_app();

    let body = valid_batch();
    let signature = compute_signature(body.as_bytes(), "some_other_secret");

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

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_batch_with_unknown_collection_type_is_rejected_whole() {
    let (app, _state) = common::create_test_app();

    let body = json!([
        {
            "collectionType": "activities",
            "date": "2024-01-15",
            "ownerId": "X",
            "ownerType": "user",
            "subscriptionId": "7-activities"
        },
        {
            "collectionType": "heartrate",
            "date": "2024-01-15",
            "ownerId": "Y",
            "ownerType": "user",
            "subscriptionId": "8-heartrate"
        }
    ])
    .to_string();

    let response = app.oneshot(signed_post(&body)).await.unwrap();

    // One bad record rejects the whole batch
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_batch_with_empty_owner_id_is_rejected() {
    let (app, _state) = common::create_test_app();

    let body = json!([
        {
            "collectionType": "activities",
            "date": "2024-01-15",
            "ownerId": "",
            "ownerType": "user",
            "subscriptionId": "7-activities"
        }
    ])
    .to_string();

    let response = app.oneshot(signed_post(&body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_non_json_body_is_rejected_after_signature() {
    let (app, _state) = common::create_test_app();

    let response = app.oneshot(signed_post("this is not json")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health_check() {
    let (app, _state) = common::create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
}
