// SPDX-License-Identifier: MIT

//! Database-backed tests for the backfill orchestrator.

mod common;

use chrono::{Duration, NaiveDate, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use stridesync::db::Store;
use stridesync::models::{Granularity, LinkedAccount, PROVIDER_FITBIT};
use stridesync::services::{BackfillService, FitbitClient, ReconciliationEngine, TokenService};

fn build_backfill(store: &Store) -> BackfillService {
    // Unreachable provider: any fetch fails fast
    let client = FitbitClient::new("test_id".to_string(), "test_secret".to_string())
        .with_base_url("http://127.0.0.1:9");
    let tokens = TokenService::new(
        client.clone(),
        store.clone(),
        Arc::new(DashMap::new()),
        Arc::new(DashMap::new()),
    );
    let engine = ReconciliationEngine::new(store.clone());
    BackfillService::new(store.clone(), client, tokens, engine)
}

async fn seed_account(store: &Store, user_id: i64) -> LinkedAccount {
    store
        .link_account(
            user_id,
            PROVIDER_FITBIT,
            &format!("EXT-{}", user_id),
            Some("access_token"),
            Some("refresh_token"),
            Some(Utc::now() + Duration::hours(8)),
        )
        .await
        .expect("Failed to seed account")
}

fn january(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
}

#[tokio::test]
async fn test_needs_backfill_reflects_coverage() {
    require_database!();
    let store = common::test_store().await;
    let backfill = build_backfill(&store);

    let user_id = common::unique_id();
    let account = seed_account(&store, user_id).await;

    // 20 of 31 January days covered
    for day in 1..=20 {
        store
            .upsert_raw_reading(
                account.id,
                january(day),
                None,
                Granularity::Daily,
                5000 + day as i32,
                Utc::now(),
            )
            .await
            .unwrap();
    }

    assert!(backfill
        .needs_backfill(user_id, january(1), january(31))
        .await
        .unwrap());

    // Fill the remaining 11 days
    for day in 21..=31 {
        store
            .upsert_raw_reading(
                account.id,
                january(day),
                None,
                Granularity::Daily,
                5000 + day as i32,
                Utc::now(),
            )
            .await
            .unwrap();
    }

    assert!(!backfill
        .needs_backfill(user_id, january(1), january(31))
        .await
        .unwrap());
}

#[tokio::test]
async fn test_needs_backfill_false_without_account() {
    require_database!();
    let store = common::test_store().await;
    let backfill = build_backfill(&store);

    let user_id = common::unique_id(); // never linked
    assert!(!backfill
        .needs_backfill(user_id, january(1), january(31))
        .await
        .unwrap());
}

#[tokio::test]
async fn test_backfill_survives_provider_outage() {
    require_database!();
    let store = common::test_store().await;
    let backfill = build_backfill(&store);

    let user_id = common::unique_id();
    let account = seed_account(&store, user_id).await;

    // Every chunk fetch fails (unreachable provider); the run must still
    // complete without error and without inventing readings.
    backfill.backfill(user_id, january(1), january(31)).await.unwrap();

    let dates = store
        .daily_reading_dates(account.id, january(1), january(31))
        .await
        .unwrap();
    assert!(dates.is_empty());
}

#[tokio::test]
async fn test_backfill_with_full_coverage_is_a_noop() {
    require_database!();
    let store = common::test_store().await;
    let backfill = build_backfill(&store);

    let user_id = common::unique_id();
    let account = seed_account(&store, user_id).await;

    for day in 1..=10 {
        store
            .upsert_raw_reading(
                account.id,
                january(day),
                None,
                Granularity::Daily,
                4000,
                Utc::now(),
            )
            .await
            .unwrap();
    }

    // Nothing missing -> no provider calls, no error
    backfill.backfill(user_id, january(1), january(10)).await.unwrap();

    let dates = store
        .daily_reading_dates(account.id, january(1), january(10))
        .await
        .unwrap();
    assert_eq!(dates.len(), 10);
}

#[tokio::test]
async fn test_backfill_without_account_is_a_noop() {
    require_database!();
    let store = common::test_store().await;
    let backfill = build_backfill(&store);

    let user_id = common::unique_id();
    backfill.backfill(user_id, january(1), january(31)).await.unwrap();
}
