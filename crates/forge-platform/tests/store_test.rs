// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Delivery store tests.
//!
//! These run against a real PostgreSQL database and are skipped when
//! TEST_FORGE_DATABASE_URL is not set.

use chrono::Utc;
use uuid::Uuid;

use forge_platform::migrations;
use forge_platform::store::DeliveryStore;
use forge_platform::webhook::WebhookConfig;

/// Skip test if database URL is not set
macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_FORGE_DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_FORGE_DATABASE_URL not set");
            return;
        }
    };
}

async fn get_store() -> DeliveryStore {
    let database_url = std::env::var("TEST_FORGE_DATABASE_URL").expect("database url");
    let pool = sqlx::PgPool::connect(&database_url)
        .await
        .expect("Failed to connect to database");
    migrations::run(&pool).await.expect("Failed to run migrations");
    DeliveryStore::new(pool)
}

fn request_id() -> String {
    format!("req_{}", Uuid::new_v4().simple())
}

fn webhook_cfg(secret: &str) -> WebhookConfig {
    WebhookConfig {
        url: "https://consumer.test/hook".to_string(),
        secret: secret.to_string(),
    }
}

#[tokio::test]
async fn test_create_and_get_delivery() {
    skip_if_no_db!();
    let store = get_store().await;
    let request_id = request_id();

    store
        .create_delivery(&request_id, "agent-1", &webhook_cfg("s3cr3t"))
        .await
        .unwrap();

    let record = store.get_delivery(&request_id).await.unwrap().unwrap();
    assert_eq!(record.request_id, request_id);
    assert_eq!(record.agent_id, "agent-1");
    assert_eq!(record.webhook_url, "https://consumer.test/hook");
    assert_eq!(record.status, "pending");
    assert_eq!(record.seq, 0);
    assert_eq!(record.attempt_count, 0);
    assert_eq!(record.consecutive_failures, 0);
    assert!(record.completed_at.is_none());
    // SHA-256("s3cr3t"), never the secret itself.
    assert_eq!(
        record.webhook_secret_hash.as_deref(),
        Some("4e738ca5563c06cfd0018299933d58db1dd8bf97f6973dc99bf6cdc64b5550bd")
    );
}

#[tokio::test]
async fn test_empty_secret_stores_no_hash() {
    skip_if_no_db!();
    let store = get_store().await;
    let request_id = request_id();

    store
        .create_delivery(&request_id, "agent-1", &webhook_cfg(""))
        .await
        .unwrap();

    let record = store.get_delivery(&request_id).await.unwrap().unwrap();
    assert!(record.webhook_secret_hash.is_none());
}

#[tokio::test]
async fn test_duplicate_request_id_is_rejected() {
    skip_if_no_db!();
    let store = get_store().await;
    let request_id = request_id();

    store
        .create_delivery(&request_id, "agent-1", &webhook_cfg(""))
        .await
        .unwrap();

    let result = store
        .create_delivery(&request_id, "agent-2", &webhook_cfg(""))
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_update_seq_moves_to_delivering_and_is_monotonic() {
    skip_if_no_db!();
    let store = get_store().await;
    let request_id = request_id();

    store
        .create_delivery(&request_id, "agent-1", &webhook_cfg(""))
        .await
        .unwrap();

    store
        .update_delivery_seq(&request_id, 3, "agent.event")
        .await
        .unwrap();

    let record = store.get_delivery(&request_id).await.unwrap().unwrap();
    assert_eq!(record.status, "delivering");
    assert_eq!(record.seq, 3);
    assert_eq!(record.last_event_type.as_deref(), Some("agent.event"));

    // A stale update can never move seq backwards.
    store
        .update_delivery_seq(&request_id, 1, "agent.event")
        .await
        .unwrap();
    let record = store.get_delivery(&request_id).await.unwrap().unwrap();
    assert_eq!(record.seq, 3);
}

#[tokio::test]
async fn test_mark_completed_is_terminal() {
    skip_if_no_db!();
    let store = get_store().await;
    let request_id = request_id();

    store
        .create_delivery(&request_id, "agent-1", &webhook_cfg(""))
        .await
        .unwrap();
    store
        .update_delivery_seq(&request_id, 2, "agent.complete")
        .await
        .unwrap();
    store.mark_completed(&request_id).await.unwrap();

    let record = store.get_delivery(&request_id).await.unwrap().unwrap();
    assert_eq!(record.status, "completed");
    assert!(record.completed_at.is_some());
    assert_eq!(record.consecutive_failures, 0);

    // Terminal states cannot regress.
    store.mark_failed(&request_id).await.unwrap();
    let record = store.get_delivery(&request_id).await.unwrap().unwrap();
    assert_eq!(record.status, "completed");

    store
        .update_delivery_seq(&request_id, 9, "agent.event")
        .await
        .unwrap();
    let record = store.get_delivery(&request_id).await.unwrap().unwrap();
    assert_eq!(record.seq, 2);
}

#[tokio::test]
async fn test_mark_failed_is_terminal() {
    skip_if_no_db!();
    let store = get_store().await;
    let request_id = request_id();

    store
        .create_delivery(&request_id, "agent-1", &webhook_cfg(""))
        .await
        .unwrap();
    store.mark_failed(&request_id).await.unwrap();

    let record = store.get_delivery(&request_id).await.unwrap().unwrap();
    assert_eq!(record.status, "failed");
    assert!(record.completed_at.is_none());

    store.mark_completed(&request_id).await.unwrap();
    let record = store.get_delivery(&request_id).await.unwrap().unwrap();
    assert_eq!(record.status, "failed");
}

#[tokio::test]
async fn test_record_attempt_updates_advisory_columns() {
    skip_if_no_db!();
    let store = get_store().await;
    let request_id = request_id();

    store
        .create_delivery(&request_id, "agent-1", &webhook_cfg(""))
        .await
        .unwrap();

    let open_until = Utc::now() + chrono::Duration::seconds(60);
    store
        .record_attempt(
            &request_id,
            3,
            Some("webhook returned status 500"),
            5,
            Some(open_until),
        )
        .await
        .unwrap();

    let record = store.get_delivery(&request_id).await.unwrap().unwrap();
    assert_eq!(record.attempt_count, 3);
    assert_eq!(record.consecutive_failures, 5);
    assert!(record.last_attempt_at.is_some());
    assert_eq!(
        record.last_error.as_deref(),
        Some("webhook returned status 500")
    );
    assert!(record.circuit_open_until.is_some());
}

#[tokio::test]
async fn test_list_deliveries_for_agent() {
    skip_if_no_db!();
    let store = get_store().await;
    let agent_id = format!("agent-{}", Uuid::new_v4().simple());

    for _ in 0..3 {
        store
            .create_delivery(&request_id(), &agent_id, &webhook_cfg(""))
            .await
            .unwrap();
    }

    let records = store.list_deliveries_for_agent(&agent_id, 10).await.unwrap();
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.agent_id == agent_id));
}

#[tokio::test]
async fn test_missing_delivery_is_none() {
    skip_if_no_db!();
    let store = get_store().await;
    assert!(store.get_delivery("req_missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_health_check() {
    skip_if_no_db!();
    let store = get_store().await;
    assert!(store.health_check().await.unwrap());
}
