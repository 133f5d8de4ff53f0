// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Webhook delivery records.
//!
//! PostgreSQL-backed tracking of one row per outgoing command. Rows move
//! `pending -> delivering -> completed|failed`; the terminal states are
//! guarded at the SQL level so racing writers cannot resurrect a finished
//! record. The circuit-breaker columns mirror the in-memory breaker state
//! for diagnostics only.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::PgPool;

use crate::webhook::WebhookConfig;

/// Delivery record from the database.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DeliveryRecord {
    /// Surrogate unique identifier.
    pub id: i64,
    /// Caller-visible request identifier, unique across all deliveries.
    pub request_id: String,
    /// Target agent.
    pub agent_id: String,
    /// Destination URL; circuit-breaker accounting is keyed off this value.
    pub webhook_url: String,
    /// SHA-256 fingerprint of the signing secret; never the secret itself.
    pub webhook_secret_hash: Option<String>,
    /// Highest event ordinal observed for this request so far.
    pub seq: i64,
    /// Last event category forwarded.
    pub last_event_type: Option<String>,
    /// One of pending, delivering, completed, failed.
    pub status: String,
    /// Delivery attempts made for the latest event.
    pub attempt_count: i32,
    /// When the latest attempt ran.
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Error from the latest failed attempt.
    pub last_error: Option<String>,
    /// Durable retry scheduling slot; unused by the synchronous engine.
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Advisory copy of the URL's consecutive failure count.
    pub consecutive_failures: i32,
    /// Advisory copy of the URL's circuit-open deadline.
    pub circuit_open_until: Option<DateTime<Utc>>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last updated.
    pub updated_at: DateTime<Utc>,
    /// When the record reached `completed`.
    pub completed_at: Option<DateTime<Utc>>,
}

/// Delivery-record store over a PostgreSQL pool.
#[derive(Clone)]
pub struct DeliveryStore {
    pool: PgPool,
}

impl DeliveryStore {
    /// Create a store over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a `pending` record for a request.
    ///
    /// `request_id` is unique, so retrying callers fail here instead of
    /// double-tracking. Stores a fingerprint of the secret when one is
    /// configured.
    pub async fn create_delivery(
        &self,
        request_id: &str,
        agent_id: &str,
        webhook_cfg: &WebhookConfig,
    ) -> Result<(), sqlx::Error> {
        let secret_hash = (!webhook_cfg.secret.is_empty())
            .then(|| hex::encode(Sha256::digest(webhook_cfg.secret.as_bytes())));

        sqlx::query(
            r#"
            INSERT INTO webhook_deliveries (request_id, agent_id, webhook_url, webhook_secret_hash, status)
            VALUES ($1, $2, $3, $4, 'pending')
            "#,
        )
        .bind(request_id)
        .bind(agent_id)
        .bind(&webhook_cfg.url)
        .bind(secret_hash)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Advance the observed sequence number and event type.
    ///
    /// Moves a `pending` record to `delivering`. `seq` never decreases, and
    /// terminal records are left untouched.
    pub async fn update_delivery_seq(
        &self,
        request_id: &str,
        seq: i64,
        event_type: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET seq = GREATEST(seq, $2),
                last_event_type = $3,
                status = CASE WHEN status = 'pending' THEN 'delivering' ELSE status END,
                updated_at = NOW()
            WHERE request_id = $1 AND status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(request_id)
        .bind(seq)
        .bind(event_type)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record the outcome of the latest synchronous delivery.
    ///
    /// The failure/circuit columns are an advisory snapshot of the
    /// in-memory breaker state, kept for diagnostic queries.
    pub async fn record_attempt(
        &self,
        request_id: &str,
        attempt_count: i32,
        last_error: Option<&str>,
        consecutive_failures: i32,
        circuit_open_until: Option<DateTime<Utc>>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET attempt_count = $2,
                last_attempt_at = NOW(),
                last_error = $3,
                consecutive_failures = $4,
                circuit_open_until = $5,
                updated_at = NOW()
            WHERE request_id = $1
            "#,
        )
        .bind(request_id)
        .bind(attempt_count)
        .bind(last_error)
        .bind(consecutive_failures)
        .bind(circuit_open_until)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Terminal transition to `completed`.
    pub async fn mark_completed(&self, request_id: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET status = 'completed',
                completed_at = NOW(),
                consecutive_failures = 0,
                updated_at = NOW()
            WHERE request_id = $1 AND status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(request_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Terminal transition to `failed`.
    pub async fn mark_failed(&self, request_id: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET status = 'failed',
                updated_at = NOW()
            WHERE request_id = $1 AND status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(request_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fetch a record by request id.
    pub async fn get_delivery(
        &self,
        request_id: &str,
    ) -> Result<Option<DeliveryRecord>, sqlx::Error> {
        sqlx::query_as::<_, DeliveryRecord>(
            r#"
            SELECT id, request_id, agent_id, webhook_url, webhook_secret_hash, seq,
                   last_event_type, status, attempt_count, last_attempt_at, last_error,
                   next_retry_at, consecutive_failures, circuit_open_until,
                   created_at, updated_at, completed_at
            FROM webhook_deliveries
            WHERE request_id = $1
            "#,
        )
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// List records targeting one agent, newest first.
    pub async fn list_deliveries_for_agent(
        &self,
        agent_id: &str,
        limit: i64,
    ) -> Result<Vec<DeliveryRecord>, sqlx::Error> {
        sqlx::query_as::<_, DeliveryRecord>(
            r#"
            SELECT id, request_id, agent_id, webhook_url, webhook_secret_hash, seq,
                   last_event_type, status, attempt_count, last_attempt_at, last_error,
                   next_retry_at, consecutive_failures, circuit_open_until,
                   created_at, updated_at, completed_at
            FROM webhook_deliveries
            WHERE agent_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(agent_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    /// Health check for database connectivity.
    pub async fn health_check(&self) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map(|_| true)
    }
}
