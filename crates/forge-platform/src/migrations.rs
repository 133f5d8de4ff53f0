// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Delivery-store schema setup.
//!
//! The platform owns a single table. The schema is idempotent
//! (`CREATE TABLE IF NOT EXISTS`), so `run` is safe to call on every start.

use sqlx::PgPool;

/// Apply the delivery-store schema.
pub async fn run(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(include_str!("../migrations/schema.sql"))
        .execute(pool)
        .await?;
    Ok(())
}
