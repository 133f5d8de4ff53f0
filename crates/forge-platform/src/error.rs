// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for forge-platform.

use thiserror::Error;

use crate::cluster::ClusterError;
use crate::webhook::delivery::WebhookError;

/// Platform errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Cluster API operation failed.
    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Connecting to or calling an agent failed.
    #[error("Agent client error: {0}")]
    AgentClient(#[from] forge_protocol::ClientError),

    /// The agent's response stream failed mid-request.
    #[error("Agent stream error: {0}")]
    Stream(String),

    /// Webhook delivery failed.
    #[error("Webhook error: {0}")]
    Webhook(#[from] WebhookError),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type using the platform Error.
pub type Result<T> = std::result::Result<T, Error>;
