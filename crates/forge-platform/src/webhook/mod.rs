// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Webhook payloads and delivery.
//!
//! The platform acts as a dumb pipe: agent event JSON is forwarded to the
//! consumer verbatim inside the envelope defined here, and only the
//! envelope fields are the platform's own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod convert;
pub mod delivery;

pub use delivery::{DeliveryConfig, DeliveryEngine, WebhookError};

/// The webhook event categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    /// An agent event, passed through as raw JSON.
    #[serde(rename = "agent.event")]
    Event,
    /// An error, from the agent or synthesized by the platform.
    #[serde(rename = "agent.error")]
    Error,
    /// Stream completion.
    #[serde(rename = "agent.complete")]
    Complete,
}

impl EventType {
    /// String form as it appears on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Event => "agent.event",
            EventType::Error => "agent.error",
            EventType::Complete => "agent.complete",
        }
    }
}

/// Webhook destination configuration supplied by the consumer.
#[derive(Debug, Clone, Default)]
pub struct WebhookConfig {
    /// Destination URL.
    pub url: String,
    /// Optional HMAC signing secret; empty disables signing.
    pub secret: String,
}

/// A webhook payload sent to consumers.
///
/// The `event` field carries the raw agent event. The platform does not
/// parse it; consumers should use the agent SDK types to do so.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payload {
    /// Event category.
    pub event_type: EventType,
    /// Target agent.
    pub agent_id: String,
    /// The request this event belongs to.
    pub request_id: String,
    /// Agent-side session identifier; empty when not yet known.
    #[serde(default)]
    pub session_id: String,
    /// Event ordinal within the request.
    pub seq: u64,
    /// Event time (UTC, ISO-8601 on the wire).
    pub timestamp: DateTime<Utc>,
    /// Marks the terminal event of a request; omitted when false.
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_final: bool,
    /// Current agent state: "idle", "processing", "error" or "unknown".
    pub agent_state: String,
    /// For agent.event - the upstream event type (e.g. "message.updated").
    /// Provided so consumers can filter without parsing `event`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opencode_event_type: Option<String>,
    /// For agent.event - the raw upstream event (pass-through).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<Value>,
    /// For agent.error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    /// For agent.complete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
}

/// Error details carried by agent.error payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable description.
    pub message: String,
    /// Whether the consumer can expect further events for this request.
    pub recoverable: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}
