// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire types for the `forge.agent.v1.AgentService` contract.
//!
//! These mirror the agent's protobuf schema field for field. They are
//! maintained by hand because the platform consumes a small, stable slice of
//! the agent surface; tags must not be reused or renumbered.

use prost::{Enumeration, Message};

/// A single command sent to an agent over the `Connect` stream.
///
/// The platform sends exactly one request per stream and then half-closes
/// the send side, so `request_id` identifies the whole exchange.
#[derive(Clone, PartialEq, Message)]
pub struct AgentRequest {
    /// Caller-visible identifier, echoed back on every response.
    #[prost(string, tag = "1")]
    pub request_id: String,
    /// The command to execute.
    #[prost(oneof = "agent_request::Command", tags = "2, 3, 4, 5")]
    pub command: Option<agent_request::Command>,
}

/// Nested types for [`AgentRequest`].
pub mod agent_request {
    use prost::Oneof;

    /// The command variants an agent accepts.
    #[derive(Clone, PartialEq, Oneof)]
    pub enum Command {
        /// Deliver a user message to the agent.
        #[prost(message, tag = "2")]
        SendMessage(super::SendMessage),
        /// Interrupt whatever the agent is currently doing.
        #[prost(message, tag = "3")]
        Interrupt(super::Interrupt),
        /// Switch the agent's model.
        #[prost(message, tag = "4")]
        SetModel(super::SetModel),
        /// Switch the agent's permission mode.
        #[prost(message, tag = "5")]
        SetPermissionMode(super::SetPermissionMode),
    }
}

/// Payload of the send-message command.
#[derive(Clone, PartialEq, Message)]
pub struct SendMessage {
    /// The message content to deliver.
    #[prost(string, tag = "1")]
    pub content: String,
}

/// Payload of the interrupt command.
#[derive(Clone, PartialEq, Message)]
pub struct Interrupt {}

/// Payload of the set-model command.
#[derive(Clone, PartialEq, Message)]
pub struct SetModel {
    /// Model identifier understood by the agent.
    #[prost(string, tag = "1")]
    pub model: String,
}

/// Payload of the set-permission-mode command.
#[derive(Clone, PartialEq, Message)]
pub struct SetPermissionMode {
    /// Permission mode identifier understood by the agent.
    #[prost(string, tag = "1")]
    pub mode: String,
}

/// Coarse agent execution state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum AgentState {
    /// State was not set by the agent.
    Unspecified = 0,
    /// Agent is idle and ready for commands.
    Idle = 1,
    /// Agent is processing a request.
    Processing = 2,
    /// Agent hit an error it could not recover from.
    Error = 3,
}

impl AgentState {
    /// Lowercase label used in webhook payloads and HTTP responses.
    pub fn label(self) -> &'static str {
        match self {
            AgentState::Unspecified => "unknown",
            AgentState::Idle => "idle",
            AgentState::Processing => "processing",
            AgentState::Error => "error",
        }
    }
}

/// One item on an agent's response stream.
#[derive(Clone, PartialEq, Message)]
pub struct AgentResponse {
    /// The request this response belongs to.
    #[prost(string, tag = "1")]
    pub request_id: String,
    /// Agent-side session identifier.
    #[prost(string, tag = "2")]
    pub session_id: String,
    /// Monotonically non-decreasing event ordinal within the request.
    #[prost(uint64, tag = "3")]
    pub seq: u64,
    /// Event time in Unix milliseconds; 0 when the agent did not stamp it.
    #[prost(int64, tag = "4")]
    pub timestamp: i64,
    /// Agent state at the time of the event.
    #[prost(enumeration = "AgentState", tag = "5")]
    pub state: i32,
    /// The event body.
    #[prost(oneof = "agent_response::Payload", tags = "6, 7, 8")]
    pub payload: Option<agent_response::Payload>,
}

/// Nested types for [`AgentResponse`].
pub mod agent_response {
    use prost::Oneof;

    /// Response payload variants.
    #[derive(Clone, PartialEq, Oneof)]
    pub enum Payload {
        /// An opaque agent event, forwarded verbatim to webhook consumers.
        #[prost(message, tag = "6")]
        Event(super::AgentEvent),
        /// An error produced by the agent itself.
        #[prost(message, tag = "7")]
        Error(super::AgentError),
        /// Terminal completion marker for the request.
        #[prost(message, tag = "8")]
        Complete(super::Complete),
    }
}

/// An opaque event emitted by the agent runtime.
#[derive(Clone, PartialEq, Message)]
pub struct AgentEvent {
    /// Event category, e.g. `message.part.updated` or `session.completed`.
    #[prost(string, tag = "1")]
    pub event_type: String,
    /// Raw event JSON. The platform never parses its structure.
    #[prost(bytes = "vec", tag = "2")]
    pub event_json: Vec<u8>,
}

/// An error reported by the agent on its response stream.
#[derive(Clone, PartialEq, Message)]
pub struct AgentError {
    /// Stable machine-readable error code.
    #[prost(string, tag = "1")]
    pub code: String,
    /// Human-readable description.
    #[prost(string, tag = "2")]
    pub message: String,
    /// True when the agent cannot continue serving this request.
    #[prost(bool, tag = "3")]
    pub fatal: bool,
}

/// Terminal completion marker for a request.
#[derive(Clone, PartialEq, Message)]
pub struct Complete {
    /// Whether the request finished successfully.
    #[prost(bool, tag = "1")]
    pub success: bool,
}

/// Request for the unary `GetStatus` call.
#[derive(Clone, PartialEq, Message)]
pub struct GetStatusRequest {}

/// Snapshot of an agent's live state.
#[derive(Clone, PartialEq, Message)]
pub struct GetStatusResponse {
    /// Agent identifier.
    #[prost(string, tag = "1")]
    pub agent_id: String,
    /// Current session identifier.
    #[prost(string, tag = "2")]
    pub session_id: String,
    /// Current execution state.
    #[prost(enumeration = "AgentState", tag = "3")]
    pub state: i32,
    /// Highest event ordinal emitted so far.
    #[prost(uint64, tag = "4")]
    pub latest_seq: u64,
    /// Model currently in use.
    #[prost(string, tag = "5")]
    pub current_model: String,
    /// Permission mode currently in use.
    #[prost(string, tag = "6")]
    pub permission_mode: String,
    /// Milliseconds since the agent process started.
    #[prost(int64, tag = "7")]
    pub uptime_ms: i64,
}

/// Request for the unary `Shutdown` call.
#[derive(Clone, PartialEq, Message)]
pub struct ShutdownRequest {
    /// When true the agent finishes in-flight work before exiting.
    #[prost(bool, tag = "1")]
    pub graceful: bool,
}

/// Acknowledgement of a shutdown request.
#[derive(Clone, PartialEq, Message)]
pub struct ShutdownResponse {
    /// Whether the agent accepted the shutdown.
    #[prost(bool, tag = "1")]
    pub success: bool,
}
