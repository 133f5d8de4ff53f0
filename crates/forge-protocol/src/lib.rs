// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Forge Protocol - agent RPC wire types and client
//!
//! This crate defines the wire contract between the Forge platform and the
//! per-pod agent processes, and the client used to drive it:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      forge-protocol                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  RPC Layer: GetStatus / Shutdown + bidirectional Connect    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Serialization: Protobuf (prost)                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Transport: gRPC over HTTP/2 cleartext (tonic)              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Service
//!
//! | Method | Shape | Description |
//! |--------|-------|-------------|
//! | `GetStatus` | unary | Agent id, session, state, latest seq, uptime |
//! | `Shutdown` | unary | Ask the agent to exit, optionally gracefully |
//! | `Connect` | bidi stream | One `AgentRequest` up, `AgentResponse`s down |
//!
//! Agents listen on plain HTTP/2 inside the cluster network, so the channel
//! is h2c with no overall request deadline: response streams stay open as
//! long as the agent keeps producing events, and cancellation is done by
//! dropping the session.
//!
//! # Usage
//!
//! ```ignore
//! use forge_protocol::{AgentClient, AgentRequest, agent_request};
//!
//! let mut client = AgentClient::connect("http://10.0.0.12:8080").await?;
//!
//! let mut session = client.open_session().await?;
//! session
//!     .send(AgentRequest {
//!         request_id: "req_1".into(),
//!         command: Some(agent_request::Command::Interrupt(Interrupt {})),
//!     })
//!     .await?;
//! session.close_send();
//!
//! let mut inbound = session.into_inbound();
//! while let Some(response) = inbound.message().await? {
//!     // forward response
//! }
//! ```

pub mod agent;
pub mod client;

pub use agent::{
    agent_request, agent_response, AgentError, AgentEvent, AgentRequest, AgentResponse, AgentState,
    Complete, GetStatusRequest, GetStatusResponse, Interrupt, SendMessage, SetModel,
    SetPermissionMode, ShutdownRequest, ShutdownResponse,
};
pub use client::{AgentClient, AgentSession, ClientError};

// Re-exported so downstream crates can match on stream errors without
// depending on tonic directly.
pub use tonic::Status;
