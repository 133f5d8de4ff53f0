// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! gRPC client for the agent service.
//!
//! Clients are cheap: they hold a single h2c channel and are created per
//! request by the platform, so there is no pooling or caching here. The
//! channel carries no overall request deadline; response streams live until
//! the agent closes them or the caller drops the session.

use std::time::Duration;

use http::uri::PathAndQuery;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::client::Grpc;
use tonic::codec::ProstCodec;
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Status, Streaming};
use tracing::debug;

use crate::agent::{
    AgentRequest, AgentResponse, GetStatusRequest, GetStatusResponse, ShutdownRequest,
    ShutdownResponse,
};

const GET_STATUS_PATH: &str = "/forge.agent.v1.AgentService/GetStatus";
const SHUTDOWN_PATH: &str = "/forge.agent.v1.AgentService/Shutdown";
const CONNECT_PATH: &str = "/forge.agent.v1.AgentService/Connect";

/// How long to wait for the TCP/HTTP2 handshake. Distinct from request
/// deadlines, which are intentionally absent.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Outbound request buffer for a session. The platform sends a single
/// request per stream, so this never fills.
const SESSION_BUFFER: usize = 16;

/// Errors that can occur in the agent client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Channel establishment or HTTP/2 transport failure.
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// The agent rejected or aborted an RPC.
    #[error("rpc error: {0}")]
    Rpc(#[from] Status),

    /// The session's send side was already closed.
    #[error("request stream already closed")]
    SendClosed,
}

/// Client for one agent's RPC endpoint.
pub struct AgentClient {
    inner: Grpc<Channel>,
}

impl AgentClient {
    /// Connect to an agent at `base_url` (e.g. `http://10.0.0.12:8080`).
    ///
    /// The `http` scheme yields HTTP/2 cleartext, which the in-cluster
    /// agents require for bidirectional streaming.
    pub async fn connect(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let base_url = base_url.into();
        debug!(addr = %base_url, "connecting to agent");

        let channel = Endpoint::from_shared(base_url)?
            .connect_timeout(CONNECT_TIMEOUT)
            .connect()
            .await?;

        Ok(Self::from_channel(channel))
    }

    /// Build a client over an existing channel.
    ///
    /// Lets tests inject their own transport (e.g. a lazily connecting
    /// channel or one pointed at an in-process server).
    pub fn from_channel(channel: Channel) -> Self {
        Self {
            inner: Grpc::new(channel),
        }
    }

    /// Fetch the agent's live status.
    pub async fn get_status(&mut self) -> Result<GetStatusResponse, ClientError> {
        self.inner.ready().await?;
        let codec: ProstCodec<GetStatusRequest, GetStatusResponse> = ProstCodec::default();
        let path = PathAndQuery::from_static(GET_STATUS_PATH);
        let response = self
            .inner
            .unary(Request::new(GetStatusRequest {}), path, codec)
            .await?;
        Ok(response.into_inner())
    }

    /// Ask the agent to shut down.
    pub async fn shutdown(&mut self, graceful: bool) -> Result<ShutdownResponse, ClientError> {
        self.inner.ready().await?;
        let codec: ProstCodec<ShutdownRequest, ShutdownResponse> = ProstCodec::default();
        let path = PathAndQuery::from_static(SHUTDOWN_PATH);
        let response = self
            .inner
            .unary(Request::new(ShutdownRequest { graceful }), path, codec)
            .await?;
        Ok(response.into_inner())
    }

    /// Open a bidirectional `Connect` session.
    ///
    /// The returned session owns both stream halves: requests go up through
    /// [`AgentSession::send`], responses come down through the inbound
    /// stream. Half-close the send side with [`AgentSession::close_send`]
    /// once the single request has been written.
    pub async fn open_session(&mut self) -> Result<AgentSession, ClientError> {
        self.inner.ready().await?;

        let (outbound, rx) = mpsc::channel::<AgentRequest>(SESSION_BUFFER);
        let codec: ProstCodec<AgentRequest, AgentResponse> = ProstCodec::default();
        let path = PathAndQuery::from_static(CONNECT_PATH);
        let response = self
            .inner
            .streaming(Request::new(ReceiverStream::new(rx)), path, codec)
            .await?;

        Ok(AgentSession {
            outbound: Some(outbound),
            inbound: response.into_inner(),
        })
    }
}

/// One live `Connect` exchange with an agent.
///
/// Single-producer on send and single-consumer on receive; the owner holds
/// both ends for the lifetime of one request. Dropping the session cancels
/// the RPC.
pub struct AgentSession {
    outbound: Option<mpsc::Sender<AgentRequest>>,
    inbound: Streaming<AgentResponse>,
}

impl AgentSession {
    /// Send a request on the stream.
    pub async fn send(&mut self, request: AgentRequest) -> Result<(), ClientError> {
        let outbound = self.outbound.as_ref().ok_or(ClientError::SendClosed)?;
        outbound
            .send(request)
            .await
            .map_err(|_| ClientError::SendClosed)
    }

    /// Half-close the send side, signalling that no more requests follow.
    ///
    /// The agent needs this to know it can finish its response stream and
    /// close cleanly.
    pub fn close_send(&mut self) {
        self.outbound = None;
    }

    /// Receive the next response. `Ok(None)` is a clean end of stream.
    pub async fn recv(&mut self) -> Result<Option<AgentResponse>, Status> {
        self.inbound.message().await
    }

    /// Consume the session, keeping only the inbound half.
    ///
    /// Call after [`close_send`](Self::close_send); useful for handing the
    /// response stream to a pump loop.
    pub fn into_inbound(self) -> Streaming<AgentResponse> {
        self.inbound
    }
}
