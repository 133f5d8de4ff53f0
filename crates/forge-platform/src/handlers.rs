// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP handlers for the consumer API.
//!
//! Synchronous endpoints (create/list/get/delete) are cluster pass-throughs
//! that propagate errors to the response. The command endpoints validate,
//! reply `202 Accepted`, and hand the real work to a detached task; errors
//! after the 202 surface only through the webhook.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cluster::{PodId, PodSnapshot};
use crate::server::{ApiError, AppState};
use crate::webhook::WebhookConfig;

/// Request body for creating an agent.
#[derive(Debug, Deserialize)]
pub struct CreateAgentBody {
    /// The user the new agent belongs to.
    #[serde(default)]
    pub owner_id: String,
}

/// Request body for sending a message to an agent.
#[derive(Debug, Deserialize)]
pub struct SendMessageBody {
    /// Message content; required.
    #[serde(default)]
    pub content: String,
    /// Destination webhook URL; required.
    #[serde(default)]
    pub webhook_url: String,
    /// Optional HMAC signing secret.
    #[serde(default)]
    pub webhook_secret: String,
    /// Optional caller-supplied request id.
    #[serde(default)]
    pub request_id: Option<String>,
}

/// Request body for interrupting an agent.
#[derive(Debug, Deserialize)]
pub struct InterruptBody {
    /// Destination webhook URL; required.
    #[serde(default)]
    pub webhook_url: String,
    /// Optional HMAC signing secret.
    #[serde(default)]
    pub webhook_secret: String,
    /// Optional caller-supplied request id.
    #[serde(default)]
    pub request_id: Option<String>,
}

/// Acknowledgement for an accepted asynchronous command.
#[derive(Debug, Serialize)]
pub struct CommandAccepted {
    /// The request id events will carry.
    pub request_id: String,
    /// The target agent.
    pub agent_id: String,
    /// "processing" or "interrupting".
    pub status: &'static str,
}

/// Live agent status attached to responses when `refresh=true` succeeds.
#[derive(Debug, Serialize)]
pub struct AgentStatusView {
    /// Agent-side session identifier.
    pub session_id: String,
    /// Current execution state.
    pub state: String,
    /// Highest event ordinal emitted so far.
    pub latest_seq: u64,
    /// Model currently in use.
    pub current_model: String,
    /// Permission mode currently in use.
    pub permission_mode: String,
    /// Milliseconds since the agent process started.
    pub uptime_ms: i64,
}

/// Pod attributes exposed over the API.
#[derive(Debug, Serialize)]
pub struct AgentView {
    /// Agent identifier.
    pub agent_id: String,
    /// Owning user.
    pub user_id: String,
    /// Workload name.
    pub name: String,
    /// Observed pod phase.
    pub phase: String,
    /// Assigned pod IP, if any.
    pub pod_ip: Option<String>,
    /// Whether the pod satisfies the readiness predicate.
    pub ready: bool,
    /// When the pod was created.
    pub created_at: DateTime<Utc>,
    /// Live status, present only on refresh.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AgentStatusView>,
}

impl AgentView {
    fn from_pod(pod: &PodSnapshot) -> Self {
        let pod_id = PodId::from_labels(&pod.labels);
        Self {
            agent_id: pod_id
                .as_ref()
                .map(|id| id.agent_id.clone())
                .unwrap_or_default(),
            user_id: pod_id
                .as_ref()
                .map(|id| id.user_id.clone())
                .unwrap_or_default(),
            name: pod.name.clone(),
            phase: pod.phase.as_str().to_string(),
            pod_ip: pod.pod_ip.clone(),
            ready: pod.is_ready(),
            created_at: pod.created_at,
            status: None,
        }
    }
}

/// Agent collection listing.
#[derive(Debug, Serialize)]
pub struct AgentList {
    /// The user's agents.
    pub agents: Vec<AgentView>,
    /// Number of agents returned.
    pub total: usize,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UserQuery {
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GetQuery {
    user_id: Option<String>,
    #[serde(default)]
    refresh: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DeleteQuery {
    user_id: Option<String>,
    #[serde(default)]
    graceful: Option<bool>,
}

fn require_user_id(user_id: Option<String>) -> Result<String, ApiError> {
    user_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::bad_request("user_id query param is required"))
}

/// POST /api/v1/agents
pub(crate) async fn create_agent(
    State(state): State<AppState>,
    body: Result<Json<CreateAgentBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body.map_err(|_| ApiError::bad_request("invalid request body"))?;
    if body.owner_id.is_empty() {
        return Err(ApiError::bad_request("owner_id is required"));
    }

    let pod_id = state
        .processor
        .create_agent(&body.owner_id)
        .await
        .map_err(|error| {
            ApiError::from(error)
                .with_display_message("The agent could not be started. Please try again.")
        })?;

    let pod = state
        .processor
        .get_agent(&pod_id.user_id, &pod_id.agent_id)
        .await?;

    Ok((StatusCode::CREATED, Json(AgentView::from_pod(&pod))))
}

/// GET /api/v1/agents?user_id=…
pub(crate) async fn list_agents(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = require_user_id(query.user_id)?;

    let pods = state.processor.list_agents(&user_id).await?;
    let agents: Vec<AgentView> = pods.iter().map(AgentView::from_pod).collect();

    Ok(Json(AgentList {
        total: agents.len(),
        agents,
    }))
}

/// GET /api/v1/agents/:id?user_id=…[&refresh=true]
pub(crate) async fn get_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Query(query): Query<GetQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = require_user_id(query.user_id)?;

    let pod = state.processor.get_agent(&user_id, &agent_id).await?;
    let mut view = AgentView::from_pod(&pod);

    // Best-effort enrichment; an unreachable agent is not an error here.
    if query.refresh.unwrap_or(false) && pod.is_ready() {
        match state.processor.get_status(&user_id, &agent_id).await {
            Ok(status) => {
                let state_label = forge_protocol::AgentState::try_from(status.state)
                    .map(forge_protocol::AgentState::label)
                    .unwrap_or("unknown");
                view.status = Some(AgentStatusView {
                    session_id: status.session_id,
                    state: state_label.to_string(),
                    latest_seq: status.latest_seq,
                    current_model: status.current_model,
                    permission_mode: status.permission_mode,
                    uptime_ms: status.uptime_ms,
                });
            }
            Err(error) => warn!(agent_id, %error, "status refresh failed"),
        }
    }

    Ok(Json(view))
}

/// DELETE /api/v1/agents/:id?user_id=…[&graceful=true]
pub(crate) async fn delete_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = require_user_id(query.user_id)?;

    state
        .processor
        .delete_agent(&user_id, &agent_id, query.graceful.unwrap_or(false))
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/agents/:id/messages?user_id=…
pub(crate) async fn send_message(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Query(query): Query<UserQuery>,
    body: Result<Json<SendMessageBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = require_user_id(query.user_id)?;
    let Json(body) = body.map_err(|_| ApiError::bad_request("invalid request body"))?;

    if body.content.is_empty() {
        return Err(ApiError::bad_request("content is required"));
    }
    if body.webhook_url.is_empty() {
        return Err(ApiError::bad_request("webhook_url is required"));
    }

    let request_id = effective_request_id(body.request_id);
    let webhook_cfg = WebhookConfig {
        url: body.webhook_url,
        secret: body.webhook_secret,
    };

    // Detached: the work must outlive this request's future.
    let processor = state.processor.clone();
    let task_ids = (user_id, agent_id.clone(), request_id.clone());
    tokio::spawn(async move {
        let (user_id, agent_id, request_id) = task_ids;
        if let Err(error) = processor
            .send_message_with_webhook(&user_id, &agent_id, &request_id, &body.content, webhook_cfg)
            .await
        {
            warn!(agent_id, request_id, %error, "message processing failed");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(CommandAccepted {
            request_id,
            agent_id,
            status: "processing",
        }),
    ))
}

/// POST /api/v1/agents/:id/interrupt?user_id=…
pub(crate) async fn interrupt(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Query(query): Query<UserQuery>,
    body: Result<Json<InterruptBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = require_user_id(query.user_id)?;
    let Json(body) = body.map_err(|_| ApiError::bad_request("invalid request body"))?;

    if body.webhook_url.is_empty() {
        return Err(ApiError::bad_request("webhook_url is required"));
    }

    let request_id = effective_request_id(body.request_id);
    let webhook_cfg = WebhookConfig {
        url: body.webhook_url,
        secret: body.webhook_secret,
    };

    let processor = state.processor.clone();
    let task_ids = (user_id, agent_id.clone(), request_id.clone());
    tokio::spawn(async move {
        let (user_id, agent_id, request_id) = task_ids;
        if let Err(error) = processor
            .interrupt_with_webhook(&user_id, &agent_id, &request_id, webhook_cfg)
            .await
        {
            warn!(agent_id, request_id, %error, "interrupt processing failed");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(CommandAccepted {
            request_id,
            agent_id,
            status: "interrupting",
        }),
    ))
}

/// GET /healthz
pub(crate) async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

/// GET /readyz
pub(crate) async fn readyz(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    state
        .store
        .health_check()
        .await
        .map_err(|error| ApiError::service_unavailable(format!("database unreachable: {}", error)))?;

    Ok(Json(serde_json::json!({"status": "ready"})))
}

fn effective_request_id(supplied: Option<String>) -> String {
    supplied
        .filter(|id| !id.is_empty())
        .unwrap_or_else(generate_request_id)
}

fn generate_request_id() -> String {
    format!("req_{}", hex::encode(rand::random::<[u8; 8]>()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_request_id_shape() {
        let id = generate_request_id();
        assert_eq!(id.len(), "req_".len() + 16);
        assert!(id.starts_with("req_"));
        assert!(id[4..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_effective_request_id_prefers_supplied() {
        assert_eq!(
            effective_request_id(Some("req_custom".to_string())),
            "req_custom"
        );
        assert!(effective_request_id(Some(String::new())).starts_with("req_"));
        assert!(effective_request_id(None).starts_with("req_"));
    }
}
