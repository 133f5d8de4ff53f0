// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Agent business logic between the HTTP surface and the infrastructure.
//!
//! The processor composes the pod manager, the agent RPC client, the
//! webhook delivery engine, and the delivery store into the four command
//! operations the HTTP surface consumes. Ownership is a straight DAG: the
//! HTTP surface owns the processor, the processor owns its collaborators,
//! and nothing points back.
//!
//! Command processing runs on futures detached from the HTTP request (the
//! handler replies `202 Accepted` and drops its context), so nothing here
//! may assume the caller is still around.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use forge_protocol::{
    AgentClient, AgentRequest, AgentResponse, AgentSession, GetStatusResponse, Status,
    agent_request,
};
use futures::Stream;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use crate::cluster::{PodId, PodManager, PodSnapshot};
use crate::error::{Error, Result};
use crate::store::DeliveryStore;
use crate::webhook::delivery::DeliveryEngine;
use crate::webhook::{WebhookConfig, convert};

/// Budget for the optional graceful-shutdown RPC during agent deletion.
const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Agent lifecycle and command processing.
pub struct Processor {
    pods: PodManager,
    webhooks: Arc<DeliveryEngine>,
    store: DeliveryStore,
}

impl Processor {
    /// Create a processor over its collaborators.
    pub fn new(pods: PodManager, webhooks: Arc<DeliveryEngine>, store: DeliveryStore) -> Self {
        Self {
            pods,
            webhooks,
            store,
        }
    }

    /// List all agent pods belonging to a user.
    pub async fn list_agents(&self, user_id: &str) -> Result<Vec<PodSnapshot>> {
        Ok(self.pods.list_pods_for_user(user_id).await?)
    }

    /// Fetch one agent's pod snapshot.
    pub async fn get_agent(&self, user_id: &str, agent_id: &str) -> Result<PodSnapshot> {
        let pod_id = PodId::new(user_id, agent_id);
        Ok(self.pods.get_pod(&pod_id).await?)
    }

    /// Retrieve real-time status from an agent via RPC.
    pub async fn get_status(&self, user_id: &str, agent_id: &str) -> Result<GetStatusResponse> {
        let pod_id = PodId::new(user_id, agent_id);
        let address = self.pods.pod_address(&pod_id).await?;
        let mut client = AgentClient::connect(address).await?;
        Ok(client.get_status().await?)
    }

    /// Create a new agent pod and wait for it to be ready.
    ///
    /// On a failed wait the pod is cleaned up best-effort on a detached
    /// task, so the cleanup survives cancellation of this future.
    pub async fn create_agent(&self, user_id: &str) -> Result<PodId> {
        let pod_id = PodId::new(user_id, generate_agent_id());

        self.pods.create_pod(&pod_id).await?;

        if let Err(error) = self.pods.wait_for_pod_ready(&pod_id).await {
            let pods = self.pods.clone();
            let cleanup_id = pod_id.clone();
            tokio::spawn(async move {
                if let Err(cleanup_error) = pods.delete_pod(&cleanup_id).await {
                    warn!(
                        pod = %cleanup_id.name(),
                        error = %cleanup_error,
                        "Failed to clean up pod that never became ready"
                    );
                }
            });
            return Err(error.into());
        }

        Ok(pod_id)
    }

    /// Remove an agent, optionally asking it to shut down first.
    ///
    /// The graceful shutdown RPC runs under a bounded timeout and any
    /// failure is swallowed (the pod might already be terminating). The pod
    /// is always deleted; only the final delete can fail this call.
    pub async fn delete_agent(&self, user_id: &str, agent_id: &str, graceful: bool) -> Result<()> {
        let pod_id = PodId::new(user_id, agent_id);

        if graceful {
            let shutdown = async {
                let address = self.pods.pod_address(&pod_id).await?;
                let mut client = AgentClient::connect(address).await?;
                client.shutdown(true).await?;
                Ok::<_, Error>(())
            };
            match tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, shutdown).await {
                Ok(Ok(())) => debug!(pod = %pod_id.name(), "Agent acknowledged graceful shutdown"),
                Ok(Err(error)) => {
                    debug!(pod = %pod_id.name(), %error, "Graceful shutdown failed, deleting anyway")
                }
                Err(_) => {
                    debug!(pod = %pod_id.name(), "Graceful shutdown timed out, deleting anyway")
                }
            }
        }

        self.pods.delete_pod(&pod_id).await?;
        Ok(())
    }

    /// Send a message to an agent and deliver its responses via webhook.
    pub async fn send_message_with_webhook(
        &self,
        user_id: &str,
        agent_id: &str,
        request_id: &str,
        content: &str,
        webhook_cfg: WebhookConfig,
    ) -> Result<()> {
        info!(agent_id, request_id, "sending message to agent");
        let command = agent_request::Command::SendMessage(forge_protocol::SendMessage {
            content: content.to_string(),
        });
        self.run_command(user_id, agent_id, request_id, command, webhook_cfg)
            .await
    }

    /// Interrupt an agent and deliver the outcome via webhook.
    pub async fn interrupt_with_webhook(
        &self,
        user_id: &str,
        agent_id: &str,
        request_id: &str,
        webhook_cfg: WebhookConfig,
    ) -> Result<()> {
        info!(agent_id, request_id, "interrupting agent");
        let command = agent_request::Command::Interrupt(forge_protocol::Interrupt {});
        self.run_command(user_id, agent_id, request_id, command, webhook_cfg)
            .await
    }

    /// Shared machinery for the asynchronous commands: track, connect, send
    /// exactly one request, half-close, then pump responses.
    async fn run_command(
        &self,
        user_id: &str,
        agent_id: &str,
        request_id: &str,
        command: agent_request::Command,
        webhook_cfg: WebhookConfig,
    ) -> Result<()> {
        // Tracking is best-effort: webhooks still flow without a record.
        if let Err(error) = self
            .store
            .create_delivery(request_id, agent_id, &webhook_cfg)
            .await
        {
            error!(%error, request_id, "failed to create delivery record");
        }

        let mut session = match self.connect_to_agent(user_id, agent_id).await {
            Ok(session) => session,
            Err(error) => {
                let payload = convert::error_payload(
                    agent_id,
                    request_id,
                    0,
                    "AGENT_UNREACHABLE",
                    &error.to_string(),
                    false,
                );
                self.webhooks.clone().deliver_async(webhook_cfg, payload);
                let _ = self.store.mark_failed(request_id).await;
                return Err(error);
            }
        };

        let request = AgentRequest {
            request_id: request_id.to_string(),
            command: Some(command),
        };

        if let Err(error) = session.send(request).await {
            session.close_send();
            let payload = convert::error_payload(
                agent_id,
                request_id,
                0,
                "SEND_FAILED",
                &error.to_string(),
                false,
            );
            self.webhooks.clone().deliver_async(webhook_cfg, payload);
            let _ = self.store.mark_failed(request_id).await;
            return Err(error.into());
        }

        // Half-close immediately - exactly one request goes out per stream,
        // and the agent needs the close to finish its response stream.
        session.close_send();

        self.stream_to_webhook(session.into_inbound(), agent_id, request_id, &webhook_cfg)
            .await
    }

    /// Resolve the agent's address and open a `Connect` session.
    async fn connect_to_agent(&self, user_id: &str, agent_id: &str) -> Result<AgentSession> {
        let pod_id = PodId::new(user_id, agent_id);
        let address = self.pods.pod_address(&pod_id).await?;
        let mut client = AgentClient::connect(address).await?;
        Ok(client.open_session().await?)
    }

    /// Pump the agent's response stream into the webhook engine.
    ///
    /// Deliveries are serial and in-order; a delivery failure is logged but
    /// does not stop the pump. The loop ends on a final payload, a clean
    /// end of stream, or a stream error.
    async fn stream_to_webhook<S>(
        &self,
        mut stream: S,
        agent_id: &str,
        request_id: &str,
        webhook_cfg: &WebhookConfig,
    ) -> Result<()>
    where
        S: Stream<Item = std::result::Result<AgentResponse, Status>> + Unpin + Send,
    {
        loop {
            let response = match stream.next().await {
                None => {
                    debug!(request_id, "stream completed");
                    let _ = self.store.mark_completed(request_id).await;
                    return Ok(());
                }
                Some(Err(status)) => {
                    error!(request_id, error = %status, "stream receive error");
                    let payload = convert::error_payload(
                        agent_id,
                        request_id,
                        0,
                        "STREAM_ERROR",
                        &status.to_string(),
                        false,
                    );
                    if let Err(delivery_error) = self.webhooks.deliver(webhook_cfg, &payload).await
                    {
                        error!(request_id, error = %delivery_error, "failed to deliver error webhook");
                    }
                    let _ = self.store.mark_failed(request_id).await;
                    return Err(Error::Stream(status.to_string()));
                }
                Some(Ok(response)) => response,
            };

            let payload = convert::response_to_payload(&response, agent_id, request_id);

            let _ = self
                .store
                .update_delivery_seq(request_id, response.seq as i64, payload.event_type.as_str())
                .await;

            let outcome = self.webhooks.deliver(webhook_cfg, &payload).await;
            let snapshot = self.webhooks.circuit_snapshot(&webhook_cfg.url).await;
            let (attempts, last_error) = match &outcome {
                Ok(receipt) => (receipt.attempts, None),
                Err(error) => (error.attempts(), Some(error.to_string())),
            };
            let _ = self
                .store
                .record_attempt(
                    request_id,
                    attempts as i32,
                    last_error.as_deref(),
                    snapshot.failures as i32,
                    snapshot.open_until,
                )
                .await;

            if let Err(error) = outcome {
                // Keep pumping: one missed payload must not starve the rest
                // of the stream.
                error!(request_id, seq = response.seq, %error, "failed to deliver webhook");
            }

            if payload.is_final {
                info!(request_id, seq = response.seq, "received final message");
                let _ = self.store.mark_completed(request_id).await;
                return Ok(());
            }
        }
    }
}

/// Fresh agent id from a high-resolution clock.
fn generate_agent_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("agent-{}", nanos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterApi, MockCluster};
    use crate::webhook::delivery::DeliveryConfig;
    use forge_protocol::{AgentEvent, agent_response};
    use httpmock::prelude::*;

    fn test_store() -> DeliveryStore {
        // Nothing listens on port 9; store writes are best-effort and the
        // short acquire timeout keeps them from stalling the tests.
        let pool = sqlx::postgres::PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(50))
            .connect_lazy("postgres://forge@127.0.0.1:9/forge_test")
            .expect("lazy pool");
        DeliveryStore::new(pool)
    }

    fn test_processor(cluster: Arc<MockCluster>) -> Processor {
        let pods = PodManager::new(cluster, "test-image:latest".to_string(), 8080, None);
        let engine = DeliveryEngine::new(DeliveryConfig {
            max_retries: 1,
            ..DeliveryConfig::default()
        })
        .unwrap();
        Processor::new(pods, Arc::new(engine), test_store())
    }

    fn event_response(seq: u64, event_type: &str) -> AgentResponse {
        AgentResponse {
            request_id: "req_1".to_string(),
            session_id: "sess_1".to_string(),
            seq,
            timestamp: 1_700_000_000_000,
            state: forge_protocol::AgentState::Processing as i32,
            payload: Some(agent_response::Payload::Event(AgentEvent {
                event_type: event_type.to_string(),
                event_json: br#"{"k":"v"}"#.to_vec(),
            })),
        }
    }

    #[test]
    fn test_generate_agent_id_format_and_uniqueness() {
        let a = generate_agent_id();
        let b = generate_agent_id();
        assert!(a.starts_with("agent-"));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_create_agent_with_ready_cluster() {
        let cluster = Arc::new(MockCluster::auto_ready());
        let processor = test_processor(cluster.clone());

        let pod_id = processor.create_agent("u1").await.unwrap();
        assert_eq!(pod_id.user_id, "u1");
        assert!(pod_id.agent_id.starts_with("agent-"));
        assert_eq!(cluster.pod_count().await, 1);
    }

    #[tokio::test]
    async fn test_create_agent_cleans_up_on_deleted_pod() {
        let cluster = Arc::new(MockCluster::new());
        let processor = test_processor(cluster.clone());

        // Delete the pod out from under the readiness wait.
        let saboteur = cluster.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let names = saboteur.pod_names().await;
            for name in names {
                let _ = saboteur.delete_pod(&name).await;
            }
        });

        let result = processor.create_agent("u1").await;
        handle.await.unwrap();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_unreachable_agent_sends_error_webhook_and_fails_record() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/hook")
                    .body_contains("AGENT_UNREACHABLE")
                    .body_contains("\"is_final\":true");
                then.status(200);
            })
            .await;

        let cluster = Arc::new(MockCluster::new());
        let processor = test_processor(cluster);

        let webhook_cfg = WebhookConfig {
            url: server.url("/hook"),
            secret: String::new(),
        };
        let result = processor
            .send_message_with_webhook("u1", "a1", "req_1", "hello", webhook_cfg)
            .await;
        assert!(result.is_err());

        // The error payload is delivered on a detached task.
        for _ in 0..50 {
            if mock.hits_async().await >= 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(mock.hits_async().await, 1);
    }

    #[tokio::test]
    async fn test_delete_agent_graceful_with_dead_agent() {
        // Pod reports an IP nothing listens on; node_host points the RPC at
        // a closed local port so the shutdown fails fast and is swallowed.
        let cluster = Arc::new(MockCluster::auto_ready());
        let pods = PodManager::new(cluster.clone(), "img:latest".to_string(), 9, Some("127.0.0.1".to_string()));
        let engine = DeliveryEngine::new(DeliveryConfig::default()).unwrap();
        let processor = Processor::new(pods, Arc::new(engine), test_store());

        processor.create_agent("u1").await.unwrap();
        let names = cluster.pod_names().await;
        let agent_id = names[0].strip_prefix("u1-").unwrap().to_string();

        processor.delete_agent("u1", &agent_id, true).await.unwrap();
        assert_eq!(cluster.pod_count().await, 0);
    }

    #[tokio::test]
    async fn test_pump_happy_path_delivers_all_and_marks_final() {
        let server = MockServer::start_async().await;
        let all = server
            .mock_async(|when, then| {
                when.method(POST).path("/hook");
                then.status(200);
            })
            .await;
        let final_event = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/hook")
                    .body_contains("session.completed")
                    .body_contains("\"is_final\":true");
                then.status(200);
            })
            .await;

        let cluster = Arc::new(MockCluster::new());
        let processor = test_processor(cluster);
        let webhook_cfg = WebhookConfig {
            url: server.url("/hook"),
            secret: String::new(),
        };

        let stream = futures::stream::iter(vec![
            Ok(event_response(1, "message.part.updated")),
            Ok(event_response(2, "message.part.updated")),
            Ok(event_response(3, "session.completed")),
        ]);

        processor
            .stream_to_webhook(stream, "a1", "req_1", &webhook_cfg)
            .await
            .unwrap();

        assert_eq!(all.hits_async().await, 3);
        assert_eq!(final_event.hits_async().await, 1);
    }

    #[tokio::test]
    async fn test_pump_continues_after_client_error() {
        let server = MockServer::start_async().await;
        let first = server
            .mock_async(|when, then| {
                when.method(POST).path("/hook").body_contains("\"seq\":1");
                then.status(404);
            })
            .await;
        let rest = server
            .mock_async(|when, then| {
                when.method(POST).path("/hook").body_contains("\"seq\":2");
                then.status(200);
            })
            .await;
        let last = server
            .mock_async(|when, then| {
                when.method(POST).path("/hook").body_contains("\"seq\":3");
                then.status(200);
            })
            .await;

        let cluster = Arc::new(MockCluster::new());
        let processor = test_processor(cluster);
        let webhook_cfg = WebhookConfig {
            url: server.url("/hook"),
            secret: String::new(),
        };

        let stream = futures::stream::iter(vec![
            Ok(event_response(1, "message.part.updated")),
            Ok(event_response(2, "message.part.updated")),
            Ok(event_response(3, "session.completed")),
        ]);

        // Delivery failure on seq 1 must not abort the pump.
        processor
            .stream_to_webhook(stream, "a1", "req_1", &webhook_cfg)
            .await
            .unwrap();

        // 4xx means exactly one attempt for that payload.
        assert_eq!(first.hits_async().await, 1);
        assert_eq!(rest.hits_async().await, 1);
        assert_eq!(last.hits_async().await, 1);
    }

    #[tokio::test]
    async fn test_pump_clean_eof_without_final_is_success() {
        let server = MockServer::start_async().await;
        let all = server
            .mock_async(|when, then| {
                when.method(POST).path("/hook");
                then.status(200);
            })
            .await;

        let cluster = Arc::new(MockCluster::new());
        let processor = test_processor(cluster);
        let webhook_cfg = WebhookConfig {
            url: server.url("/hook"),
            secret: String::new(),
        };

        let stream = futures::stream::iter(vec![Ok(event_response(1, "message.part.updated"))]);
        processor
            .stream_to_webhook(stream, "a1", "req_1", &webhook_cfg)
            .await
            .unwrap();

        assert_eq!(all.hits_async().await, 1);
    }

    #[tokio::test]
    async fn test_pump_stream_error_sends_stream_error_webhook() {
        let server = MockServer::start_async().await;
        let error_hook = server
            .mock_async(|when, then| {
                when.method(POST).path("/hook").body_contains("STREAM_ERROR");
                then.status(200);
            })
            .await;

        let cluster = Arc::new(MockCluster::new());
        let processor = test_processor(cluster);
        let webhook_cfg = WebhookConfig {
            url: server.url("/hook"),
            secret: String::new(),
        };

        let stream = futures::stream::iter(vec![
            Ok(event_response(1, "message.part.updated")),
            Err(Status::internal("connection reset")),
        ]);

        let result = processor
            .stream_to_webhook(stream, "a1", "req_1", &webhook_cfg)
            .await;
        assert!(matches!(result, Err(Error::Stream(_))));
        assert_eq!(error_hook.hits_async().await, 1);
    }
}
