// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pod manager: agent-shaped operations over the raw cluster API.
//!
//! The manager owns the pod template (image, port, labels) and the
//! readiness/address logic. It never retries: transport failures propagate
//! to callers, and a `Deleted` event always terminates a wait.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use super::{
    AGENT_ID_LABEL, ClusterApi, ClusterError, PodEvent, PodId, PodSnapshot, PodSpec, Result,
    USER_ID_LABEL, user_id_selector,
};
use crate::config::Config;

/// Manages agent pods through a [`ClusterApi`] backend.
#[derive(Clone)]
pub struct PodManager {
    cluster: Arc<dyn ClusterApi>,
    agent_image: String,
    agent_port: u16,
    node_host: Option<String>,
}

impl PodManager {
    /// Create a manager over a cluster backend.
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        agent_image: String,
        agent_port: u16,
        node_host: Option<String>,
    ) -> Self {
        Self {
            cluster,
            agent_image,
            agent_port,
            node_host,
        }
    }

    /// Create a manager configured from the platform [`Config`].
    pub fn from_config(cluster: Arc<dyn ClusterApi>, config: &Config) -> Self {
        Self::new(
            cluster,
            config.agent_image(),
            config.agent_port,
            config.node_host.clone(),
        )
    }

    /// Submit a pod for the given id. Does not wait for readiness.
    pub async fn create_pod(&self, pod_id: &PodId) -> Result<()> {
        let mut labels = HashMap::new();
        labels.insert(USER_ID_LABEL.to_string(), pod_id.user_id.clone());
        labels.insert(AGENT_ID_LABEL.to_string(), pod_id.agent_id.clone());

        let spec = PodSpec {
            name: pod_id.name(),
            labels,
            image: self.agent_image.clone(),
            port: self.agent_port,
        };

        self.cluster.create_pod(spec).await?;
        info!(pod = %pod_id.name(), image = %self.agent_image, "Created agent pod");
        Ok(())
    }

    /// Fetch the pod snapshot for an id.
    pub async fn get_pod(&self, pod_id: &PodId) -> Result<PodSnapshot> {
        self.cluster.get_pod(&pod_id.name()).await
    }

    /// List all agent pods belonging to a user.
    pub async fn list_pods_for_user(&self, user_id: &str) -> Result<Vec<PodSnapshot>> {
        self.cluster.list_pods(&user_id_selector(user_id)).await
    }

    /// Request deletion of a pod. Returns once the cluster accepts it.
    pub async fn delete_pod(&self, pod_id: &PodId) -> Result<()> {
        self.cluster.delete_pod(&pod_id.name()).await?;
        info!(pod = %pod_id.name(), "Requested pod deletion");
        Ok(())
    }

    /// Delete every pod belonging to a user.
    pub async fn delete_pods_for_user(&self, user_id: &str) -> Result<()> {
        self.cluster.delete_pods(&user_id_selector(user_id)).await
    }

    /// Watch one pod's event stream.
    pub async fn watch_pod(&self, pod_id: &PodId) -> Result<tokio::sync::mpsc::Receiver<PodEvent>> {
        self.cluster.watch_pod(&pod_id.name()).await
    }

    /// Base URL of the agent's RPC endpoint, `http://{host}:{agent_port}`.
    ///
    /// Does not wait: fails with [`ClusterError::NotReady`] when the pod has
    /// no IP yet. When a node host override is configured (platform running
    /// outside the cluster), it replaces the pod IP.
    pub async fn pod_address(&self, pod_id: &PodId) -> Result<String> {
        let pod = self.get_pod(pod_id).await?;
        let pod_ip = match pod.pod_ip {
            Some(ip) if !ip.is_empty() => ip,
            _ => return Err(ClusterError::NotReady(pod_id.name())),
        };
        let host = self.node_host.as_deref().unwrap_or(&pod_ip);
        Ok(format!("http://{}:{}", host, self.agent_port))
    }

    /// Block until the pod is ready, it is deleted, or the watch fails.
    ///
    /// Takes an initial snapshot and returns immediately when it already
    /// satisfies the readiness predicate; otherwise consumes watch events
    /// until one does. The watch is torn down on every exit path because
    /// dropping the receiver ends it.
    pub async fn wait_for_pod_ready(&self, pod_id: &PodId) -> Result<PodSnapshot> {
        let pod = self.get_pod(pod_id).await?;
        if pod.is_ready() {
            return Ok(pod);
        }

        debug!(pod = %pod_id.name(), phase = pod.phase.as_str(), "Waiting for pod to become ready");
        let mut events = self.watch_pod(pod_id).await?;

        while let Some(event) = events.recv().await {
            match event {
                PodEvent::Added(pod) | PodEvent::Modified(pod) => {
                    if pod.is_ready() {
                        info!(pod = %pod_id.name(), "Pod is ready");
                        return Ok(pod);
                    }
                }
                PodEvent::Deleted(_) => return Err(ClusterError::Deleted(pod_id.name())),
                PodEvent::Error(message) => return Err(ClusterError::Transport(message)),
            }
        }

        Err(ClusterError::WatchClosed(pod_id.name()))
    }

    /// Delete a pod, wait for it to disappear, then create it again.
    ///
    /// The watch is opened before the delete so the `Deleted` event cannot
    /// be missed.
    pub async fn restart_pod(&self, pod_id: &PodId) -> Result<()> {
        let mut events = self.watch_pod(pod_id).await?;

        self.delete_pod(pod_id).await?;

        loop {
            match events.recv().await {
                Some(PodEvent::Deleted(_)) => break,
                Some(PodEvent::Error(message)) => return Err(ClusterError::Transport(message)),
                Some(_) => continue,
                None => return Err(ClusterError::WatchClosed(pod_id.name())),
            }
        }
        drop(events);

        self.create_pod(pod_id).await
    }
}
