// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pod identity, cluster API abstraction, and the pod manager.
//!
//! The platform is orchestrator-agnostic: everything it needs from the
//! cluster is captured by the [`ClusterApi`] trait (create, get, list,
//! delete, watch). [`manager::PodManager`] layers the agent-specific
//! operations on top: address resolution, readiness waits, restarts.
//! [`mock::MockCluster`] is an in-memory backend used by tests and for
//! local development.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;

pub mod manager;
pub mod mock;

pub use manager::PodManager;
pub use mock::MockCluster;

/// Label carrying the owning user's id on agent pods.
pub const USER_ID_LABEL: &str = "user-id";

/// Label carrying the agent id on agent pods.
pub const AGENT_ID_LABEL: &str = "agent-id";

/// Label selector matching all pods of one user.
pub fn user_id_selector(user_id: &str) -> String {
    format!("{}={}", USER_ID_LABEL, user_id)
}

/// Identifies a pod by the `(user_id, agent_id)` pair that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PodId {
    /// Opaque consumer-supplied user identifier.
    pub user_id: String,
    /// Opaque agent identifier, unique per user.
    pub agent_id: String,
}

impl PodId {
    /// Create a pod id from its parts.
    pub fn new(user_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            agent_id: agent_id.into(),
        }
    }

    /// Canonical workload name: `"{user_id}-{agent_id}"`.
    pub fn name(&self) -> String {
        format!("{}-{}", self.user_id, self.agent_id)
    }

    /// Recover a pod id from workload labels, if both are present.
    pub fn from_labels(labels: &HashMap<String, String>) -> Option<Self> {
        let user_id = labels.get(USER_ID_LABEL)?;
        let agent_id = labels.get(AGENT_ID_LABEL)?;
        if user_id.is_empty() || agent_id.is_empty() {
            return None;
        }
        Some(Self::new(user_id, agent_id))
    }
}

/// Pod lifecycle phase as observed from the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodPhase {
    /// Accepted but not all containers are running yet.
    Pending,
    /// Bound to a node with all containers created.
    Running,
    /// All containers terminated successfully.
    Succeeded,
    /// At least one container terminated in failure.
    Failed,
    /// State could not be obtained.
    Unknown,
}

impl PodPhase {
    /// Lowercase label used in HTTP responses.
    pub fn as_str(self) -> &'static str {
        match self {
            PodPhase::Pending => "pending",
            PodPhase::Running => "running",
            PodPhase::Succeeded => "succeeded",
            PodPhase::Failed => "failed",
            PodPhase::Unknown => "unknown",
        }
    }
}

/// Point-in-time view of a pod as reported by the cluster.
#[derive(Debug, Clone)]
pub struct PodSnapshot {
    /// Workload name.
    pub name: String,
    /// Workload labels.
    pub labels: HashMap<String, String>,
    /// Observed phase.
    pub phase: PodPhase,
    /// Assigned pod IP, if any.
    pub pod_ip: Option<String>,
    /// Per-container ready flags; may be empty before the kubelet reports.
    pub container_ready: Vec<bool>,
    /// When the pod was created.
    pub created_at: DateTime<Utc>,
}

impl PodSnapshot {
    /// Readiness predicate: Running, an IP assigned, and every container
    /// ready. A running pod with an IP but no container statuses yet is
    /// also treated as ready.
    pub fn is_ready(&self) -> bool {
        if self.phase != PodPhase::Running {
            return false;
        }
        match &self.pod_ip {
            Some(ip) if !ip.is_empty() => {}
            _ => return false,
        }
        self.container_ready.iter().all(|ready| *ready)
    }
}

/// Everything needed to submit a pod to the cluster.
#[derive(Debug, Clone)]
pub struct PodSpec {
    /// Workload name; must be unique within the namespace.
    pub name: String,
    /// Workload labels.
    pub labels: HashMap<String, String>,
    /// Container image for the single agent container.
    pub image: String,
    /// The one container port the agent listens on.
    pub port: u16,
}

/// A pod state change observed through a watch.
#[derive(Debug, Clone)]
pub enum PodEvent {
    /// The pod appeared.
    Added(PodSnapshot),
    /// The pod changed.
    Modified(PodSnapshot),
    /// The pod was removed.
    Deleted(PodSnapshot),
    /// The watch itself failed.
    Error(String),
}

/// Errors from cluster operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClusterError {
    /// The pod does not exist.
    #[error("pod not found: {0}")]
    NotFound(String),

    /// A pod with this name already exists.
    #[error("pod already exists: {0}")]
    AlreadyExists(String),

    /// The pod exists but has no network address yet.
    #[error("pod not ready: {0} has no address assigned")]
    NotReady(String),

    /// The pod was deleted while being waited on.
    #[error("pod deleted: {0}")]
    Deleted(String),

    /// A watch ended without reaching the awaited state.
    #[error("watch closed for pod {0}")]
    WatchClosed(String),

    /// Transport failure talking to the cluster API.
    #[error("cluster transport error: {0}")]
    Transport(String),
}

/// Result type for cluster operations.
pub type Result<T> = std::result::Result<T, ClusterError>;

/// Minimal cluster surface the platform consumes.
///
/// Implementations are thin, stateless RPC wrappers; they never retry
/// internally, and every transport failure is surfaced to the caller.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Submit a pod. Fails with [`ClusterError::AlreadyExists`] when the
    /// name is taken. Does not wait for readiness.
    async fn create_pod(&self, spec: PodSpec) -> Result<()>;

    /// Fetch a pod snapshot by name.
    async fn get_pod(&self, name: &str) -> Result<PodSnapshot>;

    /// List pods matching a `key=value` label selector.
    async fn list_pods(&self, label_selector: &str) -> Result<Vec<PodSnapshot>>;

    /// Request deletion of a pod. Returns once the cluster accepts the
    /// request, not once the pod is gone; deleting an absent pod is a no-op.
    async fn delete_pod(&self, name: &str) -> Result<()>;

    /// Delete every pod matching a label selector.
    async fn delete_pods(&self, label_selector: &str) -> Result<()>;

    /// Watch one pod's event stream. Fails with [`ClusterError::NotFound`]
    /// when the pod does not exist at watch start. The stream ends when the
    /// receiver is dropped or the underlying watch closes.
    async fn watch_pod(&self, name: &str) -> Result<mpsc::Receiver<PodEvent>>;
}
