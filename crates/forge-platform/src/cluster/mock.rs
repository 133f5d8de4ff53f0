// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory cluster backend.
//!
//! Simulates the orchestrator without any real API server: pods live in a
//! map, watches are mpsc channels fed by state changes. Used by the test
//! suites and as the development backend when no real cluster is wired in.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, mpsc};

use super::{ClusterApi, ClusterError, PodEvent, PodPhase, PodSnapshot, PodSpec, Result};

/// Watch channel capacity. Events are state-change driven and consumed
/// promptly by waiters, so a small buffer suffices.
const WATCH_BUFFER: usize = 16;

/// In-memory [`ClusterApi`] implementation.
pub struct MockCluster {
    pods: Mutex<HashMap<String, PodSnapshot>>,
    watchers: Mutex<HashMap<String, Vec<mpsc::Sender<PodEvent>>>>,
    /// When true, created pods come up Running with an IP and a ready
    /// container immediately. When false they stay Pending until the test
    /// advances them with [`set_pod_status`](Self::set_pod_status).
    pub auto_ready: bool,
    /// IP assigned to auto-ready pods.
    pub pod_ip: String,
}

impl Default for MockCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCluster {
    /// Create a mock cluster where pods stay Pending until advanced.
    pub fn new() -> Self {
        Self {
            pods: Mutex::new(HashMap::new()),
            watchers: Mutex::new(HashMap::new()),
            auto_ready: false,
            pod_ip: "10.0.0.1".to_string(),
        }
    }

    /// Create a mock cluster where new pods become ready immediately.
    pub fn auto_ready() -> Self {
        Self {
            auto_ready: true,
            ..Self::new()
        }
    }

    /// Overwrite a pod's observed status and notify watchers.
    pub async fn set_pod_status(
        &self,
        name: &str,
        phase: PodPhase,
        pod_ip: Option<&str>,
        container_ready: Vec<bool>,
    ) {
        let snapshot = {
            let mut pods = self.pods.lock().await;
            let Some(pod) = pods.get_mut(name) else {
                return;
            };
            pod.phase = phase;
            pod.pod_ip = pod_ip.map(String::from);
            pod.container_ready = container_ready;
            pod.clone()
        };
        self.notify(name, PodEvent::Modified(snapshot)).await;
    }

    /// Current number of pods.
    pub async fn pod_count(&self) -> usize {
        self.pods.lock().await.len()
    }

    /// Names of all pods, for test assertions.
    pub async fn pod_names(&self) -> Vec<String> {
        self.pods.lock().await.keys().cloned().collect()
    }

    async fn notify(&self, name: &str, event: PodEvent) {
        let mut watchers = self.watchers.lock().await;
        if let Some(senders) = watchers.get_mut(name) {
            // Drop watchers whose receivers are gone.
            senders.retain(|sender| sender.try_send(event.clone()).is_ok());
        }
    }

    fn label_match(labels: &HashMap<String, String>, selector: &str) -> bool {
        match selector.split_once('=') {
            Some((key, value)) => labels.get(key).map(String::as_str) == Some(value),
            None => false,
        }
    }
}

#[async_trait]
impl ClusterApi for MockCluster {
    async fn create_pod(&self, spec: PodSpec) -> Result<()> {
        let snapshot = {
            let mut pods = self.pods.lock().await;
            if pods.contains_key(&spec.name) {
                return Err(ClusterError::AlreadyExists(spec.name));
            }

            let snapshot = PodSnapshot {
                name: spec.name.clone(),
                labels: spec.labels,
                phase: if self.auto_ready {
                    PodPhase::Running
                } else {
                    PodPhase::Pending
                },
                pod_ip: self.auto_ready.then(|| self.pod_ip.clone()),
                container_ready: if self.auto_ready { vec![true] } else { vec![] },
                created_at: Utc::now(),
            };
            pods.insert(spec.name.clone(), snapshot.clone());
            snapshot
        };

        let name = snapshot.name.clone();
        self.notify(&name, PodEvent::Added(snapshot)).await;
        Ok(())
    }

    async fn get_pod(&self, name: &str) -> Result<PodSnapshot> {
        self.pods
            .lock()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(name.to_string()))
    }

    async fn list_pods(&self, label_selector: &str) -> Result<Vec<PodSnapshot>> {
        Ok(self
            .pods
            .lock()
            .await
            .values()
            .filter(|pod| Self::label_match(&pod.labels, label_selector))
            .cloned()
            .collect())
    }

    async fn delete_pod(&self, name: &str) -> Result<()> {
        let removed = self.pods.lock().await.remove(name);
        if let Some(snapshot) = removed {
            self.notify(name, PodEvent::Deleted(snapshot)).await;
        }
        Ok(())
    }

    async fn delete_pods(&self, label_selector: &str) -> Result<()> {
        let names: Vec<String> = {
            let pods = self.pods.lock().await;
            pods.values()
                .filter(|pod| Self::label_match(&pod.labels, label_selector))
                .map(|pod| pod.name.clone())
                .collect()
        };
        for name in names {
            self.delete_pod(&name).await?;
        }
        Ok(())
    }

    async fn watch_pod(&self, name: &str) -> Result<mpsc::Receiver<PodEvent>> {
        if !self.pods.lock().await.contains_key(name) {
            return Err(ClusterError::NotFound(name.to_string()));
        }

        let (sender, receiver) = mpsc::channel(WATCH_BUFFER);
        self.watchers
            .lock()
            .await
            .entry(name.to_string())
            .or_default()
            .push(sender);
        Ok(receiver)
    }
}
