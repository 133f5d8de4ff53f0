// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for forge-platform.

use std::time::Duration;

/// Platform configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen port
    pub port: u16,
    /// Grace period for draining connections on shutdown
    pub shutdown_timeout: Duration,
    /// HTTP read timeout
    pub read_timeout: Duration,
    /// HTTP write timeout (bounds synchronous request handling)
    pub write_timeout: Duration,
    /// CORS allow-list; empty disables the CORS layer
    pub cors_origins: Vec<String>,
    /// Delivery store connection string
    pub database_url: String,
    /// Path to a kubeconfig for out-of-cluster access (cluster backends only)
    pub kube_config_path: Option<String>,
    /// Namespace agent pods are created in
    pub agent_namespace: String,
    /// Host override for pod addresses when running outside the cluster
    pub node_host: Option<String>,
    /// Container registry host for the agent image
    pub container_registry: String,
    /// Registry namespace/org; None for registries without namespaces
    pub container_namespace: Option<String>,
    /// Agent image name
    pub agent_image_name: String,
    /// Agent image tag
    pub agent_image_tag: String,
    /// Container port the agent's RPC server listens on
    pub agent_port: u16,
    /// Per-attempt timeout for outbound webhook POSTs
    pub webhook_timeout: Duration,
    /// Attempt cap for synchronous webhook delivery
    pub webhook_max_retries: usize,
    /// Consecutive failures before a webhook URL's circuit opens
    pub webhook_circuit_threshold: u32,
    /// How long an opened circuit stays open
    pub webhook_circuit_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let port: u16 = std::env::var("FORGE_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let database_url = std::env::var("FORGE_DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("FORGE_DATABASE_URL"))?;

        let cors_origins = std::env::var("FORGE_CORS_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let agent_port: u16 = std::env::var("FORGE_AGENT_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        Ok(Self {
            port,
            shutdown_timeout: secs_env("FORGE_SHUTDOWN_TIMEOUT_SECS", 10),
            read_timeout: secs_env("FORGE_READ_TIMEOUT_SECS", 10),
            write_timeout: secs_env("FORGE_WRITE_TIMEOUT_SECS", 10),
            cors_origins,
            database_url,
            kube_config_path: std::env::var("FORGE_KUBE_CONFIG_PATH").ok(),
            agent_namespace: std::env::var("FORGE_AGENT_NAMESPACE")
                .unwrap_or_else(|_| "default".to_string()),
            node_host: std::env::var("FORGE_NODE_HOST").ok().filter(|v| !v.is_empty()),
            container_registry: std::env::var("FORGE_CONTAINER_REGISTRY")
                .unwrap_or_else(|_| "ghcr.io".to_string()),
            container_namespace: std::env::var("FORGE_CONTAINER_NAMESPACE")
                .ok()
                .filter(|v| !v.is_empty()),
            agent_image_name: std::env::var("FORGE_AGENT_IMAGE_NAME")
                .unwrap_or_else(|_| "forge-agent".to_string()),
            agent_image_tag: std::env::var("FORGE_AGENT_IMAGE_TAG")
                .unwrap_or_else(|_| "latest".to_string()),
            agent_port,
            webhook_timeout: secs_env("FORGE_WEBHOOK_TIMEOUT_SECS", 10),
            webhook_max_retries: std::env::var("FORGE_WEBHOOK_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            webhook_circuit_threshold: std::env::var("FORGE_WEBHOOK_CIRCUIT_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            webhook_circuit_timeout: secs_env("FORGE_WEBHOOK_CIRCUIT_TIMEOUT_SECS", 60),
        })
    }

    /// Full image reference for the agent container.
    ///
    /// e.g. `ghcr.io/myorg/forge-agent:latest`, or `registry:5111/forge-agent:v2`
    /// when no registry namespace is configured.
    pub fn agent_image(&self) -> String {
        match &self.container_namespace {
            Some(namespace) => format!(
                "{}/{}/{}:{}",
                self.container_registry, namespace, self.agent_image_name, self.agent_image_tag
            ),
            None => format!(
                "{}/{}:{}",
                self.container_registry, self.agent_image_name, self.agent_image_tag
            ),
        }
    }
}

fn secs_env(key: &str, default: u64) -> Duration {
    let secs = std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default);
    Duration::from_secs(secs)
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// A port number is invalid.
    #[error("Invalid port number")]
    InvalidPort,
}
